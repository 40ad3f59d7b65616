//! Story input that seeds every session

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One character as supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterInput {
    pub name: String,
    #[serde(default)]
    pub appearance: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub role: String,
    /// Free text such as "main character" or "supporting"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<String>,
}

/// Structured scene description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SceneDetail {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub characters_involved: Vec<String>,
    #[serde(default)]
    pub setting: String,
    #[serde(default)]
    pub mood: String,
}

/// Scenes arrive either as bare strings or as structured entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SceneEntry {
    Text(String),
    Detail(SceneDetail),
}

impl SceneEntry {
    /// One-line summary suitable for prompts
    pub fn summary(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Detail(detail) if detail.description.is_empty() => detail.title.clone(),
            Self::Detail(detail) if detail.title.is_empty() => detail.description.clone(),
            Self::Detail(detail) => format!("{}: {}", detail.title, detail.description),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Storyline {
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub tone: String,
    #[serde(default)]
    pub scenes: Vec<SceneEntry>,
}

/// Full input context of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryInput {
    pub characters: Vec<CharacterInput>,
    #[serde(default)]
    pub storyline: Storyline,
}

impl StoryInput {
    /// The character a session develops
    pub fn primary_character(&self) -> Option<&CharacterInput> {
        self.characters.first()
    }

    /// Copy of this input focused on a single character
    pub fn for_character(&self, character: &CharacterInput) -> Self {
        Self {
            characters: vec![character.clone()],
            storyline: self.storyline.clone(),
        }
    }
}

/// Depth selector passed through to generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Fast,
    #[default]
    Balanced,
    Deep,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Balanced => "balanced",
            Self::Deep => "deep",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "balanced" => Ok(Self::Balanced),
            "deep" => Ok(Self::Deep),
            other => Err(format!("Unknown mode '{}', expected fast, balanced or deep", other)),
        }
    }
}
