//! Task kinds and per-task status
//!
//! The set of generation tasks is closed: every valid task name is a variant
//! of [`TaskKind`], so dispatch is checked at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A task name that does not match any [`TaskKind`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown task: '{0}'")]
pub struct UnknownTaskError(pub String);

/// One named unit of generation work
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Personality,
    BackstoryMotivation,
    VoiceDialogue,
    PhysicalDescription,
    StoryArc,
    Relationships,
    ImageGeneration,
}

impl TaskKind {
    /// All task kinds in declaration order
    pub const ALL: [TaskKind; 7] = [
        TaskKind::Personality,
        TaskKind::BackstoryMotivation,
        TaskKind::VoiceDialogue,
        TaskKind::PhysicalDescription,
        TaskKind::StoryArc,
        TaskKind::Relationships,
        TaskKind::ImageGeneration,
    ];

    /// Wire name, identical to the serde representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Personality => "personality",
            Self::BackstoryMotivation => "backstory_motivation",
            Self::VoiceDialogue => "voice_dialogue",
            Self::PhysicalDescription => "physical_description",
            Self::StoryArc => "story_arc",
            Self::Relationships => "relationships",
            Self::ImageGeneration => "image_generation",
        }
    }

    /// First word of the wire name, accepted as an alias when parsing
    pub fn short_name(&self) -> &'static str {
        let name = self.as_str();
        name.split('_').next().unwrap_or(name)
    }

    /// Human readable label
    pub fn title(&self) -> &'static str {
        match self {
            Self::Personality => "Personality",
            Self::BackstoryMotivation => "Backstory & Motivation",
            Self::VoiceDialogue => "Voice & Dialogue",
            Self::PhysicalDescription => "Physical Description",
            Self::StoryArc => "Story Arc",
            Self::Relationships => "Relationships",
            Self::ImageGeneration => "Image Generation",
        }
    }

    /// Whether consolidation refuses to run without this task's output
    pub fn is_required(&self) -> bool {
        !matches!(self, Self::ImageGeneration)
    }

    /// Key under which regeneration feedback appears in the task context
    pub fn feedback_key(&self) -> String {
        format!("{}_feedback", self.as_str())
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = UnknownTaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        TaskKind::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .or_else(|| TaskKind::ALL.into_iter().find(|t| t.short_name() == normalized))
            .ok_or_else(|| UnknownTaskError(s.to_string()))
    }
}

/// Lifecycle of a task within its session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Status entry tracked per task in the knowledge base
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    pub status: TaskStatus,
    pub wave: u32,
    /// Last failure message, cleared on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskState {
    pub fn pending(wave: u32) -> Self {
        Self {
            status: TaskStatus::Pending,
            wave,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_every_kind() {
        for kind in TaskKind::ALL {
            assert_eq!(kind.as_str().parse::<TaskKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_parse_is_lenient_about_case_and_dashes() {
        assert_eq!("Story-Arc".parse::<TaskKind>().unwrap(), TaskKind::StoryArc);
        assert_eq!(" personality ".parse::<TaskKind>().unwrap(), TaskKind::Personality);
    }

    #[test]
    fn test_parse_short_alias() {
        assert_eq!("backstory".parse::<TaskKind>().unwrap(), TaskKind::BackstoryMotivation);
        assert_eq!("voice".parse::<TaskKind>().unwrap(), TaskKind::VoiceDialogue);
        assert_eq!("image".parse::<TaskKind>().unwrap(), TaskKind::ImageGeneration);
    }

    #[test]
    fn test_parse_unknown_task() {
        let err = "catchphrase".parse::<TaskKind>().unwrap_err();
        assert_eq!(err, UnknownTaskError("catchphrase".to_string()));
    }

    #[test]
    fn test_serde_matches_as_str() {
        let json = serde_json::to_string(&TaskKind::BackstoryMotivation).unwrap();
        assert_eq!(json, "\"backstory_motivation\"");
    }

    #[test]
    fn test_only_image_generation_is_optional() {
        let optional: Vec<_> = TaskKind::ALL.into_iter().filter(|t| !t.is_required()).collect();
        assert_eq!(optional, vec![TaskKind::ImageGeneration]);
    }

    #[test]
    fn test_feedback_key() {
        assert_eq!(TaskKind::Personality.feedback_key(), "personality_feedback");
    }
}
