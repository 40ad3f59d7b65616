//! Keyword classification of free-text character importance

use serde::{Deserialize, Serialize};

const LEAD_WORDS: &[&str] = &["main", "protagonist", "primary", "lead", "antagonist", "villain"];
const SUPPORTING_WORDS: &[&str] = &["supporting", "secondary", "love interest", "deuteragonist"];
const MINOR_WORDS: &[&str] = &["side", "minor", "tertiary", "background"];
const CAMEO_WORDS: &[&str] = &["cameo", "extra", "mention"];

/// How central a character is to the story
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Lead,
    Supporting,
    Minor,
    Cameo,
    Unspecified,
}

impl Importance {
    /// Classify text; earlier categories win when several keywords match
    pub fn parse(text: &str) -> Self {
        let text = text.trim().to_lowercase();
        if text.is_empty() {
            return Self::Unspecified;
        }

        let matches = |words: &[&str]| words.iter().any(|w| text.contains(w));
        if matches(LEAD_WORDS) {
            Self::Lead
        } else if matches(SUPPORTING_WORDS) {
            Self::Supporting
        } else if matches(MINOR_WORDS) {
            Self::Minor
        } else if matches(CAMEO_WORDS) {
            Self::Cameo
        } else {
            Self::Unspecified
        }
    }

    pub fn from_optional(text: Option<&str>) -> Self {
        text.map(Self::parse).unwrap_or(Self::Unspecified)
    }

    /// 1-10 score shown in the final artifact
    pub fn score(&self) -> u8 {
        match self {
            Self::Lead => 9,
            Self::Supporting => 6,
            Self::Minor => 3,
            Self::Cameo => 1,
            Self::Unspecified => 5,
        }
    }

    /// 1-5 priority used to pick characters for a batch
    pub fn priority(&self) -> u8 {
        match self {
            Self::Lead => 5,
            Self::Supporting | Self::Unspecified => 3,
            Self::Minor | Self::Cameo => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keywords() {
        assert_eq!(Importance::parse("Main character"), Importance::Lead);
        assert_eq!(Importance::parse("the villain"), Importance::Lead);
        assert_eq!(Importance::parse("love interest"), Importance::Supporting);
        assert_eq!(Importance::parse("background"), Importance::Minor);
        assert_eq!(Importance::parse("cameo"), Importance::Cameo);
        assert_eq!(Importance::parse("   "), Importance::Unspecified);
        assert_eq!(Importance::parse("mysterious"), Importance::Unspecified);
    }

    #[test]
    fn test_projections() {
        assert_eq!(Importance::Lead.score(), 9);
        assert_eq!(Importance::Lead.priority(), 5);
        assert_eq!(Importance::Unspecified.score(), 5);
        assert_eq!(Importance::Unspecified.priority(), 3);
        assert_eq!(Importance::Cameo.priority(), 1);
        assert_eq!(Importance::from_optional(None), Importance::Unspecified);
    }
}
