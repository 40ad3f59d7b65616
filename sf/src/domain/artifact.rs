//! Consolidated character profile produced at the end of a session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::input::Mode;

pub const ARTIFACT_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overview {
    pub name: String,
    pub role: String,
    /// 1-10
    pub importance: u8,
    pub one_line: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Visual {
    pub images: Vec<ImageRef>,
    pub style_notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub mode: Mode,
    pub total_checkpoints: u32,
    pub regenerations: u32,
    pub total_tokens: u64,
}

/// Denormalized merge of every task output, stored as `final_artifact.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalArtifact {
    pub session_id: String,
    pub name: String,
    pub version: String,
    pub completed_at: DateTime<Utc>,
    pub overview: Overview,
    pub visual: Visual,
    pub psychology: Value,
    pub physical_presence: Value,
    pub voice: Value,
    pub backstory_motivation: Value,
    pub narrative_arc: Value,
    pub relationships: Vec<Value>,
    pub metadata: ArtifactMetadata,
}
