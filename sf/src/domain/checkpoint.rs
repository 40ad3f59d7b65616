//! Checkpoint records exposed for approval

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::task::TaskKind;

/// Task name recorded on the terminal consolidation checkpoint
pub const FINAL_CONSOLIDATION: &str = "final_consolidation";

/// Directory under a session that holds checkpoint files
pub const CHECKPOINT_DIR: &str = "checkpoints";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    #[default]
    AwaitingApproval,
    Approved,
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingApproval => f.write_str("awaiting_approval"),
            Self::Approved => f.write_str("approved"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointOutput {
    pub narrative: String,
    pub structured: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub wave: u32,
    pub timestamp: DateTime<Utc>,
    pub tokens_used: u64,
    pub elapsed_ms: u64,
}

/// One task's latest output, identified by its session-wide number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_number: u32,
    pub task: String,
    pub status: CheckpointStatus,
    pub output: CheckpointOutput,
    pub metadata: CheckpointMetadata,
    /// Times this checkpoint has been regenerated
    #[serde(default)]
    pub revision: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regenerated_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn new(
        checkpoint_number: u32,
        task: impl Into<String>,
        wave: u32,
        output: CheckpointOutput,
        tokens_used: u64,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            checkpoint_number,
            task: task.into(),
            status: CheckpointStatus::AwaitingApproval,
            output,
            metadata: CheckpointMetadata {
                wave,
                timestamp: Utc::now(),
                tokens_used,
                elapsed_ms,
            },
            revision: 0,
            regenerated_at: None,
        }
    }

    /// Task kind, `None` for the consolidation checkpoint
    pub fn task_kind(&self) -> Option<TaskKind> {
        self.task.parse().ok()
    }

    /// Replace the payload in place and reset approval
    pub fn replace_output(&mut self, output: CheckpointOutput, tokens_used: u64, elapsed_ms: u64) {
        let now = Utc::now();
        self.output = output;
        self.status = CheckpointStatus::AwaitingApproval;
        self.metadata.timestamp = now;
        self.metadata.tokens_used = tokens_used;
        self.metadata.elapsed_ms = elapsed_ms;
        self.revision += 1;
        self.regenerated_at = Some(now);
    }

    /// Store key, e.g. `checkpoints/03_voice_dialogue.json`
    pub fn storage_key(&self) -> String {
        checkpoint_key(self.checkpoint_number, &self.task)
    }
}

pub fn checkpoint_key(number: u32, task: &str) -> String {
    format!("{}/{}{}.json", CHECKPOINT_DIR, checkpoint_prefix(number), task)
}

/// File-name prefix shared by every revision of a checkpoint number
pub fn checkpoint_prefix(number: u32) -> String {
    format!("{:02}_", number)
}
