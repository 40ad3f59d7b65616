//! Event types for storyforge session activity
//!
//! These events are the observable progress of a session:
//! - Wave lifecycle (started, complete, approved)
//! - Task outcomes (started, completed, failed)
//! - Checkpoints (ready, regenerated)
//! - Session end and errors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress notifications emitted by the orchestrator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ForgeEvent {
    // === Waves ===
    WaveStarted {
        session_id: String,
        wave: u32,
        tasks: Vec<String>,
    },
    WaveComplete {
        session_id: String,
        wave: u32,
        tasks_completed: Vec<String>,
        tasks_failed: Vec<String>,
    },
    /// Sent for every wave just before the scheduler waits on its gate
    AwaitingApproval {
        session_id: String,
        wave: u32,
        checkpoint_numbers: Vec<u32>,
        message: String,
    },
    WaveApproved { session_id: String, wave: u32 },

    // === Tasks ===
    TaskStarted { session_id: String, task: String },
    TaskCompleted {
        session_id: String,
        task: String,
        tokens_used: u64,
        elapsed_ms: u64,
    },
    TaskFailed {
        session_id: String,
        task: String,
        error: String,
    },

    // === Checkpoints ===
    CheckpointReady {
        session_id: String,
        checkpoint_number: u32,
        task: String,
    },
    CheckpointRegenerated {
        session_id: String,
        checkpoint_number: u32,
        task: String,
        revision: u32,
    },

    // === Session ===
    SessionComplete { session_id: String },
    Error { session_id: String, message: String },
}

impl ForgeEvent {
    /// Session this event belongs to
    pub fn session_id(&self) -> &str {
        match self {
            ForgeEvent::WaveStarted { session_id, .. }
            | ForgeEvent::WaveComplete { session_id, .. }
            | ForgeEvent::AwaitingApproval { session_id, .. }
            | ForgeEvent::WaveApproved { session_id, .. }
            | ForgeEvent::TaskStarted { session_id, .. }
            | ForgeEvent::TaskCompleted { session_id, .. }
            | ForgeEvent::TaskFailed { session_id, .. }
            | ForgeEvent::CheckpointReady { session_id, .. }
            | ForgeEvent::CheckpointRegenerated { session_id, .. }
            | ForgeEvent::SessionComplete { session_id }
            | ForgeEvent::Error { session_id, .. } => session_id,
        }
    }

    /// Wire name of the event, identical to its `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            ForgeEvent::WaveStarted { .. } => "wave_started",
            ForgeEvent::WaveComplete { .. } => "wave_complete",
            ForgeEvent::AwaitingApproval { .. } => "awaiting_approval",
            ForgeEvent::WaveApproved { .. } => "wave_approved",
            ForgeEvent::TaskStarted { .. } => "task_started",
            ForgeEvent::TaskCompleted { .. } => "task_completed",
            ForgeEvent::TaskFailed { .. } => "task_failed",
            ForgeEvent::CheckpointReady { .. } => "checkpoint_ready",
            ForgeEvent::CheckpointRegenerated { .. } => "checkpoint_regenerated",
            ForgeEvent::SessionComplete { .. } => "session_complete",
            ForgeEvent::Error { .. } => "error",
        }
    }

    /// Whether no further events follow for this session run
    pub fn is_terminal(&self) -> bool {
        matches!(self, ForgeEvent::SessionComplete { .. })
    }
}

/// A timestamped event log entry for file persistence
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event: ForgeEvent,
}

impl EventLogEntry {
    pub fn new(event: ForgeEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tag_matches_event_type() {
        let event = ForgeEvent::AwaitingApproval {
            session_id: "s1".to_string(),
            wave: 1,
            checkpoint_numbers: vec![1, 2],
            message: "Review wave 1".to_string(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.event_type());
        assert_eq!(json["checkpoint_numbers"], serde_json::json!([1, 2]));

        let parsed: ForgeEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_session_id() {
        let event = ForgeEvent::SessionComplete {
            session_id: "abc".to_string(),
        };
        assert_eq!(event.session_id(), "abc");
        assert!(event.is_terminal());
    }

    #[test]
    fn test_event_log_entry() {
        let entry = EventLogEntry::new(ForgeEvent::TaskStarted {
            session_id: "s1".to_string(),
            task: "personality".to_string(),
        });

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"ts\""));
        assert!(json.contains("task_started"));
    }
}
