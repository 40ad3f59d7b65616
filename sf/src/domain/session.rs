//! Durable per-session progress record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::input::Mode;
use super::plan::WavePlan;

/// Overall lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Metadata persisted as `metadata.json`
///
/// Approval state lives here rather than in memory so a restarted process
/// can rebuild its gates: `approved_waves` is what has been signaled and
/// `executed_waves` is what no longer needs to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub mode: Mode,
    pub plan: WavePlan,
    pub current_wave: u32,
    pub current_checkpoint: u32,
    pub completed_checkpoints: u32,
    pub total_checkpoints: u32,
    pub regenerations: u32,
    #[serde(default)]
    pub approved_waves: BTreeSet<u32>,
    #[serde(default)]
    pub executed_waves: BTreeSet<u32>,
    /// Checkpoint numbers actually produced by each executed wave
    #[serde(default)]
    pub wave_checkpoints: BTreeMap<u32, Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SessionMetadata {
    pub fn new(session_id: impl Into<String>, mode: Mode, plan: WavePlan) -> Self {
        let total_checkpoints = plan.total_checkpoints();
        Self {
            session_id: session_id.into(),
            created_at: Utc::now(),
            completed_at: None,
            status: SessionStatus::InProgress,
            mode,
            plan,
            current_wave: 0,
            current_checkpoint: 0,
            completed_checkpoints: 0,
            total_checkpoints,
            regenerations: 0,
            approved_waves: BTreeSet::new(),
            executed_waves: BTreeSet::new(),
            wave_checkpoints: BTreeMap::new(),
            last_error: None,
        }
    }

    /// Checkpoint `n` counts as approved once the counter has reached it
    pub fn is_checkpoint_satisfied(&self, number: u32) -> bool {
        self.completed_checkpoints >= number
    }

    pub fn is_wave_approved(&self, wave: u32) -> bool {
        self.approved_waves.contains(&wave)
    }

    pub fn is_wave_executed(&self, wave: u32) -> bool {
        self.executed_waves.contains(&wave)
    }

    /// Record that a wave ran and which checkpoints it produced
    pub fn record_wave_executed(&mut self, wave: u32, checkpoints: Vec<u32>) {
        if let Some(max) = checkpoints.iter().max() {
            self.current_checkpoint = self.current_checkpoint.max(*max);
        }
        self.current_wave = wave;
        self.executed_waves.insert(wave);
        self.wave_checkpoints.insert(wave, checkpoints);
    }

    /// Add a checkpoint produced outside its wave run (regeneration of a failed task)
    pub fn record_late_checkpoint(&mut self, wave: u32, number: u32) {
        let entry = self.wave_checkpoints.entry(wave).or_default();
        if !entry.contains(&number) {
            entry.push(number);
            entry.sort_unstable();
        }
        self.current_checkpoint = self.current_checkpoint.max(number);
    }

    /// Mark a wave approved; returns false if it already was
    pub fn approve_wave(&mut self, wave: u32) -> bool {
        self.approved_waves.insert(wave)
    }

    /// Raise the approval counter and derive wave approvals from it
    ///
    /// Returns the waves that became approved by this call.
    pub fn approve_checkpoint(&mut self, number: u32) -> Vec<u32> {
        self.completed_checkpoints = self.completed_checkpoints.max(number);

        let satisfied: Vec<u32> = self
            .wave_checkpoints
            .iter()
            .filter(|(wave, _)| self.executed_waves.contains(wave))
            // A wave with no checkpoints only passes through approve_wave
            .filter(|(_, checkpoints)| !checkpoints.is_empty())
            .filter(|(_, checkpoints)| checkpoints.iter().all(|c| *c <= self.completed_checkpoints))
            .map(|(wave, _)| *wave)
            .collect();

        satisfied.into_iter().filter(|wave| self.approved_waves.insert(*wave)).collect()
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.status = SessionStatus::Failed;
        self.last_error = Some(message.into());
    }

    pub fn mark_completed(&mut self) {
        self.status = SessionStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.current_checkpoint = self.plan.final_checkpoint_number();
        self.last_error = None;
    }

    /// Reset a failed session so it can run again
    pub fn resume(&mut self) {
        if self.status == SessionStatus::Failed {
            self.status = SessionStatus::InProgress;
            self.last_error = None;
        }
    }
}
