//! Errors raised by the orchestrator control surface

use thiserror::Error;

use crate::domain::{PlanError, TaskKind, UnknownTaskError};
use crate::generation::GenerationError;
use crate::state::StateError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Cannot consolidate, required sections missing: {}", join_tasks(.0))]
    IncompleteData(Vec<TaskKind>),

    #[error(transparent)]
    UnknownTask(#[from] UnknownTaskError),

    #[error("Unknown wave: {0}")]
    UnknownWave(u32),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Checkpoint {number} not found in session {session_id}")]
    CheckpointNotFound { session_id: String, number: u32 },

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StateError),

    #[error("Session {0} is busy running a wave")]
    SessionBusy(String),

    #[error("Task '{0}' has not run yet")]
    TaskNotReady(TaskKind),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),

    /// Only surfaced by single-task regeneration; wave runs contain it
    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),
}

impl OrchestratorError {
    /// Whether this error means the caller sent something invalid
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::UnknownTask(_) | Self::UnknownWave(_) | Self::TaskNotReady(_) | Self::InvalidInput(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SessionNotFound(_) | Self::CheckpointNotFound { .. })
    }
}

fn join_tasks(tasks: &[TaskKind]) -> String {
    tasks.iter().map(TaskKind::as_str).collect::<Vec<_>>().join(", ")
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
