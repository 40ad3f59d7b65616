//! Task generation
//!
//! A [`Generator`] turns one task plus a knowledge base snapshot into a
//! structured result and a narrative. The orchestrator treats any
//! [`GenerationError`] as "this task failed this round".

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

mod llm_generator;
mod prompts;

pub use llm_generator::{LlmGenerator, parse_reply};
pub use prompts::{PromptRenderer, instructions};

use crate::domain::{KnowledgeBase, TaskKind};
use crate::llm::LlmError;
use crate::state::StateManager;

/// Upstream failure of a single task
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Prompt rendering failed: {0}")]
    Prompt(String),

    #[error("Malformed output: {0}")]
    MalformedOutput(String),

    #[error("Failed to save asset: {0}")]
    Asset(String),

    #[error("{0}")]
    Other(String),
}

/// Output of one successful task run
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub structured: Value,
    pub narrative: String,
    pub tokens_used: u64,
}

/// Where a task stores binary outputs such as images
#[derive(Clone)]
pub struct AssetSink {
    state: StateManager,
    session_id: String,
}

impl AssetSink {
    pub fn new(state: StateManager, session_id: impl Into<String>) -> Self {
        Self {
            state,
            session_id: session_id.into(),
        }
    }

    /// Store bytes as `assets/<kind>.<extension>` and return the path
    pub async fn save_binary_asset(
        &self,
        kind: &str,
        extension: &str,
        bytes: Vec<u8>,
    ) -> Result<PathBuf, GenerationError> {
        debug!(session_id = %self.session_id, %kind, %extension, "save_binary_asset: called");
        let file_name = format!("{}.{}", kind, extension);
        self.state
            .save_asset(&self.session_id, &file_name, bytes)
            .await
            .map_err(|e| GenerationError::Asset(e.to_string()))
    }
}

/// Input to one task run
pub struct GenerationRequest {
    pub task: TaskKind,
    /// Snapshot taken before the task's wave started, plus any feedback
    pub knowledge: KnowledgeBase,
    pub assets: AssetSink,
}

/// The per-task generation collaborator
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, GenerationError>;
}

/// Stand-in for commands that never generate; every call fails
pub struct DisabledGenerator {
    reason: String,
}

impl DisabledGenerator {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl Generator for DisabledGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, GenerationError> {
        debug!(task = %request.task, "DisabledGenerator::generate: called");
        Err(GenerationError::Other(self.reason.clone()))
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Generator for orchestrator tests; echoes the task with optional delays and failures
    #[derive(Default)]
    pub struct ScriptedGenerator {
        delays: HashMap<TaskKind, Duration>,
        failing: Mutex<HashSet<TaskKind>>,
        calls: Mutex<Vec<(TaskKind, Option<String>)>>,
    }

    impl ScriptedGenerator {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_delay(mut self, task: TaskKind, delay: Duration) -> Self {
            self.delays.insert(task, delay);
            self
        }

        pub fn failing(self, task: TaskKind) -> Self {
            self.failing.lock().unwrap().insert(task);
            self
        }

        pub fn recover(&self, task: TaskKind) {
            self.failing.lock().unwrap().remove(&task);
        }

        /// Every call so far with the feedback it saw
        pub fn calls(&self) -> Vec<(TaskKind, Option<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(&self, request: GenerationRequest) -> Result<Generation, GenerationError> {
            let task = request.task;
            let feedback = request.knowledge.feedback.get(&task).cloned();
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((task, feedback.clone()));
                calls.iter().filter(|(t, _)| *t == task).count()
            };
            if let Some(delay) = self.delays.get(&task) {
                tokio::time::sleep(*delay).await;
            }
            if self.failing.lock().unwrap().contains(&task) {
                return Err(GenerationError::Other(format!("{} exploded", task)));
            }
            Ok(Generation {
                structured: json!({"task": task.as_str(), "call": call, "feedback": feedback}),
                narrative: format!("{} take {}", task.title(), call),
                tokens_used: 10,
            })
        }
    }
}
