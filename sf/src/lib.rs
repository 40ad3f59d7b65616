//! storyforge - wave-based, checkpoint-gated character development
//!
//! A session develops one character through a fixed plan of generation
//! tasks. Tasks are grouped into waves; tasks in a wave run concurrently,
//! each result becomes a numbered checkpoint, and the next wave waits for a
//! human to approve the previous one. Any task can be regenerated with
//! feedback without touching the others.
//!
//! # Modules
//!
//! - [`domain`] - Sessions, tasks, checkpoints, knowledge base, final artifact
//! - [`orchestrator`] - Wave scheduler, approval gates, regeneration, registry
//! - [`generation`] - The per-task generator and its prompts
//! - [`llm`] - LLM client trait and Anthropic implementation
//! - [`state`] - Actor owning the session store
//! - [`events`] - Event bus and JSONL event log
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod domain;
pub mod events;
pub mod generation;
pub mod llm;
pub mod orchestrator;
pub mod state;

// Re-export commonly used types
pub use config::{Config, LlmConfig};
pub use domain::{
    Checkpoint, CheckpointStatus, FinalArtifact, KnowledgeBase, Mode, SessionMetadata, SessionStatus, StoryInput,
    TaskKind, WavePlan,
};
pub use events::{EventBus, EventEmitter, ForgeEvent, create_event_bus, read_session_events, spawn_event_logger};
pub use generation::{DisabledGenerator, Generation, GenerationError, GenerationRequest, Generator, LlmGenerator};
pub use llm::{AnthropicClient, LlmClient, LlmError, create_client};
pub use orchestrator::{OrchestratorError, SessionRegistry, SessionStatusReport};
pub use state::{StateError, StateManager};
