//! Wave orchestration
//!
//! A session's tasks run in waves. Each wave's tasks run concurrently,
//! their checkpoints are persisted in declaration order, and the next wave
//! starts only after the wave's approval gate is signaled. After the last
//! wave the knowledge base is consolidated into the final artifact.
//!
//! [`SessionRegistry`] is the entry point; everything else is internal.

mod consolidate;
mod context;
mod error;
mod gate;
mod regenerate;
mod registry;
mod scheduler;

pub use consolidate::build_artifact;
pub use error::{OrchestratorError, OrchestratorResult};
pub use gate::ApprovalGates;
pub use registry::{BatchSelection, Progress, SessionRegistry, SessionStatusReport, TaskReport};
