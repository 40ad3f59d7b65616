//! Domain types: tasks, wave plans, sessions, knowledge base and checkpoints

mod artifact;
mod checkpoint;
mod importance;
mod input;
mod knowledge;
mod plan;
mod session;
mod task;

pub use artifact::{ARTIFACT_VERSION, ArtifactMetadata, FinalArtifact, ImageRef, Overview, Visual};
pub use checkpoint::{
    CHECKPOINT_DIR, Checkpoint, CheckpointMetadata, CheckpointOutput, CheckpointStatus, FINAL_CONSOLIDATION,
    checkpoint_key, checkpoint_prefix,
};
pub use importance::Importance;
pub use input::{CharacterInput, Mode, SceneDetail, SceneEntry, StoryInput, Storyline};
pub use knowledge::KnowledgeBase;
pub use plan::{PlanError, WavePlan};
pub use session::{SessionMetadata, SessionStatus};
pub use task::{TaskKind, TaskState, TaskStatus, UnknownTaskError};
