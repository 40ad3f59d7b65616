//! State management with actor pattern
//!
//! StateManager owns the SessionStore and processes messages via channels,
//! so concurrent callers never interleave a read-modify-write.

mod manager;
mod messages;

pub use manager::{ASSET_DIR, FINAL_ARTIFACT_KEY, KNOWLEDGE_KEY, METADATA_KEY, StateManager};
pub use messages::{KnowledgeUpdate, MetadataUpdate, StateCommand, StateError, StateResponse};
