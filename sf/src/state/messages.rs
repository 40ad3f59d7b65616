//! State manager messages
//!
//! Commands and responses for the actor pattern.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{Checkpoint, FinalArtifact, KnowledgeBase, SessionMetadata};

/// Errors from state operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Channel error")]
    ChannelError,
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// In-place mutation applied by the actor between a read and a write
pub type MetadataUpdate = Box<dyn FnOnce(&mut SessionMetadata) + Send>;
pub type KnowledgeUpdate = Box<dyn FnOnce(&mut KnowledgeBase) + Send>;

/// Commands sent to the StateManager actor
pub enum StateCommand {
    // Session operations
    CreateSession {
        metadata: Box<SessionMetadata>,
        knowledge: Box<KnowledgeBase>,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    ListSessions {
        reply: oneshot::Sender<StateResponse<Vec<String>>>,
    },
    DeleteSession {
        session_id: String,
        reply: oneshot::Sender<StateResponse<bool>>,
    },

    // Metadata operations
    GetMetadata {
        session_id: String,
        reply: oneshot::Sender<StateResponse<Option<SessionMetadata>>>,
    },
    UpdateMetadata {
        session_id: String,
        update: MetadataUpdate,
        reply: oneshot::Sender<StateResponse<SessionMetadata>>,
    },

    // Knowledge base operations
    GetKnowledge {
        session_id: String,
        reply: oneshot::Sender<StateResponse<Option<KnowledgeBase>>>,
    },
    UpdateKnowledge {
        session_id: String,
        update: KnowledgeUpdate,
        reply: oneshot::Sender<StateResponse<KnowledgeBase>>,
    },

    // Checkpoint operations
    PutCheckpoint {
        session_id: String,
        checkpoint: Box<Checkpoint>,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    GetCheckpoint {
        session_id: String,
        number: u32,
        reply: oneshot::Sender<StateResponse<Option<Checkpoint>>>,
    },
    ListCheckpoints {
        session_id: String,
        reply: oneshot::Sender<StateResponse<Vec<Checkpoint>>>,
    },
    ApproveCheckpoints {
        session_id: String,
        up_to: u32,
        reply: oneshot::Sender<StateResponse<Vec<u32>>>,
    },

    // Final artifact operations
    PutFinalArtifact {
        session_id: String,
        artifact: Box<FinalArtifact>,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    GetFinalArtifact {
        session_id: String,
        reply: oneshot::Sender<StateResponse<Option<FinalArtifact>>>,
    },

    // Binary assets
    SaveAsset {
        session_id: String,
        file_name: String,
        bytes: Vec<u8>,
        reply: oneshot::Sender<StateResponse<PathBuf>>,
    },

    // Shutdown
    Shutdown,
}

impl fmt::Debug for StateCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreateSession { .. } => "CreateSession",
            Self::ListSessions { .. } => "ListSessions",
            Self::DeleteSession { .. } => "DeleteSession",
            Self::GetMetadata { .. } => "GetMetadata",
            Self::UpdateMetadata { .. } => "UpdateMetadata",
            Self::GetKnowledge { .. } => "GetKnowledge",
            Self::UpdateKnowledge { .. } => "UpdateKnowledge",
            Self::PutCheckpoint { .. } => "PutCheckpoint",
            Self::GetCheckpoint { .. } => "GetCheckpoint",
            Self::ListCheckpoints { .. } => "ListCheckpoints",
            Self::ApproveCheckpoints { .. } => "ApproveCheckpoints",
            Self::PutFinalArtifact { .. } => "PutFinalArtifact",
            Self::GetFinalArtifact { .. } => "GetFinalArtifact",
            Self::SaveAsset { .. } => "SaveAsset",
            Self::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}
