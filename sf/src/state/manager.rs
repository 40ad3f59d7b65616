//! StateManager - actor that owns the SessionStore
//!
//! Processes commands via channels so every read-modify-write of a session
//! record happens on one task, in order.

use std::path::{Path, PathBuf};

use sessionstore::SessionStore;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::domain::{
    CHECKPOINT_DIR, Checkpoint, CheckpointStatus, FinalArtifact, KnowledgeBase, SessionMetadata, checkpoint_prefix,
};

use super::messages::{KnowledgeUpdate, MetadataUpdate, StateCommand, StateError, StateResponse};

pub const METADATA_KEY: &str = "metadata.json";
pub const KNOWLEDGE_KEY: &str = "knowledge_base.json";
pub const FINAL_ARTIFACT_KEY: &str = "final_artifact.json";
pub const ASSET_DIR: &str = "assets";

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
}

impl StateManager {
    /// Open the store at `store_path` and spawn the actor
    pub fn spawn(store_path: impl AsRef<Path>) -> eyre::Result<Self> {
        debug!(store_path = %store_path.as_ref().display(), "spawn: called");
        let store = SessionStore::open(store_path.as_ref())?;
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(actor_loop(store, rx));

        info!("StateManager spawned");
        Ok(Self { tx })
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    // === Session operations ===

    /// Create a session with its initial metadata and knowledge base
    pub async fn create_session(&self, metadata: SessionMetadata, knowledge: KnowledgeBase) -> StateResponse<()> {
        debug!(session_id = %metadata.session_id, "create_session: called");
        self.request(|reply| StateCommand::CreateSession {
            metadata: Box::new(metadata),
            knowledge: Box::new(knowledge),
            reply,
        })
        .await
    }

    pub async fn list_sessions(&self) -> StateResponse<Vec<String>> {
        debug!("list_sessions: called");
        self.request(|reply| StateCommand::ListSessions { reply }).await
    }

    /// Delete a session; returns false if it did not exist
    pub async fn delete_session(&self, session_id: &str) -> StateResponse<bool> {
        debug!(%session_id, "delete_session: called");
        self.request(|reply| StateCommand::DeleteSession {
            session_id: session_id.to_string(),
            reply,
        })
        .await
    }

    // === Metadata operations ===

    pub async fn get_metadata(&self, session_id: &str) -> StateResponse<Option<SessionMetadata>> {
        debug!(%session_id, "get_metadata: called");
        self.request(|reply| StateCommand::GetMetadata {
            session_id: session_id.to_string(),
            reply,
        })
        .await
    }

    /// Atomically apply `f` to the stored metadata
    ///
    /// Returns the metadata as written together with whatever `f` returned.
    pub async fn update_metadata<R, F>(&self, session_id: &str, f: F) -> StateResponse<(SessionMetadata, R)>
    where
        R: Send + 'static,
        F: FnOnce(&mut SessionMetadata) -> R + Send + 'static,
    {
        debug!(%session_id, "update_metadata: called");
        let (out_tx, out_rx) = oneshot::channel();
        let update: MetadataUpdate = Box::new(move |meta| {
            let _ = out_tx.send(f(meta));
        });
        let metadata = self
            .request(|reply| StateCommand::UpdateMetadata {
                session_id: session_id.to_string(),
                update,
                reply,
            })
            .await?;
        let out = out_rx.await.map_err(|_| StateError::ChannelError)?;
        Ok((metadata, out))
    }

    // === Knowledge base operations ===

    pub async fn get_knowledge(&self, session_id: &str) -> StateResponse<Option<KnowledgeBase>> {
        debug!(%session_id, "get_knowledge: called");
        self.request(|reply| StateCommand::GetKnowledge {
            session_id: session_id.to_string(),
            reply,
        })
        .await
    }

    /// Atomically apply `f` to the stored knowledge base
    pub async fn update_knowledge<F>(&self, session_id: &str, f: F) -> StateResponse<KnowledgeBase>
    where
        F: FnOnce(&mut KnowledgeBase) + Send + 'static,
    {
        debug!(%session_id, "update_knowledge: called");
        let update: KnowledgeUpdate = Box::new(f);
        self.request(|reply| StateCommand::UpdateKnowledge {
            session_id: session_id.to_string(),
            update,
            reply,
        })
        .await
    }

    // === Checkpoint operations ===

    /// Write a checkpoint, replacing any record with the same number
    pub async fn put_checkpoint(&self, session_id: &str, checkpoint: Checkpoint) -> StateResponse<()> {
        debug!(%session_id, number = checkpoint.checkpoint_number, task = %checkpoint.task, "put_checkpoint: called");
        self.request(|reply| StateCommand::PutCheckpoint {
            session_id: session_id.to_string(),
            checkpoint: Box::new(checkpoint),
            reply,
        })
        .await
    }

    pub async fn get_checkpoint(&self, session_id: &str, number: u32) -> StateResponse<Option<Checkpoint>> {
        debug!(%session_id, number, "get_checkpoint: called");
        self.request(|reply| StateCommand::GetCheckpoint {
            session_id: session_id.to_string(),
            number,
            reply,
        })
        .await
    }

    /// All checkpoints of a session ordered by number
    pub async fn list_checkpoints(&self, session_id: &str) -> StateResponse<Vec<Checkpoint>> {
        debug!(%session_id, "list_checkpoints: called");
        self.request(|reply| StateCommand::ListCheckpoints {
            session_id: session_id.to_string(),
            reply,
        })
        .await
    }

    /// Mark every stored checkpoint numbered `<= up_to` approved
    ///
    /// Returns the numbers that changed status.
    pub async fn approve_checkpoints(&self, session_id: &str, up_to: u32) -> StateResponse<Vec<u32>> {
        debug!(%session_id, up_to, "approve_checkpoints: called");
        self.request(|reply| StateCommand::ApproveCheckpoints {
            session_id: session_id.to_string(),
            up_to,
            reply,
        })
        .await
    }

    // === Final artifact operations ===

    pub async fn put_final_artifact(&self, session_id: &str, artifact: FinalArtifact) -> StateResponse<()> {
        debug!(%session_id, "put_final_artifact: called");
        self.request(|reply| StateCommand::PutFinalArtifact {
            session_id: session_id.to_string(),
            artifact: Box::new(artifact),
            reply,
        })
        .await
    }

    pub async fn get_final_artifact(&self, session_id: &str) -> StateResponse<Option<FinalArtifact>> {
        debug!(%session_id, "get_final_artifact: called");
        self.request(|reply| StateCommand::GetFinalArtifact {
            session_id: session_id.to_string(),
            reply,
        })
        .await
    }

    // === Assets ===

    /// Store a binary asset under `assets/` and return its path
    pub async fn save_asset(&self, session_id: &str, file_name: &str, bytes: Vec<u8>) -> StateResponse<PathBuf> {
        debug!(%session_id, %file_name, len = bytes.len(), "save_asset: called");
        self.request(|reply| StateCommand::SaveAsset {
            session_id: session_id.to_string(),
            file_name: file_name.to_string(),
            bytes,
            reply,
        })
        .await
    }

    /// Stop the actor; the store lock is released once it exits
    pub async fn shutdown(&self) -> Result<(), StateError> {
        debug!("shutdown: called");
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

fn store_err(e: eyre::Report) -> StateError {
    StateError::StoreError(format!("{:#}", e))
}

fn require_session(store: &SessionStore, session_id: &str) -> StateResponse<()> {
    if store.session_exists(session_id) {
        Ok(())
    } else {
        Err(StateError::NotFound(format!("session {}", session_id)))
    }
}

fn load_metadata(store: &SessionStore, session_id: &str) -> StateResponse<SessionMetadata> {
    require_session(store, session_id)?;
    store
        .read_json(session_id, METADATA_KEY)
        .map_err(store_err)?
        .ok_or_else(|| StateError::NotFound(format!("metadata for session {}", session_id)))
}

fn load_knowledge(store: &SessionStore, session_id: &str) -> StateResponse<KnowledgeBase> {
    require_session(store, session_id)?;
    store
        .read_json(session_id, KNOWLEDGE_KEY)
        .map_err(store_err)?
        .ok_or_else(|| StateError::NotFound(format!("knowledge base for session {}", session_id)))
}

fn read_optional<T: serde::de::DeserializeOwned>(
    store: &SessionStore,
    session_id: &str,
    key: &str,
) -> StateResponse<Option<T>> {
    if !store.session_exists(session_id) {
        return Ok(None);
    }
    store.read_json(session_id, key).map_err(store_err)
}

fn find_checkpoint(store: &SessionStore, session_id: &str, number: u32) -> StateResponse<Option<Checkpoint>> {
    if !store.session_exists(session_id) {
        return Ok(None);
    }
    store
        .find_json(session_id, CHECKPOINT_DIR, &checkpoint_prefix(number))
        .map_err(store_err)
}

fn list_checkpoints(store: &SessionStore, session_id: &str) -> StateResponse<Vec<Checkpoint>> {
    require_session(store, session_id)?;
    let mut checkpoints: Vec<Checkpoint> = store.list_json(session_id, CHECKPOINT_DIR).map_err(store_err)?;
    checkpoints.sort_by_key(|c| c.checkpoint_number);
    Ok(checkpoints)
}

fn handle_command(store: &SessionStore, cmd: StateCommand) -> bool {
    match cmd {
        StateCommand::CreateSession {
            metadata,
            knowledge,
            reply,
        } => {
            let session_id = metadata.session_id.clone();
            debug!(%session_id, "actor_loop: CreateSession command");
            let result = if store.session_exists(&session_id) {
                Err(StateError::AlreadyExists(format!("session {}", session_id)))
            } else {
                store
                    .create_session(&session_id)
                    .and_then(|_| store.write_json(&session_id, KNOWLEDGE_KEY, &knowledge))
                    .and_then(|_| store.write_json(&session_id, METADATA_KEY, &metadata))
                    .map_err(store_err)
            };
            let _ = reply.send(result);
        }

        StateCommand::ListSessions { reply } => {
            debug!("actor_loop: ListSessions command");
            let _ = reply.send(store.list_sessions().map_err(store_err));
        }

        StateCommand::DeleteSession { session_id, reply } => {
            debug!(%session_id, "actor_loop: DeleteSession command");
            let _ = reply.send(store.delete_session(&session_id).map_err(store_err));
        }

        StateCommand::GetMetadata { session_id, reply } => {
            debug!(%session_id, "actor_loop: GetMetadata command");
            let _ = reply.send(read_optional(store, &session_id, METADATA_KEY));
        }

        StateCommand::UpdateMetadata {
            session_id,
            update,
            reply,
        } => {
            debug!(%session_id, "actor_loop: UpdateMetadata command");
            let result = load_metadata(store, &session_id).and_then(|mut meta| {
                update(&mut meta);
                store
                    .write_json(&session_id, METADATA_KEY, &meta)
                    .map_err(store_err)?;
                Ok(meta)
            });
            let _ = reply.send(result);
        }

        StateCommand::GetKnowledge { session_id, reply } => {
            debug!(%session_id, "actor_loop: GetKnowledge command");
            let _ = reply.send(read_optional(store, &session_id, KNOWLEDGE_KEY));
        }

        StateCommand::UpdateKnowledge {
            session_id,
            update,
            reply,
        } => {
            debug!(%session_id, "actor_loop: UpdateKnowledge command");
            let result = load_knowledge(store, &session_id).and_then(|mut kb| {
                update(&mut kb);
                store
                    .write_json(&session_id, KNOWLEDGE_KEY, &kb)
                    .map_err(store_err)?;
                Ok(kb)
            });
            let _ = reply.send(result);
        }

        StateCommand::PutCheckpoint {
            session_id,
            checkpoint,
            reply,
        } => {
            debug!(%session_id, number = checkpoint.checkpoint_number, "actor_loop: PutCheckpoint command");
            let result = require_session(store, &session_id).and_then(|_| {
                store
                    .write_json(&session_id, &checkpoint.storage_key(), &checkpoint)
                    .map_err(store_err)
            });
            let _ = reply.send(result);
        }

        StateCommand::GetCheckpoint {
            session_id,
            number,
            reply,
        } => {
            debug!(%session_id, number, "actor_loop: GetCheckpoint command");
            let _ = reply.send(find_checkpoint(store, &session_id, number));
        }

        StateCommand::ListCheckpoints { session_id, reply } => {
            debug!(%session_id, "actor_loop: ListCheckpoints command");
            let _ = reply.send(list_checkpoints(store, &session_id));
        }

        StateCommand::ApproveCheckpoints {
            session_id,
            up_to,
            reply,
        } => {
            debug!(%session_id, up_to, "actor_loop: ApproveCheckpoints command");
            let result = list_checkpoints(store, &session_id).and_then(|checkpoints| {
                let mut changed = Vec::new();
                for mut cp in checkpoints {
                    if cp.checkpoint_number <= up_to && cp.status != CheckpointStatus::Approved {
                        cp.status = CheckpointStatus::Approved;
                        store
                            .write_json(&session_id, &cp.storage_key(), &cp)
                            .map_err(store_err)?;
                        changed.push(cp.checkpoint_number);
                    }
                }
                Ok(changed)
            });
            let _ = reply.send(result);
        }

        StateCommand::PutFinalArtifact {
            session_id,
            artifact,
            reply,
        } => {
            debug!(%session_id, "actor_loop: PutFinalArtifact command");
            let result = require_session(store, &session_id).and_then(|_| {
                store
                    .write_json(&session_id, FINAL_ARTIFACT_KEY, &artifact)
                    .map_err(store_err)
            });
            let _ = reply.send(result);
        }

        StateCommand::GetFinalArtifact { session_id, reply } => {
            debug!(%session_id, "actor_loop: GetFinalArtifact command");
            let _ = reply.send(read_optional(store, &session_id, FINAL_ARTIFACT_KEY));
        }

        StateCommand::SaveAsset {
            session_id,
            file_name,
            bytes,
            reply,
        } => {
            debug!(%session_id, %file_name, "actor_loop: SaveAsset command");
            let key = format!("{}/{}", ASSET_DIR, file_name);
            let result = require_session(store, &session_id)
                .and_then(|_| store.write_bytes(&session_id, &key, &bytes).map_err(store_err));
            let _ = reply.send(result);
        }

        StateCommand::Shutdown => {
            info!("StateManager shutting down");
            return false;
        }
    }
    true
}

async fn actor_loop(store: SessionStore, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("actor_loop: called");
    while let Some(cmd) = rx.recv().await {
        if !handle_command(&store, cmd) {
            break;
        }
    }
    rx.close();
    let mut dropped = 0usize;
    while rx.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        warn!(dropped, "actor_loop: discarded commands queued after shutdown");
    }
    debug!("actor_loop: exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CharacterInput, CheckpointOutput, Mode, StoryInput, Storyline, TaskKind, WavePlan};
    use serde_json::json;
    use tempfile::tempdir;

    fn input() -> StoryInput {
        StoryInput {
            characters: vec![CharacterInput {
                name: "Mira".into(),
                appearance: String::new(),
                personality: String::new(),
                role: "pilot".into(),
                importance: None,
            }],
            storyline: Storyline::default(),
        }
    }

    async fn manager_with_session(dir: &Path, id: &str) -> StateManager {
        let manager = StateManager::spawn(dir).unwrap();
        let plan = WavePlan::standard(false);
        let meta = SessionMetadata::new(id, Mode::Balanced, plan.clone());
        let kb = KnowledgeBase::new(id, input(), Mode::Balanced, &plan);
        manager.create_session(meta, kb).await.unwrap();
        manager
    }

    fn checkpoint(number: u32, task: TaskKind) -> Checkpoint {
        Checkpoint::new(
            number,
            task.as_str(),
            1,
            CheckpointOutput {
                narrative: format!("{} narrative", task),
                structured: json!({"task": task.as_str()}),
            },
            10,
            1,
        )
    }

    #[tokio::test]
    async fn test_create_and_read_session() {
        let temp = tempdir().unwrap();
        let manager = manager_with_session(temp.path(), "s1").await;

        let meta = manager.get_metadata("s1").await.unwrap().unwrap();
        assert_eq!(meta.total_checkpoints, 7);
        let kb = manager.get_knowledge("s1").await.unwrap().unwrap();
        assert_eq!(kb.input.characters[0].name, "Mira");
        assert_eq!(manager.list_sessions().await.unwrap(), vec!["s1".to_string()]);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_duplicate_session() {
        let temp = tempdir().unwrap();
        let manager = manager_with_session(temp.path(), "s1").await;

        let plan = WavePlan::standard(false);
        let err = manager
            .create_session(
                SessionMetadata::new("s1", Mode::Fast, plan.clone()),
                KnowledgeBase::new("s1", input(), Mode::Fast, &plan),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_session() {
        let temp = tempdir().unwrap();
        let manager = StateManager::spawn(temp.path()).unwrap();

        assert!(manager.get_metadata("nope").await.unwrap().is_none());
        assert!(manager.get_checkpoint("nope", 1).await.unwrap().is_none());
        let err = manager.update_metadata("nope", |_| ()).await.unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_metadata_returns_closure_result() {
        let temp = tempdir().unwrap();
        let manager = manager_with_session(temp.path(), "s1").await;

        let (meta, previous) = manager
            .update_metadata("s1", |meta| {
                let previous = meta.regenerations;
                meta.regenerations += 1;
                previous
            })
            .await
            .unwrap();
        assert_eq!(previous, 0);
        assert_eq!(meta.regenerations, 1);
        assert_eq!(manager.get_metadata("s1").await.unwrap().unwrap().regenerations, 1);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let temp = tempdir().unwrap();
        let manager = manager_with_session(temp.path(), "s1").await;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let m = manager.clone();
            handles.push(tokio::spawn(async move {
                m.update_metadata("s1", |meta| meta.regenerations += 1).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(manager.get_metadata("s1").await.unwrap().unwrap().regenerations, 20);
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_checkpoint_put_get_list() {
        let temp = tempdir().unwrap();
        let manager = manager_with_session(temp.path(), "s1").await;

        manager.put_checkpoint("s1", checkpoint(2, TaskKind::BackstoryMotivation)).await.unwrap();
        manager.put_checkpoint("s1", checkpoint(1, TaskKind::Personality)).await.unwrap();

        let cp = manager.get_checkpoint("s1", 2).await.unwrap().unwrap();
        assert_eq!(cp.task, "backstory_motivation");
        assert!(manager.get_checkpoint("s1", 3).await.unwrap().is_none());

        let all = manager.list_checkpoints("s1").await.unwrap();
        let numbers: Vec<_> = all.iter().map(|c| c.checkpoint_number).collect();
        assert_eq!(numbers, vec![1, 2]);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_approve_checkpoints_up_to() {
        let temp = tempdir().unwrap();
        let manager = manager_with_session(temp.path(), "s1").await;

        manager.put_checkpoint("s1", checkpoint(1, TaskKind::Personality)).await.unwrap();
        manager.put_checkpoint("s1", checkpoint(2, TaskKind::BackstoryMotivation)).await.unwrap();
        manager.put_checkpoint("s1", checkpoint(3, TaskKind::VoiceDialogue)).await.unwrap();

        assert_eq!(manager.approve_checkpoints("s1", 2).await.unwrap(), vec![1, 2]);
        assert_eq!(manager.approve_checkpoints("s1", 2).await.unwrap(), Vec::<u32>::new());

        let cp3 = manager.get_checkpoint("s1", 3).await.unwrap().unwrap();
        assert_eq!(cp3.status, CheckpointStatus::AwaitingApproval);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_save_asset_and_delete_session() {
        let temp = tempdir().unwrap();
        let manager = manager_with_session(temp.path(), "s1").await;

        let path = manager.save_asset("s1", "portrait.png", vec![1, 2, 3]).await.unwrap();
        assert!(path.ends_with("assets/portrait.png"));
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3]);

        assert!(manager.delete_session("s1").await.unwrap());
        assert!(!manager.delete_session("s1").await.unwrap());
        assert!(manager.list_sessions().await.unwrap().is_empty());

        manager.shutdown().await.unwrap();
    }
}
