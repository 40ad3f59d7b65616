//! SessionRegistry - the orchestrator's control surface
//!
//! The registry is the explicit owner of every session this process has
//! touched:
//! - Creating sessions (single character or batch)
//! - Running them, in the foreground or as a background task
//! - Routing approvals to the live approval gates
//! - Serializing regeneration against running waves
//!
//! Gates are in-memory only. They are rebuilt from persisted metadata the
//! first time a session is touched, so a restarted process resumes cleanly.
//! A session's entry is evicted once its run ends and nothing else holds it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::context::{ActiveSession, Services, SessionTable};
use super::error::{OrchestratorError, OrchestratorResult};
use super::gate::ApprovalGates;
use super::regenerate::regenerate;
use super::scheduler::{WaveScheduler, consolidate_session};
use crate::domain::{
    Checkpoint, FinalArtifact, Importance, KnowledgeBase, Mode, SessionMetadata, SessionStatus, StoryInput, TaskKind,
    TaskStatus, WavePlan,
};
use crate::events::EventBus;
use crate::generation::Generator;
use crate::state::StateManager;

/// Characters at or above this priority always get a session in a batch
const BATCH_ALWAYS_PRIORITY: u8 = 4;

/// Priority whose characters are taken up to `BATCH_MIDDLE_LIMIT` times
const BATCH_MIDDLE_PRIORITY: u8 = 3;
const BATCH_MIDDLE_LIMIT: usize = 2;

/// Progress counters reported by `get_status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed_checkpoints: u32,
    pub total_checkpoints: u32,
    pub current_checkpoint: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub status: TaskStatus,
    pub wave: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Snapshot of a session's progress
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatusReport {
    pub session_id: String,
    pub status: SessionStatus,
    pub mode: Mode,
    pub current_wave: u32,
    pub current_checkpoint: u32,
    pub progress: Progress,
    pub tasks: BTreeMap<TaskKind, TaskReport>,
    pub approved_waves: Vec<u32>,
    pub regenerations: u32,
    /// Whether a run is executing in this process
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SessionStatusReport {
    /// Whether checkpoint `number` is covered by the approval counter
    pub fn is_checkpoint_satisfied(&self, number: u32) -> bool {
        self.progress.completed_checkpoints >= number
    }
}

/// One character considered by `start_batch`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSelection {
    pub name: String,
    pub priority: u8,
    /// Set when a session was started for this character
    pub session_id: Option<String>,
}

pub struct SessionRegistry {
    services: Services,
    plan: WavePlan,
    sessions: Arc<SessionTable>,
}

impl SessionRegistry {
    /// Create a registry; `plan` is used for sessions started from now on
    pub fn new(
        state: StateManager,
        generator: Arc<dyn Generator>,
        bus: Arc<EventBus>,
        plan: WavePlan,
        max_concurrent_tasks: usize,
    ) -> Self {
        debug!(max_concurrent_tasks, waves = plan.wave_count(), "SessionRegistry::new: called");
        Self {
            services: Services {
                state,
                generator,
                bus,
                permits: Arc::new(Semaphore::new(max_concurrent_tasks.max(1))),
            },
            plan,
            sessions: Arc::new(SessionTable::default()),
        }
    }

    pub fn plan(&self) -> &WavePlan {
        &self.plan
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.services.bus
    }

    fn state(&self) -> &StateManager {
        &self.services.state
    }

    async fn metadata(&self, session_id: &str) -> OrchestratorResult<SessionMetadata> {
        self.state()
            .get_metadata(session_id)
            .await?
            .ok_or_else(|| OrchestratorError::SessionNotFound(session_id.to_string()))
    }

    fn active(&self, session_id: &str) -> Option<Arc<ActiveSession>> {
        self.sessions.get(session_id)
    }

    /// Live session handle, building gates from persisted approvals if needed
    async fn activate(&self, session_id: &str) -> OrchestratorResult<Arc<ActiveSession>> {
        if let Some(session) = self.active(session_id) {
            return Ok(session);
        }

        let metadata = self.metadata(session_id).await?;
        let gates = ApprovalGates::new(metadata.plan.wave_count(), &metadata.approved_waves);
        let session = self.sessions.get_or_insert(ActiveSession::new(session_id, gates));
        debug!(%session_id, active = self.sessions.len(), "activate: session loaded");
        Ok(session)
    }

    // === Session creation ===

    /// Create a session for the first character of `input`
    pub async fn start_session(&self, input: StoryInput, mode: Mode) -> OrchestratorResult<String> {
        debug!(characters = input.characters.len(), %mode, "start_session: called");
        if input.characters.is_empty() {
            return Err(OrchestratorError::InvalidInput("at least one character is required".into()));
        }
        if input.characters.iter().any(|c| c.name.trim().is_empty()) {
            return Err(OrchestratorError::InvalidInput("character name must not be empty".into()));
        }

        let session_id = uuid::Uuid::now_v7().to_string();
        let metadata = SessionMetadata::new(&session_id, mode, self.plan.clone());
        let knowledge = KnowledgeBase::new(&session_id, input, mode, &self.plan);
        self.state().create_session(metadata, knowledge).await?;

        info!(%session_id, %mode, "Session started");
        Ok(session_id)
    }

    /// Start one single-character session per selected character
    ///
    /// Characters are ranked by importance priority. Every character with
    /// priority 4 or higher is selected, plus the first two at priority 3.
    pub async fn start_batch(&self, input: StoryInput, mode: Mode) -> OrchestratorResult<Vec<BatchSelection>> {
        debug!(characters = input.characters.len(), "start_batch: called");
        if input.characters.is_empty() {
            return Err(OrchestratorError::InvalidInput("at least one character is required".into()));
        }

        let mut ranked: Vec<_> = input
            .characters
            .iter()
            .map(|c| (Importance::from_optional(c.importance.as_deref()).priority(), c))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0));

        let mut middle_taken = 0;
        let mut selections = Vec::with_capacity(ranked.len());
        for (priority, character) in ranked {
            let selected = if priority >= BATCH_ALWAYS_PRIORITY {
                true
            } else if priority == BATCH_MIDDLE_PRIORITY && middle_taken < BATCH_MIDDLE_LIMIT {
                middle_taken += 1;
                true
            } else {
                false
            };

            let session_id = if selected {
                Some(self.start_session(input.for_character(character), mode).await?)
            } else {
                debug!(name = %character.name, priority, "start_batch: skipping character");
                None
            };
            selections.push(BatchSelection {
                name: character.name.clone(),
                priority,
                session_id,
            });
        }

        info!(
            started = selections.iter().filter(|s| s.session_id.is_some()).count(),
            skipped = selections.iter().filter(|s| s.session_id.is_none()).count(),
            "Batch started"
        );
        Ok(selections)
    }

    // === Running ===

    /// Run a session to completion, parking on each wave's gate
    ///
    /// A completed session returns its stored artifact; a failed one is
    /// resumed from its first unexecuted wave.
    pub async fn run(&self, session_id: &str) -> OrchestratorResult<FinalArtifact> {
        debug!(%session_id, "run: called");
        let session = self.activate(session_id).await?;
        let result = run_session(self.services.clone(), session).await;
        self.sessions.prune_idle();
        result
    }

    /// Run a session as a background task that `cancel` can abort
    pub async fn spawn_run(&self, session_id: &str) -> OrchestratorResult<JoinHandle<OrchestratorResult<FinalArtifact>>> {
        debug!(%session_id, "spawn_run: called");
        let session = self.activate(session_id).await?;
        let run = run_session(self.services.clone(), session.clone());
        let sessions = self.sessions.clone();
        let handle = tokio::spawn(async move {
            let result = run.await;
            sessions.prune_idle();
            result
        });
        session.set_abort(handle.abort_handle());
        Ok(handle)
    }

    /// Abort a background run; persisted state stays resumable
    pub fn cancel(&self, session_id: &str) -> bool {
        debug!(%session_id, "cancel: called");
        let cancelled = self.active(session_id).map(|s| s.abort()).unwrap_or(false);
        if cancelled {
            info!(%session_id, "Run cancelled");
        }
        cancelled
    }

    // === Approval ===

    /// Approve a wave; repeating it is a no-op
    ///
    /// Returns true when the wave was not approved before.
    pub async fn approve_wave(&self, session_id: &str, wave: u32) -> OrchestratorResult<bool> {
        debug!(%session_id, wave, "approve_wave: called");
        let metadata = self.metadata(session_id).await?;
        if !metadata.plan.is_valid_wave(wave) {
            return Err(OrchestratorError::UnknownWave(wave));
        }

        let (_, newly) = self
            .state()
            .update_metadata(session_id, move |meta| meta.approve_wave(wave))
            .await?;
        self.signal(session_id, &[wave]);
        if newly {
            info!(%session_id, wave, "Wave approved");
            self.services.emitter(session_id).wave_approved(wave);
        }
        Ok(newly)
    }

    /// Raise the approval counter to at least `number`
    ///
    /// Stored checkpoints up to `number` become approved, and every executed
    /// wave whose checkpoints are all covered is approved with them. Returns
    /// the waves approved by this call.
    pub async fn approve_checkpoint(&self, session_id: &str, number: u32) -> OrchestratorResult<Vec<u32>> {
        debug!(%session_id, number, "approve_checkpoint: called");
        let metadata = self.metadata(session_id).await?;
        if number == 0 || number > metadata.total_checkpoints {
            return Err(OrchestratorError::CheckpointNotFound {
                session_id: session_id.to_string(),
                number,
            });
        }

        let (_, waves) = self
            .state()
            .update_metadata(session_id, move |meta| meta.approve_checkpoint(number))
            .await?;
        self.state().approve_checkpoints(session_id, number).await?;

        self.signal(session_id, &waves);
        let emitter = self.services.emitter(session_id);
        for wave in &waves {
            info!(%session_id, wave, checkpoint = number, "Wave approved by checkpoint");
            emitter.wave_approved(*wave);
        }
        Ok(waves)
    }

    fn signal(&self, session_id: &str, waves: &[u32]) {
        if let Some(session) = self.active(session_id) {
            for wave in waves {
                if let Err(e) = session.gates.signal(*wave) {
                    warn!(%session_id, wave, error = %e, "signal: gate rejected wave");
                }
            }
        }
    }

    // === Regeneration & consolidation ===

    /// Re-run one task with feedback, replacing its checkpoint in place
    pub async fn regenerate(&self, session_id: &str, task: TaskKind, feedback: &str) -> OrchestratorResult<Checkpoint> {
        debug!(%session_id, %task, "regenerate: called");
        let session = self.activate(session_id).await?;
        regenerate(&self.services, &session, task, feedback).await
    }

    /// Regenerate whichever task owns checkpoint `number`
    pub async fn regenerate_checkpoint(
        &self,
        session_id: &str,
        number: u32,
        feedback: &str,
    ) -> OrchestratorResult<Checkpoint> {
        debug!(%session_id, number, "regenerate_checkpoint: called");
        let metadata = self.metadata(session_id).await?;
        let task = metadata
            .plan
            .task_for_checkpoint(number)
            .ok_or_else(|| OrchestratorError::CheckpointNotFound {
                session_id: session_id.to_string(),
                number,
            })?;
        self.regenerate(session_id, task, feedback).await
    }

    /// Build the final artifact from the current knowledge base
    ///
    /// Can be repeated; each call overwrites the stored artifact.
    pub async fn consolidate(&self, session_id: &str) -> OrchestratorResult<FinalArtifact> {
        debug!(%session_id, "consolidate: called");
        let session = self.activate(session_id).await?;
        let _lock = session
            .run_lock
            .try_lock()
            .map_err(|_| OrchestratorError::SessionBusy(session_id.to_string()))?;
        consolidate_session(&self.services, &self.services.emitter(session_id)).await
    }

    // === Queries ===

    pub async fn get_status(&self, session_id: &str) -> OrchestratorResult<SessionStatusReport> {
        debug!(%session_id, "get_status: called");
        let metadata = self.metadata(session_id).await?;
        let knowledge = self
            .state()
            .get_knowledge(session_id)
            .await?
            .ok_or_else(|| OrchestratorError::SessionNotFound(session_id.to_string()))?;

        let tasks = metadata
            .plan
            .tasks()
            .filter_map(|task| {
                let state = knowledge.statuses.get(&task)?;
                Some((
                    task,
                    TaskReport {
                        status: state.status,
                        wave: state.wave,
                        error: state.error.clone(),
                    },
                ))
            })
            .collect();

        Ok(SessionStatusReport {
            session_id: metadata.session_id.clone(),
            status: metadata.status,
            mode: metadata.mode,
            current_wave: metadata.current_wave,
            current_checkpoint: metadata.current_checkpoint,
            progress: Progress {
                completed_checkpoints: metadata.completed_checkpoints,
                total_checkpoints: metadata.total_checkpoints,
                current_checkpoint: metadata.current_checkpoint,
            },
            tasks,
            approved_waves: metadata.approved_waves.iter().copied().collect(),
            regenerations: metadata.regenerations,
            running: self.active(session_id).map(|s| s.is_running()).unwrap_or(false),
            last_error: metadata.last_error,
        })
    }

    pub async fn get_checkpoint(&self, session_id: &str, number: u32) -> OrchestratorResult<Checkpoint> {
        debug!(%session_id, number, "get_checkpoint: called");
        self.metadata(session_id).await?;
        self.state()
            .get_checkpoint(session_id, number)
            .await?
            .ok_or_else(|| OrchestratorError::CheckpointNotFound {
                session_id: session_id.to_string(),
                number,
            })
    }

    pub async fn list_checkpoints(&self, session_id: &str) -> OrchestratorResult<Vec<Checkpoint>> {
        debug!(%session_id, "list_checkpoints: called");
        self.metadata(session_id).await?;
        Ok(self.state().list_checkpoints(session_id).await?)
    }

    /// Stored artifact, or `None` if the session has not been consolidated
    pub async fn get_final_artifact(&self, session_id: &str) -> OrchestratorResult<Option<FinalArtifact>> {
        debug!(%session_id, "get_final_artifact: called");
        self.metadata(session_id).await?;
        Ok(self.state().get_final_artifact(session_id).await?)
    }

    /// Metadata of every stored session, newest first
    pub async fn list_sessions(&self) -> OrchestratorResult<Vec<SessionMetadata>> {
        debug!("list_sessions: called");
        let mut sessions = Vec::new();
        for session_id in self.state().list_sessions().await? {
            match self.state().get_metadata(&session_id).await? {
                Some(metadata) => sessions.push(metadata),
                None => warn!(%session_id, "list_sessions: session has no metadata"),
            }
        }
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    /// Delete a session and everything stored for it
    pub async fn delete_session(&self, session_id: &str) -> OrchestratorResult<()> {
        debug!(%session_id, "delete_session: called");
        if let Some(session) = self.active(session_id) {
            if session.is_running() {
                return Err(OrchestratorError::SessionBusy(session_id.to_string()));
            }
        }
        if !self.state().delete_session(session_id).await? {
            return Err(OrchestratorError::SessionNotFound(session_id.to_string()));
        }
        self.sessions.remove(session_id);
        info!(%session_id, "Session deleted");
        Ok(())
    }
}

/// Drive one session; persistence failures mark it failed
async fn run_session(services: Services, session: Arc<ActiveSession>) -> OrchestratorResult<FinalArtifact> {
    let session_id = session.session_id.clone();
    let _guard = session.claim_run()?;

    let metadata = services
        .state
        .get_metadata(&session_id)
        .await?
        .ok_or_else(|| OrchestratorError::SessionNotFound(session_id.clone()))?;
    match metadata.status {
        SessionStatus::Completed => {
            if let Some(artifact) = services.state.get_final_artifact(&session_id).await? {
                debug!(%session_id, "run_session: already completed");
                return Ok(artifact);
            }
        }
        SessionStatus::Failed => {
            info!(%session_id, "Resuming failed session");
            services.state.update_metadata(&session_id, |meta| meta.resume()).await?;
        }
        SessionStatus::InProgress => {}
    }

    info!(%session_id, "Run started");
    let result = WaveScheduler::new(services.clone(), session.clone()).run_all_waves().await;

    if let Err(OrchestratorError::Persistence(e)) = &result {
        error!(%session_id, error = %e, "Run failed");
        services.emitter(&session_id).error(&e.to_string());
        let message = e.to_string();
        if let Err(mark_err) = services
            .state
            .update_metadata(&session_id, move |meta| meta.mark_failed(message))
            .await
        {
            error!(%session_id, error = %mark_err, "Could not mark session failed");
        }
    }
    result
}
