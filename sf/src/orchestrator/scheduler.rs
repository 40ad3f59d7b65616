//! Wave scheduler
//!
//! Runs a session's plan wave by wave. Inside a wave every task runs
//! concurrently against the same knowledge base snapshot; checkpoints are
//! then written in declaration order, so numbering never depends on which
//! call returned first. Between waves the scheduler parks on the wave's
//! approval gate with the run lock released.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::consolidate::{build_artifact, consolidation_checkpoint};
use super::context::{ActiveSession, Services};
use super::error::{OrchestratorError, OrchestratorResult};
use crate::domain::{
    Checkpoint, CheckpointOutput, FinalArtifact, KnowledgeBase, SessionMetadata, TaskKind, TaskStatus,
};
use crate::events::EventEmitter;
use crate::generation::{AssetSink, Generation, GenerationError, GenerationRequest};

/// Outcome of one task within a wave
struct TaskOutcome {
    task: TaskKind,
    result: Result<Generation, GenerationError>,
    elapsed_ms: u64,
}

pub(crate) struct WaveScheduler {
    services: Services,
    session: Arc<ActiveSession>,
    emitter: EventEmitter,
}

impl WaveScheduler {
    pub fn new(services: Services, session: Arc<ActiveSession>) -> Self {
        let emitter = services.emitter(&session.session_id);
        Self {
            services,
            session,
            emitter,
        }
    }

    fn session_id(&self) -> &str {
        &self.session.session_id
    }

    async fn metadata(&self) -> OrchestratorResult<SessionMetadata> {
        self.services
            .state
            .get_metadata(self.session_id())
            .await?
            .ok_or_else(|| OrchestratorError::SessionNotFound(self.session_id().to_string()))
    }

    /// Execute every remaining wave, then consolidate
    ///
    /// Waves already recorded as executed are skipped, so calling this on a
    /// session interrupted mid-run resumes where it stopped.
    pub async fn run_all_waves(&self) -> OrchestratorResult<FinalArtifact> {
        debug!(session_id = %self.session_id(), "run_all_waves: called");
        let metadata = self.metadata().await?;
        let plan = metadata.plan.clone();

        for wave in 1..=plan.wave_count() {
            let checkpoints = match metadata.wave_checkpoints.get(&wave) {
                Some(numbers) if metadata.is_wave_executed(wave) => {
                    debug!(wave, "run_all_waves: wave already executed, skipping");
                    numbers.clone()
                }
                _ => self.run_wave(wave).await?,
            };
            self.await_approval(wave, checkpoints).await?;
        }

        self.consolidate().await
    }

    /// Run one wave and persist its checkpoints; returns their numbers
    pub async fn run_wave(&self, wave: u32) -> OrchestratorResult<Vec<u32>> {
        debug!(session_id = %self.session_id(), wave, "run_wave: called");
        let _lock = self.session.run_lock.lock().await;
        let metadata = self.metadata().await?;
        let tasks: Vec<TaskKind> = metadata
            .plan
            .wave(wave)
            .ok_or(OrchestratorError::UnknownWave(wave))?
            .to_vec();

        info!(session_id = %self.session_id(), wave, task_count = tasks.len(), "Wave started");
        self.emitter
            .wave_started(wave, tasks.iter().map(|t| t.as_str().to_string()).collect());

        let snapshot = {
            let tasks = tasks.clone();
            self.services
                .state
                .update_knowledge(self.session_id(), move |kb| {
                    kb.current_wave = wave;
                    for task in tasks {
                        kb.set_status(task, TaskStatus::InProgress, None);
                    }
                })
                .await?
        };

        let outcomes = join_all(tasks.iter().map(|task| self.run_task(*task, &snapshot))).await;

        let mut checkpoints = Vec::new();
        let mut completed = Vec::new();
        let mut failed = Vec::new();
        for outcome in outcomes {
            let task = outcome.task;
            match outcome.result {
                Ok(generation) => {
                    let number = metadata
                        .plan
                        .checkpoint_number(task)
                        .ok_or_else(|| OrchestratorError::InvalidInput(format!("task {} not in plan", task)))?;
                    let checkpoint = Checkpoint::new(
                        number,
                        task.as_str(),
                        wave,
                        CheckpointOutput {
                            narrative: generation.narrative,
                            structured: generation.structured.clone(),
                        },
                        generation.tokens_used,
                        outcome.elapsed_ms,
                    );
                    self.services.state.put_checkpoint(self.session_id(), checkpoint).await?;
                    let structured = generation.structured;
                    self.services
                        .state
                        .update_knowledge(self.session_id(), move |kb| kb.record_output(task, structured))
                        .await?;
                    self.emitter.checkpoint_ready(number, task.as_str());
                    checkpoints.push(number);
                    completed.push(task.as_str().to_string());
                }
                Err(e) => {
                    let message = e.to_string();
                    self.services
                        .state
                        .update_knowledge(self.session_id(), move |kb| kb.record_failure(task, message))
                        .await?;
                    failed.push(task.as_str().to_string());
                }
            }
        }

        let recorded = checkpoints.clone();
        let (updated, derived) = self
            .services
            .state
            .update_metadata(self.session_id(), move |meta| {
                let produced = !recorded.is_empty();
                meta.record_wave_executed(wave, recorded);
                // Approvals given ahead of time may already cover this wave
                if produced {
                    meta.approve_checkpoint(meta.completed_checkpoints)
                } else {
                    Vec::new()
                }
            })
            .await?;
        if updated.completed_checkpoints > 0 {
            self.services
                .state
                .approve_checkpoints(self.session_id(), updated.completed_checkpoints)
                .await?;
        }
        self.signal_derived(&derived);

        info!(
            session_id = %self.session_id(),
            wave,
            completed = completed.len(),
            failed = failed.len(),
            "Wave complete"
        );
        self.emitter.wave_complete(wave, completed, failed);
        Ok(checkpoints)
    }

    async fn run_task(&self, task: TaskKind, snapshot: &KnowledgeBase) -> TaskOutcome {
        let _permit = self.services.permits.acquire().await.ok();
        self.emitter.task_started(task.as_str());
        let started = Instant::now();

        let request = GenerationRequest {
            task,
            knowledge: snapshot.clone(),
            assets: AssetSink::new(self.services.state.clone(), self.session_id()),
        };
        let result = self.services.generator.generate(request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(generation) => {
                debug!(%task, elapsed_ms, "run_task: completed");
                self.emitter.task_completed(task.as_str(), generation.tokens_used, elapsed_ms);
            }
            Err(e) => {
                warn!(session_id = %self.session_id(), %task, error = %e, "Task failed");
                self.emitter.task_failed(task.as_str(), &e.to_string());
            }
        }

        TaskOutcome {
            task,
            result,
            elapsed_ms,
        }
    }

    fn signal_derived(&self, waves: &[u32]) {
        for wave in waves {
            if let Ok(true) = self.session.gates.signal(*wave) {
                self.emitter.wave_approved(*wave);
            }
        }
    }

    /// Park on the wave's gate until it is signaled
    async fn await_approval(&self, wave: u32, checkpoints: Vec<u32>) -> OrchestratorResult<()> {
        debug!(session_id = %self.session_id(), wave, "await_approval: called");
        // Approval may have been persisted before this process built its gates
        if self.metadata().await?.is_wave_approved(wave) {
            let _ = self.session.gates.signal(wave)?;
        }

        let message = if self.session.gates.is_signaled(wave) {
            format!("Wave {} already approved (checkpoints {:?})", wave, checkpoints)
        } else {
            info!(session_id = %self.session_id(), wave, "Awaiting approval");
            format!(
                "Wave {} ready for review: approve checkpoints {:?} to continue",
                wave, checkpoints
            )
        };
        self.emitter.awaiting_approval(wave, checkpoints, &message);

        self.session.gates.wait(wave).await?;
        debug!(session_id = %self.session_id(), wave, "await_approval: gate passed");
        Ok(())
    }

    /// Build, store and record the final artifact
    pub async fn consolidate(&self) -> OrchestratorResult<FinalArtifact> {
        debug!(session_id = %self.session_id(), "consolidate: called");
        let _lock = self.session.run_lock.lock().await;
        consolidate_session(&self.services, &self.emitter).await
    }
}

/// Consolidate a session; the caller holds its run lock
pub(crate) async fn consolidate_session(
    services: &Services,
    emitter: &EventEmitter,
) -> OrchestratorResult<FinalArtifact> {
    let session_id = emitter.session_id();
    let metadata = services
        .state
        .get_metadata(session_id)
        .await?
        .ok_or_else(|| OrchestratorError::SessionNotFound(session_id.to_string()))?;
    let knowledge = services
        .state
        .get_knowledge(session_id)
        .await?
        .ok_or_else(|| OrchestratorError::SessionNotFound(session_id.to_string()))?;
    let checkpoints = services.state.list_checkpoints(session_id).await?;

    let artifact = match build_artifact(&metadata, &knowledge, &checkpoints) {
        Ok(artifact) => artifact,
        Err(e) => {
            warn!(%session_id, error = %e, "Consolidation refused");
            emitter.error(&e.to_string());
            return Err(e);
        }
    };

    services.state.put_final_artifact(session_id, artifact.clone()).await?;
    services
        .state
        .put_checkpoint(session_id, consolidation_checkpoint(&metadata, &artifact))
        .await?;
    services.state.update_metadata(session_id, |meta| meta.mark_completed()).await?;

    info!(%session_id, name = %artifact.name, "Session complete");
    emitter.session_complete();
    Ok(artifact)
}
