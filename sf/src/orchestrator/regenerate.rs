//! Single-task regeneration with reviewer feedback

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::context::{ActiveSession, Services};
use super::error::{OrchestratorError, OrchestratorResult};
use crate::domain::{Checkpoint, CheckpointOutput, TaskKind, TaskStatus, UnknownTaskError};
use crate::generation::{AssetSink, GenerationRequest};

/// Re-run one task with feedback and replace its checkpoint in place
///
/// Fails with `SessionBusy` while a wave is executing. Other tasks'
/// checkpoints and the approval counter are left untouched.
pub(crate) async fn regenerate(
    services: &Services,
    session: &Arc<ActiveSession>,
    task: TaskKind,
    feedback: &str,
) -> OrchestratorResult<Checkpoint> {
    let session_id = session.session_id.as_str();
    debug!(%session_id, %task, "regenerate: called");
    let _lock = session
        .run_lock
        .try_lock()
        .map_err(|_| OrchestratorError::SessionBusy(session_id.to_string()))?;

    let metadata = services
        .state
        .get_metadata(session_id)
        .await?
        .ok_or_else(|| OrchestratorError::SessionNotFound(session_id.to_string()))?;
    let plan = &metadata.plan;
    let (Some(wave), Some(number)) = (plan.wave_of(task), plan.checkpoint_number(task)) else {
        return Err(UnknownTaskError(task.as_str().to_string()).into());
    };
    if !metadata.is_wave_executed(wave) {
        return Err(OrchestratorError::TaskNotReady(task));
    }

    let emitter = services.emitter(session_id);
    let snapshot = {
        let feedback = feedback.to_string();
        services
            .state
            .update_knowledge(session_id, move |kb| {
                kb.set_feedback(task, feedback);
                kb.set_status(task, TaskStatus::InProgress, None);
            })
            .await?
    };

    emitter.task_started(task.as_str());
    let started = Instant::now();
    let request = GenerationRequest {
        task,
        knowledge: snapshot,
        assets: AssetSink::new(services.state.clone(), session_id),
    };
    let generation = match services.generator.generate(request).await {
        Ok(generation) => generation,
        Err(e) => {
            warn!(%session_id, %task, error = %e, "Regeneration failed");
            emitter.task_failed(task.as_str(), &e.to_string());
            let message = e.to_string();
            services
                .state
                .update_knowledge(session_id, move |kb| kb.record_failure(task, message))
                .await?;
            return Err(e.into());
        }
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;
    emitter.task_completed(task.as_str(), generation.tokens_used, elapsed_ms);

    let output = CheckpointOutput {
        narrative: generation.narrative,
        structured: generation.structured.clone(),
    };
    let (checkpoint, created) = match services.state.get_checkpoint(session_id, number).await? {
        Some(mut existing) => {
            existing.replace_output(output, generation.tokens_used, elapsed_ms);
            (existing, false)
        }
        None => (
            Checkpoint::new(number, task.as_str(), wave, output, generation.tokens_used, elapsed_ms),
            true,
        ),
    };
    services.state.put_checkpoint(session_id, checkpoint.clone()).await?;

    let structured = generation.structured;
    services
        .state
        .update_knowledge(session_id, move |kb| kb.record_output(task, structured))
        .await?;
    let (metadata, _) = services
        .state
        .update_metadata(session_id, move |meta| {
            meta.regenerations += 1;
            if created {
                meta.record_late_checkpoint(wave, number);
            }
        })
        .await?;

    info!(
        %session_id,
        %task,
        checkpoint = number,
        revision = checkpoint.revision,
        regenerations = metadata.regenerations,
        "Checkpoint regenerated"
    );
    emitter.checkpoint_regenerated(number, task.as_str(), checkpoint.revision);
    Ok(checkpoint)
}
