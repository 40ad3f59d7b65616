//! Final artifact builder

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use super::error::{OrchestratorError, OrchestratorResult};
use crate::domain::{
    ARTIFACT_VERSION, ArtifactMetadata, Checkpoint, CheckpointOutput, FINAL_CONSOLIDATION, FinalArtifact, ImageRef,
    Importance, KnowledgeBase, Overview, SessionMetadata, TaskKind, Visual,
};

/// Merge every task output into one artifact
///
/// Fails with `IncompleteData` when any required output of the session's
/// plan is still null; missing sections are never defaulted.
pub fn build_artifact(
    metadata: &SessionMetadata,
    knowledge: &KnowledgeBase,
    checkpoints: &[Checkpoint],
) -> OrchestratorResult<FinalArtifact> {
    debug!(session_id = %metadata.session_id, "build_artifact: called");
    let missing = knowledge.missing_required(&metadata.plan);
    if !missing.is_empty() {
        return Err(OrchestratorError::IncompleteData(missing));
    }

    let section = |task: TaskKind| knowledge.output(task).cloned().unwrap_or(Value::Null);
    let character = knowledge.input.primary_character();
    let name = character.map(|c| c.name.clone()).unwrap_or_default();

    let role = knowledge
        .output(TaskKind::StoryArc)
        .and_then(|arc| arc.get("role"))
        .and_then(Value::as_str)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .or_else(|| character.map(|c| c.role.clone()))
        .unwrap_or_default();
    let importance = Importance::from_optional(character.and_then(|c| c.importance.as_deref()));

    let total_tokens = checkpoints
        .iter()
        .filter(|cp| cp.task != FINAL_CONSOLIDATION)
        .map(|cp| cp.metadata.tokens_used)
        .sum();

    Ok(FinalArtifact {
        session_id: metadata.session_id.clone(),
        name: name.clone(),
        version: ARTIFACT_VERSION.to_string(),
        completed_at: Utc::now(),
        overview: Overview {
            one_line: format!("{} - {}", name, role),
            name,
            role,
            importance: importance.score(),
        },
        visual: visual(knowledge.output(TaskKind::ImageGeneration)),
        psychology: section(TaskKind::Personality),
        physical_presence: section(TaskKind::PhysicalDescription),
        voice: section(TaskKind::VoiceDialogue),
        backstory_motivation: section(TaskKind::BackstoryMotivation),
        narrative_arc: section(TaskKind::StoryArc),
        relationships: relationships(knowledge.output(TaskKind::Relationships)),
        metadata: ArtifactMetadata {
            mode: metadata.mode,
            total_checkpoints: metadata.total_checkpoints,
            regenerations: metadata.regenerations,
            total_tokens,
        },
    })
}

/// Terminal checkpoint recording the artifact
pub fn consolidation_checkpoint(metadata: &SessionMetadata, artifact: &FinalArtifact) -> Checkpoint {
    let plan = &metadata.plan;
    Checkpoint::new(
        plan.final_checkpoint_number(),
        FINAL_CONSOLIDATION,
        plan.consolidation_wave(),
        CheckpointOutput {
            narrative: artifact.overview.one_line.clone(),
            structured: serde_json::to_value(artifact).unwrap_or(Value::Null),
        },
        0,
        0,
    )
}

/// Accepts `{"relationships": [..]}` or a bare list
fn relationships(output: Option<&Value>) -> Vec<Value> {
    match output {
        Some(Value::Array(items)) => items.clone(),
        Some(value) => value
            .get("relationships")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        None => Vec::new(),
    }
}

fn visual(output: Option<&Value>) -> Visual {
    let Some(output) = output else {
        return Visual::default();
    };

    let images = output
        .get("images")
        .and_then(Value::as_array)
        .map(|images| {
            images
                .iter()
                .filter_map(|img| {
                    let url = img.get("url").or_else(|| img.get("path")).and_then(Value::as_str)?;
                    let kind = img.get("type").and_then(Value::as_str).unwrap_or("image");
                    Some(ImageRef {
                        kind: kind.to_string(),
                        url: url.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Visual {
        images,
        style_notes: output
            .get("style_profile")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}
