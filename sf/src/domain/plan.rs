//! Wave plan: ordered waves of concurrently runnable tasks
//!
//! Checkpoint numbers are fixed by declaration order, not by completion
//! order. Task `i` (1-based, flattened across waves) always owns checkpoint
//! `i`, and consolidation owns `task_count + 1`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use super::task::TaskKind;

/// Reasons a plan is rejected at construction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Plan has no waves")]
    Empty,

    #[error("Wave {0} has no tasks")]
    EmptyWave(u32),

    #[error("Task '{0}' appears more than once in the plan")]
    DuplicateTask(TaskKind),
}

/// Ordered list of waves, each an ordered list of tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<TaskKind>>", into = "Vec<Vec<TaskKind>>")]
pub struct WavePlan {
    waves: Vec<Vec<TaskKind>>,
}

impl WavePlan {
    /// Validate and build a plan
    pub fn new(waves: Vec<Vec<TaskKind>>) -> Result<Self, PlanError> {
        if waves.is_empty() {
            return Err(PlanError::Empty);
        }

        let mut seen = HashSet::new();
        for (idx, wave) in waves.iter().enumerate() {
            if wave.is_empty() {
                return Err(PlanError::EmptyWave(idx as u32 + 1));
            }
            for task in wave {
                if !seen.insert(*task) {
                    return Err(PlanError::DuplicateTask(*task));
                }
            }
        }

        Ok(Self { waves })
    }

    /// The three-wave character pipeline
    pub fn standard(image_generation: bool) -> Self {
        let mut last = vec![TaskKind::Relationships];
        if image_generation {
            last.push(TaskKind::ImageGeneration);
        }

        Self {
            waves: vec![
                vec![TaskKind::Personality, TaskKind::BackstoryMotivation],
                vec![
                    TaskKind::VoiceDialogue,
                    TaskKind::PhysicalDescription,
                    TaskKind::StoryArc,
                ],
                last,
            ],
        }
    }

    pub fn waves(&self) -> &[Vec<TaskKind>] {
        &self.waves
    }

    /// Tasks of a 1-based wave number
    pub fn wave(&self, wave: u32) -> Option<&[TaskKind]> {
        let idx = (wave as usize).checked_sub(1)?;
        self.waves.get(idx).map(Vec::as_slice)
    }

    pub fn wave_count(&self) -> u32 {
        self.waves.len() as u32
    }

    pub fn is_valid_wave(&self, wave: u32) -> bool {
        wave >= 1 && wave <= self.wave_count()
    }

    /// All tasks in flattened declaration order
    pub fn tasks(&self) -> impl Iterator<Item = TaskKind> + '_ {
        self.waves.iter().flatten().copied()
    }

    pub fn task_count(&self) -> u32 {
        self.waves.iter().map(Vec::len).sum::<usize>() as u32
    }

    pub fn contains(&self, task: TaskKind) -> bool {
        self.tasks().any(|t| t == task)
    }

    /// 1-based wave that owns `task`
    pub fn wave_of(&self, task: TaskKind) -> Option<u32> {
        self.waves
            .iter()
            .position(|w| w.contains(&task))
            .map(|idx| idx as u32 + 1)
    }

    /// Pre-assigned checkpoint number of `task`
    pub fn checkpoint_number(&self, task: TaskKind) -> Option<u32> {
        self.tasks().position(|t| t == task).map(|idx| idx as u32 + 1)
    }

    /// Task that owns a checkpoint number; `None` for consolidation or out of range
    pub fn task_for_checkpoint(&self, number: u32) -> Option<TaskKind> {
        let idx = (number as usize).checked_sub(1)?;
        self.tasks().nth(idx)
    }

    /// Checkpoint number of the consolidation step
    pub fn final_checkpoint_number(&self) -> u32 {
        self.task_count() + 1
    }

    pub fn total_checkpoints(&self) -> u32 {
        self.task_count() + 1
    }

    /// Pseudo-wave number recorded on the consolidation checkpoint
    pub fn consolidation_wave(&self) -> u32 {
        self.wave_count() + 1
    }

    /// Tasks whose output consolidation cannot do without
    pub fn required_tasks(&self) -> Vec<TaskKind> {
        self.tasks().filter(TaskKind::is_required).collect()
    }
}

impl TryFrom<Vec<Vec<TaskKind>>> for WavePlan {
    type Error = PlanError;

    fn try_from(waves: Vec<Vec<TaskKind>>) -> Result<Self, Self::Error> {
        Self::new(waves)
    }
}

impl From<WavePlan> for Vec<Vec<TaskKind>> {
    fn from(plan: WavePlan) -> Self {
        plan.waves
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_plan_numbering() {
        let plan = WavePlan::standard(false);
        assert_eq!(plan.wave_count(), 3);
        assert_eq!(plan.checkpoint_number(TaskKind::Personality), Some(1));
        assert_eq!(plan.checkpoint_number(TaskKind::BackstoryMotivation), Some(2));
        assert_eq!(plan.checkpoint_number(TaskKind::StoryArc), Some(5));
        assert_eq!(plan.checkpoint_number(TaskKind::Relationships), Some(6));
        assert_eq!(plan.checkpoint_number(TaskKind::ImageGeneration), None);
        assert_eq!(plan.final_checkpoint_number(), 7);
        assert_eq!(plan.total_checkpoints(), 7);
    }

    #[test]
    fn test_image_generation_adds_a_checkpoint() {
        let plan = WavePlan::standard(true);
        assert_eq!(plan.checkpoint_number(TaskKind::ImageGeneration), Some(7));
        assert_eq!(plan.total_checkpoints(), 8);
        assert_eq!(plan.task_for_checkpoint(6), Some(TaskKind::Relationships));
        assert!(!plan.required_tasks().contains(&TaskKind::ImageGeneration));
    }

    #[test]
    fn test_wave_lookup() {
        let plan = WavePlan::standard(false);
        assert_eq!(plan.wave_of(TaskKind::VoiceDialogue), Some(2));
        assert_eq!(plan.wave(0), None);
        assert_eq!(plan.wave(4), None);
        assert_eq!(plan.wave(2).map(<[TaskKind]>::len), Some(3));
        assert!(plan.is_valid_wave(3));
        assert!(!plan.is_valid_wave(0));
    }

    #[test]
    fn test_task_for_checkpoint() {
        let plan = WavePlan::standard(false);
        assert_eq!(plan.task_for_checkpoint(1), Some(TaskKind::Personality));
        assert_eq!(plan.task_for_checkpoint(6), Some(TaskKind::Relationships));
        assert_eq!(plan.task_for_checkpoint(7), None);
        assert_eq!(plan.task_for_checkpoint(0), None);
    }

    #[test]
    fn test_rejects_invalid_plans() {
        assert_eq!(WavePlan::new(vec![]), Err(PlanError::Empty));
        assert_eq!(
            WavePlan::new(vec![vec![TaskKind::Personality], vec![]]),
            Err(PlanError::EmptyWave(2))
        );
        assert_eq!(
            WavePlan::new(vec![vec![TaskKind::Personality], vec![TaskKind::Personality]]),
            Err(PlanError::DuplicateTask(TaskKind::Personality))
        );
    }

    #[test]
    fn test_serde_validates() {
        let json = r#"[["personality"],["personality"]]"#;
        assert!(serde_json::from_str::<WavePlan>(json).is_err());

        let plan = WavePlan::standard(true);
        let json = serde_json::to_string(&plan).unwrap();
        assert_eq!(serde_json::from_str::<WavePlan>(&json).unwrap(), plan);
    }
}
