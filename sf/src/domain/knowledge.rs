//! Session-scoped accumulator of task outputs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use super::input::{Mode, StoryInput};
use super::plan::WavePlan;
use super::task::{TaskKind, TaskState, TaskStatus};

/// Knowledge base persisted as `knowledge_base.json`
///
/// Every planned task has an entry in `outputs`, `None` until its wave
/// produces it. Entries are replaced by regeneration, never cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub session_id: String,
    pub input: StoryInput,
    pub mode: Mode,
    pub outputs: BTreeMap<TaskKind, Option<Value>>,
    pub statuses: BTreeMap<TaskKind, TaskState>,
    #[serde(default)]
    pub feedback: BTreeMap<TaskKind, String>,
    pub current_wave: u32,
}

impl KnowledgeBase {
    pub fn new(session_id: impl Into<String>, input: StoryInput, mode: Mode, plan: &WavePlan) -> Self {
        let mut outputs = BTreeMap::new();
        let mut statuses = BTreeMap::new();
        for (idx, wave) in plan.waves().iter().enumerate() {
            for task in wave {
                outputs.insert(*task, None);
                statuses.insert(*task, TaskState::pending(idx as u32 + 1));
            }
        }

        Self {
            session_id: session_id.into(),
            input,
            mode,
            outputs,
            statuses,
            feedback: BTreeMap::new(),
            current_wave: 0,
        }
    }

    pub fn output(&self, task: TaskKind) -> Option<&Value> {
        self.outputs.get(&task).and_then(Option::as_ref)
    }

    pub fn has_output(&self, task: TaskKind) -> bool {
        self.output(task).is_some()
    }

    /// Store a task's latest output and mark it completed
    pub fn record_output(&mut self, task: TaskKind, value: Value) {
        self.outputs.insert(task, Some(value));
        self.set_status(task, TaskStatus::Completed, None);
    }

    pub fn record_failure(&mut self, task: TaskKind, error: impl Into<String>) {
        self.set_status(task, TaskStatus::Failed, Some(error.into()));
    }

    pub fn set_status(&mut self, task: TaskKind, status: TaskStatus, error: Option<String>) {
        let wave = self.statuses.get(&task).map(|s| s.wave).unwrap_or_default();
        self.statuses.insert(task, TaskState { status, wave, error });
    }

    pub fn status(&self, task: TaskKind) -> Option<TaskStatus> {
        self.statuses.get(&task).map(|s| s.status)
    }

    pub fn set_feedback(&mut self, task: TaskKind, feedback: impl Into<String>) {
        self.feedback.insert(task, feedback.into());
    }

    /// Required tasks of the plan whose output is still null
    pub fn missing_required(&self, plan: &WavePlan) -> Vec<TaskKind> {
        plan.required_tasks()
            .into_iter()
            .filter(|task| !self.has_output(*task))
            .collect()
    }

    /// Flattened view handed to generation as context
    ///
    /// Outputs appear under their task name (null when absent) and any
    /// feedback under `<task>_feedback`.
    pub fn to_context(&self) -> Value {
        let mut map = Map::new();
        map.insert("session_id".to_string(), json!(self.session_id));
        map.insert("mode".to_string(), json!(self.mode));
        map.insert("current_wave".to_string(), json!(self.current_wave));
        map.insert(
            "input".to_string(),
            serde_json::to_value(&self.input).unwrap_or(Value::Null),
        );
        for (task, output) in &self.outputs {
            map.insert(task.as_str().to_string(), output.clone().unwrap_or(Value::Null));
        }
        for (task, feedback) in &self.feedback {
            map.insert(task.feedback_key(), json!(feedback));
        }
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::input::{CharacterInput, Storyline};

    fn kb() -> KnowledgeBase {
        let input = StoryInput {
            characters: vec![CharacterInput {
                name: "Mira".into(),
                appearance: "tall".into(),
                personality: "wry".into(),
                role: "pilot".into(),
                importance: None,
            }],
            storyline: Storyline::default(),
        };
        KnowledgeBase::new("s1", input, Mode::Fast, &WavePlan::standard(false))
    }

    #[test]
    fn test_new_kb_has_null_entries_for_every_task() {
        let kb = kb();
        assert_eq!(kb.outputs.len(), 6);
        assert!(kb.outputs.values().all(Option::is_none));
        assert_eq!(kb.statuses[&TaskKind::StoryArc].wave, 2);
        assert_eq!(kb.status(TaskKind::Personality), Some(TaskStatus::Pending));
    }

    #[test]
    fn test_record_output_and_failure() {
        let mut kb = kb();
        kb.record_output(TaskKind::Personality, json!({"core_traits": ["wry"]}));
        kb.record_failure(TaskKind::BackstoryMotivation, "rate limited");

        assert!(kb.has_output(TaskKind::Personality));
        assert_eq!(kb.status(TaskKind::Personality), Some(TaskStatus::Completed));
        assert_eq!(kb.statuses[&TaskKind::BackstoryMotivation].error.as_deref(), Some("rate limited"));
        assert_eq!(kb.statuses[&TaskKind::BackstoryMotivation].wave, 1);
    }

    #[test]
    fn test_missing_required() {
        let mut kb = kb();
        let plan = WavePlan::standard(true);
        assert_eq!(kb.missing_required(&plan).len(), 6);
        for task in plan.required_tasks() {
            kb.record_output(task, json!({}));
        }
        assert!(kb.missing_required(&plan).is_empty());
    }

    #[test]
    fn test_context_includes_feedback() {
        let mut kb = kb();
        kb.set_feedback(TaskKind::Personality, "make them braver");
        let ctx = kb.to_context();
        assert_eq!(ctx["personality_feedback"], "make them braver");
        assert_eq!(ctx["personality"], Value::Null);
        assert_eq!(ctx["input"]["characters"][0]["name"], "Mira");
        assert_eq!(ctx["mode"], "fast");
    }
}
