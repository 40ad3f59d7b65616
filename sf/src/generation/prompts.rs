//! Prompt templates
//!
//! Templates are compiled into the binary from `.pmt` files and rendered with
//! Handlebars against a view of the knowledge base.

use std::collections::BTreeMap;

use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use super::GenerationError;
use crate::domain::{CharacterInput, KnowledgeBase, Mode, Storyline, TaskKind};

pub const SYSTEM: &str = include_str!("../../prompts/system.pmt");
pub const TASK: &str = include_str!("../../prompts/task.pmt");

const SYSTEM_TEMPLATE: &str = "system";
const TASK_TEMPLATE: &str = "task";

/// What the model is asked to produce for each task
pub fn instructions(task: TaskKind) -> &'static str {
    match task {
        TaskKind::Personality => {
            "Define the character's personality. Fields: core_traits (list of strings), fears (list), \
             secrets (list), emotional_baseline (string), triggers (list)."
        }
        TaskKind::BackstoryMotivation => {
            "Write the character's backstory and motivation. Fields: timeline (list of {age, event}), \
             formative_experiences (list of {experience, impact}), goals ({surface, deep}), \
             internal_conflicts (list of {conflict, description})."
        }
        TaskKind::VoiceDialogue => {
            "Define how the character speaks. Fields: speech_pattern (string), verbal_tics (list), \
             vocabulary (string), sample_dialogue ({confident, vulnerable, stressed, sarcastic})."
        }
        TaskKind::PhysicalDescription => {
            "Describe the character's physical presence. Fields: mannerisms (list), body_language (string), \
             movement_style (string), physical_quirks (list)."
        }
        TaskKind::StoryArc => {
            "Plan the character's arc through the story. Fields: role (string), arc_type (string), \
             transformation_beats (list of {act, beat}), scene_presence (list of scene titles)."
        }
        TaskKind::Relationships => {
            "Map the character's relationships with the other characters in the story. Fields: \
             relationships (list of {character, type, dynamic, evolution})."
        }
        TaskKind::ImageGeneration => {
            "Write briefs for reference images of the character. Fields: images (list of {type, prompt} \
             where type is one of portrait, full_body, action, expression), style_profile (string)."
        }
    }
}

#[derive(Debug, Serialize)]
struct SystemContext<'a> {
    mode: &'a str,
    fast: bool,
    deep: bool,
}

#[derive(Debug, Serialize)]
struct TaskContext<'a> {
    title: &'a str,
    instructions: &'a str,
    character: Option<&'a CharacterInput>,
    storyline: &'a Storyline,
    scenes: Vec<String>,
    /// Pretty JSON of every output already produced, keyed by task name
    prior: BTreeMap<&'static str, String>,
    feedback: Option<&'a str>,
    /// This task's current output, shown only alongside feedback
    previous: Option<String>,
}

/// Renders system and task prompts
pub struct PromptRenderer {
    hbs: Handlebars<'static>,
}

impl PromptRenderer {
    pub fn new() -> Result<Self, GenerationError> {
        debug!("PromptRenderer::new: called");
        let mut hbs = Handlebars::new();
        hbs.register_escape_fn(handlebars::no_escape);
        hbs.register_template_string(SYSTEM_TEMPLATE, SYSTEM)
            .map_err(|e| GenerationError::Prompt(e.to_string()))?;
        hbs.register_template_string(TASK_TEMPLATE, TASK)
            .map_err(|e| GenerationError::Prompt(e.to_string()))?;
        Ok(Self { hbs })
    }

    pub fn system_prompt(&self, mode: Mode) -> Result<String, GenerationError> {
        let context = SystemContext {
            mode: mode.as_str(),
            fast: mode == Mode::Fast,
            deep: mode == Mode::Deep,
        };
        self.hbs
            .render(SYSTEM_TEMPLATE, &context)
            .map_err(|e| GenerationError::Prompt(e.to_string()))
    }

    /// Render the task prompt; other tasks' outputs and this task's feedback are included
    pub fn task_prompt(&self, task: TaskKind, knowledge: &KnowledgeBase) -> Result<String, GenerationError> {
        debug!(%task, "PromptRenderer::task_prompt: called");
        let mut prior = BTreeMap::new();
        for (kind, output) in &knowledge.outputs {
            if *kind == task {
                continue;
            }
            if let Some(value) = output {
                prior.insert(kind.as_str(), pretty_json(value)?);
            }
        }

        let feedback = knowledge.feedback.get(&task).map(String::as_str);
        let previous = match (feedback, knowledge.output(task)) {
            (Some(_), Some(value)) => Some(pretty_json(value)?),
            _ => None,
        };

        let context = TaskContext {
            title: task.title(),
            instructions: instructions(task),
            character: knowledge.input.primary_character(),
            storyline: &knowledge.input.storyline,
            scenes: knowledge.input.storyline.scenes.iter().map(|s| s.summary()).collect(),
            prior,
            feedback,
            previous,
        };
        self.hbs
            .render(TASK_TEMPLATE, &context)
            .map_err(|e| GenerationError::Prompt(e.to_string()))
    }
}

fn pretty_json(value: &serde_json::Value) -> Result<String, GenerationError> {
    serde_json::to_string_pretty(value).map_err(|e| GenerationError::Prompt(e.to_string()))
}
