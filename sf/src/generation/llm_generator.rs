//! LLM-backed generator

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::prompts::PromptRenderer;
use super::{Generation, GenerationError, GenerationRequest, Generator};
use crate::domain::TaskKind;
use crate::llm::{CompletionRequest, LlmClient, Message, StopReason};

const JSON_FENCE: &str = "```json";
const FENCE: &str = "```";

/// Generator that prompts an LLM once per task
pub struct LlmGenerator {
    client: Arc<dyn LlmClient>,
    renderer: PromptRenderer,
    max_tokens: u32,
}

impl LlmGenerator {
    pub fn new(client: Arc<dyn LlmClient>, max_tokens: u32) -> Result<Self, GenerationError> {
        Ok(Self {
            client,
            renderer: PromptRenderer::new()?,
            max_tokens,
        })
    }
}

#[async_trait]
impl Generator for LlmGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, GenerationError> {
        let task = request.task;
        debug!(%task, session_id = %request.knowledge.session_id, "LlmGenerator::generate: called");
        let started = Instant::now();

        let completion = CompletionRequest {
            system_prompt: self.renderer.system_prompt(request.knowledge.mode)?,
            messages: vec![Message::user(self.renderer.task_prompt(task, &request.knowledge)?)],
            max_tokens: self.max_tokens,
        };
        let response = self.client.complete(completion).await?;
        if response.stop_reason == StopReason::MaxTokens {
            warn!(%task, "LlmGenerator::generate: reply truncated at max tokens");
        }

        let text = response
            .content
            .ok_or_else(|| GenerationError::MalformedOutput("empty reply".to_string()))?;
        let (mut structured, narrative) = parse_reply(&text)?;

        if task == TaskKind::ImageGeneration {
            save_image_briefs(&mut structured, &request).await?;
        }

        info!(
            %task,
            tokens = response.usage.total(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Task generated"
        );
        Ok(Generation {
            structured,
            narrative,
            tokens_used: response.usage.total(),
        })
    }
}

/// Persist each image brief as an asset and record its path on the entry
async fn save_image_briefs(structured: &mut Value, request: &GenerationRequest) -> Result<(), GenerationError> {
    let Some(images) = structured.get_mut("images").and_then(Value::as_array_mut) else {
        return Err(GenerationError::MalformedOutput("image_generation reply has no images list".to_string()));
    };

    for (idx, image) in images.iter_mut().enumerate() {
        let kind = image
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("image_{}", idx + 1));
        let prompt = image.get("prompt").and_then(Value::as_str).unwrap_or_default().to_string();
        let path = request
            .assets
            .save_binary_asset(&format!("{}_brief", kind), "txt", prompt.into_bytes())
            .await?;
        if let Some(obj) = image.as_object_mut() {
            obj.insert("path".to_string(), Value::String(path.to_string_lossy().into_owned()));
        }
    }
    Ok(())
}

/// Split a model reply into its JSON object and narrative prose
///
/// Accepts a fenced ```json block, a bare leading object, or an object
/// embedded in prose. A top-level `narrative` string is used when no prose
/// surrounds the object.
pub fn parse_reply(text: &str) -> Result<(Value, String), GenerationError> {
    let (value, rest) = if let Some(start) = text.find(JSON_FENCE) {
        let body_start = start + JSON_FENCE.len();
        let body_end = text[body_start..]
            .find(FENCE)
            .map(|i| body_start + i)
            .ok_or_else(|| GenerationError::MalformedOutput("unterminated json block".to_string()))?;
        let value: Value = serde_json::from_str(text[body_start..body_end].trim())
            .map_err(|e| GenerationError::MalformedOutput(e.to_string()))?;
        let rest = format!("{}\n{}", &text[..start], &text[body_end + FENCE.len()..]);
        (value, rest)
    } else {
        let start = text
            .find('{')
            .ok_or_else(|| GenerationError::MalformedOutput("no JSON object in reply".to_string()))?;
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        let value = match stream.next() {
            Some(Ok(value)) => value,
            Some(Err(e)) => return Err(GenerationError::MalformedOutput(e.to_string())),
            None => return Err(GenerationError::MalformedOutput("no JSON object in reply".to_string())),
        };
        let end = start + stream.byte_offset();
        (value, format!("{}\n{}", &text[..start], &text[end..]))
    };

    let Value::Object(mut map) = value else {
        return Err(GenerationError::MalformedOutput("reply JSON is not an object".to_string()));
    };

    let mut narrative = rest.trim().to_string();
    if narrative.is_empty() {
        if let Some(Value::String(inline)) = map.remove("narrative") {
            narrative = inline;
        }
    }

    Ok((Value::Object(map), narrative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CharacterInput, KnowledgeBase, Mode, SessionMetadata, StoryInput, Storyline, WavePlan};
    use crate::generation::AssetSink;
    use crate::llm::client::mock::MockLlmClient;
    use crate::state::StateManager;
    use tempfile::tempdir;

    #[test]
    fn test_parse_fenced_reply() {
        let text = "```json\n{\"core_traits\": [\"brave\"]}\n```\n\nMira is brave.";
        let (value, narrative) = parse_reply(text).unwrap();
        assert_eq!(value["core_traits"][0], "brave");
        assert_eq!(narrative, "Mira is brave.");
    }

    #[test]
    fn test_parse_bare_object_with_trailing_prose() {
        let text = "Here you go: {\"a\": {\"b\": 1}} and that is all.";
        let (value, narrative) = parse_reply(text).unwrap();
        assert_eq!(value["a"]["b"], 1);
        assert!(narrative.contains("Here you go:"));
        assert!(narrative.contains("and that is all."));
    }

    #[test]
    fn test_parse_inline_narrative_field() {
        let text = r#"{"narrative": "A quiet pilot.", "structured_field": true}"#;
        let (value, narrative) = parse_reply(text).unwrap();
        assert_eq!(narrative, "A quiet pilot.");
        assert!(value.get("narrative").is_none());
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        assert!(parse_reply("no json here").is_err());
        assert!(parse_reply("```json\n[1, 2]\n```").is_err());
        assert!(parse_reply("```json\n{\"a\": 1}").is_err());
    }

    async fn request(dir: &std::path::Path, task: TaskKind) -> (StateManager, GenerationRequest) {
        let state = StateManager::spawn(dir).unwrap();
        let plan = WavePlan::standard(true);
        let input = StoryInput {
            characters: vec![CharacterInput {
                name: "Mira".into(),
                appearance: String::new(),
                personality: String::new(),
                role: "pilot".into(),
                importance: None,
            }],
            storyline: Storyline::default(),
        };
        let kb = KnowledgeBase::new("s1", input, Mode::Deep, &plan);
        state
            .create_session(SessionMetadata::new("s1", Mode::Deep, plan), kb.clone())
            .await
            .unwrap();
        let req = GenerationRequest {
            task,
            knowledge: kb,
            assets: AssetSink::new(state.clone(), "s1"),
        };
        (state, req)
    }

    #[tokio::test]
    async fn test_generate_uses_prompts_and_counts_tokens() {
        let temp = tempdir().unwrap();
        let (state, req) = request(temp.path(), TaskKind::Personality).await;
        let client = Arc::new(MockLlmClient::new(vec![
            "```json\n{\"core_traits\": [\"wry\"]}\n```\nWry and guarded.".to_string(),
        ]));
        let generator = LlmGenerator::new(client.clone(), 2000).unwrap();

        let out = generator.generate(req).await.unwrap();
        assert_eq!(out.structured["core_traits"][0], "wry");
        assert_eq!(out.narrative, "Wry and guarded.");
        assert_eq!(out.tokens_used, 150);

        let sent = client.requests();
        assert!(sent[0].system_prompt.contains("Depth: deep"));
        assert!(sent[0].messages[0].content.contains("Section: Personality"));

        state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_image_generation_saves_briefs() {
        let temp = tempdir().unwrap();
        let (state, req) = request(temp.path(), TaskKind::ImageGeneration).await;
        let client = Arc::new(MockLlmClient::new(vec![
            r#"{"images": [{"type": "portrait", "prompt": "close up"}], "style_profile": "noir"}"#.to_string(),
        ]));
        let generator = LlmGenerator::new(client, 2000).unwrap();

        let out = generator.generate(req).await.unwrap();
        let path = out.structured["images"][0]["path"].as_str().unwrap().to_string();
        assert!(path.ends_with("assets/portrait_brief.txt"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "close up");

        state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_llm_failure_is_generation_error() {
        let temp = tempdir().unwrap();
        let (state, req) = request(temp.path(), TaskKind::StoryArc).await;
        let generator = LlmGenerator::new(Arc::new(MockLlmClient::new(vec![])), 2000).unwrap();

        let err = generator.generate(req).await.unwrap_err();
        assert!(matches!(err, GenerationError::Llm(_)));

        state.shutdown().await.unwrap();
    }
}
