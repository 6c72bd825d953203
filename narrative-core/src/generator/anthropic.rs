//! Claude-backed narrative generator.
//!
//! Asks Claude for a small JSON object per call and parses it back into
//! scenes or choices. Scenes fall back to the raw text when the model
//! ignores the JSON instruction; choices do not.

use super::prompts::{build_choices_prompt, build_scene_prompt, STORYTELLER_SYSTEM_PROMPT};
use super::{
    ChoiceContext, ChoiceOutcome, GeneratedChoices, GeneratedScene, GenerationError,
    NarrativeGenerator, SceneContext,
};
use crate::story::{Choice, StoryState};
use async_trait::async_trait;
use claude::{Claude, Message, Request};
use serde::Deserialize;

/// Configuration for the Claude generator.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Maximum tokens for scene responses.
    pub max_tokens: usize,

    /// Maximum tokens for choice responses.
    pub choice_max_tokens: usize,

    /// Temperature for generation.
    pub temperature: Option<f32>,

    /// Replaces the built-in storyteller prompt.
    pub custom_system_prompt: Option<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            choice_max_tokens: 512,
            temperature: Some(0.8),
            custom_system_prompt: None,
        }
    }
}

/// Scene and choice generation through the Claude Messages API.
#[derive(Debug, Clone)]
pub struct ClaudeGenerator {
    client: Claude,
    config: GeneratorConfig,
}

impl ClaudeGenerator {
    pub fn new(client: Claude) -> Self {
        Self {
            client,
            config: GeneratorConfig::default(),
        }
    }

    /// Create from the ANTHROPIC_API_KEY environment variable.
    pub fn from_env() -> Result<Self, claude::Error> {
        Ok(Self::new(Claude::from_env()?))
    }

    pub fn with_config(mut self, config: GeneratorConfig) -> Self {
        self.config = config;
        self
    }

    fn system_prompt(&self) -> &str {
        self.config
            .custom_system_prompt
            .as_deref()
            .unwrap_or(STORYTELLER_SYSTEM_PROMPT)
    }

    async fn ask(&self, prompt: String, max_tokens: usize) -> Result<claude::Response, GenerationError> {
        let mut request = Request::new(vec![Message::user(prompt)])
            .with_system(self.system_prompt())
            .with_max_tokens(max_tokens);

        if let Some(temp) = self.config.temperature {
            request = request.with_temperature(temp);
        }

        let response = self.client.complete(request).await?;
        if response.is_truncated() {
            return Err(GenerationError::Truncated {
                max_tokens,
                partial: response.text,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl NarrativeGenerator for ClaudeGenerator {
    async fn generate_scene(
        &self,
        context: &SceneContext<'_>,
    ) -> Result<GeneratedScene, GenerationError> {
        let response = self
            .ask(build_scene_prompt(context), self.config.max_tokens)
            .await?;
        let (text, state_updates) = parse_scene(&response.text)?;

        Ok(GeneratedScene {
            text,
            state_updates,
            usage: response.usage.into(),
            model: response.model,
        })
    }

    async fn generate_choices(
        &self,
        context: &ChoiceContext<'_>,
    ) -> Result<GeneratedChoices, GenerationError> {
        let response = self
            .ask(build_choices_prompt(context), self.config.choice_max_tokens)
            .await?;
        let outcome = parse_choices(&response.text)?;

        Ok(GeneratedChoices {
            outcome,
            usage: response.usage.into(),
            model: response.model,
        })
    }

    fn model(&self) -> &str {
        self.client.model()
    }
}

#[derive(Debug, Deserialize)]
struct SceneReply {
    scene: String,
    #[serde(default)]
    state_updates: Option<StoryState>,
}

#[derive(Debug, Deserialize)]
struct ChoicesReply {
    #[serde(default)]
    ended: bool,
    #[serde(default)]
    epilogue: Option<String>,
    #[serde(default)]
    choices: Vec<ChoiceReply>,
}

#[derive(Debug, Deserialize)]
struct ChoiceReply {
    #[serde(default)]
    id: String,
    text: String,
}

/// Parse a scene reply. A reply with no JSON object in it is taken as
/// plain prose that changes no state.
fn parse_scene(response: &str) -> Result<(String, StoryState), GenerationError> {
    let response = response.trim();
    if response.is_empty() {
        return Err(GenerationError::EmptyOutput);
    }

    let Some(body) = json_body(response) else {
        return Ok((response.to_string(), StoryState::new()));
    };

    let reply: SceneReply = serde_json::from_str(body)
        .map_err(|e| GenerationError::Malformed(format!("{e}: {body}")))?;
    Ok((
        reply.scene.trim().to_string(),
        reply.state_updates.unwrap_or_default(),
    ))
}

fn parse_choices(response: &str) -> Result<ChoiceOutcome, GenerationError> {
    let response = response.trim();
    if response.is_empty() {
        return Err(GenerationError::EmptyOutput);
    }

    let body = json_body(response)
        .ok_or_else(|| GenerationError::Malformed(format!("no JSON object in reply: {response}")))?;
    let reply: ChoicesReply = serde_json::from_str(body)
        .map_err(|e| GenerationError::Malformed(format!("{e}: {body}")))?;

    if reply.ended {
        let epilogue = reply.epilogue.filter(|e| !e.trim().is_empty());
        return Ok(ChoiceOutcome::Ended { epilogue });
    }

    Ok(ChoiceOutcome::Choices(
        reply
            .choices
            .into_iter()
            .map(|c| Choice::new(c.id, c.text))
            .collect(),
    ))
}

/// Locate the JSON object in a model reply.
///
/// Looks inside the first code fence if there is one, then takes the span
/// from the first `{` to the last `}`. An object that is opened but never
/// closed runs to the end of the text, so truncated JSON still fails to
/// parse instead of passing for prose. Returns `None` when no `{` appears.
fn json_body(text: &str) -> Option<&str> {
    let text = fenced(text).unwrap_or(text);
    let start = text.find('{')?;
    let end = text
        .rfind('}')
        .filter(|&end| end > start)
        .map_or(text.len(), |end| end + 1);
    Some(&text[start..end])
}

/// Contents of the first code fence, without its info string. An unclosed
/// fence runs to the end of the text.
fn fenced(text: &str) -> Option<&str> {
    let open = text.find("```")? + 3;
    let rest = &text[open..];
    let rest = match rest.find('\n') {
        Some(newline) if rest[..newline].trim().chars().all(|c| c.is_ascii_alphanumeric()) => {
            &rest[newline + 1..]
        }
        _ => rest,
    };
    Some(rest.find("```").map_or(rest, |close| &rest[..close]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::UserContext;
    use serde_json::json;

    const SCENE_BODY: &str = r#"{
        "id": "msg_01",
        "type": "message",
        "role": "assistant",
        "model": "claude-sonnet-4-20250514",
        "content": [{"type": "text", "text": "{\"scene\": \"Fog rolls over the rocks.\", \"state_updates\": {\"weather\": \"fog\"}}"}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 100, "output_tokens": 20}
    }"#;

    #[test]
    fn test_json_body_in_fences() {
        let text = "```json\n{\"scene\": \"x\"}\n```";
        assert_eq!(json_body(text), Some("{\"scene\": \"x\"}"));

        let text = "```\n{\"ended\": true}\n```";
        assert_eq!(json_body(text), Some("{\"ended\": true}"));
    }

    #[test]
    fn test_json_body_after_preamble() {
        let text = "Here is the scene:\n{\"scene\": \"x\"}\nEnjoy!";
        assert_eq!(json_body(text), Some("{\"scene\": \"x\"}"));
        assert_eq!(json_body("No braces at all."), None);
    }

    #[test]
    fn test_json_body_unclosed() {
        assert_eq!(
            json_body("```json\n{\"scene\": \"Fog"),
            Some("{\"scene\": \"Fog")
        );
    }

    #[test]
    fn test_parse_scene_json() {
        let (text, updates) =
            parse_scene(r#"{"scene": " The tide turns. ", "state_updates": {"tide": "low"}}"#)
                .unwrap();
        assert_eq!(text, "The tide turns.");
        assert_eq!(updates["tide"], json!("low"));
    }

    #[test]
    fn test_parse_scene_prose_fallback() {
        let (text, updates) = parse_scene("You wake on a cold beach.").unwrap();
        assert_eq!(text, "You wake on a cold beach.");
        assert!(updates.is_empty());
    }

    #[test]
    fn test_parse_scene_with_preamble_keeps_updates() {
        let (text, updates) = parse_scene(
            "Here is the scene:\n{\"scene\": \"Fog rolls in.\", \"state_updates\": {\"weather\": \"fog\"}}",
        )
        .unwrap();
        assert_eq!(text, "Fog rolls in.");
        assert_eq!(updates["weather"], json!("fog"));
    }

    #[test]
    fn test_parse_scene_unclosed_fence_is_malformed() {
        assert!(matches!(
            parse_scene("```json\n{\"scene\": \"Fog rolls in over the"),
            Err(GenerationError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_scene_broken_json() {
        assert!(matches!(
            parse_scene(r#"{"scene": 42}"#),
            Err(GenerationError::Malformed(_))
        ));
        assert!(matches!(parse_scene("   "), Err(GenerationError::EmptyOutput)));
    }

    #[test]
    fn test_parse_choices() {
        let outcome = parse_choices(
            r#"{"ended": false, "choices": [{"id": "run", "text": "Run"}, {"id": "hide", "text": "Hide"}]}"#,
        )
        .unwrap();
        assert_eq!(
            outcome,
            ChoiceOutcome::Choices(vec![Choice::new("run", "Run"), Choice::new("hide", "Hide")])
        );
    }

    #[test]
    fn test_parse_choices_ended() {
        let outcome =
            parse_choices(r#"{"ended": true, "epilogue": "The light goes out.", "choices": []}"#)
                .unwrap();
        assert_eq!(
            outcome,
            ChoiceOutcome::Ended {
                epilogue: Some("The light goes out.".into())
            }
        );
    }

    #[test]
    fn test_parse_choices_rejects_prose() {
        assert!(matches!(
            parse_choices("1. Run 2. Hide"),
            Err(GenerationError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_generate_scene_against_mock_api() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/messages")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(SCENE_BODY)
            .create_async()
            .await;

        let client = Claude::new("test-key").unwrap().with_base_url(server.url());
        let generator = ClaudeGenerator::new(client);
        let state = StoryState::new();
        let ctx = UserContext::default();

        let scene = generator
            .generate_scene(&SceneContext {
                story_id: "lighthouse",
                turn: 1,
                state: &state,
                user_context: &ctx,
                current_scene: None,
                previous_choice: None,
            })
            .await
            .unwrap();

        assert_eq!(scene.text, "Fog rolls over the rocks.");
        assert_eq!(scene.state_updates["weather"], json!("fog"));
        assert_eq!(scene.usage.total(), 120);
        assert_eq!(scene.model, "claude-sonnet-4-20250514");
    }

    #[tokio::test]
    async fn test_truncated_reply_is_rejected() {
        let body = SCENE_BODY
            .replace("end_turn", "max_tokens")
            .replace(r#"Fog rolls over the rocks.\", \"state_updates\": {\"weather\": \"fog\"}}"#, "Fog rolls");
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/messages")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;

        let client = Claude::new("test-key").unwrap().with_base_url(server.url());
        let generator = ClaudeGenerator::new(client);
        let state = StoryState::new();
        let ctx = UserContext::default();

        let err = generator
            .generate_scene(&SceneContext {
                story_id: "lighthouse",
                turn: 1,
                state: &state,
                user_context: &ctx,
                current_scene: None,
                previous_choice: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, GenerationError::Truncated { max_tokens: 1024, .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_provider_overload_is_transient() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/messages")
            .with_status(529)
            .with_body("overloaded")
            .create_async()
            .await;

        let client = Claude::new("test-key").unwrap().with_base_url(server.url());
        let generator = ClaudeGenerator::new(client);
        let state = StoryState::new();
        let ctx = UserContext::default();

        let err = generator
            .generate_choices(&ChoiceContext {
                story_id: "lighthouse",
                current_scene: "scene_1",
                turn: 1,
                state: &state,
                user_context: &ctx,
                max_choices: 3,
            })
            .await
            .unwrap_err();

        assert!(err.is_transient());
    }
}
