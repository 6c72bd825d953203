//! NarrativeService - the primary public API for story generation.
//!
//! Wraps a narrative generator and a story store behind three operations:
//! generate the next scene, generate the next choices, and read a story's
//! state. Each story has a single writer at a time, and a story is only
//! written after its generation fully succeeds.

use crate::context::UserContext;
use crate::error::NarrativeError;
use crate::generator::{
    ChoiceContext, ChoiceOutcome, GenerationError, NarrativeGenerator, PreviousChoice,
    SceneContext, TokenUsage,
};
use crate::locks::StoryLocks;
use crate::store::StoryStore;
use crate::story::{Choice, Story, StorySnapshot};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Longest accepted story id, in bytes.
pub const MAX_STORY_ID_LEN: usize = 64;

/// Upper bound for `ServiceConfig::max_choices`.
pub const MAX_CHOICES_LIMIT: usize = 10;

/// Backoff never grows past this.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Configuration for the narrative service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Most choices returned from one `generate_choices` call.
    pub max_choices: usize,

    /// Retries after a transient generator failure.
    pub generation_retries: u32,

    /// Delay before the first retry; doubles on each further retry.
    pub retry_delay: Duration,

    /// Create unknown stories on their first scene instead of failing.
    pub create_missing_stories: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_choices: 4,
            generation_retries: 2,
            retry_delay: Duration::from_millis(500),
            create_missing_stories: true,
        }
    }
}

impl ServiceConfig {
    /// Set the choice cap, clamped to `1..=MAX_CHOICES_LIMIT`.
    pub fn with_max_choices(mut self, max_choices: usize) -> Self {
        self.max_choices = max_choices.clamp(1, MAX_CHOICES_LIMIT);
        self
    }

    pub fn with_generation_retries(mut self, retries: u32) -> Self {
        self.generation_retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_create_missing_stories(mut self, create: bool) -> Self {
        self.create_missing_stories = create;
        self
    }
}

/// Request for the next scene.
#[derive(Debug, Clone, Deserialize)]
pub struct SceneRequest {
    pub story_id: String,
    pub user_context: Map<String, Value>,
    /// Absent and `null` both mean "no previous choice".
    #[serde(default)]
    pub previous_choice: Option<String>,
}

impl SceneRequest {
    pub fn new(story_id: impl Into<String>) -> Self {
        Self {
            story_id: story_id.into(),
            user_context: Map::new(),
            previous_choice: None,
        }
    }

    pub fn with_context(mut self, user_context: Map<String, Value>) -> Self {
        self.user_context = user_context;
        self
    }

    pub fn with_previous_choice(mut self, choice_id: impl Into<String>) -> Self {
        self.previous_choice = Some(choice_id.into());
        self
    }
}

/// Request for the next set of choices.
#[derive(Debug, Clone, Deserialize)]
pub struct ChoicesRequest {
    pub story_id: String,
    pub current_scene: String,
    pub user_context: Map<String, Value>,
}

impl ChoicesRequest {
    pub fn new(story_id: impl Into<String>, current_scene: impl Into<String>) -> Self {
        Self {
            story_id: story_id.into(),
            current_scene: current_scene.into(),
            user_context: Map::new(),
        }
    }

    pub fn with_context(mut self, user_context: Map<String, Value>) -> Self {
        self.user_context = user_context;
        self
    }
}

/// A generated scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeResult {
    /// Never empty.
    pub text: String,
    /// Always carries `story_id`, `model` and `tokens_used`.
    pub metadata: Map<String, Value>,
}

/// A generated set of choices, or the end of the story.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoicesResult {
    /// Empty only when `ended` is true.
    pub choices: Vec<Choice>,
    pub metadata: Map<String, Value>,
    pub ended: bool,
}

/// The narrative service.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct NarrativeService {
    generator: Arc<dyn NarrativeGenerator>,
    store: Arc<dyn StoryStore>,
    locks: StoryLocks,
    config: ServiceConfig,
}

impl NarrativeService {
    /// Create a service with the default configuration.
    pub fn new(generator: Arc<dyn NarrativeGenerator>, store: Arc<dyn StoryStore>) -> Self {
        Self {
            generator,
            store,
            locks: StoryLocks::new(),
            config: ServiceConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Generate the next scene of a story, applying `previous_choice`.
    ///
    /// The story is created on first use unless
    /// `ServiceConfig::create_missing_stories` is off.
    #[instrument(skip_all, fields(story_id = %request.story_id))]
    pub async fn generate_scene(
        &self,
        request: SceneRequest,
    ) -> Result<NarrativeResult, NarrativeError> {
        let story_id = validate_story_id(&request.story_id)?;
        let previous_choice = request
            .previous_choice
            .as_deref()
            .map(|choice| validate_required("previous_choice", choice).map(str::to_string))
            .transpose()?;
        let user_context = UserContext::from_map(request.user_context)?;

        let _guard = self.locks.lock(story_id).await;

        let mut story = match self.store.load(story_id).await? {
            Some(story) => story,
            None if self.config.create_missing_stories => {
                debug!("creating story");
                Story::new(story_id)
            }
            None => return Err(NarrativeError::NotFound(story_id.to_string())),
        };

        if story.is_ended() {
            return Err(NarrativeError::InvalidInput(format!(
                "story '{story_id}' has ended"
            )));
        }

        let chosen = previous_choice
            .as_deref()
            .map(|id| resolve_choice(&story, id))
            .transpose()?;

        let context = SceneContext {
            story_id,
            turn: story.turn + 1,
            state: &story.state,
            user_context: &user_context,
            current_scene: story.current_scene.as_deref(),
            previous_choice: chosen.as_ref(),
        };

        let scene = self
            .with_retries("scene", || self.generator.generate_scene(&context))
            .await?;

        let text = scene.text.trim();
        if text.is_empty() {
            return Err(GenerationError::EmptyOutput.into());
        }
        let text = text.to_string();

        let scene_id = story.record_scene(&scene.state_updates, previous_choice);
        let expected = story.touch();
        self.store.save(&story, expected).await?;

        info!(
            scene_id = %scene_id,
            turn = story.turn,
            tokens = scene.usage.total(),
            "generated scene"
        );

        let mut metadata = base_metadata(story_id, &scene.model, scene.usage);
        metadata.insert("scene_id".into(), json!(scene_id));
        metadata.insert("turn".into(), json!(story.turn));

        Ok(NarrativeResult { text, metadata })
    }

    /// Offer the reader what to do after `current_scene`.
    ///
    /// Returns at most `ServiceConfig::max_choices` choices with distinct
    /// ids, or an empty list with `ended` set when the story is over.
    #[instrument(skip_all, fields(story_id = %request.story_id))]
    pub async fn generate_choices(
        &self,
        request: ChoicesRequest,
    ) -> Result<ChoicesResult, NarrativeError> {
        let story_id = validate_story_id(&request.story_id)?;
        let current_scene = validate_required("current_scene", &request.current_scene)?;
        let user_context = UserContext::from_map(request.user_context)?;

        let _guard = self.locks.lock(story_id).await;

        let mut story = self
            .store
            .load(story_id)
            .await?
            .ok_or_else(|| NarrativeError::NotFound(story_id.to_string()))?;

        if story.is_ended() {
            debug!("story already ended");
            return Ok(ended_result(
                base_metadata(story_id, self.generator.model(), TokenUsage::default()),
                None,
            ));
        }

        if story.current_scene.as_deref() != Some(current_scene) {
            debug!(
                requested = current_scene,
                stored = ?story.current_scene,
                "choices requested for a scene other than the latest"
            );
        }

        let context = ChoiceContext {
            story_id,
            current_scene,
            turn: story.turn,
            state: &story.state,
            user_context: &user_context,
            max_choices: self.config.max_choices,
        };

        let generated = self
            .with_retries("choices", || self.generator.generate_choices(&context))
            .await?;

        let mut metadata = base_metadata(story_id, &generated.model, generated.usage);
        metadata.insert("scene_id".into(), json!(current_scene));

        match generated.outcome {
            ChoiceOutcome::Ended { epilogue } => {
                story.end();
                let expected = story.touch();
                self.store.save(&story, expected).await?;

                info!(turn = story.turn, "story ended");
                Ok(ended_result(metadata, epilogue))
            }
            ChoiceOutcome::Choices(raw) => {
                let choices = normalize_choices(raw, self.config.max_choices);
                if choices.is_empty() {
                    return Err(GenerationError::NoChoices.into());
                }

                story.offer_choices(&choices);
                let expected = story.touch();
                self.store.save(&story, expected).await?;

                info!(count = choices.len(), "generated choices");
                Ok(ChoicesResult {
                    choices,
                    metadata,
                    ended: false,
                })
            }
        }
    }

    /// Read a story's state.
    #[instrument(skip(self))]
    pub async fn get_story_state(&self, story_id: &str) -> Result<StorySnapshot, NarrativeError> {
        let story_id = validate_story_id(story_id)?;
        self.store
            .load(story_id)
            .await?
            .map(|story| story.snapshot())
            .ok_or_else(|| NarrativeError::NotFound(story_id.to_string()))
    }

    /// Run a generator call, retrying transient failures with exponential
    /// backoff.
    async fn with_retries<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, GenerationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GenerationError>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.generation_retries => {
                    let delay = backoff(self.config.retry_delay, attempt);
                    attempt += 1;
                    warn!(
                        operation,
                        attempt,
                        max_retries = self.config.generation_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient generation failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
}

fn validate_required<'a>(field: &str, value: &'a str) -> Result<&'a str, NarrativeError> {
    if value.trim().is_empty() {
        Err(NarrativeError::InvalidInput(format!("{field} must not be empty")))
    } else {
        Ok(value)
    }
}

fn validate_story_id(story_id: &str) -> Result<&str, NarrativeError> {
    let story_id = validate_required("story_id", story_id)?;
    if story_id.len() > MAX_STORY_ID_LEN {
        return Err(NarrativeError::InvalidInput(format!(
            "story_id must be at most {MAX_STORY_ID_LEN} bytes"
        )));
    }
    Ok(story_id)
}

/// Match a previous choice against the outstanding offered set. Any id is
/// accepted when nothing is outstanding.
fn resolve_choice(story: &Story, choice_id: &str) -> Result<PreviousChoice, NarrativeError> {
    if story.offered_choices.is_empty() {
        return Ok(PreviousChoice {
            id: choice_id.to_string(),
            text: None,
        });
    }

    story
        .find_offered(choice_id)
        .map(|choice| PreviousChoice {
            id: choice.id.clone(),
            text: Some(choice.text.clone()),
        })
        .ok_or_else(|| {
            NarrativeError::InvalidInput(format!(
                "previous_choice '{choice_id}' was not offered for story '{}'",
                story.id
            ))
        })
}

/// Trim choices, drop blank texts and repeated ids, fill in missing ids,
/// and cap the count.
///
/// A filled-in id is `choice_{n}` for the first free `n` from the choice's
/// position, never one the model used anywhere in the set.
fn normalize_choices(raw: Vec<Choice>, max_choices: usize) -> Vec<Choice> {
    let raw: Vec<(String, String)> = raw
        .into_iter()
        .map(|c| (c.id.trim().to_string(), c.text.trim().to_string()))
        .filter(|(_, text)| !text.is_empty())
        .collect();
    let explicit: HashSet<&str> = raw
        .iter()
        .map(|(id, _)| id.as_str())
        .filter(|id| !id.is_empty())
        .collect();

    let mut seen = HashSet::new();
    let mut choices = Vec::with_capacity(raw.len().min(max_choices));

    for (id, text) in &raw {
        if choices.len() == max_choices {
            break;
        }

        let id = if id.is_empty() {
            (choices.len() + 1..)
                .map(|n| format!("choice_{n}"))
                .find(|id| !explicit.contains(id.as_str()) && !seen.contains(id))
                .unwrap_or_default()
        } else {
            id.clone()
        };
        if !seen.insert(id.clone()) {
            continue;
        }

        choices.push(Choice::new(id, text.as_str()));
    }

    choices
}

fn base_metadata(story_id: &str, model: &str, usage: TokenUsage) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("story_id".into(), json!(story_id));
    metadata.insert("model".into(), json!(model));
    metadata.insert("tokens_used".into(), json!(usage.total()));
    metadata.insert("input_tokens".into(), json!(usage.input_tokens));
    metadata.insert("output_tokens".into(), json!(usage.output_tokens));
    metadata
}

fn ended_result(mut metadata: Map<String, Value>, epilogue: Option<String>) -> ChoicesResult {
    if let Some(epilogue) = epilogue {
        metadata.insert("epilogue".into(), json!(epilogue));
    }
    ChoicesResult {
        choices: Vec::new(),
        metadata,
        ended: true,
    }
}
