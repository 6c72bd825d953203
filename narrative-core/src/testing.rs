//! Testing utilities for narrative services.
//!
//! This module provides tools for integration testing:
//! - `MockGenerator` for deterministic testing without API calls
//! - `RecordingStore` for observing and failing storage calls

use crate::generator::{
    ChoiceContext, ChoiceOutcome, GeneratedChoices, GeneratedScene, GenerationError,
    NarrativeGenerator, PreviousChoice, SceneContext, TokenUsage,
};
use crate::store::{StorageError, StoryStore};
use crate::story::{Choice, Story, StoryState};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Model name reported by the mock generator.
pub const MOCK_MODEL: &str = "mock-narrator";

/// One scripted generator step.
#[derive(Debug, Clone)]
pub enum MockStep<T> {
    /// Return this value.
    Reply(T),
    /// Fail with a transient error (retried by the service).
    Transient(String),
    /// Fail with a permanent error.
    Fail(String),
}

/// A scripted scene.
#[derive(Debug, Clone, Default)]
pub struct MockScene {
    pub text: String,
    pub state_updates: StoryState,
}

impl MockScene {
    /// A scene that changes no state.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            state_updates: StoryState::new(),
        }
    }

    /// A scene that applies `updates` (a JSON object) to the story state.
    pub fn with_updates(text: impl Into<String>, updates: Value) -> Self {
        Self {
            text: text.into(),
            state_updates: updates.as_object().cloned().unwrap_or_default(),
        }
    }
}

/// What the mock saw on a scene call.
#[derive(Debug, Clone)]
pub struct RecordedScene {
    pub story_id: String,
    pub turn: u32,
    pub state: StoryState,
    pub previous_choice: Option<PreviousChoice>,
}

/// A generator that returns scripted responses.
///
/// Once a script runs out, scenes default to a fixed line of text and
/// choices default to three numbered options.
pub struct MockGenerator {
    scenes: Mutex<VecDeque<MockStep<MockScene>>>,
    choices: Mutex<VecDeque<MockStep<ChoiceOutcome>>>,
    recorded: Mutex<Vec<RecordedScene>>,
    scene_calls: AtomicUsize,
    choice_calls: AtomicUsize,
    counter_key: Option<String>,
    delay: Option<Duration>,
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            scenes: Mutex::new(VecDeque::new()),
            choices: Mutex::new(VecDeque::new()),
            recorded: Mutex::new(Vec::new()),
            scene_calls: AtomicUsize::new(0),
            choice_calls: AtomicUsize::new(0),
            counter_key: None,
            delay: None,
        }
    }

    /// Unscripted scenes increment the integer at `key` in the story state,
    /// which makes lost updates observable.
    pub fn counting(mut self, key: impl Into<String>) -> Self {
        self.counter_key = Some(key.into());
        self
    }

    /// Sleep this long inside every call, so concurrent calls overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn queue_scene(&self, step: MockStep<MockScene>) {
        self.scenes.lock().await.push_back(step);
    }

    pub async fn queue_choices(&self, step: MockStep<ChoiceOutcome>) {
        self.choices.lock().await.push_back(step);
    }

    /// Queue a successful scene.
    pub async fn expect_scene(&self, scene: MockScene) {
        self.queue_scene(MockStep::Reply(scene)).await;
    }

    /// Queue a successful choice set.
    pub async fn expect_choices(&self, choices: Vec<Choice>) {
        self.queue_choices(MockStep::Reply(ChoiceOutcome::Choices(choices)))
            .await;
    }

    /// Queue the end of the story.
    pub async fn expect_ending(&self, epilogue: Option<&str>) {
        self.queue_choices(MockStep::Reply(ChoiceOutcome::Ended {
            epilogue: epilogue.map(str::to_string),
        }))
        .await;
    }

    pub fn scene_calls(&self) -> usize {
        self.scene_calls.load(Ordering::SeqCst)
    }

    pub fn choice_calls(&self) -> usize {
        self.choice_calls.load(Ordering::SeqCst)
    }

    /// Every scene call seen so far, in order.
    pub async fn recorded_scenes(&self) -> Vec<RecordedScene> {
        self.recorded.lock().await.clone()
    }

    fn default_scene(&self, state: &StoryState) -> MockScene {
        match &self.counter_key {
            Some(key) => {
                let current = state.get(key).and_then(Value::as_u64).unwrap_or(0);
                MockScene::with_updates(
                    format!("Scene number {}.", current + 1),
                    json!({ key.as_str(): current + 1 }),
                )
            }
            None => MockScene::text("The story continues."),
        }
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn usage_for(text: &str) -> TokenUsage {
    TokenUsage {
        input_tokens: 10,
        output_tokens: text.split_whitespace().count(),
    }
}

#[async_trait]
impl NarrativeGenerator for MockGenerator {
    async fn generate_scene(
        &self,
        context: &SceneContext<'_>,
    ) -> Result<GeneratedScene, GenerationError> {
        self.scene_calls.fetch_add(1, Ordering::SeqCst);
        self.recorded.lock().await.push(RecordedScene {
            story_id: context.story_id.to_string(),
            turn: context.turn,
            state: context.state.clone(),
            previous_choice: context.previous_choice.cloned(),
        });
        self.pause().await;

        let step = self.scenes.lock().await.pop_front();
        let scene = match step {
            Some(MockStep::Reply(scene)) => scene,
            Some(MockStep::Transient(msg)) => return Err(GenerationError::Unavailable(msg)),
            Some(MockStep::Fail(msg)) => return Err(GenerationError::Malformed(msg)),
            None => self.default_scene(context.state),
        };

        Ok(GeneratedScene {
            usage: usage_for(&scene.text),
            text: scene.text,
            state_updates: scene.state_updates,
            model: MOCK_MODEL.to_string(),
        })
    }

    async fn generate_choices(
        &self,
        _context: &ChoiceContext<'_>,
    ) -> Result<GeneratedChoices, GenerationError> {
        self.choice_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        let step = self.choices.lock().await.pop_front();
        let outcome = match step {
            Some(MockStep::Reply(outcome)) => outcome,
            Some(MockStep::Transient(msg)) => return Err(GenerationError::Unavailable(msg)),
            Some(MockStep::Fail(msg)) => return Err(GenerationError::Malformed(msg)),
            None => ChoiceOutcome::Choices(
                (1..=3)
                    .map(|n| Choice::new(format!("choice_{n}"), format!("Option {n}")))
                    .collect(),
            ),
        };

        Ok(GeneratedChoices {
            outcome,
            usage: usage_for("choices"),
            model: MOCK_MODEL.to_string(),
        })
    }

    fn model(&self) -> &str {
        MOCK_MODEL
    }
}

/// Wraps a store, counting calls and optionally failing them.
pub struct RecordingStore<S> {
    inner: S,
    loads: AtomicUsize,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl<S: StoryStore> RecordingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            loads: AtomicUsize::new(0),
            saves: AtomicUsize::new(0),
            fail_saves: AtomicBool::new(false),
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of save attempts, including failed ones.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make every following save fail with `StorageError::Unavailable`.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: StoryStore> StoryStore for RecordingStore<S> {
    async fn load(&self, story_id: &str) -> Result<Option<Story>, StorageError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(story_id).await
    }

    async fn save(&self, story: &Story, expected_version: u64) -> Result<(), StorageError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("save disabled by test".into()));
        }
        self.inner.save(story, expected_version).await
    }
}
