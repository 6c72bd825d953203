//! Narrative generation collaborator.
//!
//! The service never talks to a model provider directly; it goes through
//! [`NarrativeGenerator`], which turns story state and reader context into
//! scene text or a set of choices.

mod anthropic;
mod prompts;

pub use self::anthropic::{ClaudeGenerator, GeneratorConfig};

use crate::context::UserContext;
use crate::story::{Choice, StoryState};
use async_trait::async_trait;
use thiserror::Error;

/// Errors from a narrative generator.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Model provider error: {0}")]
    Provider(#[from] claude::Error),

    #[error("Generator unavailable: {0}")]
    Unavailable(String),

    #[error("Model returned no usable text")]
    EmptyOutput,

    #[error("Model returned no choices")]
    NoChoices,

    #[error("Malformed model output: {0}")]
    Malformed(String),

    #[error("Model output cut off at {max_tokens} tokens")]
    Truncated { max_tokens: usize, partial: String },
}

impl GenerationError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Provider(e) => e.is_transient(),
            GenerationError::Unavailable(_) => true,
            GenerationError::EmptyOutput
            | GenerationError::NoChoices
            | GenerationError::Malformed(_)
            | GenerationError::Truncated { .. } => false,
        }
    }
}

/// Tokens consumed by one generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl TokenUsage {
    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens
    }
}

impl From<claude::Usage> for TokenUsage {
    fn from(usage: claude::Usage) -> Self {
        Self {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        }
    }
}

/// The choice that led into the scene being generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviousChoice {
    pub id: String,
    /// Display text, known when the choice came from an offered set.
    pub text: Option<String>,
}

/// Everything a generator sees when writing a scene.
#[derive(Debug, Clone)]
pub struct SceneContext<'a> {
    pub story_id: &'a str,
    /// The turn this scene will become (1 for the opening scene).
    pub turn: u32,
    pub state: &'a StoryState,
    pub user_context: &'a UserContext,
    pub current_scene: Option<&'a str>,
    pub previous_choice: Option<&'a PreviousChoice>,
}

/// A generated scene.
#[derive(Debug, Clone)]
pub struct GeneratedScene {
    pub text: String,
    /// Shallow updates to merge into the story state; `null` removes a key.
    pub state_updates: StoryState,
    pub usage: TokenUsage,
    /// Model that actually produced the text.
    pub model: String,
}

/// Everything a generator sees when offering choices.
#[derive(Debug, Clone)]
pub struct ChoiceContext<'a> {
    pub story_id: &'a str,
    pub current_scene: &'a str,
    pub turn: u32,
    pub state: &'a StoryState,
    pub user_context: &'a UserContext,
    pub max_choices: usize,
}

/// What comes after a scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChoiceOutcome {
    /// The reader picks one of these.
    Choices(Vec<Choice>),
    /// The story is over. This is the only way "no choices" is expressed.
    Ended { epilogue: Option<String> },
}

/// A generated set of choices.
#[derive(Debug, Clone)]
pub struct GeneratedChoices {
    pub outcome: ChoiceOutcome,
    pub usage: TokenUsage,
    pub model: String,
}

/// A source of narrative text, typically a language model.
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    /// Write the next scene.
    async fn generate_scene(
        &self,
        context: &SceneContext<'_>,
    ) -> Result<GeneratedScene, GenerationError>;

    /// Offer the reader what to do next, or end the story.
    async fn generate_choices(
        &self,
        context: &ChoiceContext<'_>,
    ) -> Result<GeneratedChoices, GenerationError>;

    /// Default model identifier, reported in response metadata.
    fn model(&self) -> &str;
}
