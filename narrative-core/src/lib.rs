//! Choose-your-own-adventure narrative engine.
//!
//! This crate provides:
//! - Story state tracking with a single writer per story
//! - Scene and choice generation through a pluggable `NarrativeGenerator`
//!   (Claude-backed by default)
//! - Pluggable story storage (in-memory or one JSON file per story)
//! - A scripted generator for deterministic tests
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use narrative_core::{ClaudeGenerator, MemoryStore, NarrativeService, SceneRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let generator = ClaudeGenerator::from_env()?;
//!     let service = NarrativeService::new(Arc::new(generator), Arc::new(MemoryStore::new()));
//!
//!     let scene = service
//!         .generate_scene(SceneRequest::new("haunted-lighthouse"))
//!         .await?;
//!     println!("{}", scene.text);
//!
//!     let state = service.get_story_state("haunted-lighthouse").await?;
//!     println!("turn {}", state.turn);
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod error;
pub mod generator;
pub mod locks;
pub mod service;
pub mod store;
pub mod story;
pub mod testing;

// Primary public API
pub use context::UserContext;
pub use error::{ErrorKind, NarrativeError};
pub use generator::{
    ChoiceContext, ChoiceOutcome, ClaudeGenerator, GeneratedChoices, GeneratedScene,
    GenerationError, GeneratorConfig, NarrativeGenerator, PreviousChoice, SceneContext,
    TokenUsage,
};
pub use service::{
    ChoicesRequest, ChoicesResult, NarrativeResult, NarrativeService, SceneRequest,
    ServiceConfig,
};
pub use store::{FileStore, MemoryStore, StorageError, StoryStore};
pub use story::{Choice, Story, StorySnapshot, StoryState, StoryStatus};
pub use testing::{MockGenerator, RecordingStore};
