//! Story storage collaborator.
//!
//! Stores are keyed by story id and hold whole [`Story`] records. Saves are
//! compare-and-swap on [`Story::version`], so a writer that raced another
//! writer gets [`StorageError::Conflict`] instead of silently clobbering it.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::story::Story;
use async_trait::async_trait;
use thiserror::Error;

/// Errors from storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version conflict for story {story_id}: expected {expected}, found {found}")]
    Conflict {
        story_id: String,
        expected: u64,
        found: u64,
    },

    #[error("Unsupported store format: expected {expected}, found {found}")]
    FormatMismatch { expected: u32, found: u32 },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Key-value persistence for stories.
#[async_trait]
pub trait StoryStore: Send + Sync {
    /// Load a story, or `None` if it has never been saved.
    async fn load(&self, story_id: &str) -> Result<Option<Story>, StorageError>;

    /// Save a story if the stored version still equals `expected_version`
    /// (0 when the story must not exist yet).
    async fn save(&self, story: &Story, expected_version: u64) -> Result<(), StorageError>;
}

fn check_version(story_id: &str, expected: u64, found: u64) -> Result<(), StorageError> {
    if expected == found {
        Ok(())
    } else {
        Err(StorageError::Conflict {
            story_id: story_id.to_string(),
            expected,
            found,
        })
    }
}
