//! In-process story store.

use super::{check_version, StorageError, StoryStore};
use crate::story::Story;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Stories kept in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    stories: RwLock<HashMap<String, Story>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored stories.
    pub async fn len(&self) -> usize {
        self.stories.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.stories.read().await.is_empty()
    }
}

#[async_trait]
impl StoryStore for MemoryStore {
    async fn load(&self, story_id: &str) -> Result<Option<Story>, StorageError> {
        Ok(self.stories.read().await.get(story_id).cloned())
    }

    async fn save(&self, story: &Story, expected_version: u64) -> Result<(), StorageError> {
        let mut stories = self.stories.write().await;
        let found = stories.get(&story.id).map(|s| s.version).unwrap_or(0);
        check_version(&story.id, expected_version, found)?;
        stories.insert(story.id.clone(), story.clone());
        Ok(())
    }
}
