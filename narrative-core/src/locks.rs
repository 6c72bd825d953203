//! Per-story mutual exclusion.
//!
//! Read-modify-write of a story happens while holding that story's lock.
//! Different stories never contend.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Prune idle entries once the map grows past this many stories.
const PRUNE_THRESHOLD: usize = 1024;

/// Registry of one async mutex per story id.
#[derive(Debug, Default)]
pub struct StoryLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Held while a story is being modified. Released on drop, including when
/// the owning request future is cancelled.
#[derive(Debug)]
pub struct StoryGuard {
    _guard: OwnedMutexGuard<()>,
}

impl StoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `story_id`.
    pub async fn lock(&self, story_id: &str) -> StoryGuard {
        let lock = {
            let mut locks = self.locks.lock().await;
            if locks.len() >= PRUNE_THRESHOLD {
                // Only the map holds a reference to an idle lock.
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks
                .entry(story_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        StoryGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of tracked stories.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.locks.lock().await.is_empty()
    }
}
