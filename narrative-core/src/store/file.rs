//! One-JSON-file-per-story store.
//!
//! Files are human-readable and wrapped in a small versioned envelope so a
//! future layout change can be detected on load. Saves hold an exclusive
//! `<id>.lock` file from the version check until the new file is in place,
//! so the compare-and-swap holds across processes sharing a directory.

use super::{check_version, StorageError, StoryStore};
use crate::story::Story;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Current on-disk format version.
const STORE_FORMAT_VERSION: u32 = 1;

/// How often a blocked save re-checks the lock file.
const LOCK_POLL: Duration = Duration::from_millis(5);

/// A save gives up after waiting this long for the lock.
const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Lock files older than this were left behind by a crashed writer.
const STALE_LOCK_AGE: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize, Deserialize)]
struct StoredStory {
    format_version: u32,
    story: Story,
}

/// Stories stored as `<dir>/<encoded id>.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `story_id`.
    pub fn path_for(&self, story_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_file_stem(story_id)))
    }

    async fn read(&self, path: &Path) -> Result<Option<Story>, StorageError> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let stored: StoredStory = serde_json::from_str(&content)?;
        if stored.format_version != STORE_FORMAT_VERSION {
            return Err(StorageError::FormatMismatch {
                expected: STORE_FORMAT_VERSION,
                found: stored.format_version,
            });
        }

        Ok(Some(stored.story))
    }
}

#[async_trait]
impl StoryStore for FileStore {
    async fn load(&self, story_id: &str) -> Result<Option<Story>, StorageError> {
        self.read(&self.path_for(story_id)).await
    }

    async fn save(&self, story: &Story, expected_version: u64) -> Result<(), StorageError> {
        let path = self.path_for(&story.id);
        let content = serde_json::to_string_pretty(&StoredStory {
            format_version: STORE_FORMAT_VERSION,
            story: story.clone(),
        })?;

        let _lock = LockFile::acquire(path.with_extension("lock")).await?;

        let found = self.read(&path).await?.map(|s| s.version).unwrap_or(0);
        check_version(&story.id, expected_version, found)?;

        // Write to a uniquely named temp file, then rename over the story,
        // so readers never see a half-written file.
        let dir = self.dir.clone();
        let target = path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Unavailable(format!("save task failed: {e}")))??;

        debug!(story_id = %story.id, version = story.version, path = %path.display(), "saved story");
        Ok(())
    }
}

/// Exclusive lock on one story, held as a `create_new` file. Removed on drop.
#[derive(Debug)]
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    async fn acquire(path: PathBuf) -> Result<Self, StorageError> {
        let deadline = Instant::now() + LOCK_TIMEOUT;
        loop {
            let created = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;

            match created {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if is_stale(&path).await {
                        warn!(path = %path.display(), "removing stale story lock");
                        let _ = fs::remove_file(&path).await;
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(StorageError::Unavailable(format!(
                            "timed out waiting for {}",
                            path.display()
                        )));
                    }
                    tokio::time::sleep(LOCK_POLL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn is_stale(path: &Path) -> bool {
    match fs::metadata(path).await.and_then(|meta| meta.modified()) {
        Ok(modified) => modified
            .elapsed()
            .map(|age| age > STALE_LOCK_AGE)
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// Map a story id to a file-name-safe, collision-free stem.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte becomes
/// `%XX`.
fn encode_file_stem(story_id: &str) -> String {
    let mut stem = String::with_capacity(story_id.len());
    for byte in story_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("%{byte:02X}"));
        }
    }
    stem
}
