//! Story records and their state transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form story state: scene pointers, flags, inventory, and so on.
pub type StoryState = serde_json::Map<String, Value>;

/// Lifecycle of a story. A story with no stored record is uninitialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    Active,
    Ended,
}

/// An option the reader can pick after a scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub id: String,
    pub text: String,
}

impl Choice {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// A persisted story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    /// Opaque, caller-chosen identifier.
    pub id: String,

    pub status: StoryStatus,

    /// State threaded through every generation.
    #[serde(default)]
    pub state: StoryState,

    /// Number of scenes generated so far.
    pub turn: u32,

    /// Identifier of the most recent scene.
    pub current_scene: Option<String>,

    /// The choice that led to the most recent scene.
    pub last_choice: Option<String>,

    /// Choices offered after the most recent scene, if any.
    #[serde(default)]
    pub offered_choices: Vec<Choice>,

    /// Incremented on every save; 0 means never saved.
    pub version: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Story {
    /// Create a fresh, unsaved story.
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: StoryStatus::Active,
            state: StoryState::new(),
            turn: 0,
            current_scene: None,
            last_choice: None,
            offered_choices: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.status == StoryStatus::Ended
    }

    /// Look up a choice from the outstanding offered set.
    pub fn find_offered(&self, choice_id: &str) -> Option<&Choice> {
        self.offered_choices.iter().find(|c| c.id == choice_id)
    }

    /// Shallow-merge updates into the state. A `null` value removes the key.
    pub fn apply_updates(&mut self, updates: &StoryState) {
        for (key, value) in updates {
            if value.is_null() {
                self.state.remove(key);
            } else {
                self.state.insert(key.clone(), value.clone());
            }
        }
    }

    /// Record a successfully generated scene and return its identifier.
    pub fn record_scene(&mut self, updates: &StoryState, previous_choice: Option<String>) -> String {
        self.apply_updates(updates);
        self.turn += 1;
        let scene_id = format!("scene_{}", self.turn);
        self.current_scene = Some(scene_id.clone());
        if previous_choice.is_some() {
            self.last_choice = previous_choice;
        }
        self.offered_choices.clear();
        scene_id
    }

    /// Remember the choice set offered to the reader.
    pub fn offer_choices(&mut self, choices: &[Choice]) {
        self.offered_choices = choices.to_vec();
    }

    /// Move the story to its terminal state.
    pub fn end(&mut self) {
        self.status = StoryStatus::Ended;
        self.offered_choices.clear();
    }

    /// Bump the version ahead of a save, returning the version the store
    /// must currently hold.
    pub fn touch(&mut self) -> u64 {
        let expected = self.version;
        self.version += 1;
        self.updated_at = Utc::now();
        expected
    }

    /// The externally visible view of this story.
    pub fn snapshot(&self) -> StorySnapshot {
        StorySnapshot {
            story_id: self.id.clone(),
            state: self.state.clone(),
            status: self.status,
            turn: self.turn,
            current_scene: self.current_scene.clone(),
        }
    }
}

/// What `get_story_state` returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorySnapshot {
    pub story_id: String,
    pub state: StoryState,
    pub status: StoryStatus,
    pub turn: u32,
    pub current_scene: Option<String>,
}
