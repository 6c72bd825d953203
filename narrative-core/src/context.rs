//! Reader context narrowing.
//!
//! Requests carry an untyped JSON object describing the reader. It is
//! narrowed into a [`UserContext`] before it reaches the service logic;
//! unknown keys are kept verbatim in `extra`.

use serde_json::{Map, Value};
use thiserror::Error;

/// Errors from narrowing a context object.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("user_context.{key} must be {expected}")]
    WrongType { key: String, expected: &'static str },
}

/// Typed view of the reader's context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserContext {
    pub player_name: Option<String>,
    pub genre: Option<String>,
    pub tone: Option<String>,
    pub setting: Option<String>,
    pub preferences: Vec<String>,
    /// Keys this layer doesn't interpret.
    pub extra: Map<String, Value>,
}

impl UserContext {
    /// Narrow an untyped context object.
    pub fn from_map(mut map: Map<String, Value>) -> Result<Self, ContextError> {
        let player_name = take_string(&mut map, "player_name")?;
        let genre = take_string(&mut map, "genre")?;
        let tone = take_string(&mut map, "tone")?;
        let setting = take_string(&mut map, "setting")?;
        let preferences = take_string_list(&mut map, "preferences")?;

        Ok(Self {
            player_name,
            genre,
            tone,
            setting,
            preferences,
            extra: map,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.player_name.is_none()
            && self.genre.is_none()
            && self.tone.is_none()
            && self.setting.is_none()
            && self.preferences.is_empty()
            && self.extra.is_empty()
    }

    /// Render as prompt lines, one `- label: value` per known field.
    pub fn describe(&self) -> String {
        let mut lines = Vec::new();
        if let Some(name) = &self.player_name {
            lines.push(format!("- Reader's character: {name}"));
        }
        if let Some(genre) = &self.genre {
            lines.push(format!("- Genre: {genre}"));
        }
        if let Some(tone) = &self.tone {
            lines.push(format!("- Tone: {tone}"));
        }
        if let Some(setting) = &self.setting {
            lines.push(format!("- Setting: {setting}"));
        }
        if !self.preferences.is_empty() {
            lines.push(format!("- Preferences: {}", self.preferences.join(", ")));
        }
        for (key, value) in &self.extra {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            lines.push(format!("- {key}: {rendered}"));
        }

        if lines.is_empty() {
            "- (no reader context provided)".to_string()
        } else {
            lines.join("\n")
        }
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Result<Option<String>, ContextError> {
    match map.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ContextError::WrongType {
            key: key.to_string(),
            expected: "a string",
        }),
    }
}

fn take_string_list(map: &mut Map<String, Value>, key: &str) -> Result<Vec<String>, ContextError> {
    let wrong_type = || ContextError::WrongType {
        key: key.to_string(),
        expected: "a list of strings",
    };

    match map.remove(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                _ => Err(wrong_type()),
            })
            .collect(),
        Some(_) => Err(wrong_type()),
    }
}
