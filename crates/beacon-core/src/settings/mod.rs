//! The settings snapshot: one JSON object holding every setting, always
//! shipped whole.

mod sections;

pub use sections::*;

use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::targeting::{normalize_tags, TagSet};

/// Well-known top-level keys. Any other key is stored as free-form JSON.
pub mod keys {
    pub const THEME: &str = "theme";
    pub const LIVESTREAM: &str = "livestream";
    pub const GENERAL: &str = "general";
    pub const BELL_SCHEDULE: &str = "bellSchedule";
    pub const SLIDES: &str = "slides";
    pub const DISPLAY_TAGS: &str = "displayTags";
    /// Taken by `GET /api/settings/stream`; can never hold a value.
    pub const STREAM: &str = "stream";
}

const MAX_KEY_LEN: usize = 128;

/// Rejected write payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid settings key {0:?}")]
    InvalidKey(String),
    #[error("invalid value for {key:?}: {reason}")]
    InvalidSection { key: String, reason: String },
    #[error("settings payload must be a JSON object")]
    NotAnObject,
}

/// Full settings map. Serialized transparently as a JSON object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsSnapshot(BTreeMap<String, Value>);

impl SettingsSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an arbitrary JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Object(map) => Ok(Self(map.into_iter().collect())),
            _ => Err(ValidationError::NotAnObject),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone().into_iter().collect())
    }

    /// Check every entry against its section schema.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (key, value) in &self.0 {
            validate_entry(key, value)?;
        }
        Ok(())
    }

    /// Typed view of a section; missing or malformed sections yield the
    /// section default so a hand-edited file can never break rendering.
    fn section<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        self.0
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    pub fn theme(&self) -> ThemeSettings {
        self.section(keys::THEME)
    }

    pub fn livestream(&self) -> LivestreamSettings {
        self.section(keys::LIVESTREAM)
    }

    pub fn general(&self) -> GeneralSettings {
        self.section(keys::GENERAL)
    }

    pub fn bell_schedule(&self) -> BellSchedule {
        self.section(keys::BELL_SCHEDULE)
    }

    pub fn slides(&self) -> Vec<Slide> {
        self.section(keys::SLIDES)
    }

    pub fn display_tag_assignments(&self) -> BTreeMap<String, Vec<String>> {
        self.section(keys::DISPLAY_TAGS)
    }

    /// Server-assigned tags for one display, if it has an assignment.
    pub fn tags_for_display(&self, display_id: &str) -> Option<TagSet> {
        self.display_tag_assignments()
            .get(display_id)
            .map(|tags| normalize_tags(tags))
    }

    /// The `displayTags` value with `display_id` (re)assigned `tags`.
    pub fn display_tags_with(&self, display_id: &str, tags: &BTreeSet<String>) -> Value {
        let mut assignments = self.display_tag_assignments();
        assignments.insert(display_id.to_owned(), tags.iter().cloned().collect());
        Value::Object(
            assignments
                .into_iter()
                .map(|(id, tags)| (id, Value::from(tags)))
                .collect(),
        )
    }
}

impl From<BTreeMap<String, Value>> for SettingsSnapshot {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

/// Keys are 1..=128 printable characters, and not [`keys::STREAM`].
pub fn validate_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty()
        || key == keys::STREAM
        || key.len() > MAX_KEY_LEN
        || key.trim() != key
        || key.chars().any(char::is_control)
    {
        return Err(ValidationError::InvalidKey(key.to_owned()));
    }
    Ok(())
}

/// Validate one `key → value` pair against the section schema for `key`.
pub fn validate_entry(key: &str, value: &Value) -> Result<(), ValidationError> {
    validate_key(key)?;
    match key {
        keys::THEME => check_section(key, value, ThemeSettings::validate),
        keys::LIVESTREAM => check_section(key, value, LivestreamSettings::validate),
        keys::GENERAL => check_section(key, value, GeneralSettings::validate),
        keys::BELL_SCHEDULE => check_section(key, value, BellSchedule::validate),
        keys::SLIDES => check_section(key, value, |s: &Vec<Slide>| sections::validate_slides(s)),
        keys::DISPLAY_TAGS => check_section(key, value, sections::validate_display_tags),
        _ => Ok(()),
    }
}

fn check_section<T, F>(key: &str, value: &Value, validate: F) -> Result<(), ValidationError>
where
    T: DeserializeOwned,
    F: FnOnce(&T) -> Result<(), String>,
{
    let parsed: T =
        serde_json::from_value(value.clone()).map_err(|e| ValidationError::InvalidSection {
            key: key.to_owned(),
            reason: e.to_string(),
        })?;
    validate(&parsed).map_err(|reason| ValidationError::InvalidSection {
        key: key.to_owned(),
        reason,
    })
}
