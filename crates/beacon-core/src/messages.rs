//! Push-channel wire messages.
//!
//! Every message is self-contained: a display that missed any number of
//! earlier messages reaches the right state from the next one it receives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::settings::SettingsSnapshot;
use crate::targeting::TagSet;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    #[default]
    Critical,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyAlert {
    #[serde(default)]
    pub level: AlertLevel,
    pub title: String,
    #[serde(default)]
    pub message: String,
    pub issued_at: DateTime<Utc>,
}

/// Current state of end-of-day dismissal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DismissalStatus {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Names (or bus/pickup numbers) called so far, oldest first.
    #[serde(default)]
    pub called: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DismissalStatus {
    pub fn started(message: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            active: true,
            message,
            called: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastMessage {
    /// First frame on every push channel.
    Initial {
        settings: SettingsSnapshot,
        #[serde(rename = "displayTags", default)]
        display_tags: TagSet,
    },
    /// Sent after every committed write. Carries the whole snapshot; `key` is
    /// only a hint for UI animations.
    SettingsUpdate {
        settings: SettingsSnapshot,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    EmergencyAlert {
        alert: EmergencyAlert,
    },
    EmergencyCancel,
    DismissalStart {
        dismissal: DismissalStatus,
    },
    DismissalUpdate {
        dismissal: DismissalStatus,
    },
    DismissalEnd,
    ServerShutdown,
}

impl BroadcastMessage {
    /// Wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Initial { .. } => "initial",
            Self::SettingsUpdate { .. } => "settings_update",
            Self::EmergencyAlert { .. } => "emergency_alert",
            Self::EmergencyCancel => "emergency_cancel",
            Self::DismissalStart { .. } => "dismissal_start",
            Self::DismissalUpdate { .. } => "dismissal_update",
            Self::DismissalEnd => "dismissal_end",
            Self::ServerShutdown => "server_shutdown",
        }
    }

    /// The snapshot carried by settings-bearing messages.
    pub fn snapshot(&self) -> Option<&SettingsSnapshot> {
        match self {
            Self::Initial { settings, .. } | Self::SettingsUpdate { settings, .. } => Some(settings),
            _ => None,
        }
    }
}
