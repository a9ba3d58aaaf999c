use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConnectionId, DisplayId};
use crate::targeting::TagSet;

/// Identity and metadata a display reports when it opens its push channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    pub display_id: DisplayId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub resolution: String,
    #[serde(default)]
    pub page: String,
}

impl DisplayInfo {
    pub fn new(display_id: DisplayId) -> Self {
        Self {
            display_id,
            name: String::new(),
            location: String::new(),
            resolution: String::new(),
            page: String::new(),
        }
    }
}

/// Registry entry as reported over the admin API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplaySummary {
    #[serde(flatten)]
    pub info: DisplayInfo,
    pub tags: TagSet,
    pub connection_id: ConnectionId,
    pub connected_at: DateTime<Utc>,
    pub dropped_messages: u64,
}
