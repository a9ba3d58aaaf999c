//! `/api/health`: liveness plus the numbers an operator checks first.

use std::time::Instant;

use serde::Serialize;

use crate::auth::SessionManager;
use crate::hub::BroadcastHub;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub displays: usize,
    pub active_sessions: usize,
    /// Top-level keys in the committed snapshot.
    pub settings_keys: usize,
    /// Frames dropped on full queues, summed over connected displays.
    pub dropped_messages: u64,
    pub emergency_active: bool,
    pub dismissal_active: bool,
}

impl HealthResponse {
    pub fn collect(started: Instant, hub: &BroadcastHub, sessions: &SessionManager) -> Self {
        let listing = hub.registry().list();
        Self {
            status: "ok",
            uptime_secs: started.elapsed().as_secs(),
            displays: listing.len(),
            active_sessions: sessions.active_count(),
            settings_keys: hub.snapshot().len(),
            dropped_messages: listing.iter().map(|d| d.dropped_messages).sum(),
            emergency_active: hub.current_emergency().is_some(),
            dismissal_active: hub.current_dismissal().is_some_and(|d| d.active),
        }
    }
}
