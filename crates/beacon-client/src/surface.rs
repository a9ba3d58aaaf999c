//! The rendering side of a display. Beacon only tells it what to show.

use beacon_core::settings::BellPeriod;
use beacon_core::{DismissalStatus, EmergencyAlert};
use tracing::{info, warn};

use crate::state::DisplayState;

/// Receives everything the sync agent decides a display should show.
///
/// Calls come from the agent task and from poller tasks, so implementations
/// must be cheap and must not block.
pub trait DisplaySurface: Send + Sync {
    /// Settings-derived state changed.
    fn render(&self, state: &DisplayState);

    fn show_emergency(&self, alert: &EmergencyAlert);

    fn clear_emergency(&self);

    /// Dismissal started or progressed.
    fn show_dismissal(&self, status: &DismissalStatus);

    fn end_dismissal(&self);

    /// Result of a livestream liveness check, reported on change.
    fn livestream_status(&self, _live: bool) {}

    /// Bell period now in effect, reported on change.
    fn bell_period(&self, _period: Option<&BellPeriod>) {}
}

/// Surface that only logs. Used by the headless `display` command.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSurface;

impl DisplaySurface for LogSurface {
    fn render(&self, state: &DisplayState) {
        info!(
            slides = state.slides.len(),
            mode = ?state.slide_mode,
            tags = ?state.tags,
            livestream = state.livestream.enabled,
            "render"
        );
    }

    fn show_emergency(&self, alert: &EmergencyAlert) {
        warn!(level = ?alert.level, title = %alert.title, message = %alert.message, "emergency alert");
    }

    fn clear_emergency(&self) {
        info!("emergency cleared");
    }

    fn show_dismissal(&self, status: &DismissalStatus) {
        info!(called = status.called.len(), message = ?status.message, "dismissal");
    }

    fn end_dismissal(&self) {
        info!("dismissal ended");
    }

    fn livestream_status(&self, live: bool) {
        info!(live, "livestream status");
    }

    fn bell_period(&self, period: Option<&BellPeriod>) {
        info!(period = period.map(|p| p.name.as_str()), "bell period");
    }
}
