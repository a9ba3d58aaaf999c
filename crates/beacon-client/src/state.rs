//! What a display currently shows, derived from the latest snapshot.

use std::collections::BTreeMap;
use std::fmt;

use beacon_core::settings::{BellSchedule, LivestreamSettings, Slide, SlideMode};
use beacon_core::{filter_slides, DismissalStatus, DisplayId, EmergencyAlert, SettingsSnapshot, TagSet};
use serde::Serialize;

/// Connection state of the sync agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Connecting,
    Connected,
    Reconnecting,
    /// The push channel is down and the display runs on a one-shot fetch or
    /// the local cache.
    FailedFallback,
}

impl SyncState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::FailedFallback => "failed_fallback",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which derived parts moved on the last apply. Pollers restart from this.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StateChanges {
    pub theme: bool,
    pub slides: bool,
    pub livestream: bool,
    pub bell_schedule: bool,
    pub dismissal_poll: bool,
    pub tags: bool,
}

impl StateChanges {
    pub fn any(&self) -> bool {
        self.theme
            || self.slides
            || self.livestream
            || self.bell_schedule
            || self.dismissal_poll
            || self.tags
    }
}

/// Render-ready display state.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayState {
    pub theme_vars: BTreeMap<String, String>,
    /// Slides visible on this display, in authoring order.
    pub slides: Vec<Slide>,
    pub slide_mode: SlideMode,
    pub slide_duration_secs: u64,
    pub livestream: LivestreamSettings,
    pub bell_schedule: BellSchedule,
    pub dismissal_poll_secs: u64,
    pub organization_name: String,
    pub tags: TagSet,
    pub emergency: Option<EmergencyAlert>,
    pub dismissal: Option<DismissalStatus>,
    #[serde(skip)]
    applied: bool,
}

impl DisplayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any snapshot has been applied yet.
    pub fn is_applied(&self) -> bool {
        self.applied
    }

    /// Recompute everything derived from `snapshot`.
    ///
    /// Tags come from `server_tags` (the `initial` frame) when given, else
    /// from the snapshot's assignment for `display_id`, else stay as they
    /// were. Applying the same inputs twice yields the same state and no
    /// changes the second time.
    pub fn apply_snapshot(
        &mut self,
        snapshot: &SettingsSnapshot,
        server_tags: Option<&TagSet>,
        display_id: &DisplayId,
    ) -> StateChanges {
        let tags = match server_tags {
            Some(tags) => tags.clone(),
            None => snapshot
                .tags_for_display(display_id.as_str())
                .unwrap_or_else(|| self.tags.clone()),
        };

        let general = snapshot.general();
        let theme_vars = snapshot.theme().css_variables();
        let slides = filter_slides(&snapshot.slides(), &tags);
        let livestream = snapshot.livestream();
        let bell_schedule = snapshot.bell_schedule();

        let changes = StateChanges {
            theme: theme_vars != self.theme_vars,
            slides: slides != self.slides
                || general.slide_mode != self.slide_mode
                || general.slide_duration_secs != self.slide_duration_secs,
            livestream: livestream != self.livestream || !self.applied,
            bell_schedule: bell_schedule != self.bell_schedule || !self.applied,
            dismissal_poll: general.dismissal_poll_secs != self.dismissal_poll_secs,
            tags: tags != self.tags,
        };

        self.theme_vars = theme_vars;
        self.slides = slides;
        self.slide_mode = general.slide_mode;
        self.slide_duration_secs = general.slide_duration_secs;
        self.livestream = livestream;
        self.bell_schedule = bell_schedule;
        self.dismissal_poll_secs = general.dismissal_poll_secs;
        self.organization_name = general.organization_name;
        self.tags = tags;
        self.applied = true;
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: serde_json::Value) -> SettingsSnapshot {
        SettingsSnapshot::from_value(value).unwrap()
    }

    fn school() -> SettingsSnapshot {
        snapshot(json!({
            "theme": {"primaryColor": "#ff0000"},
            "general": {"slideMode": "split", "dismissalPollSecs": 5},
            "slides": [
                {"content": "A", "targetTags": []},
                {"content": "B", "targetTags": ["gym"]},
                {"content": "C", "targetTags": ["all"]},
                {"content": "D", "targetTags": ["library"]}
            ],
            "displayTags": {"gym-1": ["gym"]}
        }))
    }

    fn contents(state: &DisplayState) -> Vec<&str> {
        state.slides.iter().filter_map(|s| s.content.as_str()).collect()
    }

    #[test]
    fn apply_derives_render_state() {
        let mut state = DisplayState::new();
        assert!(!state.is_applied());
        let id = DisplayId::from_raw("gym-1");
        let changes = state.apply_snapshot(&school(), None, &id);

        assert!(state.is_applied());
        assert!(changes.any());
        assert_eq!(state.theme_vars["--color-primary"], "#ff0000");
        assert_eq!(state.slide_mode, SlideMode::Split);
        assert_eq!(state.dismissal_poll_secs, 5);
        assert_eq!(contents(&state), ["A", "B", "C"]);
        assert_eq!(state.tags.iter().collect::<Vec<_>>(), ["gym"]);
    }

    #[test]
    fn apply_is_idempotent() {
        let id = DisplayId::from_raw("gym-1");
        let mut once = DisplayState::new();
        once.apply_snapshot(&school(), None, &id);
        let mut twice = once.clone();
        let changes = twice.apply_snapshot(&school(), None, &id);

        assert_eq!(once, twice);
        assert!(!changes.any());
    }

    #[test]
    fn server_tags_win_over_assignment() {
        let mut state = DisplayState::new();
        let server: TagSet = ["library".to_owned()].into();
        state.apply_snapshot(&school(), Some(&server), &DisplayId::from_raw("gym-1"));
        assert_eq!(contents(&state), ["A", "C", "D"]);
    }

    #[test]
    fn untagged_display_sees_everything() {
        let mut state = DisplayState::new();
        state.apply_snapshot(&school(), None, &DisplayId::from_raw("hallway"));
        assert_eq!(contents(&state), ["A", "B", "C", "D"]);
    }

    #[test]
    fn tags_persist_when_update_has_no_assignment() {
        let mut state = DisplayState::new();
        let id = DisplayId::from_raw("hallway");
        let server: TagSet = ["gym".to_owned()].into();
        state.apply_snapshot(&school(), Some(&server), &id);

        let changes = state.apply_snapshot(&school(), None, &id);
        assert!(!changes.tags);
        assert_eq!(contents(&state), ["A", "B", "C"]);
    }

    #[test]
    fn changes_name_only_what_moved() {
        let id = DisplayId::from_raw("gym-1");
        let mut state = DisplayState::new();
        state.apply_snapshot(&school(), None, &id);

        let mut next = school();
        next.insert("livestream", json!({"enabled": true, "url": "https://example.com/live"}));
        let changes = state.apply_snapshot(&next, None, &id);

        assert!(changes.livestream);
        assert!(!changes.slides);
        assert!(!changes.theme);
        assert!(!changes.dismissal_poll);
        assert!(state.livestream.enabled);
    }

    #[test]
    fn sync_state_strings() {
        assert_eq!(SyncState::FailedFallback.to_string(), "failed_fallback");
        assert_eq!(
            serde_json::to_value(SyncState::Connected).unwrap(),
            json!("connected")
        );
    }
}
