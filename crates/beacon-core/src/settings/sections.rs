//! Typed views over the well-known settings keys.
//!
//! Every section uses camelCase on the wire and `#[serde(default)]`, so a
//! partially-filled object picks up the documented defaults below. Unknown
//! fields are ignored rather than rejected.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const TIME_FORMAT: &str = "%H:%M";

// ─────────────────────────────────────────────────────────────────────────────
// Theme
// ─────────────────────────────────────────────────────────────────────────────

/// Colors and typography shared by every display.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThemeSettings {
    pub primary_color: String,
    pub secondary_color: String,
    pub accent_color: String,
    pub background_color: String,
    pub text_color: String,
    pub font_family: String,
    /// Multiplier on the base font size (0.5..=3.0).
    pub font_scale: f64,
    pub dark_mode: bool,
}

impl Default for ThemeSettings {
    fn default() -> Self {
        Self {
            primary_color: "#1e3a8a".into(),
            secondary_color: "#f59e0b".into(),
            accent_color: "#10b981".into(),
            background_color: "#0f172a".into(),
            text_color: "#f8fafc".into(),
            font_family: "system-ui, sans-serif".into(),
            font_scale: 1.0,
            dark_mode: true,
        }
    }
}

impl ThemeSettings {
    pub fn validate(&self) -> Result<(), String> {
        for (field, color) in [
            ("primaryColor", &self.primary_color),
            ("secondaryColor", &self.secondary_color),
            ("accentColor", &self.accent_color),
            ("backgroundColor", &self.background_color),
            ("textColor", &self.text_color),
        ] {
            if !is_valid_color(color) {
                return Err(format!("{field} is not a valid color: {color:?}"));
            }
        }
        if !(0.5..=3.0).contains(&self.font_scale) {
            return Err(format!("fontScale {} outside 0.5..=3.0", self.font_scale));
        }
        Ok(())
    }

    /// CSS custom properties a renderer applies to its root element.
    pub fn css_variables(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert("--color-primary".into(), self.primary_color.clone());
        vars.insert("--color-secondary".into(), self.secondary_color.clone());
        vars.insert("--color-accent".into(), self.accent_color.clone());
        vars.insert("--color-background".into(), self.background_color.clone());
        vars.insert("--color-text".into(), self.text_color.clone());
        vars.insert("--font-family".into(), self.font_family.clone());
        vars.insert("--font-scale".into(), format!("{}", self.font_scale));
        vars.insert(
            "--color-scheme".into(),
            if self.dark_mode { "dark" } else { "light" }.into(),
        );
        vars
    }
}

/// Hex colors must be `#rgb`, `#rgba`, `#rrggbb` or `#rrggbbaa`. Anything else
/// (named colors, `rgb(...)`) is passed through as long as it is short and
/// printable.
fn is_valid_color(color: &str) -> bool {
    if color.is_empty() || color.len() > 64 || color.chars().any(char::is_control) {
        return false;
    }
    match color.strip_prefix('#') {
        Some(hex) => {
            matches!(hex.len(), 3 | 4 | 6 | 8) && hex.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => true,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Livestream
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LivestreamSettings {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// How often displays check the stream for liveness (5..=3600).
    pub check_interval_secs: u64,
    pub muted: bool,
}

impl Default for LivestreamSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            title: None,
            check_interval_secs: 30,
            muted: true,
        }
    }
}

impl LivestreamSettings {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(url) = &self.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(format!("url must be http(s): {url:?}"));
            }
        }
        if self.enabled && self.url.is_none() {
            return Err("enabled livestream requires a url".into());
        }
        if !(5..=3600).contains(&self.check_interval_secs) {
            return Err(format!(
                "checkIntervalSecs {} outside 5..=3600",
                self.check_interval_secs
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// General
// ─────────────────────────────────────────────────────────────────────────────

/// What the main area of a display shows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlideMode {
    #[default]
    Slides,
    Livestream,
    Split,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneralSettings {
    pub organization_name: String,
    pub slide_mode: SlideMode,
    /// Default time each slide stays up (1..=3600).
    pub slide_duration_secs: u64,
    /// Interval of the dismissal fallback poll (1..=3600).
    pub dismissal_poll_secs: u64,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            organization_name: String::new(),
            slide_mode: SlideMode::Slides,
            slide_duration_secs: 10,
            dismissal_poll_secs: 15,
        }
    }
}

impl GeneralSettings {
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=3600).contains(&self.slide_duration_secs) {
            return Err(format!(
                "slideDurationSecs {} outside 1..=3600",
                self.slide_duration_secs
            ));
        }
        if !(1..=3600).contains(&self.dismissal_poll_secs) {
            return Err(format!(
                "dismissalPollSecs {} outside 1..=3600",
                self.dismissal_poll_secs
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bell schedule
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BellPeriod {
    pub name: String,
    /// Local wall-clock start, `HH:MM`.
    pub start: String,
    /// Local wall-clock end, `HH:MM` (exclusive).
    pub end: String,
}

impl BellPeriod {
    fn bounds(&self) -> Option<(NaiveTime, NaiveTime)> {
        let start = NaiveTime::parse_from_str(&self.start, TIME_FORMAT).ok()?;
        let end = NaiveTime::parse_from_str(&self.end, TIME_FORMAT).ok()?;
        Some((start, end))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BellSchedule {
    pub enabled: bool,
    pub periods: Vec<BellPeriod>,
}

impl BellSchedule {
    pub fn validate(&self) -> Result<(), String> {
        for period in &self.periods {
            if period.name.trim().is_empty() {
                return Err("bell period name must not be empty".into());
            }
            let (start, end) = period.bounds().ok_or_else(|| {
                format!(
                    "period {:?} has malformed times ({} - {}), expected HH:MM",
                    period.name, period.start, period.end
                )
            })?;
            if start >= end {
                return Err(format!("period {:?} ends before it starts", period.name));
            }
        }
        Ok(())
    }

    /// The period containing `now`, if the schedule is enabled.
    pub fn current_period(&self, now: NaiveTime) -> Option<&BellPeriod> {
        if !self.enabled {
            return None;
        }
        self.periods.iter().find(|p| match p.bounds() {
            Some((start, end)) => start <= now && now < end,
            None => false,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Slides
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slide {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Opaque to this crate; interpreted by the renderer.
    #[serde(default)]
    pub content: Value,
    #[serde(default, alias = "tags")]
    pub target_tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
}

impl Slide {
    pub fn new(content: Value) -> Self {
        Self {
            content,
            ..Self::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

pub(crate) fn validate_slides(slides: &[Slide]) -> Result<(), String> {
    for (idx, slide) in slides.iter().enumerate() {
        if slide.duration_secs == Some(0) {
            return Err(format!("slide {idx} has a zero duration"));
        }
    }
    Ok(())
}

pub(crate) fn validate_display_tags(map: &BTreeMap<String, Vec<String>>) -> Result<(), String> {
    if map.keys().any(|id| id.trim().is_empty()) {
        return Err("display ids must not be empty".into());
    }
    Ok(())
}
