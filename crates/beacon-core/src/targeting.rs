//! Content targeting: which slides a display shows, given its tags.

use std::collections::BTreeSet;

use crate::settings::Slide;

/// Normalized (trimmed, lowercase, non-empty) set of tags.
pub type TagSet = BTreeSet<String>;

/// Slides carrying this tag are shown on every display.
pub const ALL_TAG: &str = "all";

pub fn normalize_tags<I, S>(tags: I) -> TagSet
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Parse a comma-separated tag list as sent in query strings.
pub fn parse_tag_list(raw: &str) -> TagSet {
    normalize_tags(raw.split(','))
}

/// Whether a slide should appear on a display with `display_tags`.
///
/// `display_tags` must already be normalized; slide tags are compared
/// case-insensitively.
pub fn slide_matches(slide: &Slide, display_tags: &TagSet) -> bool {
    if display_tags.is_empty() || slide.target_tags.is_empty() {
        return true;
    }
    slide.target_tags.iter().any(|tag| {
        let tag = tag.trim().to_lowercase();
        tag == ALL_TAG || display_tags.contains(&tag)
    })
}

/// Order-preserving subset of `slides` visible on a display with `display_tags`.
pub fn filter_slides(slides: &[Slide], display_tags: &TagSet) -> Vec<Slide> {
    slides
        .iter()
        .filter(|slide| slide_matches(slide, display_tags))
        .cloned()
        .collect()
}
