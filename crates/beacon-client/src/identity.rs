//! Who this display is.
//!
//! The display id is minted on first boot and kept in a small file so the
//! server sees the same display across restarts and reconnects.

use std::path::Path;

use beacon_core::{normalize_tags, ClientError, DisplayId, DisplayInfo, TagSet};
use tracing::info;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayIdentity {
    pub display_id: DisplayId,
    pub name: String,
    pub location: String,
    pub resolution: String,
    pub page: String,
    /// Provisioning tags. Only honored by the server on first contact.
    pub tags: TagSet,
}

impl DisplayIdentity {
    pub fn new(display_id: DisplayId) -> Self {
        Self {
            display_id,
            name: String::new(),
            location: String::new(),
            resolution: String::new(),
            page: String::new(),
            tags: TagSet::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = normalize_tags(tags);
        self
    }

    pub fn info(&self) -> DisplayInfo {
        DisplayInfo {
            display_id: self.display_id.clone(),
            name: self.name.clone(),
            location: self.location.clone(),
            resolution: self.resolution.clone(),
            page: self.page.clone(),
        }
    }

    /// Query string for the push channel. Empty metadata is omitted.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("displayId", self.display_id.to_string())];
        for (key, value) in [
            ("name", &self.name),
            ("location", &self.location),
            ("resolution", &self.resolution),
            ("page", &self.page),
        ] {
            if !value.is_empty() {
                pairs.push((key, value.clone()));
            }
        }
        if !self.tags.is_empty() {
            let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
            pairs.push(("tags", tags.join(",")));
        }
        pairs
    }
}

/// Read the persisted display id, minting and saving a fresh one when the
/// file is missing or blank.
pub fn load_or_create_display_id(path: &Path) -> Result<DisplayId, ClientError> {
    match std::fs::read_to_string(path) {
        Ok(raw) if !raw.trim().is_empty() => return Ok(DisplayId::from_raw(raw.trim())),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(ClientError::Cache(format!("{}: {e}", path.display()))),
    }

    let id = DisplayId::new();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| ClientError::Cache(format!("{}: {e}", parent.display())))?;
    }
    std::fs::write(path, format!("{id}\n"))
        .map_err(|e| ClientError::Cache(format!("{}: {e}", path.display())))?;
    info!(display_id = %id, path = %path.display(), "minted display id");
    Ok(id)
}
