//! File-backed settings store.
//!
//! One JSON object on disk, one in-memory copy, one writer at a time.

mod error;
mod settings_store;

pub use error::{Result, StoreError};
pub use settings_store::SettingsStore;
