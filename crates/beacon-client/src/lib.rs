//! # beacon-client
//!
//! Display-side half of beacon. A [`SyncAgent`] keeps a push channel open to
//! the server, applies every snapshot it receives, and falls back to a
//! one-shot fetch and then a local cache when the channel is down.
//! [`AdminClient`] drives the authenticated write endpoints.

pub mod admin;
pub mod agent;
pub mod cache;
pub mod config;
pub mod identity;
pub mod mock;
pub mod poll;
pub mod source;
pub mod sse;
pub mod state;
pub mod surface;

pub use admin::AdminClient;
pub use agent::SyncAgent;
pub use cache::SnapshotCache;
pub use config::{load_agent_config, AgentConfig};
pub use identity::{load_or_create_display_id, DisplayIdentity};
pub use source::{HttpSource, MessageStream, SettingsSource};
pub use state::{DisplayState, SyncState};
pub use surface::{DisplaySurface, LogSurface};
