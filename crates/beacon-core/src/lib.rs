//! # beacon-core
//!
//! Data model shared by the beacon server and display clients: the settings
//! snapshot and its typed sections, push-channel messages, display metadata,
//! and the content targeting filter. No I/O lives here.

pub mod display;
pub mod errors;
pub mod ids;
pub mod messages;
pub mod settings;
pub mod targeting;

pub use display::{DisplayInfo, DisplaySummary};
pub use errors::ClientError;
pub use ids::{ConnectionId, DisplayId};
pub use messages::{AlertLevel, BroadcastMessage, DismissalStatus, EmergencyAlert};
pub use settings::{SettingsSnapshot, ValidationError};
pub use targeting::{filter_slides, normalize_tags, TagSet};
