//! # beacon-server
//!
//! Axum HTTP API and SSE push channel for the settings blob.
//!
//! - Settings reads are open; writes need an admin session token
//! - Every committed write is pushed, whole, to every connected display
//! - Emergency alerts and dismissal status ride the same push channel

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod error;
pub mod health;
pub mod hub;
pub mod registry;
pub mod routes;
pub mod server;
pub mod shutdown;

pub use config::{load_config, ServerConfig};
pub use error::ApiError;
pub use hub::BroadcastHub;
pub use server::{BeaconServer, ServerHandle};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
