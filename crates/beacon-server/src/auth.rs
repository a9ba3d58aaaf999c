//! Admin sessions behind a single shared secret.
//!
//! Displays never authenticate; only writes go through a session token.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ApiError;

/// Header carrying the admin session token.
pub const SESSION_HEADER: &str = "x-session-token";

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("no admin secret configured")]
    NotConfigured,
    #[error("invalid credentials")]
    InvalidCredentials,
}

#[derive(Debug, Clone, Copy)]
pub struct Session {
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

/// Issues and validates admin session tokens.
pub struct SessionManager {
    secret_digest: Option<[u8; 32]>,
    sessions: DashMap<String, Session>,
    ttl: chrono::Duration,
}

impl SessionManager {
    pub fn new(secret: Option<&SecretString>, ttl: Duration) -> Self {
        let secret_digest = secret.map(|s| sha256(s.expose_secret().as_bytes()));
        if secret_digest.is_none() {
            warn!("no admin secret configured, all logins will be rejected");
        }
        Self {
            secret_digest,
            sessions: DashMap::new(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Exchange the shared secret for a fresh session token.
    pub fn login(&self, candidate: &str) -> Result<String, AuthError> {
        self.login_at(candidate, Utc::now())
    }

    pub fn login_at(&self, candidate: &str, now: DateTime<Utc>) -> Result<String, AuthError> {
        let expected = self.secret_digest.as_ref().ok_or(AuthError::NotConfigured)?;
        // Digests, so both sides are always 32 bytes.
        if !constant_time_eq(&sha256(candidate.as_bytes()), expected) {
            warn!("admin login rejected");
            return Err(AuthError::InvalidCredentials);
        }

        let token = mint_token();
        let _ = self.sessions.insert(
            token.clone(),
            Session {
                created_at: now,
                last_used_at: now,
            },
        );
        info!(active_sessions = self.sessions.len(), "admin session created");
        Ok(token)
    }

    pub fn validate(&self, token: &str) -> bool {
        self.validate_at(token, Utc::now())
    }

    /// True iff the token exists and has been used within the TTL. A valid
    /// token has its idle timer refreshed; an expired one is removed.
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> bool {
        {
            let Some(mut session) = self.sessions.get_mut(token) else {
                return false;
            };
            if now.signed_duration_since(session.last_used_at) <= self.ttl {
                session.last_used_at = now;
                return true;
            }
        }
        let _ = self.sessions.remove(token);
        debug!("expired session removed on validate");
        false
    }

    /// Idempotent. Returns whether a session was actually removed.
    pub fn logout(&self, token: &str) -> bool {
        let removed = self.sessions.remove(token).is_some();
        if removed {
            info!(active_sessions = self.sessions.len(), "admin session ended");
        }
        removed
    }

    /// Drop every session idle for longer than the TTL.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, s| now.signed_duration_since(s.last_used_at) <= self.ttl);
        before.saturating_sub(self.sessions.len())
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Periodically sweep expired sessions until `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick completes immediately.
            let _ = interval.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = manager.sweep(Utc::now());
                        if removed > 0 {
                            info!(removed, "swept expired admin sessions");
                        }
                    }
                }
            }
            debug!("session sweeper stopped");
        })
    }
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(bytes));
    out
}

fn mint_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Constant-time byte comparison.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Extractor guarding admin routes. Rejects with 401 unless the request
/// carries a live session token.
#[derive(Debug, Clone)]
pub struct Authorized {
    pub token: String,
}

impl<S> FromRequestParts<S> for Authorized
where
    Arc<SessionManager>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let sessions = Arc::<SessionManager>::from_ref(state);
        let token = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::Unauthorized)?;
        if sessions.validate(token) {
            Ok(Self {
                token: token.to_owned(),
            })
        } else {
            Err(ApiError::Unauthorized)
        }
    }
}
