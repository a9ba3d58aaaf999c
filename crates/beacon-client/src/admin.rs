//! Authenticated client for the admin write endpoints.

use std::time::Duration;

use beacon_core::{AlertLevel, ClientError, DisplaySummary, SettingsSnapshot};
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::source::{check_status, network_error, CONNECT_TIMEOUT};

pub const SESSION_HEADER: &str = "x-session-token";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    session_token: String,
}

#[derive(Deserialize)]
struct ClientsResponse {
    clients: usize,
}

#[derive(Deserialize)]
struct DisplayList {
    displays: Vec<DisplaySummary>,
}

/// Holds the shared secret and, once logged in, a session token.
///
/// Logs in lazily on the first write. A 401 on any call drops the token;
/// the next call logs in again from the secret.
pub struct AdminClient {
    base_url: String,
    http: reqwest::Client,
    api_key: SecretString,
    token: RwLock<Option<SecretString>>,
    request_timeout: Duration,
}

impl AdminClient {
    pub fn new(base_url: impl Into<String>, api_key: SecretString) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(network_error)?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            http,
            api_key,
            token: RwLock::new(None),
            request_timeout: Duration::from_secs(30),
        })
    }

    pub fn has_session(&self) -> bool {
        self.token.read().is_some()
    }

    #[instrument(skip_all)]
    pub async fn login(&self) -> Result<(), ClientError> {
        let resp = self
            .http
            .post(format!("{}/api/auth/login", self.base_url))
            .timeout(self.request_timeout)
            .json(&json!({ "apiKey": self.api_key.expose_secret() }))
            .send()
            .await
            .map_err(network_error)?;
        let resp = check_status(resp).await?;
        let body: LoginResponse = resp
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        *self.token.write() = Some(SecretString::from(body.session_token));
        info!("admin session established");
        Ok(())
    }

    /// End the session server-side. No-op without one.
    pub async fn logout(&self) -> Result<(), ClientError> {
        if !self.has_session() {
            return Ok(());
        }
        let _: Value = self.send_authed(reqwest::Method::POST, "/api/auth/logout", None).await?;
        *self.token.write() = None;
        Ok(())
    }

    /// Write one setting. Returns how many displays were sent the update.
    pub async fn set(&self, key: &str, value: Value) -> Result<usize, ClientError> {
        let path = format!("/api/settings/{key}");
        self.clients(&path, json!({ "value": value })).await
    }

    /// Replace the whole snapshot.
    pub async fn replace_all(&self, snapshot: &SettingsSnapshot) -> Result<usize, ClientError> {
        self.clients("/api/settings", snapshot.to_value()).await
    }

    pub async fn emergency_alert(
        &self,
        level: AlertLevel,
        title: &str,
        message: &str,
    ) -> Result<usize, ClientError> {
        self.clients(
            "/api/emergency/alert",
            json!({ "level": level, "title": title, "message": message }),
        )
        .await
    }

    pub async fn emergency_cancel(&self) -> Result<usize, ClientError> {
        self.clients("/api/emergency/cancel", json!({})).await
    }

    pub async fn dismissal_start(&self, message: Option<&str>) -> Result<usize, ClientError> {
        self.clients("/api/dismissal/start", json!({ "message": message })).await
    }

    pub async fn dismissal_update(
        &self,
        called: &[String],
        message: Option<&str>,
    ) -> Result<usize, ClientError> {
        self.clients(
            "/api/dismissal/update",
            json!({ "called": called, "message": message }),
        )
        .await
    }

    pub async fn dismissal_end(&self) -> Result<usize, ClientError> {
        self.clients("/api/dismissal/end", json!({})).await
    }

    pub async fn displays(&self) -> Result<Vec<DisplaySummary>, ClientError> {
        let list: DisplayList = self.send_authed(reqwest::Method::GET, "/api/displays", None).await?;
        Ok(list.displays)
    }

    async fn clients<B: Serialize>(&self, path: &str, body: B) -> Result<usize, ClientError> {
        let body = serde_json::to_value(body).map_err(|e| ClientError::Validation(e.to_string()))?;
        let resp: ClientsResponse = self.send_authed(reqwest::Method::POST, path, Some(body)).await?;
        debug!(path, clients = resp.clients, "write delivered");
        Ok(resp.clients)
    }

    async fn send_authed<R: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<R, ClientError> {
        if !self.has_session() {
            self.login().await?;
        }
        let token = self
            .token
            .read()
            .as_ref()
            .map(|t| t.expose_secret().to_owned())
            .ok_or_else(|| ClientError::Unauthorized("no session".into()))?;

        let mut req = self
            .http
            .request(method, format!("{}{path}", self.base_url))
            .timeout(self.request_timeout)
            .header(SESSION_HEADER, token);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await.map_err(network_error)?;

        match check_status(resp).await {
            Ok(resp) => resp.json().await.map_err(|e| ClientError::Decode(e.to_string())),
            Err(e @ ClientError::Unauthorized(_)) => {
                warn!(path, "session rejected, clearing token");
                *self.token.write() = None;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}
