//! Where a display gets its settings from.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::{BroadcastMessage, ClientError, DismissalStatus, SettingsSnapshot};
use futures::Stream;
use reqwest::header::ACCEPT;
use tracing::{debug, instrument};

use crate::identity::DisplayIdentity;
use crate::sse::{SseStream, SSE_IDLE_TIMEOUT};

/// Decoded push-channel messages. Ends when the channel closes; a transport
/// failure shows up as a final `Err`.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<BroadcastMessage, ClientError>> + Send>>;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A beacon server, as seen by a display.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    /// Open the push channel. The first message on a healthy channel is
    /// `initial`.
    async fn open_channel(&self, identity: &DisplayIdentity) -> Result<MessageStream, ClientError>;

    /// One-shot read of the full snapshot.
    async fn fetch_snapshot(&self) -> Result<SettingsSnapshot, ClientError>;

    /// Current dismissal state, polled as a backstop for missed pushes.
    async fn fetch_dismissal(&self) -> Result<Option<DismissalStatus>, ClientError>;
}

/// [`SettingsSource`] over HTTP: SSE for the channel, JSON GETs otherwise.
#[derive(Clone, Debug)]
pub struct HttpSource {
    base_url: String,
    http: reqwest::Client,
    idle_timeout: Duration,
    request_timeout: Duration,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;
        Ok(Self::with_client(base_url, http))
    }

    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            http,
            idle_timeout: SSE_IDLE_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle_timeout = idle;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let resp = self
            .http
            .get(self.url(path))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(network_error)?;
        let resp = check_status(resp).await?;
        resp.json().await.map_err(|e| ClientError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SettingsSource for HttpSource {
    #[instrument(skip_all, fields(display_id = %identity.display_id))]
    async fn open_channel(&self, identity: &DisplayIdentity) -> Result<MessageStream, ClientError> {
        let resp = self
            .http
            .get(self.url("/api/settings/stream"))
            .query(&identity.query_pairs())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(network_error)?;
        let resp = check_status(resp).await?;
        debug!("push channel open");
        Ok(Box::pin(SseStream::with_idle_timeout(
            resp.bytes_stream(),
            self.idle_timeout,
        )))
    }

    async fn fetch_snapshot(&self) -> Result<SettingsSnapshot, ClientError> {
        self.get_json("/api/settings").await
    }

    async fn fetch_dismissal(&self) -> Result<Option<DismissalStatus>, ClientError> {
        self.get_json("/api/dismissal").await
    }
}

pub(crate) fn network_error(e: reqwest::Error) -> ClientError {
    ClientError::Network(e.to_string())
}

/// Turn a non-success response into the matching [`ClientError`].
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::from_status(status, body))
}
