//! End-to-end tests against a real listener and real SSE clients.

use std::pin::Pin;
use std::time::Duration;

use beacon_core::BroadcastMessage;
use beacon_server::{BeaconServer, ServerConfig, ServerHandle};
use futures::{Stream, StreamExt};
use secrecy::SecretString;
use serde_json::{json, Value};
use tokio::time::timeout;

const TIMEOUT: Duration = Duration::from_secs(5);
const SECRET: &str = "integration-secret";

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>;

struct TestServer {
    server: BeaconServer,
    handle: Option<ServerHandle>,
    base: String,
    http: reqwest::Client,
    _dir: tempfile::TempDir,
}

async fn boot_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        settings_path: dir.path().join("settings.json"),
        api_key: Some(SecretString::from(SECRET)),
        keep_alive_secs: 1,
        ..ServerConfig::default()
    };
    let server = BeaconServer::new(config).unwrap();
    let handle = server.listen().await.unwrap();
    let base = format!("http://127.0.0.1:{}", handle.port());
    TestServer {
        server,
        handle: Some(handle),
        base,
        http: reqwest::Client::new(),
        _dir: dir,
    }
}

impl TestServer {
    async fn login(&self) -> String {
        let resp: Value = self
            .http
            .post(format!("{}/api/auth/login", self.base))
            .json(&json!({"apiKey": SECRET}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        resp["sessionToken"].as_str().unwrap().to_owned()
    }

    async fn set(&self, token: &str, key: &str, value: Value) -> Value {
        let resp = self
            .http
            .post(format!("{}/api/settings/{key}", self.base))
            .header("x-session-token", token)
            .json(&json!({ "value": value }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        resp.json().await.unwrap()
    }

    async fn settings(&self) -> Value {
        self.http
            .get(format!("{}/api/settings", self.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn open_stream(&self, query: &str) -> SseReader {
        let resp = self
            .http
            .get(format!("{}/api/settings/stream?{query}", self.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        SseReader {
            stream: Box::pin(resp.bytes_stream()),
            buf: String::new(),
        }
    }

    async fn wait_for_displays(&self, n: usize) {
        timeout(TIMEOUT, async {
            while self.server.hub().registry().count() != n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("display count never settled");
    }
}

/// Minimal SSE reader: unnamed `data:` events, comments skipped.
struct SseReader {
    stream: ByteStream,
    buf: String,
}

impl SseReader {
    async fn next_message(&mut self) -> Option<BroadcastMessage> {
        loop {
            while let Some(pos) = self.buf.find("\n\n") {
                let block: String = self.buf.drain(..pos + 2).collect();
                let data: Vec<&str> = block
                    .lines()
                    .filter_map(|l| l.strip_prefix("data:"))
                    .map(|d| d.strip_prefix(' ').unwrap_or(d))
                    .collect();
                if !data.is_empty() {
                    return Some(serde_json::from_str(&data.join("\n")).unwrap());
                }
            }
            let chunk = timeout(TIMEOUT, self.stream.next()).await.expect("stream stalled")?;
            self.buf.push_str(&String::from_utf8_lossy(&chunk.ok()?));
        }
    }
}

#[tokio::test]
async fn fan_out_reaches_every_display() {
    let ts = boot_server().await;
    let token = ts.login().await;

    let mut readers = Vec::new();
    for i in 0..5 {
        let mut r = ts.open_stream(&format!("displayId=d{i}")).await;
        assert!(matches!(r.next_message().await, Some(BroadcastMessage::Initial { .. })));
        readers.push(r);
    }
    ts.wait_for_displays(5).await;

    let resp = ts.set(&token, "motd", json!("Assembly at 10")).await;
    assert_eq!(resp["clients"], 5);

    for r in &mut readers {
        match r.next_message().await {
            Some(BroadcastMessage::SettingsUpdate { settings, key }) => {
                assert_eq!(key.as_deref(), Some("motd"));
                assert_eq!(settings.get("motd"), Some(&json!("Assembly at 10")));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

#[tokio::test]
async fn reconnect_receives_current_snapshot() {
    let ts = boot_server().await;
    let token = ts.login().await;

    let mut r = ts.open_stream("displayId=lobby").await;
    let _ = r.next_message().await;
    drop(r);

    // Written while the display was away.
    let _ = ts.set(&token, "motd", json!("missed me")).await;

    let mut r = ts.open_stream("displayId=lobby").await;
    match r.next_message().await {
        Some(BroadcastMessage::Initial { settings, .. }) => {
            assert_eq!(serde_json::to_value(&settings).unwrap(), ts.settings().await);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn provisioning_tags_are_echoed_in_initial() {
    let ts = boot_server().await;
    let mut r = ts.open_stream("displayId=gym-1&tags=Gym,%20Athletics").await;
    match r.next_message().await {
        Some(BroadcastMessage::Initial { display_tags, .. }) => {
            assert_eq!(
                display_tags.into_iter().collect::<Vec<_>>(),
                ["athletics", "gym"]
            );
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(ts.settings().await["displayTags"]["gym-1"], json!(["athletics", "gym"]));
}

#[tokio::test]
async fn auth_boundary_over_http() {
    let ts = boot_server().await;
    let resp = ts
        .http
        .post(format!("{}/api/settings/motd", ts.base))
        .json(&json!({"value": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    for path in ["/api/settings", "/api/health", "/api/emergency", "/api/dismissal"] {
        let resp = ts.http.get(format!("{}{path}", ts.base)).send().await.unwrap();
        assert_eq!(resp.status(), 200, "{path}");
    }
}

#[tokio::test]
async fn emergency_reaches_connected_and_late_displays() {
    let ts = boot_server().await;
    let token = ts.login().await;
    let mut early = ts.open_stream("displayId=early").await;
    let _ = early.next_message().await;
    ts.wait_for_displays(1).await;

    let resp: Value = ts
        .http
        .post(format!("{}/api/emergency/alert", ts.base))
        .header("x-session-token", &token)
        .json(&json!({"title": "Lockdown", "message": "Lock doors"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["clients"], 1);
    assert!(matches!(
        early.next_message().await,
        Some(BroadcastMessage::EmergencyAlert { .. })
    ));

    let mut late = ts.open_stream("displayId=late").await;
    assert!(matches!(late.next_message().await, Some(BroadcastMessage::Initial { .. })));
    assert!(matches!(
        late.next_message().await,
        Some(BroadcastMessage::EmergencyAlert { alert }) if alert.title == "Lockdown"
    ));
}

#[tokio::test]
async fn shutdown_notifies_displays_and_ends_streams() {
    let mut ts = boot_server().await;
    let mut r = ts.open_stream("displayId=d1").await;
    let _ = r.next_message().await;
    ts.wait_for_displays(1).await;

    let handle = ts.handle.take().unwrap();
    ts.server
        .shutdown()
        .graceful_shutdown(handle.into_tasks(), Some(TIMEOUT))
        .await;

    assert!(matches!(r.next_message().await, Some(BroadcastMessage::ServerShutdown)));
    assert!(r.next_message().await.is_none());
}
