//! `BeaconServer`: router assembly and the listen loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{FromRef, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use beacon_store::{SettingsStore, StoreError};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::SessionManager;
use crate::config::ServerConfig;
use crate::health::HealthResponse;
use crate::hub::BroadcastHub;
use crate::registry::DisplayRegistry;
use crate::routes::{auth, displays, events, settings, stream};
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<BroadcastHub>,
    pub sessions: Arc<SessionManager>,
    pub config: Arc<ServerConfig>,
    pub start_time: Instant,
}

impl FromRef<AppState> for Arc<SessionManager> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.sessions)
    }
}

/// The beacon server.
pub struct BeaconServer {
    config: Arc<ServerConfig>,
    hub: Arc<BroadcastHub>,
    sessions: Arc<SessionManager>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl BeaconServer {
    /// Open the settings store at `config.settings_path` and build the server.
    pub fn new(config: ServerConfig) -> Result<Self, StoreError> {
        let store = SettingsStore::open(&config.settings_path)?;
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: ServerConfig, store: SettingsStore) -> Self {
        let registry = Arc::new(DisplayRegistry::new(config.display_queue_capacity));
        let hub = Arc::new(BroadcastHub::new(Arc::new(store), registry));
        let sessions = Arc::new(SessionManager::new(
            config.api_key.as_ref(),
            Duration::from_secs(config.session_ttl_secs),
        ));
        let shutdown = Arc::new(ShutdownCoordinator::new(Arc::clone(&hub)));
        Self {
            config: Arc::new(config),
            hub,
            sessions,
            shutdown,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: Arc::clone(&self.hub),
            sessions: Arc::clone(&self.sessions),
            config: Arc::clone(&self.config),
            start_time: self.start_time,
        };

        // Timeouts apply to producing the response head only, so the SSE
        // body is unaffected.
        let router = Router::new()
            .route("/api/health", get(health_handler))
            .route(
                "/api/settings",
                get(settings::get_settings).post(settings::replace_settings),
            )
            .route("/api/settings/stream", get(stream::stream_settings))
            .route(
                "/api/settings/{key}",
                get(settings::get_setting).post(settings::update_setting),
            )
            .route("/api/auth/login", post(auth::login))
            .route("/api/auth/logout", post(auth::logout))
            .route("/api/auth/validate", get(auth::validate))
            .route("/api/displays", get(displays::list_displays))
            .route(
                "/api/displays/{id}",
                axum::routing::delete(displays::disconnect_display),
            )
            .route("/api/emergency", get(events::current_emergency))
            .route("/api/emergency/alert", post(events::emergency_alert))
            .route("/api/emergency/cancel", post(events::emergency_cancel))
            .route("/api/dismissal", get(events::current_dismissal))
            .route("/api/dismissal/start", post(events::dismissal_start))
            .route("/api/dismissal/update", post(events::dismissal_update))
            .route("/api/dismissal/end", post(events::dismissal_end))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(
                self.config.request_timeout_secs,
            )))
            .layer(TraceLayer::new_for_http());

        if self.config.cors_permissive {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Bind and serve until the shutdown coordinator fires.
    pub async fn listen(&self) -> Result<ServerHandle, std::io::Error> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();

        let token = self.shutdown.token();
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
            {
                tracing::error!(error = %e, "server error");
            }
        });

        let sweeper = self.sessions.spawn_sweeper(
            Duration::from_secs(self.config.session_sweep_secs.max(1)),
            self.shutdown.token(),
        );

        info!(%addr, settings = ?self.config.settings_path, "beacon server started");
        Ok(ServerHandle {
            addr,
            server,
            sweeper,
        })
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Handle returned by [`BeaconServer::listen`].
pub struct ServerHandle {
    pub addr: SocketAddr,
    server: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Tasks to hand to [`ShutdownCoordinator::graceful_shutdown`].
    pub fn into_tasks(self) -> Vec<JoinHandle<()>> {
        vec![self.server, self.sweeper]
    }
}

/// GET /api/health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::collect(
        state.start_time,
        &state.hub,
        &state.sessions,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use secrecy::SecretString;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const SECRET: &str = "test-secret";

    fn make_server() -> (BeaconServer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            settings_path: dir.path().join("settings.json"),
            api_key: Some(SecretString::from(SECRET)),
            ..ServerConfig::default()
        };
        (BeaconServer::new(config).unwrap(), dir)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 1_000_000).await.unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, json)
    }

    fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("x-session-token", token);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_req(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header("x-session-token", token);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn login(app: &Router) -> String {
        let (status, body) =
            send(app, post_json("/api/auth/login", None, json!({"apiKey": SECRET}))).await;
        assert_eq!(status, StatusCode::OK);
        body["sessionToken"].as_str().unwrap().to_owned()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (server, _dir) = make_server();
        let (status, body) = send(&server.router(), get_req("/api/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["displays"], 0);
    }

    #[tokio::test]
    async fn settings_readable_without_token() {
        let (server, _dir) = make_server();
        let (status, body) = send(&server.router(), get_req("/api/settings", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));
    }

    #[tokio::test]
    async fn writes_require_token() {
        let (server, _dir) = make_server();
        let app = server.router();
        for uri in [
            "/api/settings",
            "/api/settings/theme",
            "/api/emergency/alert",
            "/api/emergency/cancel",
            "/api/dismissal/start",
            "/api/dismissal/end",
            "/api/auth/logout",
        ] {
            let (status, body) = send(&app, post_json(uri, None, json!({"value": 1}))).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
            assert_eq!(body["error"], "unauthorized");
        }
        let (status, _) = send(&app, post_json("/api/settings/x", Some("bogus"), json!({"value": 1}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(&app, get_req("/api/displays", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_write_bodies_are_400_with_json_error() {
        let (server, _dir) = make_server();
        let app = server.router();
        let token = login(&app).await;

        for (uri, body) in [
            ("/api/settings/motd", json!({"val": 1})),
            ("/api/dismissal/update", json!({"called": "Bus 4"})),
            ("/api/emergency/alert", json!({"level": "apocalyptic", "title": "x"})),
            ("/api/settings", json!(["not", "an", "object"])),
        ] {
            let (status, body) = send(&app, post_json(uri, Some(&token), body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["error"], "validation", "{uri}");
            assert!(body["message"].is_string(), "{uri}");
        }

        let syntax = Request::builder()
            .method("POST")
            .uri("/api/settings/motd")
            .header("content-type", "application/json")
            .header("x-session-token", &token)
            .body(Body::from("{\"value\": "))
            .unwrap();
        let (status, body) = send(&app, syntax).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");

        let untyped = Request::builder()
            .method("POST")
            .uri("/api/settings/motd")
            .header("x-session-token", &token)
            .body(Body::from(r#"{"value": 1}"#))
            .unwrap();
        let (status, body) = send(&app, untyped).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");
    }

    #[tokio::test]
    async fn wrong_secret_is_401() {
        let (server, _dir) = make_server();
        let (status, _) = send(
            &server.router(),
            post_json("/api/auth/login", None, json!({"apiKey": "nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn read_after_write() {
        let (server, _dir) = make_server();
        let app = server.router();
        let token = login(&app).await;

        let (status, body) = send(
            &app,
            post_json("/api/settings/motd", Some(&token), json!({"value": "Go team"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true, "clients": 0}));

        let (_, all) = send(&app, get_req("/api/settings", None)).await;
        assert_eq!(all["motd"], "Go team");
        let (_, one) = send(&app, get_req("/api/settings/motd", None)).await;
        assert_eq!(one, "Go team");
    }

    #[tokio::test]
    async fn missing_key_is_404() {
        let (server, _dir) = make_server();
        let (status, body) = send(&server.router(), get_req("/api/settings/nope", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn invalid_section_is_400() {
        let (server, _dir) = make_server();
        let app = server.router();
        let token = login(&app).await;
        let (status, body) = send(
            &app,
            post_json("/api/settings/theme", Some(&token), json!({"value": {"fontScale": 99}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");
    }

    #[tokio::test]
    async fn stream_is_not_a_writable_key() {
        let (server, _dir) = make_server();
        let app = server.router();
        let token = login(&app).await;
        // The stream route owns the path, so no single-key write reaches it.
        let (status, _) = send(
            &app,
            post_json("/api/settings/stream", Some(&token), json!({"value": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, body) = send(
            &app,
            post_json("/api/settings", Some(&token), json!({"stream": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");
        let (_, settings) = send(&app, get_req("/api/settings", None)).await;
        assert!(settings.get("stream").is_none());
    }

    #[tokio::test]
    async fn replace_requires_object() {
        let (server, _dir) = make_server();
        let app = server.router();
        let token = login(&app).await;
        let (status, _) = send(&app, post_json("/api/settings", Some(&token), json!([1]))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            post_json("/api/settings", Some(&token), json!({"only": "this"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, all) = send(&app, get_req("/api/settings", None)).await;
        assert_eq!(all, json!({"only": "this"}));
    }

    #[tokio::test]
    async fn logout_invalidates_token() {
        let (server, _dir) = make_server();
        let app = server.router();
        let token = login(&app).await;

        let (status, body) = send(&app, get_req("/api/auth/validate", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], true);

        let (status, _) = send(&app, post_json("/api/auth/logout", Some(&token), json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, get_req("/api/auth/validate", Some(&token))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn emergency_round_trip() {
        let (server, _dir) = make_server();
        let app = server.router();
        let token = login(&app).await;

        let (_, current) = send(&app, get_req("/api/emergency", None)).await;
        assert!(current.is_null());

        let (status, _) = send(
            &app,
            post_json(
                "/api/emergency/alert",
                Some(&token),
                json!({"level": "warning", "title": "Weather", "message": "Stay inside"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, current) = send(&app, get_req("/api/emergency", None)).await;
        assert_eq!(current["title"], "Weather");
        assert_eq!(current["level"], "warning");

        let (status, _) = send(
            &app,
            post_json("/api/emergency/alert", Some(&token), json!({"title": "  "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let _ = send(&app, post_json("/api/emergency/cancel", Some(&token), json!({}))).await;
        let (_, current) = send(&app, get_req("/api/emergency", None)).await;
        assert!(current.is_null());
    }

    #[tokio::test]
    async fn dismissal_round_trip() {
        let (server, _dir) = make_server();
        let app = server.router();
        let token = login(&app).await;

        let _ = send(&app, post_json("/api/dismissal/start", Some(&token), json!({}))).await;
        let _ = send(
            &app,
            post_json(
                "/api/dismissal/update",
                Some(&token),
                json!({"called": ["Bus 3", " ", "Bus 7"]}),
            ),
        )
        .await;
        let (_, current) = send(&app, get_req("/api/dismissal", None)).await;
        assert_eq!(current["active"], true);
        assert_eq!(current["called"], json!(["Bus 3", "Bus 7"]));

        let _ = send(&app, post_json("/api/dismissal/end", Some(&token), json!({}))).await;
        let (_, current) = send(&app, get_req("/api/dismissal", None)).await;
        assert!(current.is_null());
    }

    #[tokio::test]
    async fn displays_listing_and_disconnect() {
        let (server, _dir) = make_server();
        let app = server.router();
        let token = login(&app).await;

        let attachment = server
            .hub()
            .attach(
                beacon_core::DisplayInfo::new(beacon_core::DisplayId::from_raw("hall")),
                Default::default(),
            )
            .await;
        let (status, body) = send(&app, get_req("/api/displays", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["displays"][0]["displayId"], "hall");

        let req = Request::builder()
            .method("DELETE")
            .uri("/api/displays/hall")
            .header("x-session-token", &token)
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(server.hub().registry().count(), 0);
        drop(attachment);

        let req = Request::builder()
            .method("DELETE")
            .uri("/api/displays/hall")
            .header("x-session-token", &token)
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stream_endpoint_is_event_stream() {
        let (server, _dir) = make_server();
        let app = server.router();
        let resp = app
            .oneshot(get_req("/api/settings/stream?displayId=lobby&tags=gym", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "text/event-stream"
        );
        assert_eq!(server.hub().registry().count(), 1);
        drop(resp);
        assert_eq!(server.hub().registry().count(), 0);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let (server, _dir) = make_server();
        let (status, _) = send(&server.router(), get_req("/nonexistent", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn shutdown_coordinator_accessible() {
        let (server, _dir) = make_server();
        assert!(!server.shutdown().is_shutting_down());
    }
}
