//! Emergency alerts and dismissal status. These bypass the settings store.

use axum::extract::State;
use axum::Json;
use beacon_core::{AlertLevel, DismissalStatus, EmergencyAlert};
use chrono::Utc;
use serde::Deserialize;

use super::{ClientsResponse, JsonBody};
use crate::auth::Authorized;
use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct AlertRequest {
    #[serde(default)]
    pub level: AlertLevel,
    pub title: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StartDismissalRequest {
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDismissalRequest {
    pub called: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// GET /api/emergency
pub async fn current_emergency(State(state): State<AppState>) -> Json<Option<EmergencyAlert>> {
    Json(state.hub.current_emergency())
}

/// POST /api/emergency/alert
pub async fn emergency_alert(
    _auth: Authorized,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<AlertRequest>,
) -> Result<Json<ClientsResponse>, ApiError> {
    let title = body.title.trim();
    if title.is_empty() {
        return Err(ApiError::Validation("alert title must not be empty".into()));
    }
    let alert = EmergencyAlert {
        level: body.level,
        title: title.to_owned(),
        message: body.message,
        issued_at: Utc::now(),
    };
    Ok(Json(ClientsResponse::new(state.hub.emergency_alert(alert))))
}

/// POST /api/emergency/cancel
pub async fn emergency_cancel(
    _auth: Authorized,
    State(state): State<AppState>,
) -> Json<ClientsResponse> {
    Json(ClientsResponse::new(state.hub.emergency_cancel()))
}

/// GET /api/dismissal
pub async fn current_dismissal(State(state): State<AppState>) -> Json<Option<DismissalStatus>> {
    Json(state.hub.current_dismissal())
}

/// POST /api/dismissal/start
pub async fn dismissal_start(
    _auth: Authorized,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<StartDismissalRequest>,
) -> Json<ClientsResponse> {
    Json(ClientsResponse::new(state.hub.dismissal_start(body.message)))
}

/// POST /api/dismissal/update
pub async fn dismissal_update(
    _auth: Authorized,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<UpdateDismissalRequest>,
) -> Json<ClientsResponse> {
    let called = body
        .called
        .into_iter()
        .map(|c| c.trim().to_owned())
        .filter(|c| !c.is_empty())
        .collect();
    Json(ClientsResponse::new(
        state.hub.dismissal_update(called, body.message),
    ))
}

/// POST /api/dismissal/end
pub async fn dismissal_end(_auth: Authorized, State(state): State<AppState>) -> Json<ClientsResponse> {
    Json(ClientsResponse::new(state.hub.dismissal_end()))
}
