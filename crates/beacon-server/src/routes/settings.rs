use axum::extract::{Path, State};
use axum::Json;
use beacon_core::SettingsSnapshot;
use serde::Deserialize;
use serde_json::Value;

use super::{ClientsResponse, JsonBody};
use crate::auth::Authorized;
use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct UpdateSettingRequest {
    pub value: Value,
}

/// GET /api/settings
pub async fn get_settings(State(state): State<AppState>) -> Json<SettingsSnapshot> {
    Json((*state.hub.snapshot()).clone())
}

/// GET /api/settings/{key}
pub async fn get_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .hub
        .store()
        .get(&key)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no setting named {key:?}")))
}

/// POST /api/settings: replace the whole snapshot.
pub async fn replace_settings(
    _auth: Authorized,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<Value>,
) -> Result<Json<ClientsResponse>, ApiError> {
    let snapshot = SettingsSnapshot::from_value(body)?;
    let clients = state.hub.set_all(snapshot).await?;
    Ok(Json(ClientsResponse::new(clients)))
}

/// POST /api/settings/{key}
pub async fn update_setting(
    _auth: Authorized,
    State(state): State<AppState>,
    Path(key): Path<String>,
    JsonBody(body): JsonBody<UpdateSettingRequest>,
) -> Result<Json<ClientsResponse>, ApiError> {
    let clients = state.hub.set(&key, body.value).await?;
    Ok(Json(ClientsResponse::new(clients)))
}
