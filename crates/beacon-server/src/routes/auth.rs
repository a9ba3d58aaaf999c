use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::JsonBody;
use crate::auth::Authorized;
use crate::error::ApiError;
use crate::server::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub api_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub session_token: String,
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let session_token = state.sessions.login(&body.api_key)?;
    Ok(Json(LoginResponse { session_token }))
}

/// POST /api/auth/logout
pub async fn logout(auth: Authorized, State(state): State<AppState>) -> Json<Value> {
    let _ = state.sessions.logout(&auth.token);
    Json(json!({ "success": true }))
}

/// GET /api/auth/validate (the extractor already did the work)
pub async fn validate(_auth: Authorized) -> Json<Value> {
    Json(json!({ "valid": true }))
}
