use axum::extract::{Path, State};
use axum::Json;
use beacon_core::{DisplayId, DisplaySummary};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::auth::Authorized;
use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct DisplayList {
    pub count: usize,
    pub displays: Vec<DisplaySummary>,
}

/// GET /api/displays
pub async fn list_displays(_auth: Authorized, State(state): State<AppState>) -> Json<DisplayList> {
    let displays = state.hub.registry().list();
    Json(DisplayList {
        count: displays.len(),
        displays,
    })
}

/// DELETE /api/displays/{id}: close a display's stream. It will reconnect.
pub async fn disconnect_display(
    _auth: Authorized,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let display_id = DisplayId::from_raw(id);
    if state.hub.registry().disconnect(&display_id) {
        info!(%display_id, "display disconnected by admin");
        Ok(Json(json!({ "success": true })))
    } else {
        Err(ApiError::NotFound(format!("display {display_id} is not connected")))
    }
}
