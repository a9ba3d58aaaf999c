//! HTTP handlers, grouped by resource.

pub mod auth;
pub mod displays;
pub mod events;
pub mod settings;
pub mod stream;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::Json;
use serde::Serialize;

use crate::error::ApiError;

/// `Json<T>` whose rejection is an [`ApiError::Validation`], so bad bodies
/// get a 400 with the usual `{error, message}` shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// Response to every write that fans out to displays.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ClientsResponse {
    pub success: bool,
    /// Displays whose queue accepted the resulting message.
    pub clients: usize,
}

impl ClientsResponse {
    pub fn new(clients: usize) -> Self {
        Self {
            success: true,
            clients,
        }
    }
}
