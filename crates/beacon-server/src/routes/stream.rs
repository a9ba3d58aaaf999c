//! `GET /api/settings/stream`: the display push channel.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use beacon_core::targeting::parse_tag_list;
use beacon_core::{DisplayId, DisplayInfo};
use futures::Stream;
use pin_project_lite::pin_project;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;

use crate::registry::{ConnectionGuard, Frame};
use crate::server::AppState;

/// Identity a display sends when opening its channel. Everything is
/// optional; a display without an id gets a server-minted one.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamQuery {
    pub display_id: Option<String>,
    pub name: Option<String>,
    pub location: Option<String>,
    pub resolution: Option<String>,
    pub page: Option<String>,
    /// Comma-separated provisioning tags.
    pub tags: Option<String>,
}

impl StreamQuery {
    pub fn display_info(&self) -> DisplayInfo {
        let display_id = self
            .display_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(DisplayId::from_raw)
            .unwrap_or_default();
        let text = |v: &Option<String>| v.as_deref().unwrap_or_default().trim().to_owned();
        DisplayInfo {
            display_id,
            name: text(&self.name),
            location: text(&self.location),
            resolution: text(&self.resolution),
            page: text(&self.page),
        }
    }
}

pin_project! {
    /// SSE event stream for one display. Owns the registry guard, so the
    /// entry goes away whenever axum drops the response body.
    pub struct DisplayStream {
        #[pin]
        frames: ReceiverStream<Frame>,
        _guard: ConnectionGuard,
    }
}

impl Stream for DisplayStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project()
            .frames
            .poll_next(cx)
            .map(|frame| frame.map(|json| Ok(Event::default().data(json.as_str()))))
    }
}

/// GET /api/settings/stream
pub async fn stream_settings(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Sse<KeepAliveStream<DisplayStream>> {
    let info = query.display_info();
    let provisioning = query
        .tags
        .as_deref()
        .map(parse_tag_list)
        .unwrap_or_default();
    let attachment = state.hub.attach(info, provisioning).await;

    let stream = DisplayStream {
        frames: ReceiverStream::new(attachment.receiver),
        _guard: attachment.guard,
    };
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(state.config.keep_alive_secs))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_builds_display_info() {
        let q: StreamQuery = serde_json::from_value(serde_json::json!({
            "displayId": " lobby ",
            "name": "Lobby TV",
            "resolution": "1920x1080",
        }))
        .unwrap();
        let info = q.display_info();
        assert_eq!(info.display_id.as_str(), "lobby");
        assert_eq!(info.name, "Lobby TV");
        assert_eq!(info.location, "");
    }

    #[test]
    fn missing_display_id_is_minted() {
        let info = StreamQuery::default().display_info();
        assert!(info.display_id.as_str().starts_with("disp_"));

        let blank = StreamQuery {
            display_id: Some("   ".into()),
            ..StreamQuery::default()
        };
        assert!(blank.display_info().display_id.as_str().starts_with("disp_"));
    }
}
