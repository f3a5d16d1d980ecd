use axum::response::sse::{Event, KeepAlive, Sse};
use pkg_state::{StoreError, WatchEvent};
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

use crate::error::ApiError;

/// Render one watch event as an SSE frame carrying `{type, object}`.
fn frame<T: Serialize>(event: &WatchEvent<T>) -> Event {
    Event::default()
        .json_data(event)
        .unwrap_or_else(|e| error_frame(ApiError::BadGateway(e.to_string())))
}

/// A terminal `{type: "ERROR", object: Status}` frame.
fn error_frame(err: ApiError) -> Event {
    let body = json!({"type": "ERROR", "object": err.to_status()});
    Event::default().data(body.to_string())
}

/// SSE body for a store watch. A store error ends the stream with an
/// `ERROR` frame; the client resumes from its last seen resourceVersion.
pub fn store_events<T, S>(stream: S) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    T: Serialize,
    S: Stream<Item = Result<WatchEvent<T>, StoreError>> + Send + 'static,
{
    let events = stream.map(|item| {
        Ok(match item {
            Ok(event) => frame(&event),
            Err(e) => {
                debug!("Watch stream ended: {}", e);
                error_frame(ApiError::Store(e))
            }
        })
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

/// SSE body for a stream that cannot fail, such as the project watch.
pub fn events<T, S>(stream: S) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    T: Serialize,
    S: Stream<Item = WatchEvent<T>> + Send + 'static,
{
    Sse::new(stream.map(|event| Ok(frame(&event)))).keep_alive(KeepAlive::default())
}
