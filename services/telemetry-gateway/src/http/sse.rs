//! Server-sent events stream

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::{future, Stream, StreamExt};
use tracing::{info, warn};

use super::AppState;

/// One `data:` event per broadcast tick. The subscription ends when the
/// client goes away and axum drops the stream.
pub async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.broadcaster.subscribe();
    info!("SSE client connected as subscriber {}", subscription.id());

    let stream = subscription
        .into_stream()
        .filter_map(|event| {
            future::ready(match Event::default().json_data(event.as_ref()) {
                Ok(sse) => Some(Ok(sse)),
                Err(e) => {
                    warn!("Failed to encode telemetry event {}: {}", event.sequence, e);
                    None
                }
            })
        });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
