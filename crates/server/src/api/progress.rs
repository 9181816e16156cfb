//! Load progress for browser clients, as JSON or as a server-sent event stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use casestats_loader::ProgressState;

use crate::state::AppState;

pub async fn progress(State(state): State<Arc<AppState>>) -> Json<ProgressState> {
    Json(state.loader.progress())
}

/// `event: progress` frames, starting with the current state. The stream ends
/// when the loader shuts down; a client disconnect drops the subscription.
pub async fn progress_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let sub = state.loader.subscribe_progress();
    debug!(subscription = %sub.id(), "progress stream opened");

    let stream = sub.into_stream().filter_map(|progress| {
        match Event::default().event("progress").json_data(progress) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                warn!(error = %e, "failed to serialize progress event");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
