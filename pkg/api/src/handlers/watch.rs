use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use pkg_state::WatchEvent;
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WatchQuery {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub seq: Option<u64>,
}

/// GET /api/v1/watch — SSE endpoint streaming watch events.
///
/// Retained events after `seq` are replayed first, then live events follow.
pub async fn watch_events(
    State(state): State<AppState>,
    Query(query): Query<WatchQuery>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let prefix = query.prefix.unwrap_or_default();
    let from_seq = query.seq.unwrap_or(0);

    info!(
        "Watch subscription: prefix='{}', from_seq={}",
        prefix, from_seq
    );

    // Subscribe before reading the backlog so no event falls in between.
    let rx = state.store.event_log.subscribe();
    let buffered = state.store.event_log.events_since(from_seq, &prefix).await;
    let last_seq = buffered.last().map(|e| e.seq).unwrap_or(from_seq);

    let buffered_stream = tokio_stream::iter(buffered.into_iter().map(to_sse));
    let live_stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(event) if event.seq > last_seq && event.key.starts_with(&prefix) => Some(to_sse(event)),
        _ => None,
    });

    Sse::new(buffered_stream.chain(live_stream)).keep_alive(KeepAlive::default())
}

fn to_sse(event: WatchEvent) -> Result<Event, Infallible> {
    let data = serde_json::to_string(&event).unwrap_or_default();
    Ok(Event::default().id(event.seq.to_string()).data(data))
}
