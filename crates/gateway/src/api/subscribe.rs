//! `GET /v1/sessions/:id/subscribe` (§4.9, §6): a single SSE stream combining
//! an initial snapshot frame with live transcript/queue/actor events.
//!
//! Grounded on the teacher's run-events SSE handler
//! (`runtime::runs` + `api::runs::run_events_sse`): subscribe to the hub's
//! broadcast channel first, then emit the snapshot, so no event published
//! between snapshot and subscribe is lost.

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures_util::stream::Stream;
use serde::Deserialize;

use sa_store::Lane;

use crate::runtime::LiveEvent;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SubscribeParams {
    #[serde(default, rename = "transcriptSince")]
    pub transcript_since: Option<i64>,
    #[serde(default, rename = "transcriptPageSize")]
    pub transcript_page_size: Option<usize>,
    #[serde(default, rename = "systemSince")]
    pub system_since: Option<String>,
    #[serde(default, rename = "steerSince")]
    pub steer_since: Option<String>,
    #[serde(default, rename = "followUpSince")]
    pub follow_up_since: Option<String>,
}

pub async fn subscribe(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<SubscribeParams>,
) -> impl IntoResponse {
    // Subscribe before building the snapshot: anything published in between
    // lands as a live `event` frame right after `initial`, never silently lost.
    let rx = state.hub.subscribe(&id);

    let initial = build_initial_frame(&state, &id, &params);

    let stream = make_subscription_stream(initial, rx);
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn build_initial_frame(
    state: &AppState,
    session_id: &str,
    params: &SubscribeParams,
) -> serde_json::Value {
    let session = state.entry_store.get_session(session_id).ok().flatten();

    let entries = state
        .entry_store
        .get_entries(session_id, params.transcript_since, None)
        .unwrap_or_default();
    let page_size = params.transcript_page_size.unwrap_or(200).max(1);
    let transcript: Vec<_> = entries.into_iter().take(page_size).collect();

    let system_urgent = lane_snapshot(state, session_id, Lane::SystemUrgent, params.system_since.as_deref());
    let steer = lane_snapshot(state, session_id, Lane::Steer, params.steer_since.as_deref());
    let follow_up = lane_snapshot(state, session_id, Lane::FollowUp, params.follow_up_since.as_deref());

    let status = state
        .actors
        .get(session_id)
        .map(|_| "running".to_string())
        .unwrap_or_else(|| "idle".to_string());

    serde_json::json!({
        "kind": "initial",
        "session": session,
        "transcript": transcript,
        "system_urgent": system_urgent,
        "steer": steer,
        "follow_up": follow_up,
        "status": status,
    })
}

fn lane_snapshot(
    state: &AppState,
    session_id: &str,
    lane: Lane,
    since: Option<&str>,
) -> serde_json::Value {
    let journal = state
        .queue_ledger
        .journal_since(session_id, lane, since)
        .unwrap_or_default();
    let snapshot = state.queue_ledger.snapshot(session_id, lane).ok();
    serde_json::json!({
        "journal": journal,
        "pending": snapshot.as_ref().map(|s| &s.pending),
        "cursor": snapshot.as_ref().map(|s| &s.cursor),
    })
}

fn make_subscription_stream(
    initial: serde_json::Value,
    mut rx: tokio::sync::broadcast::Receiver<LiveEvent>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        let data = serde_json::to_string(&initial).unwrap_or_default();
        yield Ok(Event::default().event("initial").data(data));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    let frame = serde_json::json!({"kind": "event", "event": event});
                    let data = serde_json::to_string(&frame).unwrap_or_default();
                    yield Ok(Event::default().event("event").data(data));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    let msg = format!("{{\"warning\":\"missed {n} events\"}}");
                    yield Ok(Event::default().event("warning").data(msg));
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
