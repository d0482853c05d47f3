//! Session management API (§6): create/list/get sessions, inspect their
//! transcript, enqueue/cancel lane items, change model, and stop a turn.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use sa_domain::entry::{Environment, EnvironmentKind, SessionType};
use sa_store::Lane;

use crate::state::AppState;

fn not_found(session_id: &str) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": format!("session not found: {session_id}")})),
    )
        .into_response()
}

fn parse_lane(s: &str) -> Option<Lane> {
    match s {
        "system_urgent" => Some(Lane::SystemUrgent),
        "steer" => Some(Lane::Steer),
        "follow_up" => Some(Lane::FollowUp),
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    pub id: String,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    pub cwd: String,
    #[serde(default)]
    pub session_type: SessionTypeWire,
    pub environment: EnvironmentBody,
    #[serde(default)]
    pub runner: Option<String>,
    #[serde(default)]
    pub parent_session_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionTypeWire {
    #[default]
    Channel,
    ForkedChannel,
    Coding,
}

impl From<SessionTypeWire> for SessionType {
    fn from(w: SessionTypeWire) -> Self {
        match w {
            SessionTypeWire::Channel => SessionType::Channel,
            SessionTypeWire::ForkedChannel => SessionType::ForkedChannel,
            SessionTypeWire::Coding => SessionType::Coding,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EnvironmentBody {
    pub name: String,
    #[serde(default = "default_env_kind")]
    pub kind: String,
    pub path: String,
    #[serde(default)]
    pub template_path: Option<String>,
    #[serde(default)]
    pub startup_script: Option<String>,
}

fn default_env_kind() -> String {
    "local".into()
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> impl IntoResponse {
    let environment = Environment {
        name: body.environment.name,
        kind: if body.environment.kind == "folder_template" {
            EnvironmentKind::FolderTemplate
        } else {
            EnvironmentKind::Local
        },
        path: body.environment.path,
        template_path: body.environment.template_path,
        startup_script: body.environment.startup_script,
    };

    match state.entry_store.create_session(
        &body.id,
        &body.provider,
        &body.model,
        &body.system_prompt,
        body.reasoning_effort,
        environment,
        &body.cwd,
        body.session_type.into(),
        body.runner,
        body.parent_session_id,
    ) {
        Ok(session) => (StatusCode::CREATED, Json(session)).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ListSessionsParams {
    pub limit: Option<u32>,
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(params): Query<ListSessionsParams>,
) -> impl IntoResponse {
    match state.entry_store.list_sessions(params.limit) {
        Ok(sessions) => Json(serde_json::json!({
            "sessions": sessions,
            "count": sessions.len(),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.entry_store.get_session(&id) {
        Ok(Some(session)) => Json(session).into_response(),
        Ok(None) => not_found(&id),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions/:id/entries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct EntriesParams {
    pub since_cursor: Option<i64>,
}

pub async fn get_entries(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<EntriesParams>,
) -> impl IntoResponse {
    match state.entry_store.get_entries(&id, params.since_cursor, None) {
        Ok(entries) => Json(serde_json::json!({"entries": entries})).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions/:id/queue/:lane — enqueue; body is the raw payload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn enqueue(
    State(state): State<AppState>,
    Path((id, lane)): Path<(String, String)>,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    let Some(lane) = parse_lane(&lane) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": format!("unknown lane: {lane}")})),
        )
            .into_response();
    };
    if state.entry_store.get_session(&id).ok().flatten().is_none() {
        return not_found(&id);
    }

    let item_id = uuid::Uuid::new_v4().to_string();
    match state
        .queue_ledger
        .enqueue(&id, lane, &item_id, payload, chrono::Utc::now())
    {
        Ok(_) => {
            state.hub.publish(
                &id,
                crate::runtime::LiveEvent::Queue {
                    lane: lane_str(lane).to_string(),
                    cursor: String::new(),
                    item_id: item_id.clone(),
                    event: "enqueued".to_string(),
                },
            );
            let handle = state.actors.get_or_spawn(&state, &id);
            tokio::spawn(async move { handle.poke().await });
            (StatusCode::ACCEPTED, Json(serde_json::json!({"item_id": item_id}))).into_response()
        }
        Err(e) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/sessions/:id/queue/:lane/:item_id — cancel a pending item
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn cancel(
    State(state): State<AppState>,
    Path((id, lane, item_id)): Path<(String, String, String)>,
) -> impl IntoResponse {
    let Some(lane) = parse_lane(&lane) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": format!("unknown lane: {lane}")})),
        )
            .into_response();
    };
    match state
        .queue_ledger
        .cancel(&id, lane, &item_id, chrono::Utc::now())
    {
        Ok(_) => {
            state.hub.publish(
                &id,
                crate::runtime::LiveEvent::Queue {
                    lane: lane_str(lane).to_string(),
                    cursor: String::new(),
                    item_id,
                    event: "canceled".to_string(),
                },
            );
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

fn lane_str(lane: Lane) -> &'static str {
    match lane {
        Lane::SystemUrgent => "system_urgent",
        Lane::Steer => "steer",
        Lane::FollowUp => "follow_up",
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions/:id/model — change provider/model selection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SetModelBody {
    pub provider: String,
    pub model: String,
}

pub async fn set_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SetModelBody>,
) -> impl IntoResponse {
    if state.entry_store.get_session(&id).ok().flatten().is_none() {
        return not_found(&id);
    }
    let handle = state.actors.get_or_spawn(&state, &id);
    match handle.set_model(body.provider, body.model).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions/:id/stop — cancel the in-flight turn (§5)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn stop(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let Some(handle) = state.actors.get(&id) else {
        // No live actor means no turn is in flight; nothing to stop.
        return StatusCode::NO_CONTENT.into_response();
    };
    handle.stop_turn().await;
    StatusCode::NO_CONTENT.into_response()
}
