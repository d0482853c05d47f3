//! Read-only inspection of the configured LLM provider registry (§6).

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

pub async fn list_providers(State(state): State<AppState>) -> impl IntoResponse {
    let providers = state.providers.list_providers();
    let init_errors: Vec<_> = state
        .providers
        .init_errors()
        .iter()
        .map(|e| serde_json::json!({"provider_id": e.provider_id, "kind": e.kind}))
        .collect();
    Json(serde_json::json!({
        "count": providers.len(),
        "providers": providers,
        "init_errors": init_errors,
    }))
}
