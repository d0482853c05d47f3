pub mod providers;
pub mod sessions;
pub mod subscribe;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router (§6): session lifecycle, the queue lanes,
/// model selection, turn control, provider introspection, and the
/// subscription SSE endpoint. No auth/UI/transport framing beyond this is
/// part of the core per §1 — callers that need bearer-token auth or a
/// dashboard wrap this router rather than the core providing one.
pub fn router() -> Router<AppState> {
    Router::new()
        // Sessions
        .route("/v1/sessions", post(sessions::create_session))
        .route("/v1/sessions", get(sessions::list_sessions))
        .route("/v1/sessions/:id", get(sessions::get_session))
        .route("/v1/sessions/:id/entries", get(sessions::get_entries))
        .route("/v1/sessions/:id/model", post(sessions::set_model))
        .route("/v1/sessions/:id/stop", post(sessions::stop))
        // Queue lanes (§4.4)
        .route("/v1/sessions/:id/queue/:lane", post(sessions::enqueue))
        .route(
            "/v1/sessions/:id/queue/:lane/:item_id",
            delete(sessions::cancel),
        )
        // Live subscription (§4.9, §6)
        .route("/v1/sessions/:id/subscribe", get(subscribe::subscribe))
        // Providers (read-only registry introspection)
        .route("/v1/models", get(providers::list_providers))
}
