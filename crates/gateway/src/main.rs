//! `wuhu-gateway`: boots the session runtime's HTTP/SSE-facing binary.
//!
//! Everything below the router (Entry Store, Queue Ledger, Session Actors,
//! Agent Loop, Live Event Hub) is the core described in the spec; this file
//! only wires config loading, tracing, and the axum server together, the
//! way the teacher's own `main.rs` separates "boot the process" from "run
//! a turn".

mod api;
mod bootstrap;
mod runtime;
mod state;

use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = bootstrap::load_config()?;
    bootstrap::validate_or_bail(&config)?;

    let host = config.server.host.clone();
    let port = config.server.port;

    let state = bootstrap::build_app_state(config).await?;
    bootstrap::spawn_background_tasks(&state);

    let cors = build_cors_layer(&state.config.server.cors);
    let app = api::router()
        .with_state(state)
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "wuhu-gateway listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Installs a global `tracing` subscriber from `RUST_LOG` (§10.1). Library
/// crates never do this themselves — only the binary entry point does.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

/// Builds the CORS layer from configured allowed origins, expanding a
/// trailing `:*` into a same-host any-port predicate.
fn build_cors_layer(cors: &sa_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::{header, HeaderValue, Method};
    use tower_http::cors::AllowOrigin;

    if cors.allowed_origins.iter().any(|o| o == "*") {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();
    for origin in &cors.allowed_origins {
        if let Some(prefix) = origin.strip_suffix('*') {
            wildcard_prefixes.push(prefix.to_string());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = AllowOrigin::predicate(move |origin, _| {
        let origin_str = origin.to_str().unwrap_or("");
        exact.iter().any(|e| e.as_bytes() == origin.as_bytes())
            || wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
    });

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
