//! Config loading and [`AppState`] construction, extracted from `main.rs` so
//! both the HTTP server and (future) one-shot CLI entry points can share one
//! boot path.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use sa_domain::config::{Config, ConfigSeverity};
use sa_providers::registry::ProviderRegistry;
use sa_store::{EntryStore, QueueLedger};
use sa_tools::manager::ProcessManager;

use crate::runtime::background::BackgroundRegistry;
use crate::runtime::cancel_flags::CancelFlags;
use crate::runtime::hub::LiveEventHub;
use crate::runtime::registry::ActorRegistry;
use crate::runtime::tool_dispatch::ToolRegistry;
use crate::state::AppState;

/// Environment variable naming a TOML config file. Falls back to
/// `./config.toml`, and to built-in defaults if neither exists.
pub const CONFIG_PATH_ENV: &str = "WUHU_CONFIG";

/// Load layered configuration (§6, §10.3): built-in defaults, overlaid by an
/// optional TOML file, overlaid by environment variables.
pub fn load_config() -> anyhow::Result<Config> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config.toml".to_string());
    let config = if Path::new(&path).exists() {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config file {path}"))?;
        toml::from_str::<Config>(&raw).with_context(|| format!("parsing config file {path}"))?
    } else {
        tracing::info!(path = %path, "no config file found, using defaults");
        Config::default()
    };
    Ok(config.apply_env_overrides())
}

/// Validate `config`, logging every issue, and fail startup on any error
/// (not merely warning) severity issue.
pub fn validate_or_bail(config: &Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }
    Ok(())
}

/// Initialize every subsystem and return a fully-wired [`AppState`]. Does
/// not spawn the background completion router; call
/// [`spawn_background_tasks`] once this returns.
pub async fn build_app_state(config: Config) -> anyhow::Result<AppState> {
    let config = Arc::new(config);

    let db_path = config.state.db_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating state directory {}", parent.display()))?;
    }

    let entry_store = Arc::new(
        EntryStore::open(&db_path, config.state.busy_timeout_ms)
            .context("opening entry store")?,
    );
    let queue_ledger = Arc::new(
        QueueLedger::open(&db_path, config.state.busy_timeout_ms)
            .context("opening queue ledger")?,
    );
    tracing::info!(path = %db_path.display(), "entry store + queue ledger ready");

    let providers = Arc::new(
        ProviderRegistry::from_config(&config.llm).context("initializing LLM providers")?,
    );
    if providers.is_empty() {
        tracing::warn!("no LLM providers initialized — check llm.providers and their auth config");
    } else {
        tracing::info!(providers = providers.len(), "LLM provider registry ready");
    }
    for err in providers.init_errors() {
        tracing::warn!(provider = %err.provider_id, error = %err.error, "provider init failed");
    }

    let processes = Arc::new(ProcessManager::new(config.tools.exec.clone()));
    let background = Arc::new(BackgroundRegistry::new(processes.clone()));
    let tool_registry = Arc::new(ToolRegistry::new(processes.clone(), background.clone()));
    tracing::info!("process manager + tool registry ready");

    Ok(AppState {
        config,
        entry_store,
        queue_ledger,
        providers,
        hub: LiveEventHub::new(),
        cancel_flags: Arc::new(CancelFlags::new()),
        actors: Arc::new(ActorRegistry::new()),
        processes,
        background,
        tool_registry,
    })
}

/// Spawn the runtime's long-running background tasks: the Async Background
/// Tool completion router (§4.10), which routes finished `async_bash`
/// processes back into their owning session's steer lane, and periodic
/// cleanup sweeps.
pub fn spawn_background_tasks(state: &AppState) {
    {
        let background = state.background.clone();
        let queue_ledger = state.queue_ledger.clone();
        let hub = state.hub.clone();
        let actors = state.actors.clone();
        let state_for_router = state.clone();
        tokio::spawn(async move {
            crate::runtime::background::run_completion_router(background, move |session_id, payload| {
                let queue_ledger = queue_ledger.clone();
                let hub = hub.clone();
                let actors = actors.clone();
                let state_for_router = state_for_router.clone();
                let item_id = uuid::Uuid::new_v4().to_string();
                match queue_ledger.enqueue(
                    &session_id,
                    sa_store::Lane::Steer,
                    &item_id,
                    payload,
                    chrono::Utc::now(),
                ) {
                    Ok(_) => {
                        hub.publish(
                            &session_id,
                            crate::runtime::LiveEvent::Queue {
                                lane: "steer".to_string(),
                                cursor: String::new(),
                                item_id,
                                event: "enqueued".to_string(),
                            },
                        );
                        let handle = actors.get_or_spawn(&state_for_router, &session_id);
                        tokio::spawn(async move { handle.poke().await });
                    }
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, error = %e, "failed to enqueue background completion");
                    }
                }
            })
            .await;
        });
    }

    {
        let processes = state.processes.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                processes.cleanup_stale();
            }
        });
    }

    {
        let hub = state.hub.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                hub.gc();
            }
        });
    }

    tracing::info!("background tasks spawned");
}
