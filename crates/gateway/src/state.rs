//! Shared application state handed to every HTTP handler, Session Actor,
//! and background task.
//!
//! All fields are already `Arc`-wrapped (or cheap to clone, like
//! [`LiveEventHub`]) so `AppState` itself derives `Clone` and is passed by
//! value wherever a task needs its own copy — notably into every spawned
//! [`crate::runtime::actor`] task.

use std::sync::Arc;

use sa_domain::config::Config;
use sa_providers::registry::ProviderRegistry;
use sa_store::{EntryStore, QueueLedger};
use sa_tools::manager::ProcessManager;

use crate::runtime::background::BackgroundRegistry;
use crate::runtime::cancel_flags::CancelFlags;
use crate::runtime::hub::LiveEventHub;
use crate::runtime::registry::ActorRegistry;
use crate::runtime::tool_dispatch::ToolRegistry;

#[derive(Clone)]
pub struct AppState {
    /// Layered configuration (§6, §10.3).
    pub config: Arc<Config>,

    /// The Entry Store (§4.1): sole owner of durable session/entry state.
    pub entry_store: Arc<EntryStore>,
    /// The Queue Ledger (§4.4): the three priority lanes.
    pub queue_ledger: Arc<QueueLedger>,

    /// Registered LLM providers (§4.3 step 2).
    pub providers: Arc<ProviderRegistry>,

    /// Live Event Hub (§4.9): per-session broadcast of transcript/queue
    /// activity. Already cheap to clone (wraps an `Arc` internally).
    pub hub: LiveEventHub,

    /// Per-session cancellation flags checked by the Agent Loop (§5).
    pub cancel_flags: Arc<CancelFlags>,
    /// Lazily-spawned Session Actors, keyed by session id (§4.2).
    pub actors: Arc<ActorRegistry>,

    /// Shell/background process execution (§4.8, §4.10).
    pub processes: Arc<ProcessManager>,
    /// Owner tracking + completion routing for `async_bash` sessions (§4.10).
    pub background: Arc<BackgroundRegistry>,
    /// Built-in tool definitions and dispatch (§4.8).
    pub tool_registry: Arc<ToolRegistry>,
}
