//! Per-process registry of live Session Actors (§4.2, §3 Lifetimes).
//!
//! Lazily spawns an actor the first time a session is touched and then
//! holds a durable strong handle for the rest of the process's life —
//! "Session Actors are created lazily on first command and remain in
//! memory until process shutdown" (§3). Callers (API handlers, the
//! background completion router) only ever see short-lived clones of the
//! handle; the registry's own clone is what keeps the actor's command
//! channel open and the task alive between requests. Without a durable
//! owner here, a caller's clone dropping at the end of a request would
//! close the channel out from under an in-flight turn, and the next
//! request would spawn a second, concurrently-running actor for the same
//! session — exactly the race the single-serialization-point invariant
//! forbids.
//!
//! This registry never garbage-collects entries: an idle actor is cheap
//! (one parked task blocked on an empty channel) and spec §3 explicitly
//! scopes actor teardown to explicit session deletion, which the core
//! does not implement.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::runtime::actor::{self, ActorHandle};
use crate::state::AppState;

#[derive(Default)]
pub struct ActorRegistry {
    actors: Mutex<HashMap<String, ActorHandle>>,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the durable actor handle for `session_id`, spawning one if this
    /// is the first time the session has been touched in this process.
    pub fn get_or_spawn(&self, state: &AppState, session_id: &str) -> ActorHandle {
        let mut actors = self.actors.lock();
        actors
            .entry(session_id.to_string())
            .or_insert_with(|| actor::spawn(state.clone(), session_id.to_string()))
            .clone()
    }

    /// Look up a live actor without spawning one.
    pub fn get(&self, session_id: &str) -> Option<ActorHandle> {
        self.actors.lock().get(session_id).cloned()
    }
}

/// Convenience wrapper bundling the registry with the `Arc<AppState>`-free
/// clone it needs to spawn actors on demand.
pub type SharedActorRegistry = Arc<ActorRegistry>;
