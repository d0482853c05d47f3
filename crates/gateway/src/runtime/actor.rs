//! Session Actor (§4.2): one task per session owning all writes to that
//! session's transcript and queue lanes, so mutation is serialized without
//! a shared lock.
//!
//! Implemented as a dedicated lightweight task reading a bounded command
//! channel — not a `Mutex<Session>` — so a long-running turn never blocks
//! a concurrent read of the session's current status.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use sa_domain::error::Result;

use crate::runtime::agent_loop;
use crate::state::AppState;

/// The actor's externally observable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorState {
    /// No turn is running; the actor is waiting on its command channel.
    Idle,
    /// A turn is currently executing.
    Running,
    /// The actor has exited and will not process further commands. A new
    /// command addressed to this session creates a fresh actor.
    Stopped,
}

/// Commands a Session Actor accepts on its bounded channel.
pub enum ActorCommand {
    /// Wake the actor to drain pending queue lanes and run a turn if
    /// there's anything to act on. Used after an enqueue.
    Poke,
    /// Stop any turn currently in flight. The actor transitions to idle,
    /// not stopped — a stopped session is only reached by explicit
    /// teardown (session deletion), which this runtime does not expose.
    StopTurn { reply: oneshot::Sender<()> },
    /// Report current status.
    Status { reply: oneshot::Sender<ActorState> },
    /// Change the session's provider/model selection. Deferred until the
    /// actor is idle if a turn is currently running.
    SetModel {
        provider: String,
        model: String,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Bound on the actor's command queue. Pokes are idempotent (the actor
/// always re-checks all lanes), so a small bound is fine — a burst of
/// enqueues collapses into a single drain pass.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// A handle to a running Session Actor task.
///
/// Wraps its channel sender in an `Arc` so cheap clones can be handed to
/// API handlers and the completion router without duplicating the channel;
/// the registry (§4.2) is the one place that holds a clone for the actor's
/// entire lifetime, which is what keeps the task (and its command channel)
/// alive between requests.
#[derive(Clone)]
pub struct ActorHandle {
    inner: Arc<ActorHandleInner>,
}

struct ActorHandleInner {
    session_id: String,
    tx: mpsc::Sender<ActorCommand>,
}

impl ActorHandle {
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub async fn poke(&self) {
        let _ = self.inner.tx.send(ActorCommand::Poke).await;
    }

    pub async fn stop_turn(&self) {
        let (reply, rx) = oneshot::channel();
        if self
            .inner
            .tx
            .send(ActorCommand::StopTurn { reply })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    pub async fn status(&self) -> Option<ActorState> {
        let (reply, rx) = oneshot::channel();
        self.inner.tx.send(ActorCommand::Status { reply }).await.ok()?;
        rx.await.ok()
    }

    pub async fn set_model(&self, provider: String, model: String) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        if self
            .inner
            .tx
            .send(ActorCommand::SetModel {
                provider,
                model,
                reply,
            })
            .await
            .is_err()
        {
            return Err(sa_domain::error::Error::Store(
                "session actor has stopped".into(),
            ));
        }
        rx.await
            .map_err(|_| sa_domain::error::Error::Store("session actor dropped reply".into()))?
    }
}

/// Spawn a new Session Actor task for `session_id` and return its handle.
pub fn spawn(state: AppState, session_id: String) -> ActorHandle {
    let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let inner = Arc::new(ActorHandleInner {
        session_id: session_id.clone(),
        tx,
    });
    let handle = ActorHandle { inner };
    tokio::spawn(run(state, session_id, rx));
    handle
}

/// Internal per-session turn budget: a single `Poke` may resolve into
/// several turns back-to-back (e.g. a steer item queued mid-turn), but
/// we always re-check lanes between turns rather than looping unbounded.
async fn run(state: AppState, session_id: String, mut rx: mpsc::Receiver<ActorCommand>) {
    let mut pending_model: Option<(String, String)> = None;
    let mut running = false;

    while let Some(cmd) = rx.recv().await {
        match cmd {
            ActorCommand::Status { reply } => {
                let state_reply = if running {
                    ActorState::Running
                } else {
                    ActorState::Idle
                };
                let _ = reply.send(state_reply);
            }
            ActorCommand::StopTurn { reply } => {
                state.cancel_flags.cancel(&session_id);
                let _ = reply.send(());
            }
            ActorCommand::SetModel {
                provider,
                model,
                reply,
            } => {
                pending_model = Some((provider.clone(), model.clone()));
                let _ = reply.send(Ok(()));
            }
            ActorCommand::Poke => {
                // Only apply a pending model switch once the session is
                // confirmed idle — applying it mid-turn, while a tool call
                // is still outstanding, would hand the next model call a
                // different model than the one that issued the call it's
                // supposed to be resolving (§4.2).
                if pending_model.is_some() {
                    let idle = match state.entry_store.get_entries(&session_id, None, None) {
                        Ok(entries) => agent_loop::outstanding_tool_calls(&entries).is_empty(),
                        Err(e) => {
                            tracing::warn!(session_id, error = %e, "failed to read entries for pending model check");
                            false
                        }
                    };
                    if idle {
                        if let Some((provider, model)) = pending_model.take() {
                            if let Err(e) = agent_loop::apply_model_selection(&state, &session_id, &provider, &model) {
                                tracing::warn!(session_id, error = %e, "failed to apply pending model selection");
                            }
                        }
                    }
                }
                running = true;
                state.hub.publish(
                    &session_id,
                    crate::runtime::hub::LiveEvent::ActorState {
                        state: "running".into(),
                    },
                );
                drain_and_run(&state, &session_id).await;
                running = false;
                state.hub.publish(
                    &session_id,
                    crate::runtime::hub::LiveEvent::ActorState {
                        state: "idle".into(),
                    },
                );
            }
        }
    }
}

/// Run turns until every lane is empty or a turn hits a hard stop
/// (error, cancellation, or §4.3's tool-loop iteration cap). The tool-loop
/// iteration counter is reset here, once per `Poke`, and threaded through
/// every `run_one_turn` call this drain makes so it only resets again when
/// a fresh turn starts — not when a turn merely continues to resolve tool
/// calls.
async fn drain_and_run(state: &AppState, session_id: &str) {
    let mut iterations: u32 = 0;
    loop {
        state.cancel_flags.clear(session_id);
        match agent_loop::run_one_turn(state, session_id, &mut iterations).await {
            Ok(true) => continue,
            Ok(false) => break,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "turn failed");
                break;
            }
        }
    }
}
