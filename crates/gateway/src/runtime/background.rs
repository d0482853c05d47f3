//! Async Background Tool Registry (§4.10): tracks which chat session owns
//! each background command started via `async_bash`, and routes process
//! completions back into that session as a steer-lane message.
//!
//! Built directly on [`sa_tools::manager::ProcessManager`] rather than a
//! separate process-launching layer — the manager already is the
//! "separately-owned registry" the spec describes; this module only adds
//! the owner map and the completion router the core must integrate with.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use sa_contextpack::truncate_tail;
use sa_tools::manager::{ProcessManager, ProcessStatus};

/// Default limits applied to a completion's captured output, matching the
/// Output Truncation Policy (§4.11) used for ordinary `bash` output.
const MAX_LINES: usize = 2000;
const MAX_BYTES: usize = 50 * 1024;

pub struct BackgroundRegistry {
    manager: Arc<ProcessManager>,
    owners: Mutex<HashMap<String, String>>,
    routed: Mutex<HashSet<String>>,
}

impl BackgroundRegistry {
    pub fn new(manager: Arc<ProcessManager>) -> Self {
        Self {
            manager,
            owners: Mutex::new(HashMap::new()),
            routed: Mutex::new(HashSet::new()),
        }
    }

    /// Record that `process_id` was started on behalf of `session_id`, so a
    /// later completion can be routed back to it.
    pub fn register_owner(&self, process_id: &str, session_id: &str) {
        self.owners
            .lock()
            .insert(process_id.to_string(), session_id.to_string());
    }

    /// Processes that have finished, are owned, and have not yet been
    /// routed. Marks each as routed before returning it.
    fn due_completions(&self) -> Vec<(String, String)> {
        let finished: Vec<String> = self
            .manager
            .list()
            .into_iter()
            .filter(|p| {
                !matches!(p.status, ProcessStatus::Running)
            })
            .map(|p| p.id)
            .collect();

        let mut owners = self.owners.lock();
        let mut routed = self.routed.lock();
        let mut due = Vec::new();
        for id in finished {
            if routed.contains(&id) {
                continue;
            }
            if let Some(session_id) = owners.get(&id).cloned() {
                routed.insert(id.clone());
                owners.remove(&id);
                due.push((id, session_id));
            }
        }
        due
    }

    /// Render the completion payload + steer text for a finished process.
    fn completion_message(&self, process_id: &str) -> Option<serde_json::Value> {
        let session = self.manager.get(process_id)?;
        let s = session.read();
        let duration_ms = s
            .finished_at
            .map(|f| (f - s.started_at).num_milliseconds())
            .unwrap_or(0);
        let truncated = truncate_tail(&s.output.combined, MAX_LINES, MAX_BYTES);
        Some(json!({
            "id": process_id,
            "owner": "async_bash",
            "started_at": s.started_at.to_rfc3339(),
            "ended_at": s.finished_at.map(|t| t.to_rfc3339()),
            "duration_ms": duration_ms,
            "exit_code": s.exit_code,
            "timed_out": matches!(s.status, ProcessStatus::TimedOut),
            "output": truncated.text,
        }))
    }
}

/// Poll interval for the completion router. Short enough that a background
/// command's result reaches the owning session within a turn or two of it
/// finishing, long enough not to busy-loop.
const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(1500);

/// Run the completion router until the process exits. Spawned once at
/// bootstrap alongside the rest of the runtime.
pub async fn run_completion_router(
    background: Arc<BackgroundRegistry>,
    on_completion: impl Fn(String, serde_json::Value) + Send + 'static,
) {
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;
        for (process_id, session_id) in background.due_completions() {
            if let Some(payload) = background.completion_message(&process_id) {
                on_completion(session_id, payload);
            }
        }
    }
}
