//! Per-session cancellation flags (§5 "Cancellation").
//!
//! A flat set of session ids currently asked to stop. The Agent Loop checks
//! this between turn steps and at tool-dispatch boundaries; the Session
//! Actor clears it at the start of every drain pass so a stale cancel from
//! a prior turn can never bleed into the next one.

use std::collections::HashSet;

use parking_lot::Mutex;

#[derive(Default)]
pub struct CancelFlags {
    cancelled: Mutex<HashSet<String>>,
}

impl CancelFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, session_id: &str) {
        self.cancelled.lock().insert(session_id.to_string());
    }

    pub fn clear(&self, session_id: &str) {
        self.cancelled.lock().remove(session_id);
    }

    pub fn is_cancelled(&self, session_id: &str) -> bool {
        self.cancelled.lock().contains(session_id)
    }
}
