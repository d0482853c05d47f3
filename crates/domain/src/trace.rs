//! Structured trace events for the cross-cutting logging points named in
//! §10.1/§10.5: turn lifecycle, retries, compaction, actor transitions, and
//! Live Event Hub backpressure. These are logged via `tracing`, not
//! persisted; they supplement (never replace) the entry chain.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    TurnStarted {
        session_id: String,
        run_id: String,
    },
    TurnCompleted {
        session_id: String,
        run_id: String,
        tool_calls: usize,
    },
    LlmCall {
        provider: String,
        purpose: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    RetryAttempt {
        provider: String,
        attempt: u32,
        backoff_ms: u64,
        reason: String,
    },
    RetryGiveUp {
        provider: String,
        attempts: u32,
    },
    ToolDispatched {
        session_id: String,
        tool_call_id: String,
        tool_name: String,
    },
    ToolCompleted {
        session_id: String,
        tool_call_id: String,
        is_error: bool,
        duration_ms: u64,
    },
    StaleToolCallRepaired {
        session_id: String,
        tool_call_id: String,
    },
    CompactionRun {
        session_id: String,
        tokens_before: u32,
        first_kept_entry_id: i64,
    },
    ActorTransition {
        session_id: String,
        from: String,
        to: String,
        lane: Option<String>,
    },
    SessionCorruptDetected {
        session_id: String,
        detail: String,
    },
    SubscriberBufferOverflow {
        session_id: String,
        subscriber_count: usize,
    },
}

impl TraceEvent {
    /// Logs at the level prescribed by §10.1/§10.5: `warn!` for retries,
    /// give-ups, repairs, corruption, and overflow; `info!` for turn and
    /// compaction milestones; `debug!` for actor transitions and per-call
    /// LLM/tool bookkeeping.
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        match self {
            TraceEvent::RetryAttempt { .. }
            | TraceEvent::RetryGiveUp { .. }
            | TraceEvent::StaleToolCallRepaired { .. }
            | TraceEvent::SessionCorruptDetected { .. }
            | TraceEvent::SubscriberBufferOverflow { .. } => {
                tracing::warn!(trace_event = %json, "wuhu_event")
            }
            TraceEvent::TurnCompleted { .. } | TraceEvent::CompactionRun { .. } => {
                tracing::info!(trace_event = %json, "wuhu_event")
            }
            _ => tracing::debug!(trace_event = %json, "wuhu_event"),
        }
    }
}
