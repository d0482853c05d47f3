//! Agent Loop (§4.3): within a running turn, executes one model call and its
//! induced tool fan-out, with stale-tool-call repair and compaction.
//!
//! Driven by the Session Actor (`actor::run`), which calls [`run_one_turn`]
//! in a loop until it returns `Ok(false)` — nothing left to act on, go idle.
//! Each call here is a full round trip (drain queues, one model call, its
//! tool dispatch, repair, maybe compact); the actor's own loop is what
//! implements the "running -> tool calls -> running" cycle of §4.2's state
//! machine.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;

use sa_contextpack::Context;
use sa_domain::config::ProviderKind;
use sa_domain::entry::{
    ContentBlock, Entry, Payload, PersistedMessage, Session, StopReason, ToolCallBlock, Usage,
};
use sa_domain::error::{Error, Result};
use sa_domain::stream::StreamEvent;
use sa_domain::tool::Message;
use sa_providers::traits::{ChatRequest, LlmProvider};
use sa_store::Lane;

use crate::runtime::hub::LiveEvent;
use crate::runtime::retry::{with_retry, AttemptOutcome, RetryJournalEntry};
use crate::runtime::tool_dispatch;
use crate::state::AppState;

/// Anthropic's API has no implicit default; the core forces one so a long
/// reply can't silently truncate on the provider's own default (§4.3 step 2).
const ANTHROPIC_FORCED_MAX_TOKENS: u32 = 8192;

/// Hard cap on tool-call loop iterations within a single turn (§4.3's tool-loop iteration cap).
/// A model that always emits another tool call would otherwise keep
/// `run_one_turn` returning `Ok(true)` forever; once `iterations` (tracked by
/// the caller across calls, incremented only while the loop is continuing
/// the same turn) exceeds this, the turn ends in an error rather than
/// spinning.
const MAX_TOOL_LOOP_ITERATIONS: u32 = 25;

/// Apply a model-selection change for `session_id` (§4.2's
/// `apply_model_selection`). The actor only calls this once it has confirmed
/// the session is idle with no outstanding tool calls, so it is always safe
/// to apply directly as a `session_settings` entry.
pub fn apply_model_selection(
    state: &AppState,
    session_id: &str,
    provider: &str,
    model: &str,
) -> Result<()> {
    let entry = state.entry_store.append_entry(
        session_id,
        Payload::SessionSettings {
            provider: provider.to_string(),
            model: model.to_string(),
            reasoning_effort: None,
        },
    )?;
    state.hub.publish(session_id, LiveEvent::Entry(entry));
    Ok(())
}

/// Run one step of the agent loop for `session_id`.
///
/// Returns `Ok(true)` if the caller should immediately call this again
/// (the assistant just emitted tool calls that were dispatched, or a lane
/// still has pending items); `Ok(false)` once the session has nothing left
/// to act on and should go idle.
///
/// `iterations` is the caller's per-turn tool-loop counter (§4.3's tool-loop iteration cap):
/// it increments once per call that continues the same turn via dispatched
/// tool calls, and resets once a call starts a genuinely new turn (draining
/// fresh lane material) or the turn ends. The caller (the Session Actor's
/// `drain_and_run`) owns the variable and must reset it to zero at the
/// start of each fresh `Poke`.
pub async fn run_one_turn(state: &AppState, session_id: &str, iterations: &mut u32) -> Result<bool> {
    let session = state
        .entry_store
        .get_session(session_id)?
        .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

    if *iterations >= MAX_TOOL_LOOP_ITERATIONS {
        tracing::warn!(
            session_id,
            iterations = *iterations,
            "tool-call loop exceeded its iteration cap; ending turn"
        );
        let entries = state.entry_store.get_entries(session_id, None, None)?;
        let outstanding = outstanding_tool_calls(&entries);
        let entry = state.entry_store.append_entry(
            session_id,
            Payload::Message(PersistedMessage::Assistant {
                provider: session.provider.clone(),
                model: session.model.clone(),
                content: vec![],
                usage: None,
                stop_reason: StopReason::Error,
                error: Some(format!(
                    "tool-call loop exceeded {MAX_TOOL_LOOP_ITERATIONS} iterations"
                )),
                timestamp: Utc::now(),
            }),
        )?;
        state.hub.publish(session_id, LiveEvent::Entry(entry));
        repair_tool_calls(state, session_id, &outstanding, "tool_loop_cap_exceeded")?;
        *iterations = 0;
        return Ok(false);
    }

    // Interrupt checkpoint (§4.2): system-urgent drains ahead of everything
    // else, every time this is called.
    let drained_system = drain_lane(state, &session, Lane::SystemUrgent)?;
    let drained_steer = drain_lane(state, &session, Lane::Steer)?;

    let entries = state.entry_store.get_entries(session_id, None, None)?;
    let outstanding = outstanding_tool_calls(&entries);
    let resuming_mid_turn = !outstanding.is_empty();

    // Follow-up only starts a *new* turn; it must not interrupt a turn
    // still waiting on tool-call resolution (§4.2 ordering and fairness).
    let drained_follow_up = if resuming_mid_turn {
        false
    } else {
        drain_lane(state, &session, Lane::FollowUp)?
    };

    if state.cancel_flags.is_cancelled(session_id) {
        repair_tool_calls(state, session_id, &outstanding, "stopped")?;
        return Ok(false);
    }

    if !drained_system && !drained_steer && !drained_follow_up && !resuming_mid_turn {
        return Ok(false);
    }

    let entries = state.entry_store.get_entries(session_id, None, None)?;
    let ctx = sa_contextpack::build_context(&entries)?;

    let Some(provider) = state.providers.get(&session.provider) else {
        tracing::warn!(
            session_id,
            provider = %session.provider,
            "no provider registered; turn cannot proceed"
        );
        return Ok(false);
    };

    let req = compose_request(state, &session, &entries, &ctx);

    let (result, journal) = call_model(state, session_id, provider, req).await;
    for entry in journal {
        let custom_entry = state.entry_store.append_entry(
            session_id,
            Payload::Custom {
                custom_type: entry.custom_type.into(),
                data: entry.data,
            },
        )?;
        state.hub.publish(session_id, LiveEvent::Entry(custom_entry));
    }

    let assistant = match result {
        Ok(acc) => finish_message(&session, acc),
        Err(e) => {
            tracing::warn!(session_id, error = %e, "model call failed after retries");
            let entry = state.entry_store.append_entry(
                session_id,
                Payload::Message(PersistedMessage::Assistant {
                    provider: session.provider.clone(),
                    model: session.model.clone(),
                    content: vec![],
                    usage: None,
                    stop_reason: StopReason::Error,
                    error: Some(e.to_string()),
                    timestamp: Utc::now(),
                }),
            )?;
            state.hub.publish(session_id, LiveEvent::Entry(entry));
            return Ok(false);
        }
    };

    let tool_calls: Vec<ToolCallBlock> = assistant.tool_calls().into_iter().cloned().collect();

    let assistant_entry = state
        .entry_store
        .append_entry(session_id, Payload::Message(assistant))?;
    state.hub.publish(session_id, LiveEvent::Entry(assistant_entry));

    for call in &tool_calls {
        if state.cancel_flags.is_cancelled(session_id) {
            repair_tool_calls(state, session_id, std::slice::from_ref(call), "stopped")?;
            return Ok(false);
        }
        let outcome =
            tool_dispatch::dispatch(&state.tool_registry, session_id, session.session_type, call)
                .await;
        let result_entry = state.entry_store.append_entry(
            session_id,
            Payload::Message(PersistedMessage::ToolResult {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                content: outcome.content,
                details: outcome.details,
                is_error: outcome.is_error,
                timestamp: Utc::now(),
            }),
        )?;
        state.hub.publish(session_id, LiveEvent::Entry(result_entry));
    }

    // Step 5: end-of-turn stale tool call detection. Catches anything left
    // dangling by a restart between dispatch and here, or a call this
    // turn's dispatch loop never reached because of cancellation above.
    let entries = state.entry_store.get_entries(session_id, None, None)?;
    let stale = outstanding_tool_calls(&entries);
    repair_tool_calls(state, session_id, &stale, "lost")?;

    if let Err(e) = crate::runtime::compaction::maybe_compact(state, session_id).await {
        tracing::warn!(session_id, error = %e, "compaction failed");
    }

    let continues_same_turn = !tool_calls.is_empty();
    if continues_same_turn {
        *iterations += 1;
    } else {
        *iterations = 0;
    }

    Ok(continues_same_turn || has_pending(state, session_id)?)
}

/// Materialize every pending item on `lane` as a persisted `user` entry, in
/// enqueue order. Returns whether anything was materialized.
fn drain_lane(state: &AppState, session: &Session, lane: Lane) -> Result<bool> {
    let snapshot = state.queue_ledger.snapshot(&session.id, lane)?;
    if snapshot.pending.is_empty() {
        return Ok(false);
    }
    for (item_id, payload) in snapshot.pending {
        let text = payload
            .get("text")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| payload.to_string());
        let entry = state.entry_store.append_entry(
            &session.id,
            Payload::Message(PersistedMessage::User {
                user: None,
                content: vec![ContentBlock::text(text)],
                timestamp: Utc::now(),
            }),
        )?;
        state
            .hub
            .publish(&session.id, LiveEvent::Entry(entry.clone()));
        state
            .queue_ledger
            .materialize(&session.id, lane, &item_id, entry.id, Utc::now())?;
        state.hub.publish(
            &session.id,
            LiveEvent::Queue {
                lane: lane_str(lane).to_string(),
                cursor: String::new(),
                item_id,
                event: "materialized".to_string(),
            },
        );
    }
    Ok(true)
}

fn lane_str(lane: Lane) -> &'static str {
    match lane {
        Lane::SystemUrgent => "system_urgent",
        Lane::Steer => "steer",
        Lane::FollowUp => "follow_up",
    }
}

fn has_pending(state: &AppState, session_id: &str) -> Result<bool> {
    for lane in [Lane::SystemUrgent, Lane::Steer, Lane::FollowUp] {
        if !state
            .queue_ledger
            .snapshot(session_id, lane)?
            .pending
            .is_empty()
        {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Tool calls issued by an assistant message anywhere in `entries` that have
/// no later `tool_result` entry answering them, in issue order.
///
/// Exposed to the Session Actor so it can gate a pending model-selection
/// change on the same idle check this module uses internally (§4.2).
pub(crate) fn outstanding_tool_calls(entries: &[Entry]) -> Vec<ToolCallBlock> {
    let mut pending: Vec<ToolCallBlock> = Vec::new();
    for entry in entries {
        match &entry.payload {
            Payload::Message(PersistedMessage::Assistant { content, .. }) => {
                for block in content {
                    if let ContentBlock::ToolCall(tc) = block {
                        pending.push(tc.clone());
                    }
                }
            }
            Payload::Message(PersistedMessage::ToolResult { tool_call_id, .. }) => {
                pending.retain(|tc| &tc.id != tool_call_id);
            }
            _ => {}
        }
    }
    pending
}

/// Persist a synthetic error `tool_result` for each call in `calls`,
/// carrying `{wuhu_repair: "stale_tool_call", reason}` (§4.3 step 5, §5
/// cancellation repair).
fn repair_tool_calls(
    state: &AppState,
    session_id: &str,
    calls: &[ToolCallBlock],
    reason: &str,
) -> Result<()> {
    for call in calls {
        let entry = state.entry_store.append_entry(
            session_id,
            Payload::Message(PersistedMessage::ToolResult {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                content: vec![ContentBlock::text(sa_contextpack::LOST_TOOL_RESULT_TEXT)],
                details: serde_json::json!({"wuhu_repair": "stale_tool_call", "reason": reason}),
                is_error: true,
                timestamp: Utc::now(),
            }),
        )?;
        state.hub.publish(session_id, LiveEvent::Entry(entry));
    }
    Ok(())
}

/// Build the provider-facing request: system prompt + context messages,
/// the session's tool set, and the provider-specific defaults of §4.3 step 2.
fn compose_request(state: &AppState, session: &Session, entries: &[Entry], ctx: &Context) -> ChatRequest {
    let mut messages = Vec::with_capacity(ctx.messages.len() + 1);
    messages.push(Message::system(ctx.system_prompt.clone()));
    messages.extend(ctx.messages.iter().cloned());

    let tools = state
        .tool_registry
        .definitions_for(session.session_type)
        .to_vec();

    let explicit_reasoning_effort = entries.iter().rev().find_map(|e| match &e.payload {
        Payload::SessionSettings {
            reasoning_effort: Some(r),
            ..
        } => Some(r.clone()),
        Payload::Header { metadata, .. } => metadata.default_reasoning_effort.clone(),
        _ => None,
    });
    let reasoning_effort = explicit_reasoning_effort.or_else(|| {
        ProviderKind::is_reasoning_effort_default_provider(&session.provider)
            .then(|| "low".to_string())
    });

    let is_anthropic = state
        .config
        .llm
        .providers
        .iter()
        .find(|p| p.id == session.provider)
        .map(|p| matches!(p.kind, ProviderKind::Anthropic))
        .unwrap_or(false);

    ChatRequest {
        messages,
        tools,
        temperature: None,
        max_tokens: is_anthropic.then_some(ANTHROPIC_FORCED_MAX_TOKENS),
        json_mode: false,
        model: Some(session.model.clone()),
        reasoning_effort,
        enable_prompt_caching: is_anthropic,
    }
}

/// Accumulated state of an in-flight assistant turn, built up from stream
/// events before being folded into a `PersistedMessage::Assistant`.
struct Accumulated {
    text: String,
    tool_calls: Vec<ToolCallBlock>,
    usage: Option<Usage>,
    stop_reason: StopReason,
}

/// Run the model call through the Retry Wrapper (§4.7) and accumulate its
/// stream into an [`Accumulated`] result.
async fn call_model(
    state: &AppState,
    session_id: &str,
    provider: Arc<dyn LlmProvider>,
    req: ChatRequest,
) -> (Result<Accumulated>, Vec<RetryJournalEntry>) {
    let result = with_retry(&state.config.retry, "llm_call", |_attempt| {
        let provider = provider.clone();
        let req = req.clone();
        async move {
            match provider.chat_stream(req).await {
                Ok(stream) => accumulate_stream(state, session_id, stream).await,
                Err(e) => AttemptOutcome::RetryableErr(e),
            }
        }
    })
    .await;
    (result.value, result.journal)
}

/// Drain a model stream, publishing text deltas to the Live Event Hub as it
/// goes. A failure before any event has been yielded is retryable; a
/// failure mid-stream is not (§4.7 — streams are not restartable mid-turn).
async fn accumulate_stream(
    state: &AppState,
    session_id: &str,
    mut stream: sa_domain::stream::BoxStream<'static, Result<StreamEvent>>,
) -> AttemptOutcome<Accumulated> {
    let mut text = String::new();
    let mut tool_calls: Vec<ToolCallBlock> = Vec::new();
    let mut in_flight_calls: HashMap<String, (String, String)> = HashMap::new();
    let mut usage = None;
    let mut stop_reason = StopReason::EndTurn;
    let mut any_event_yielded = false;

    while let Some(event) = stream.next().await {
        match event {
            Ok(StreamEvent::Token { text: delta }) => {
                any_event_yielded = true;
                text.push_str(&delta);
                state
                    .hub
                    .publish(session_id, LiveEvent::StreamDelta { text: delta });
            }
            Ok(StreamEvent::ToolCallStarted { call_id, tool_name }) => {
                any_event_yielded = true;
                in_flight_calls.insert(call_id, (tool_name, String::new()));
            }
            Ok(StreamEvent::ToolCallDelta { call_id, delta }) => {
                any_event_yielded = true;
                if let Some((_, args)) = in_flight_calls.get_mut(&call_id) {
                    args.push_str(&delta);
                }
            }
            Ok(StreamEvent::ToolCallFinished {
                call_id,
                tool_name,
                arguments,
            }) => {
                any_event_yielded = true;
                in_flight_calls.remove(&call_id);
                tool_calls.push(ToolCallBlock {
                    id: call_id,
                    name: tool_name,
                    arguments,
                });
            }
            Ok(StreamEvent::Done {
                usage: stream_usage,
                finish_reason,
            }) => {
                any_event_yielded = true;
                usage = stream_usage;
                stop_reason = match finish_reason.as_deref() {
                    Some("length") => StopReason::MaxTokens,
                    _ if !tool_calls.is_empty() || !in_flight_calls.is_empty() => {
                        StopReason::ToolUse
                    }
                    _ => StopReason::EndTurn,
                };
                break;
            }
            Ok(StreamEvent::Error { message }) => {
                let err = Error::ModelStream(message);
                return if any_event_yielded {
                    AttemptOutcome::NonRetryableErr(err)
                } else {
                    AttemptOutcome::RetryableErr(err)
                };
            }
            Err(e) => {
                return if any_event_yielded {
                    AttemptOutcome::NonRetryableErr(e)
                } else {
                    AttemptOutcome::RetryableErr(e)
                };
            }
        }
    }

    // A provider that ends its stream without a `tool_call_finished` for an
    // in-flight call still owes us a best-effort entry rather than silent
    // loss; its arguments parse as `{}` if the accumulated JSON is partial.
    for (id, (name, args)) in in_flight_calls {
        let arguments = serde_json::from_str(&args).unwrap_or_else(|_| serde_json::json!({}));
        tool_calls.push(ToolCallBlock {
            id,
            name,
            arguments,
        });
    }
    if !tool_calls.is_empty() && stop_reason == StopReason::EndTurn {
        stop_reason = StopReason::ToolUse;
    }

    AttemptOutcome::Ok(Accumulated {
        text,
        tool_calls,
        usage: usage.map(convert_usage),
        stop_reason,
    })
}

fn convert_usage(u: sa_domain::stream::Usage) -> Usage {
    Usage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
        cache_read_tokens: None,
        cache_write_tokens: None,
    }
}

fn finish_message(session: &Session, acc: Accumulated) -> PersistedMessage {
    let mut content = Vec::new();
    if !acc.text.is_empty() {
        content.push(ContentBlock::text(acc.text));
    }
    for tc in acc.tool_calls {
        content.push(ContentBlock::ToolCall(tc));
    }
    PersistedMessage::Assistant {
        provider: session.provider.clone(),
        model: session.model.clone(),
        content,
        usage: acc.usage,
        stop_reason: acc.stop_reason,
        error: None,
        timestamp: Utc::now(),
    }
}
