//! Compaction orchestration (§4.6): wires the pure cut-point logic in
//! [`sa_contextpack::compaction`] into an actual summarization model call
//! and persists the result as a `Payload::Compaction` entry.

use std::sync::Arc;

use sa_contextpack::{decide_compaction, CompactionDecision, CutPoint};
use sa_domain::entry::Payload;
use sa_domain::error::{Error, Result};
use sa_domain::tool::{Message, Role};
use sa_providers::traits::{ChatRequest, LlmProvider};

use crate::runtime::retry::{with_retry, AttemptOutcome, RetryJournalEntry};
use crate::state::AppState;

const HISTORY_SUMMARY_PREAMBLE: &str = "Write a structured Markdown checkpoint of the \
conversation so far, with sections: Goal, Constraints & Preferences, Progress (Done, In \
Progress, Blocked), Key Decisions, Next Steps, Critical Context. Be concise but preserve \
anything needed to resume the work.";

const HISTORY_SUMMARY_UPDATE_PREAMBLE: &str = "A previous checkpoint already exists below. \
Produce an updated checkpoint with the same sections, preserving everything still relevant \
and moving items between progress buckets as appropriate given the new conversation below.";

const TURN_PREFIX_SUMMARY_PREAMBLE: &str = "Summarize the early part of this in-progress turn, \
with sections: Original Request, Early Progress, Context for Suffix. This summary will be \
concatenated with a checkpoint of everything before the turn and followed by the turn's \
un-summarized remainder.";

const SPLIT_TURN_DELIMITER: &str = "---\n\n**Turn Context (split turn):**\n\n";

/// If the session's current context estimate exceeds the compaction
/// threshold, summarize and persist a `compaction` entry. Retried against
/// fresh decisions up to `cfg.max_attempts` times, since one compaction
/// pass may not bring the estimate back under budget (e.g. an update
/// summary that is itself large).
pub async fn maybe_compact(state: &AppState, session_id: &str) -> Result<bool> {
    let cfg = &state.config.compaction;
    if !cfg.enabled {
        return Ok(false);
    }

    let mut compacted_any = false;
    for _ in 0..cfg.max_attempts {
        let session = state
            .entry_store
            .get_session(session_id)?
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        let entries = state.entry_store.get_entries(session_id, None, None)?;
        let ctx = sa_contextpack::build_context(&entries)?;
        let context_window = cfg.context_window_for(&session.provider);

        let decision = decide_compaction(&ctx.messages, context_window, cfg);
        let cut = match decision {
            CompactionDecision::NotNeeded => break,
            CompactionDecision::NoValidCutPoint => {
                tracing::warn!(session_id, "compaction needed but no valid cut point exists");
                break;
            }
            CompactionDecision::Cut(cut) => cut,
        };

        let Some(provider) = state.providers.get(&session.provider) else {
            tracing::warn!(session_id, provider = %session.provider, "cannot compact: provider unavailable");
            break;
        };

        let prior_summary = entries.iter().rev().find_map(|e| match &e.payload {
            Payload::Compaction { summary, .. } => Some(summary.clone()),
            _ => None,
        });

        let mut journal = Vec::new();
        let summary = summarize(
            &state.config.retry,
            provider,
            &ctx.messages,
            cut,
            prior_summary.as_deref(),
            &mut journal,
        )
        .await?;
        for entry in journal {
            state
                .entry_store
                .append_entry(session_id, Payload::Custom { custom_type: entry.custom_type.into(), data: entry.data })?;
        }

        let first_kept_entry_id = entries
            .get(entry_index_for_message(&entries, cut.cut_index))
            .map(|e| e.id)
            .ok_or_else(|| Error::Store("compaction cut point has no matching entry".into()))?;

        let total_before: u32 = ctx
            .messages
            .iter()
            .map(sa_contextpack::estimate_message_tokens)
            .sum();

        state.entry_store.append_entry(
            session_id,
            Payload::Compaction {
                summary,
                tokens_before: total_before,
                first_kept_entry_id,
            },
        )?;
        compacted_any = true;
    }

    Ok(compacted_any)
}

/// Entries and the extracted message slice are not index-aligned 1:1 since
/// a synthetic `<context-summary>` message may have been prepended; map
/// back by counting from the tail, which is always entry-for-entry once
/// past any prepended summary.
fn entry_index_for_message(entries: &[sa_domain::entry::Entry], cut_index: usize) -> usize {
    let message_only_entries: Vec<usize> = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e.payload, Payload::Message(_)))
        .map(|(i, _)| i)
        .collect();
    message_only_entries
        .get(cut_index.min(message_only_entries.len().saturating_sub(1)))
        .copied()
        .unwrap_or(0)
}

async fn summarize(
    retry_cfg: &sa_domain::config::RetryConfig,
    provider: Arc<dyn LlmProvider>,
    messages: &[Message],
    cut: CutPoint,
    prior_summary: Option<&str>,
    journal: &mut Vec<RetryJournalEntry>,
) -> Result<String> {
    let split_turn = cut.turn_start_index != cut.cut_index;

    let history_slice = &messages[..cut.turn_start_index];
    let history_prompt = render_summary_prompt(
        if prior_summary.is_some() {
            HISTORY_SUMMARY_UPDATE_PREAMBLE
        } else {
            HISTORY_SUMMARY_PREAMBLE
        },
        history_slice,
        prior_summary,
    );

    if !split_turn {
        return run_summary_call(retry_cfg, provider, "compaction", history_prompt, journal).await;
    }

    let turn_slice = &messages[cut.turn_start_index..cut.cut_index];
    let turn_prompt = render_summary_prompt(TURN_PREFIX_SUMMARY_PREAMBLE, turn_slice, None);

    let mut history_journal = Vec::new();
    let mut turn_journal = Vec::new();
    let (history, turn) = tokio::join!(
        run_summary_call(retry_cfg, provider.clone(), "compaction", history_prompt, &mut history_journal),
        run_summary_call(retry_cfg, provider, "compaction", turn_prompt, &mut turn_journal),
    );
    journal.extend(history_journal);
    journal.extend(turn_journal);
    Ok(format!("{}\n\n{SPLIT_TURN_DELIMITER}{}", history?, turn?))
}

fn render_summary_prompt(preamble: &str, slice: &[Message], prior_summary: Option<&str>) -> String {
    let mut out = String::new();
    out.push_str(preamble);
    out.push_str("\n\n");
    if let Some(prior) = prior_summary {
        out.push_str("Previous checkpoint:\n");
        out.push_str(prior);
        out.push_str("\n\n");
    }
    out.push_str("Conversation:\n");
    for msg in slice {
        out.push_str(role_label(msg.role));
        out.push_str(": ");
        out.push_str(&msg.content.extract_all_text());
        out.push('\n');
    }
    out
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

async fn run_summary_call(
    retry_cfg: &sa_domain::config::RetryConfig,
    provider: Arc<dyn LlmProvider>,
    purpose: &str,
    prompt: String,
    journal: &mut Vec<RetryJournalEntry>,
) -> Result<String> {
    let result = with_retry(retry_cfg, purpose, |_attempt| {
        let provider = provider.clone();
        let prompt = prompt.clone();
        async move {
            let req = ChatRequest {
                messages: vec![Message::user(prompt)],
                ..Default::default()
            };
            match provider.chat(req).await {
                Ok(resp) => AttemptOutcome::Ok(resp.content),
                Err(e) => AttemptOutcome::RetryableErr(e),
            }
        }
    })
    .await;
    journal.extend(result.journal);
    result.value
}
