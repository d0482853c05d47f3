//! Compaction Engine (§4.6): token-budget-driven decisions about when and
//! where to cut a session's message history.

use sa_domain::config::CompactionConfig;
use sa_domain::tool::{ContentPart, Message, MessageContent, Role};

/// Approximate token estimate for one message: char-count / 4, rounded up.
/// Matches §4.6's estimator exactly — no provider tokenizer is consulted.
pub fn estimate_message_tokens(msg: &Message) -> u32 {
    let chars = message_char_count(msg);
    ((chars + 3) / 4) as u32
}

fn message_char_count(msg: &Message) -> usize {
    match &msg.content {
        MessageContent::Text(t) => t.chars().count(),
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => text.chars().count(),
                ContentPart::ToolUse { name, input, .. } => {
                    name.chars().count() + input.to_string().chars().count()
                }
                ContentPart::ToolResult { content, .. } => content.chars().count(),
                ContentPart::Image { url, .. } => url.chars().count(),
            })
            .sum(),
    }
}

/// Where to cut a message history during compaction, and where the
/// surviving turn actually starts if the cut fell mid-turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutPoint {
    /// Index of the first message kept verbatim.
    pub cut_index: usize,
    /// Index of the nearest `user` message at or before `cut_index`; equal
    /// to `cut_index` when the cut already lands on a user message.
    pub turn_start_index: usize,
}

/// Outcome of evaluating a session's history against the context budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionDecision {
    /// Total estimated tokens fit within the budget; nothing to do.
    NotNeeded,
    /// Compaction is required and a valid cut point was found.
    Cut(CutPoint),
    /// Compaction is required but no valid cut point exists (e.g. the
    /// entire history is a single uncuttable turn); admit uncompacted.
    NoValidCutPoint,
}

/// Total estimated tokens plus reserve exceed the effective context window.
pub fn should_compact(total_tokens: u32, context_window: u32, reserve_tokens: u32) -> bool {
    total_tokens.saturating_add(reserve_tokens) > context_window
}

/// Evaluate whether `messages` needs compacting against `context_window`,
/// and if so, where to cut.
pub fn decide_compaction(
    messages: &[Message],
    context_window: u32,
    cfg: &CompactionConfig,
) -> CompactionDecision {
    let total: u32 = messages.iter().map(estimate_message_tokens).sum();
    if !should_compact(total, context_window, cfg.reserve_tokens) {
        return CompactionDecision::NotNeeded;
    }
    match select_cut_point(messages, cfg.keep_recent_tokens) {
        Some(cut) => CompactionDecision::Cut(cut),
        None => CompactionDecision::NoValidCutPoint,
    }
}

/// A message is a valid cut point: compaction never cuts in front of a
/// bare `tool_result`, which would leave it without its originating
/// `tool_use` in the kept slice.
fn is_valid_cut_point(msg: &Message) -> bool {
    msg.role != Role::Tool
}

/// Select the cut index per §4.6: accumulate token estimates from the tail
/// backwards until the running total reaches `keep_recent_tokens`, then
/// take the earliest valid cut point at or after that accumulation point.
pub fn select_cut_point(messages: &[Message], keep_recent_tokens: u32) -> Option<CutPoint> {
    if messages.is_empty() {
        return None;
    }

    let mut acc: u64 = 0;
    let mut acc_index = 0;
    for (i, msg) in messages.iter().enumerate().rev() {
        acc += estimate_message_tokens(msg) as u64;
        acc_index = i;
        if acc >= keep_recent_tokens as u64 {
            break;
        }
    }

    let cut_index = (acc_index..messages.len()).find(|&i| is_valid_cut_point(&messages[i]))?;

    let turn_start_index = if messages[cut_index].role == Role::User {
        cut_index
    } else {
        (0..=cut_index)
            .rev()
            .find(|&i| messages[i].role == Role::User)
            .unwrap_or(0)
    };

    Some(CutPoint {
        cut_index,
        turn_start_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(text: &str) -> Message {
        Message::user(text)
    }
    fn assistant(text: &str) -> Message {
        Message::assistant(text)
    }
    fn tool_result(text: &str) -> Message {
        Message::tool_result("call-1", text)
    }

    #[test]
    fn estimate_rounds_up_char_count_over_four() {
        let msg = user("abcdefg"); // 7 chars -> ceil(7/4) = 2
        assert_eq!(estimate_message_tokens(&msg), 2);
    }

    #[test]
    fn should_compact_accounts_for_reserve() {
        assert!(should_compact(90_000, 100_000, 16_384));
        assert!(!should_compact(50_000, 100_000, 16_384));
    }

    #[test]
    fn decide_compaction_not_needed_under_budget() {
        let cfg = CompactionConfig::default();
        let messages = vec![user("hi"), assistant("hello")];
        assert_eq!(
            decide_compaction(&messages, 200_000, &cfg),
            CompactionDecision::NotNeeded
        );
    }

    #[test]
    fn select_cut_point_skips_tool_result_and_finds_turn_start() {
        let long = "x".repeat(400); // ~100 tokens each
        let messages = vec![
            user(&long),          // 0
            assistant(&long),     // 1
            tool_result(&long),   // 2 (not a valid cut point)
            user(&long),          // 3
            assistant(&long),     // 4
        ];
        // keep_recent_tokens small enough that accumulation stops at index 4,
        // but since index 4 (assistant) isn't a tool_result it's directly valid.
        let cut = select_cut_point(&messages, 50).unwrap();
        assert_eq!(cut.cut_index, 4);
        assert_eq!(cut.turn_start_index, 3);
    }

    #[test]
    fn select_cut_point_advances_past_tool_result_when_accumulation_lands_there() {
        let long = "x".repeat(400);
        let messages = vec![
            user(&long),        // 0
            assistant(&long),   // 1
            tool_result(&long), // 2
            assistant(&long),   // 3
        ];
        // Require accumulating all the way back to index 2 (tool_result);
        // the nearest valid cut at/after it is index 3.
        let cut = select_cut_point(&messages, 150).unwrap();
        assert_eq!(cut.cut_index, 3);
        assert_eq!(cut.turn_start_index, 0);
    }

    #[test]
    fn select_cut_point_none_on_empty_history() {
        assert!(select_cut_point(&[], 100).is_none());
    }

    #[test]
    fn select_cut_point_none_when_every_candidate_is_a_tool_result() {
        let messages = vec![tool_result("a"), tool_result("b")];
        assert!(select_cut_point(&messages, 1).is_none());
    }
}
