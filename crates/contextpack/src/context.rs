//! Context Extraction (§4.5): turns a session's linearized entries into the
//! message list handed to a model.

use crate::injection::repair_dangling_tool_calls;
use sa_domain::entry::{
    ContentBlock, Entry, Payload, PersistedMessage, custom_types,
};
use sa_domain::error::{Error, Result};
use sa_domain::tool::{ContentPart, Message, MessageContent, Role};

/// Prefix applied to user text once a group-chat "new user joined" reminder
/// has been observed (§4.3, §4.5). Idempotent: never applied twice to the
/// same rendered block.
const GROUP_CHAT_USER_PREFIX: &str = "<user>:\n\n";

/// The extracted context, ready to hand to a [`sa_providers::traits::ChatRequest`].
#[derive(Debug, Clone)]
pub struct Context {
    pub system_prompt: String,
    pub messages: Vec<Message>,
}

/// Build the model-facing [`Context`] from a session's full, linearized
/// entry chain (header first, tail last).
///
/// `entries` must be the complete chain as returned by the Entry Store —
/// the header is located by scanning, not assumed to be `entries[0]`, so
/// that a caller can pass a superset without corrupting extraction.
pub fn build_context(entries: &[Entry]) -> Result<Context> {
    let header_idx = entries
        .iter()
        .position(|e| matches!(e.payload, Payload::Header { .. }))
        .ok_or_else(|| Error::Store("no header entry in session".into()))?;

    let system_prompt = match &entries[header_idx].payload {
        Payload::Header { system_prompt, .. } => system_prompt.clone(),
        _ => unreachable!(),
    };

    // Locate the latest compaction entry, if any, scanning from the tail.
    let latest_compaction = entries.iter().rev().find_map(|e| match &e.payload {
        Payload::Compaction {
            summary,
            first_kept_entry_id,
            ..
        } => Some((summary.clone(), *first_kept_entry_id)),
        _ => None,
    });

    let mut messages = Vec::new();

    let slice_start_idx = match &latest_compaction {
        Some((summary, first_kept_entry_id)) => {
            messages.push(Message::user(format!(
                "<context-summary>\n{summary}\n</context-summary>"
            )));
            entries
                .iter()
                .position(|e| e.id == *first_kept_entry_id)
                .ok_or_else(|| {
                    Error::Store(format!(
                        "compaction first_kept_entry_id {first_kept_entry_id} not found in session"
                    ))
                })?
        }
        None => header_idx + 1,
    };

    // Group-chat reminders seen anywhere up to and including a given entry
    // id flip the prefix rule on for every user message at/after them.
    let reminder_ids: Vec<i64> = entries
        .iter()
        .filter(|e| match &e.payload {
            Payload::Custom { custom_type, .. } => custom_type == custom_types::GROUP_CHAT_REMINDER,
            _ => false,
        })
        .map(|e| e.id)
        .collect();

    for entry in &entries[slice_start_idx..] {
        let Payload::Message(msg) = &entry.payload else {
            continue;
        };
        let group_chat_active = reminder_ids.iter().any(|&rid| rid <= entry.id);
        if let Some(rendered) = render_message(msg, group_chat_active) {
            messages.push(rendered);
        }
    }

    repair_dangling_tool_calls(&mut messages);

    Ok(Context {
        system_prompt,
        messages,
    })
}

fn render_message(msg: &PersistedMessage, group_chat_active: bool) -> Option<Message> {
    match msg {
        PersistedMessage::User { content, .. } => {
            let text = join_text_blocks(content);
            let text = if group_chat_active {
                apply_group_chat_prefix(&text)
            } else {
                text
            };
            Some(Message::user(text))
        }
        PersistedMessage::Assistant { content, .. } => {
            let parts: Vec<ContentPart> = content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text, .. } => Some(ContentPart::Text { text: text.clone() }),
                    ContentBlock::ToolCall(tc) => Some(ContentPart::ToolUse {
                        id: tc.id.clone(),
                        name: tc.name.clone(),
                        input: tc.arguments.clone(),
                    }),
                    // Reasoning blocks are not replayed back to the model.
                    ContentBlock::Reasoning { .. } => None,
                })
                .collect();
            if parts.is_empty() {
                return None;
            }
            Some(Message {
                role: Role::Assistant,
                content: MessageContent::Parts(parts),
            })
        }
        PersistedMessage::ToolResult {
            tool_call_id,
            content,
            is_error,
            ..
        } => {
            let text = join_text_blocks(content);
            Some(Message {
                role: Role::Tool,
                content: MessageContent::Parts(vec![ContentPart::ToolResult {
                    tool_use_id: tool_call_id.clone(),
                    content: text,
                    is_error: *is_error,
                }]),
            })
        }
        PersistedMessage::CustomMessage { content, .. } => {
            let text = join_text_blocks(content);
            if text.is_empty() {
                return None;
            }
            Some(Message::user(text))
        }
        PersistedMessage::Unknown { raw, .. } => {
            best_effort_unknown_render(raw)
        }
    }
}

fn join_text_blocks(content: &[ContentBlock]) -> String {
    content
        .iter()
        .filter_map(ContentBlock::as_text)
        .collect::<Vec<_>>()
        .join("\n")
}

fn apply_group_chat_prefix(text: &str) -> String {
    if text.starts_with(GROUP_CHAT_USER_PREFIX) {
        text.to_string()
    } else {
        format!("{GROUP_CHAT_USER_PREFIX}{text}")
    }
}

/// Best-effort rendering for a forward-compatible `unknown` payload: try a
/// `content`/`text` string field, else stringify the whole JSON value.
fn best_effort_unknown_render(raw: &serde_json::Value) -> Option<Message> {
    let text = raw
        .get("content")
        .and_then(|v| v.as_str())
        .or_else(|| raw.get("text").and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| raw.to_string());
    if text.is_empty() {
        return None;
    }
    Some(Message::user(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::entry::{HeaderMetadata, StopReason};
    use chrono::Utc;

    fn header(id: i64) -> Entry {
        Entry {
            id,
            session_id: "s1".into(),
            parent_entry_id: None,
            created_at: Utc::now(),
            payload: Payload::Header {
                system_prompt: "You are a test agent.".into(),
                metadata: HeaderMetadata::default(),
            },
        }
    }

    fn user_entry(id: i64, parent: i64, text: &str) -> Entry {
        Entry {
            id,
            session_id: "s1".into(),
            parent_entry_id: Some(parent),
            created_at: Utc::now(),
            payload: Payload::Message(PersistedMessage::User {
                user: None,
                content: vec![ContentBlock::text(text)],
                timestamp: Utc::now(),
            }),
        }
    }

    fn assistant_entry(id: i64, parent: i64, text: &str) -> Entry {
        Entry {
            id,
            session_id: "s1".into(),
            parent_entry_id: Some(parent),
            created_at: Utc::now(),
            payload: Payload::Message(PersistedMessage::Assistant {
                provider: "anthropic".into(),
                model: "claude".into(),
                content: vec![ContentBlock::text(text)],
                usage: None,
                stop_reason: StopReason::EndTurn,
                error: None,
                timestamp: Utc::now(),
            }),
        }
    }

    #[test]
    fn basic_extraction_yields_system_and_messages() {
        let entries = vec![header(1), user_entry(2, 1, "ping")];
        let ctx = build_context(&entries).unwrap();
        assert_eq!(ctx.system_prompt, "You are a test agent.");
        assert_eq!(ctx.messages.len(), 1);
        assert_eq!(ctx.messages[0].role, Role::User);
    }

    #[test]
    fn compaction_prepends_context_summary_and_skips_earlier_entries() {
        let mut entries = vec![header(1), user_entry(2, 1, "old"), assistant_entry(3, 2, "reply")];
        entries.push(Entry {
            id: 4,
            session_id: "s1".into(),
            parent_entry_id: Some(3),
            created_at: Utc::now(),
            payload: Payload::Compaction {
                summary: "the recap".into(),
                tokens_before: 500,
                first_kept_entry_id: 5,
            },
        });
        entries.push(user_entry(5, 4, "fresh turn"));

        let ctx = build_context(&entries).unwrap();
        assert_eq!(ctx.messages.len(), 2);
        match &ctx.messages[0].content {
            MessageContent::Text(t) => assert!(t.contains("<context-summary>") && t.contains("the recap")),
            _ => panic!("expected text"),
        }
        match &ctx.messages[1].content {
            MessageContent::Text(t) => assert_eq!(t, "fresh turn"),
            _ => panic!("expected text"),
        }
    }

    #[test]
    fn group_chat_prefix_applies_after_reminder_and_is_idempotent() {
        let mut entries = vec![header(1), user_entry(2, 1, "hello")];
        entries.push(Entry {
            id: 3,
            session_id: "s1".into(),
            parent_entry_id: Some(2),
            created_at: Utc::now(),
            payload: Payload::Custom {
                custom_type: custom_types::GROUP_CHAT_REMINDER.into(),
                data: serde_json::json!({}),
            },
        });
        entries.push(user_entry(4, 3, "second speaker"));

        let ctx = build_context(&entries).unwrap();
        assert_eq!(ctx.messages.len(), 2);
        match &ctx.messages[0].content {
            MessageContent::Text(t) => assert_eq!(t, "hello"),
            _ => panic!(),
        }
        match &ctx.messages[1].content {
            MessageContent::Text(t) => assert_eq!(t, "<user>:\n\nsecond speaker"),
            _ => panic!(),
        }

        // Re-rendering the same entries must not double the prefix.
        let ctx2 = build_context(&entries).unwrap();
        match &ctx2.messages[1].content {
            MessageContent::Text(t) => assert_eq!(t.matches("<user>:").count(), 1),
            _ => panic!(),
        }
    }

    #[test]
    fn unknown_payload_falls_back_to_best_effort_text() {
        let mut entries = vec![header(1)];
        entries.push(Entry {
            id: 2,
            session_id: "s1".into(),
            parent_entry_id: Some(1),
            created_at: Utc::now(),
            payload: Payload::Message(PersistedMessage::Unknown {
                raw: serde_json::json!({"role": "observer", "content": "side note"}),
            }),
        });
        let ctx = build_context(&entries).unwrap();
        assert_eq!(ctx.messages.len(), 1);
        match &ctx.messages[0].content {
            MessageContent::Text(t) => assert_eq!(t, "side note"),
            _ => panic!(),
        }
    }

    #[test]
    fn missing_header_is_an_error() {
        let entries = vec![user_entry(1, 0, "orphan")];
        assert!(build_context(&entries).is_err());
    }
}
