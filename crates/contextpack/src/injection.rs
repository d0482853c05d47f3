//! Tool Repairer (§4.3, §4.5): detects assistant `tool_call`s without a
//! matching `tool_result` and synthesizes one, both for the in-memory pass
//! applied before a message list is handed to the model and for the
//! end-of-turn stale-call detection the Agent Loop persists.

use sa_domain::tool::{ContentPart, Message, MessageContent, Role};

/// Standardized text for a synthesized lost/stale tool result.
pub const LOST_TOOL_RESULT_TEXT: &str =
    "Tool result unavailable: the call was interrupted before a result was recorded.";

/// Scans `messages` for assistant `tool_use` parts with no corresponding
/// `tool_result` message anywhere later in the slice, and inserts a
/// synthesized error tool_result immediately before the next
/// assistant/user message (or appends at the end if there is none).
///
/// Idempotent: running this twice over its own output is a no-op, since
/// every tool_use it finds already has a matching tool_result after the
/// first pass.
pub fn repair_dangling_tool_calls(messages: &mut Vec<Message>) {
    let mut i = 0;
    while i < messages.len() {
        if messages[i].role != Role::Assistant {
            i += 1;
            continue;
        }
        let pending_ids = dangling_call_ids(messages, i);
        if pending_ids.is_empty() {
            i += 1;
            continue;
        }

        // Find the insertion point: the next assistant/user message, or
        // end of list.
        let mut insert_at = messages.len();
        for (j, m) in messages.iter().enumerate().skip(i + 1) {
            if m.role == Role::Assistant || m.role == Role::User {
                insert_at = j;
                break;
            }
        }

        for id in pending_ids.into_iter().rev() {
            messages.insert(insert_at, synthesize_tool_result(&id));
        }
        i += 1;
    }
}

/// Tool-use ids in the assistant message at `idx` with no later
/// `tool_result` anywhere in `messages`.
fn dangling_call_ids(messages: &[Message], idx: usize) -> Vec<String> {
    let call_ids: Vec<String> = match &messages[idx].content {
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolUse { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect(),
        MessageContent::Text(_) => Vec::new(),
    };
    if call_ids.is_empty() {
        return Vec::new();
    }

    let answered: std::collections::HashSet<&str> = messages
        .iter()
        .filter_map(|m| match &m.content {
            MessageContent::Parts(parts) => Some(parts.iter().filter_map(|p| match p {
                ContentPart::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                _ => None,
            })),
            MessageContent::Text(_) => None,
        })
        .flatten()
        .collect();

    call_ids
        .into_iter()
        .filter(|id| !answered.contains(id.as_str()))
        .collect()
}

fn synthesize_tool_result(tool_use_id: &str) -> Message {
    Message {
        role: Role::Tool,
        content: MessageContent::Parts(vec![ContentPart::ToolResult {
            tool_use_id: tool_use_id.to_string(),
            content: LOST_TOOL_RESULT_TEXT.to_string(),
            is_error: true,
        }]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::tool::ToolCall;
    use serde_json::json;

    fn assistant_with_call(id: &str) -> Message {
        Message {
            role: Role::Assistant,
            content: MessageContent::Parts(vec![ContentPart::ToolUse {
                id: id.into(),
                name: "echo".into(),
                input: json!({}),
            }]),
        }
    }

    #[test]
    fn inserts_synthetic_result_for_dangling_call() {
        let mut messages = vec![assistant_with_call("T1"), Message::user("next")];
        repair_dangling_tool_calls(&mut messages);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, Role::Tool);
        match &messages[1].content {
            MessageContent::Parts(parts) => match &parts[0] {
                ContentPart::ToolResult { is_error, .. } => assert!(is_error),
                _ => panic!("expected tool result"),
            },
            _ => panic!("expected parts"),
        }
    }

    #[test]
    fn leaves_answered_calls_alone() {
        let mut messages = vec![
            assistant_with_call("T1"),
            Message::tool_result("T1", "ok"),
            Message::user("next"),
        ];
        let before = messages.len();
        repair_dangling_tool_calls(&mut messages);
        assert_eq!(messages.len(), before);
    }

    #[test]
    fn appends_at_end_when_no_following_message() {
        let mut messages = vec![assistant_with_call("T9")];
        repair_dangling_tool_calls(&mut messages);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Tool);
    }

    #[test]
    fn repair_is_idempotent() {
        let mut messages = vec![assistant_with_call("T1"), Message::user("next")];
        repair_dangling_tool_calls(&mut messages);
        let once = messages.clone_for_test();
        repair_dangling_tool_calls(&mut messages);
        assert_eq!(messages.len(), once.len());
    }

    #[test]
    fn multiple_calls_in_one_message_all_repaired() {
        let msg = Message {
            role: Role::Assistant,
            content: MessageContent::Parts(vec![
                ContentPart::ToolUse { id: "A".into(), name: "x".into(), input: json!({}) },
                ContentPart::ToolUse { id: "B".into(), name: "y".into(), input: json!({}) },
            ]),
        };
        let mut messages = vec![msg];
        repair_dangling_tool_calls(&mut messages);
        assert_eq!(messages.len(), 3);
    }

    // Helper trait only used by the idempotency test above, kept local to
    // avoid adding a `Clone` bound requirement elsewhere.
    trait CloneForTest {
        fn clone_for_test(&self) -> Vec<Message>;
    }
    impl CloneForTest for Vec<Message> {
        fn clone_for_test(&self) -> Vec<Message> {
            self.iter()
                .map(|m| Message {
                    role: m.role,
                    content: m.content.clone(),
                })
                .collect()
        }
    }

    #[allow(dead_code)]
    fn unused_tool_call_ctor() -> ToolCall {
        ToolCall {
            call_id: "x".into(),
            tool_name: "x".into(),
            arguments: json!({}),
        }
    }
}
