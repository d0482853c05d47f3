//! The Payload Model (§3, §4.1): sessions, entries, and the tagged-variant
//! payloads that make up a session's durable, append-only entry chain.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A session's durable identity and routing metadata.
///
/// The chain invariant — exactly one header, one linear path from
/// `head_entry_id` to `tail_entry_id` — is enforced by the Entry Store, not
/// by this type; `Session` itself is a plain record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub provider: String,
    pub model: String,
    pub cwd: String,
    pub session_type: SessionType,
    pub environment: Environment,
    pub runner: Option<String>,
    pub parent_session_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub head_entry_id: i64,
    pub tail_entry_id: i64,
}

/// Which tools may run locally for a session; see §4.8 channel restriction
/// policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Channel,
    ForkedChannel,
    Coding,
}

/// Where a session's working tree lives and how it was materialized.
/// Materialization itself is an external collaborator (§1); this is just
/// the descriptor the core persists and reasons about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    pub kind: EnvironmentKind,
    pub path: String,
    pub template_path: Option<String>,
    pub startup_script: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentKind {
    Local,
    FolderTemplate,
}

/// A durable unit of session state. Every non-header entry has exactly one
/// parent and at most one child; the full set forms a single linear chain
/// from the session's header to its tail (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub session_id: String,
    pub parent_entry_id: Option<i64>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub payload: Payload,
}

/// The tagged union of everything that can occupy a chain slot (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Header {
        system_prompt: String,
        metadata: HeaderMetadata,
    },
    Message(PersistedMessage),
    ToolExecution {
        phase: ToolExecutionPhase,
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        is_error: bool,
    },
    Compaction {
        summary: String,
        tokens_before: u32,
        first_kept_entry_id: i64,
    },
    SessionSettings {
        provider: String,
        model: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning_effort: Option<String>,
    },
    Custom {
        custom_type: String,
        data: serde_json::Value,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_reasoning_effort: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolExecutionPhase {
    Start,
    End,
}

/// The `message(...)` payload variant: one role-tagged conversational turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum PersistedMessage {
    User {
        user: Option<String>,
        content: Vec<ContentBlock>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    Assistant {
        provider: String,
        model: String,
        content: Vec<ContentBlock>,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
        stop_reason: StopReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        content: Vec<ContentBlock>,
        details: serde_json::Value,
        is_error: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    CustomMessage {
        custom_type: String,
        content: Vec<ContentBlock>,
        details: serde_json::Value,
        display: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// Forward-compatibility fallback: any role this build doesn't know
    /// round-trips losslessly as its raw JSON (§8 round-trip laws). No
    /// extra `role` field here — the tag itself (`#[serde(tag = "role")]`)
    /// already owns that key, so a same-named field inside the variant
    /// would collide with it on both serialize and deserialize; the
    /// original role is recovered from `raw` instead (see `role_str`).
    Unknown { raw: serde_json::Value },
}

impl PersistedMessage {
    pub fn timestamp(&self) -> chrono::DateTime<chrono::Utc> {
        match self {
            PersistedMessage::User { timestamp, .. } => *timestamp,
            PersistedMessage::Assistant { timestamp, .. } => *timestamp,
            PersistedMessage::ToolResult { timestamp, .. } => *timestamp,
            PersistedMessage::CustomMessage { timestamp, .. } => *timestamp,
            PersistedMessage::Unknown { .. } => chrono::Utc::now(),
        }
    }

    pub fn role_str(&self) -> &str {
        match self {
            PersistedMessage::User { .. } => "user",
            PersistedMessage::Assistant { .. } => "assistant",
            PersistedMessage::ToolResult { .. } => "tool_result",
            PersistedMessage::CustomMessage { .. } => "custom_message",
            PersistedMessage::Unknown { raw } => raw
                .get("role")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown"),
        }
    }

    /// Tool calls carried by this message (only assistant messages have any).
    pub fn tool_calls(&self) -> Vec<&ToolCallBlock> {
        match self {
            PersistedMessage::Assistant { content, .. } => content
                .iter()
                .filter_map(|c| match c {
                    ContentBlock::ToolCall(tc) => Some(tc),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Error,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u32>,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// A block of content inside a message (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    ToolCall(ToolCallBlock),
    Reasoning {
        id: String,
        #[serde(default)]
        summary: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        encrypted_content: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallBlock {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ContentBlock {
    pub fn text(s: impl Into<String>) -> Self {
        ContentBlock::Text {
            text: s.into(),
            signature: None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCallBlock> {
        match self {
            ContentBlock::ToolCall(tc) => Some(tc),
            _ => None,
        }
    }
}

/// Derived (never persisted) tool-call lifecycle status, tracked in-memory
/// by the Session Actor (§3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Started,
    Completed,
    Errored,
}

pub type ToolCallStatusMap = HashMap<String, ToolCallStatus>;

/// Stable custom-entry-type strings (§6).
pub mod custom_types {
    pub const GROUP_CHAT_REMINDER: &str = "wuhu_group_chat_reminder_v1";
    pub const FORK_POINT: &str = "wuhu_fork_point_v1";
    pub const LLM_RETRY: &str = "wuhu_llm_retry_v1";
    pub const LLM_GIVE_UP: &str = "wuhu_llm_give_up_v1";
    pub const EXECUTION_STOPPED: &str = "wuhu_execution_stopped";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_message_round_trips_raw() {
        let raw = serde_json::json!({"role": "observer", "note": "hi"});
        let msg = PersistedMessage::Unknown { raw: raw.clone() };
        let json = serde_json::to_value(&msg).unwrap();
        let back: PersistedMessage = serde_json::from_value(json).unwrap();
        match back {
            PersistedMessage::Unknown { raw: back_raw } => {
                assert_eq!(back_raw, raw);
            }
            _ => panic!("expected unknown variant"),
        }
        assert_eq!(back.role_str(), "observer");
    }

    #[test]
    fn payload_round_trips_through_json() {
        let payload = Payload::Compaction {
            summary: "a summary".into(),
            tokens_before: 1234,
            first_kept_entry_id: 42,
        };
        let json = serde_json::to_string(&payload).unwrap();
        let back: Payload = serde_json::from_str(&json).unwrap();
        match back {
            Payload::Compaction {
                summary,
                tokens_before,
                first_kept_entry_id,
            } => {
                assert_eq!(summary, "a summary");
                assert_eq!(tokens_before, 1234);
                assert_eq!(first_kept_entry_id, 42);
            }
            _ => panic!("expected compaction variant"),
        }
    }

    #[test]
    fn tool_calls_extracted_only_from_assistant() {
        let msg = PersistedMessage::Assistant {
            provider: "anthropic".into(),
            model: "claude".into(),
            content: vec![
                ContentBlock::text("let me check"),
                ContentBlock::ToolCall(ToolCallBlock {
                    id: "T1".into(),
                    name: "echo".into(),
                    arguments: serde_json::json!({"x": "hi"}),
                }),
            ],
            usage: None,
            stop_reason: StopReason::ToolUse,
            error: None,
            timestamp: chrono::Utc::now(),
        };
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "T1");
    }
}
