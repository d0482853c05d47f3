//! Tool Dispatch (§4.8): sequential execution of an assistant message's
//! tool calls against the registered tool set, with JSON-schema argument
//! validation and the channel restriction policy.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{json, Value};

use sa_domain::entry::{ContentBlock, SessionType, ToolCallBlock};
use sa_domain::tool::ToolDefinition;
use sa_tools::exec::{exec, ExecRequest};
use sa_tools::manager::ProcessManager;
use sa_tools::process::{handle_process, ProcessAction, ProcessRequest};

use crate::runtime::background::BackgroundRegistry;

/// Tool names that run a shell and are therefore subject to the channel
/// restriction policy (§4.8).
const SHELL_TOOLS: &[&str] = &["bash", "async_bash", "async_bash_status", "swift"];

/// Fixed redirect message for a shell tool invoked on a `channel` session.
/// The tool's declared schema is never altered so the provider-side prompt
/// cache for the tool list stays warm across channel and forked sessions.
pub const CHANNEL_RESTRICTION_MESSAGE: &str =
    "This tool is unavailable on a channel session. Fork the session (creating a \
     forked_channel or coding session) to run shell commands.";

/// The result of one tool execution, before it is folded into a persisted
/// `tool_result` message by the caller.
pub struct DispatchOutcome {
    pub is_error: bool,
    pub content: Vec<ContentBlock>,
    pub details: Value,
}

impl DispatchOutcome {
    fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            content: vec![ContentBlock::text(text.into())],
            details: Value::Null,
        }
    }

    fn ok(text: impl Into<String>, details: Value) -> Self {
        Self {
            is_error: false,
            content: vec![ContentBlock::text(text.into())],
            details,
        }
    }
}

/// Built-in tool set backed by [`sa_tools`]. Individual tool schemas beyond
/// these four (read/write/grep/etc.) are external collaborators per the
/// core's scope and are not dispatched here.
#[derive(Clone)]
pub struct ToolRegistry {
    manager: std::sync::Arc<ProcessManager>,
    background: std::sync::Arc<BackgroundRegistry>,
    definitions: Vec<ToolDefinition>,
}

impl ToolRegistry {
    pub fn new(
        manager: std::sync::Arc<ProcessManager>,
        background: std::sync::Arc<BackgroundRegistry>,
    ) -> Self {
        Self {
            manager,
            background,
            definitions: builtin_definitions(),
        }
    }

    /// Tool definitions to advertise to the model for this session.
    pub fn definitions_for(&self, _session_type: SessionType) -> &[ToolDefinition] {
        &self.definitions
    }

    fn definition(&self, name: &str) -> Option<&ToolDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }
}

fn builtin_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "bash".into(),
            description: "Run a shell command, waiting for output or auto-backgrounding it \
                          if it runs long."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "background": {"type": "boolean"},
                    "yield_ms": {"type": "integer"},
                    "timeout_sec": {"type": "integer"},
                    "workdir": {"type": "string"},
                },
                "required": ["command"],
                "additionalProperties": false,
            }),
        },
        ToolDefinition {
            name: "async_bash".into(),
            description: "Start a shell command in the background and return its session id."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "workdir": {"type": "string"},
                },
                "required": ["command"],
                "additionalProperties": false,
            }),
        },
        ToolDefinition {
            name: "async_bash_status".into(),
            description: "Poll, read the log of, write stdin to, or kill a background \
                          command session."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "enum": ["list", "poll", "log", "write", "kill", "clear", "remove"]},
                    "session_id": {"type": "string"},
                    "offset": {"type": "integer"},
                    "limit": {"type": "integer"},
                    "tail_lines": {"type": "integer"},
                    "data": {"type": "string"},
                    "eof": {"type": "boolean"},
                },
                "required": ["action"],
                "additionalProperties": false,
            }),
        },
        ToolDefinition {
            name: "swift".into(),
            description: "Run a Swift snippet through the `swift` interpreter, waiting for \
                          output or auto-backgrounding it if it runs long."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "code": {"type": "string"},
                    "background": {"type": "boolean"},
                    "yield_ms": {"type": "integer"},
                    "timeout_sec": {"type": "integer"},
                    "workdir": {"type": "string"},
                },
                "required": ["code"],
                "additionalProperties": false,
            }),
        },
    ]
}

/// Validate `args` at the type level against `schema`, rejecting unknown
/// keys when the schema declares `additionalProperties: false` (§4.8).
fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let Some(args_obj) = args.as_object() else {
        return Err("tool arguments must be a JSON object".into());
    };
    let properties: HashMap<&str, &Value> = schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.as_str(), v)).collect())
        .unwrap_or_default();
    let additional_ok = !matches!(schema.get("additionalProperties"), Some(Value::Bool(false)));
    if !additional_ok {
        for key in args_obj.keys() {
            if !properties.contains_key(key.as_str()) {
                return Err(format!("unknown argument \"{key}\""));
            }
        }
    }
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for r in required {
            if let Some(name) = r.as_str() {
                if !args_obj.contains_key(name) {
                    return Err(format!("missing required argument \"{name}\""));
                }
            }
        }
    }
    Ok(())
}

/// Dispatch a single tool call, applying the channel restriction policy and
/// argument validation before handing off to the concrete executor.
pub async fn dispatch(
    registry: &ToolRegistry,
    session_id: &str,
    session_type: SessionType,
    call: &ToolCallBlock,
) -> DispatchOutcome {
    if session_type == SessionType::Channel && SHELL_TOOLS.contains(&call.name.as_str()) {
        return DispatchOutcome::error(CHANNEL_RESTRICTION_MESSAGE);
    }

    let Some(def) = registry.definition(&call.name) else {
        return DispatchOutcome::error(format!("unknown tool \"{}\"", call.name));
    };
    if let Err(e) = validate_args(&def.parameters, &call.arguments) {
        return DispatchOutcome::error(format!("invalid arguments for \"{}\": {e}", call.name));
    }

    match call.name.as_str() {
        "bash" => dispatch_bash(&registry.manager, &call.arguments).await,
        "async_bash" => {
            dispatch_async_bash(&registry.manager, &registry.background, session_id, &call.arguments).await
        }
        "async_bash_status" => dispatch_async_bash_status(&registry.manager, &call.arguments).await,
        "swift" => dispatch_swift(&registry.manager, &call.arguments).await,
        other => DispatchOutcome::error(format!("tool \"{other}\" has no executor")),
    }
}

async fn dispatch_bash(manager: &ProcessManager, args: &Value) -> DispatchOutcome {
    let req: ExecRequest = match serde_json::from_value(args.clone()) {
        Ok(r) => r,
        Err(e) => return DispatchOutcome::error(format!("malformed bash arguments: {e}")),
    };
    let resp = exec(manager, req).await;
    let details = serde_json::to_value(&resp).unwrap_or(Value::Null);
    let is_error = matches!(resp.status, sa_tools::manager::ProcessStatus::Failed);
    let text = resp
        .output
        .clone()
        .or_else(|| resp.session_id.clone().map(|id| format!("backgrounded as {id}")))
        .unwrap_or_default();
    DispatchOutcome {
        is_error,
        content: vec![ContentBlock::text(text)],
        details,
    }
}

/// Arguments accepted by the `swift` tool; mirrors [`ExecRequest`]'s shape
/// but carries a Swift snippet instead of an already-assembled shell
/// command.
#[derive(Deserialize)]
struct SwiftArgs {
    code: String,
    #[serde(default)]
    background: bool,
    yield_ms: Option<u64>,
    timeout_sec: Option<u64>,
    #[serde(default)]
    workdir: Option<String>,
}

/// Delimiter for the heredoc `swift` runs the snippet through. Quoted so the
/// shell does no expansion on the snippet body; chosen unlikely enough that
/// a real snippet would never contain it as a standalone line.
const SWIFT_HEREDOC_DELIMITER: &str = "WUHU_SWIFT_EOF";

async fn dispatch_swift(manager: &ProcessManager, args: &Value) -> DispatchOutcome {
    let swift_args: SwiftArgs = match serde_json::from_value(args.clone()) {
        Ok(a) => a,
        Err(e) => return DispatchOutcome::error(format!("malformed swift arguments: {e}")),
    };
    let command = format!(
        "swift <<'{SWIFT_HEREDOC_DELIMITER}'\n{}\n{SWIFT_HEREDOC_DELIMITER}\n",
        swift_args.code
    );
    let req = ExecRequest {
        command,
        background: swift_args.background,
        yield_ms: swift_args.yield_ms,
        timeout_sec: swift_args.timeout_sec,
        workdir: swift_args.workdir,
        env: None,
    };
    let resp = exec(manager, req).await;
    let details = serde_json::to_value(&resp).unwrap_or(Value::Null);
    let is_error = matches!(resp.status, sa_tools::manager::ProcessStatus::Failed);
    let text = resp
        .output
        .clone()
        .or_else(|| resp.session_id.clone().map(|id| format!("backgrounded as {id}")))
        .unwrap_or_default();
    DispatchOutcome {
        is_error,
        content: vec![ContentBlock::text(text)],
        details,
    }
}

async fn dispatch_async_bash(
    manager: &ProcessManager,
    background: &BackgroundRegistry,
    session_id: &str,
    args: &Value,
) -> DispatchOutcome {
    let mut req: ExecRequest = match serde_json::from_value(args.clone()) {
        Ok(r) => r,
        Err(e) => return DispatchOutcome::error(format!("malformed async_bash arguments: {e}")),
    };
    req.background = true;
    let resp = exec(manager, req).await;
    if let Some(id) = &resp.session_id {
        background.register_owner(id, session_id);
    }
    let details = serde_json::to_value(&resp).unwrap_or(Value::Null);
    let text = resp
        .session_id
        .clone()
        .map(|id| format!("started background session {id}"))
        .unwrap_or_else(|| "failed to start background session".into());
    DispatchOutcome::ok(text, details)
}

async fn dispatch_async_bash_status(manager: &ProcessManager, args: &Value) -> DispatchOutcome {
    let req: ProcessRequest = match serde_json::from_value(args.clone()) {
        Ok(r) => r,
        Err(e) => return DispatchOutcome::error(format!("malformed async_bash_status arguments: {e}")),
    };
    let is_list_or_clear = matches!(req.action, ProcessAction::List | ProcessAction::Clear);
    let resp = handle_process(manager, req).await;
    let details = serde_json::to_value(&resp).unwrap_or(Value::Null);
    if !resp.success && !is_list_or_clear {
        return DispatchOutcome::error(resp.error.unwrap_or_else(|| "process action failed".into()));
    }
    let text = resp
        .data
        .map(|d| d.to_string())
        .unwrap_or_else(|| "ok".into());
    DispatchOutcome::ok(text, details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::config::ExecConfig;

    fn registry() -> ToolRegistry {
        let manager = std::sync::Arc::new(ProcessManager::new(ExecConfig::default()));
        let background = std::sync::Arc::new(BackgroundRegistry::new(manager.clone()));
        ToolRegistry::new(manager, background)
    }

    #[tokio::test]
    async fn channel_session_rejects_shell_tool_without_altering_schema() {
        let registry = registry();
        let call = ToolCallBlock {
            id: "T1".into(),
            name: "bash".into(),
            arguments: json!({"command": "echo hi"}),
        };
        let outcome = dispatch(&registry, "s1", SessionType::Channel, &call).await;
        assert!(outcome.is_error);
        match &outcome.content[0] {
            ContentBlock::Text { text, .. } => assert_eq!(text, CHANNEL_RESTRICTION_MESSAGE),
            _ => panic!("expected text"),
        }
        assert_eq!(registry.definitions_for(SessionType::Channel).len(), 4);
    }

    #[tokio::test]
    async fn channel_session_rejects_swift_too() {
        let registry = registry();
        let call = ToolCallBlock {
            id: "T1".into(),
            name: "swift".into(),
            arguments: json!({"code": "print(1)"}),
        };
        let outcome = dispatch(&registry, "s1", SessionType::Channel, &call).await;
        assert!(outcome.is_error);
        match &outcome.content[0] {
            ContentBlock::Text { text, .. } => assert_eq!(text, CHANNEL_RESTRICTION_MESSAGE),
            _ => panic!("expected text"),
        }
    }

    #[tokio::test]
    async fn coding_session_runs_bash() {
        let registry = registry();
        let call = ToolCallBlock {
            id: "T1".into(),
            name: "bash".into(),
            arguments: json!({"command": "echo hi"}),
        };
        let outcome = dispatch(&registry, "s1", SessionType::Coding, &call).await;
        assert!(!outcome.is_error);
    }

    #[tokio::test]
    async fn unknown_argument_is_rejected() {
        let registry = registry();
        let call = ToolCallBlock {
            id: "T1".into(),
            name: "bash".into(),
            arguments: json!({"command": "echo hi", "bogus": 1}),
        };
        let outcome = dispatch(&registry, "s1", SessionType::Coding, &call).await;
        assert!(outcome.is_error);
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let registry = registry();
        let call = ToolCallBlock {
            id: "T1".into(),
            name: "teleport".into(),
            arguments: json!({}),
        };
        let outcome = dispatch(&registry, "s1", SessionType::Coding, &call).await;
        assert!(outcome.is_error);
    }
}
