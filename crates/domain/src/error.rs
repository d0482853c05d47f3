/// Shared error type used across all wuhu crates; mirrors the error
/// taxonomy in §7 and the crate-boundary conventions in §10.2.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Caller named a session id that the Entry Store has no record of.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Chain invariants (header uniqueness, parent→child linkage) are
    /// violated. The operation fails and the session is left unchanged.
    #[error("session corrupt: {session_id}: {detail}")]
    SessionCorrupt { session_id: String, detail: String },

    /// Transient storage failure; retrying is the caller's decision.
    #[error("store error: {0}")]
    Store(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sqlite: {0}")]
    Sqlite(String),

    /// The model stream failed after the Retry Wrapper gave up.
    #[error("model stream error: {0}")]
    ModelStream(String),

    /// A tool executor failed; callers fold this into an `is_error=true`
    /// tool_result rather than aborting the turn.
    #[error("tool execution error: {0}")]
    ToolExecution(String),

    /// A turn or subscription was cancelled; never retried.
    #[error("cancelled")]
    Cancelled,

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Coarse kind used by callers that `match` on kind rather than
    /// string-sniff a message (§7 propagation policy).
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SessionNotFound(_) => ErrorKind::SessionNotFound,
            Error::SessionCorrupt { .. } => ErrorKind::SessionCorrupt,
            Error::Store(_) | Error::Sqlite(_) | Error::Io(_) => ErrorKind::Store,
            Error::ModelStream(_) => ErrorKind::ModelStream,
            Error::ToolExecution(_) => ErrorKind::ToolExecution,
            Error::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SessionNotFound,
    SessionCorrupt,
    Store,
    ModelStream,
    ToolExecution,
    Cancelled,
    Other,
}
