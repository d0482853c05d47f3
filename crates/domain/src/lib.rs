//! Shared domain types for the wuhu session runtime: the entry/session
//! payload model (§3), the error taxonomy (§7, §10.2), provider-agnostic
//! message/tool/stream types, and layered configuration (§10.3).

pub mod capability;
pub mod config;
pub mod entry;
pub mod error;
pub mod stream;
pub mod tool;
pub mod trace;

pub use entry::{
    ContentBlock, Entry, Environment, EnvironmentKind, HeaderMetadata, Payload, PersistedMessage,
    Session, SessionType, StopReason, ToolCallBlock, ToolCallStatus, ToolCallStatusMap, Usage,
};
pub use error::{Error, ErrorKind, Result};
