//! Turns a session's persisted entries into the message list handed to a
//! model (§4.5), decides when and how to compact that history once it
//! outgrows the provider's context window (§4.6), repairs dangling tool
//! calls before either is done (§4.3, §4.5), and caps tool output to a
//! predictable size (§4.11).

pub mod compaction;
pub mod context;
pub mod injection;
pub mod truncation;

pub use compaction::{
    decide_compaction, estimate_message_tokens, select_cut_point, should_compact,
    CompactionDecision, CutPoint,
};
pub use context::{build_context, Context};
pub use injection::{repair_dangling_tool_calls, LOST_TOOL_RESULT_TEXT};
pub use truncation::{
    cap_grep_line, format_trailer, truncate_head, truncate_tail, TruncatedBy, TruncationResult,
};
