//! Runtime: the Session Actor, Agent Loop, Queue Ledger plumbing, Live
//! Event Hub, Retry Wrapper, tool dispatch and background-job completion
//! routing that together drive a session from enqueued input to persisted
//! assistant turns.

pub mod actor;
pub mod agent_loop;
pub mod background;
pub mod cancel_flags;
pub mod compaction;
pub mod hub;
pub mod registry;
pub mod retry;
pub mod tool_dispatch;

pub use hub::LiveEvent;
pub use registry::{ActorRegistry, SharedActorRegistry};
