//! Durable backing for the session runtime: the Entry Store (§4.1) and the
//! Queue Ledger (§4.4). Both are synchronous (rusqlite is blocking); callers
//! on an async runtime drive them through `tokio::task::spawn_blocking`.

mod migrations;

pub mod entry_store;
pub mod queue_ledger;

pub use entry_store::EntryStore;
pub use queue_ledger::{Lane, LedgerEvent, LedgerEventKind, QueueLedger, QueueSnapshot};
