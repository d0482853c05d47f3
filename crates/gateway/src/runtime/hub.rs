//! Live Event Hub (§4.9): an in-process, multi-consumer broadcaster of
//! transcript/queue activity, keyed by session id.
//!
//! Grounded on the teacher's `runtime::runs` broadcast-channel pattern:
//! one `tokio::sync::broadcast` channel per live subject, lazily created,
//! garbage collected once every receiver has dropped.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use sa_domain::entry::Entry;

/// Capacity of each session's broadcast channel. Chosen well above the
/// subscription resume backpressure buffer (~4096, §4.9) since a slow
/// in-process receiver reads its own bounded history buffer, not this one.
const CHANNEL_CAPACITY: usize = 1024;

/// One live update pushed to subscribers of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LiveEvent {
    /// A new entry was appended to the transcript chain.
    Entry(Entry),
    /// A queue ledger event fired on one of the three lanes.
    Queue {
        lane: String,
        cursor: String,
        item_id: String,
        event: String,
    },
    /// The session actor changed state (idle/running/stopped).
    ActorState { state: String },
    /// A text delta from an in-flight assistant turn. Not persisted itself;
    /// the final message lands as an `Entry` once the stream completes.
    StreamDelta { text: String },
}

/// Holds one broadcast channel per session with at least one subscriber
/// or a recent publish. Channels are created lazily on first subscribe or
/// publish and dropped once both the sender and all receivers are gone.
#[derive(Clone)]
pub struct LiveEventHub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<LiveEvent>>>>,
}

impl Default for LiveEventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveEventHub {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn sender_for(&self, session_id: &str) -> broadcast::Sender<LiveEvent> {
        let mut channels = self.channels.lock();
        channels
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publish an event to every current subscriber of `session_id`.
    /// A `SendError` (no receivers) is expected and silent: subscribers
    /// read their own snapshot-plus-resume path, they don't need to have
    /// been live at publish time.
    pub fn publish(&self, session_id: &str, event: LiveEvent) {
        let sender = self.sender_for(session_id);
        let _ = sender.send(event);
    }

    /// Subscribe to live events for `session_id`, created lazily.
    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<LiveEvent> {
        self.sender_for(session_id).subscribe()
    }

    /// Drop channels with no subscribers and no sender other than our own
    /// retained clone. Safe to call periodically; never required for
    /// correctness since `publish` recreates on demand.
    pub fn gc(&self) {
        let mut channels = self.channels.lock();
        channels.retain(|_, sender| sender.receiver_count() > 0);
    }
}
