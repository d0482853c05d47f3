//! The Queue Ledger (§4.4): three independent priority lanes
//! (`system_urgent`, `steer`, `follow_up`), each an append-only journal of
//! `enqueued`/`canceled`/`materialized` events from which the pending set
//! is deterministically reconstructed.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection};
use sa_domain::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::migrations::apply_migrations;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    SystemUrgent,
    Steer,
    FollowUp,
}

impl Lane {
    fn as_str(self) -> &'static str {
        match self {
            Lane::SystemUrgent => "system_urgent",
            Lane::Steer => "steer",
            Lane::FollowUp => "follow_up",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventKind {
    Enqueued,
    Canceled,
    Materialized,
}

impl LedgerEventKind {
    fn as_str(self) -> &'static str {
        match self {
            LedgerEventKind::Enqueued => "enqueued",
            LedgerEventKind::Canceled => "canceled",
            LedgerEventKind::Materialized => "materialized",
        }
    }
}

/// One journaled event. `cursor` is the row's own id rendered as a
/// zero-padded decimal string: opaque to callers, monotonic, and
/// lexicographically comparable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub cursor: String,
    pub item_id: String,
    pub kind: LedgerEventKind,
    pub payload: Option<serde_json::Value>,
    pub transcript_entry_id: Option<i64>,
    pub at: chrono::DateTime<Utc>,
}

/// The derived state a lane exposes to the Session Actor after replaying
/// its journal up to some point.
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    pub pending: Vec<(String, serde_json::Value)>,
    pub cursor: Option<String>,
}

pub struct QueueLedger {
    conn: Mutex<Connection>,
}

impl QueueLedger {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Opens its own connection to the same SQLite file the Entry Store
    /// uses; WAL mode lets the two coexist without cross-blocking on reads.
    pub fn open(path: impl AsRef<std::path::Path>, busy_timeout_ms: u32) -> Result<Self> {
        let mut conn = Connection::open(path).map_err(|e| Error::Sqlite(e.to_string()))?;
        conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms as u64))
            .map_err(|e| Error::Sqlite(e.to_string()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Sqlite(e.to_string()))?;
        apply_migrations(&mut conn)?;
        Ok(Self::new(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory().map_err(|e| Error::Sqlite(e.to_string()))?;
        apply_migrations(&mut conn)?;
        Ok(Self::new(conn))
    }

    fn encode_cursor(row_id: i64) -> String {
        format!("{row_id:020}")
    }

    fn decode_cursor(cursor: &str) -> Result<i64> {
        cursor
            .parse::<i64>()
            .map_err(|_| Error::Store(format!("malformed queue cursor: {cursor}")))
    }

    /// Journals `enqueued(item_id, payload, at)`. Re-enqueuing an id already
    /// present as pending is an application-level error the caller should
    /// reject upstream; the ledger itself only requires that a given id not
    /// be journaled twice for the same event kind, which this enforces via
    /// a uniqueness check against prior `enqueued` rows.
    pub fn enqueue(
        &self,
        session_id: &str,
        lane: Lane,
        item_id: &str,
        payload: serde_json::Value,
        at: chrono::DateTime<Utc>,
    ) -> Result<QueueSnapshot> {
        let conn = self.conn.lock().unwrap();
        let needle = format!("\"item_id\":\"{item_id}\"");
        let already: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM queue_entries WHERE session_id = ?1 AND lane = ?2 \
                 AND kind = 'enqueued' AND payload LIKE '%' || ?3 || '%'",
                params![session_id, lane.as_str(), needle],
                |row| row.get(0),
            )
            .unwrap_or(0);
        if already > 0 {
            return Err(Error::Store(format!(
                "queue item {item_id} already enqueued in lane {}",
                lane.as_str()
            )));
        }

        let envelope = serde_json::json!({"item_id": item_id, "payload": payload});
        conn.execute(
            "INSERT INTO queue_entries (session_id, lane, cursor, kind, payload, created_at) \
             VALUES (?1, ?2, 0, 'enqueued', ?3, ?4)",
            params![session_id, lane.as_str(), envelope.to_string(), at.to_rfc3339()],
        )
        .map_err(|e| Error::Sqlite(e.to_string()))?;
        let row_id = conn.last_insert_rowid();
        conn.execute(
            "UPDATE queue_entries SET cursor = ?1 WHERE id = ?1",
            params![row_id],
        )
        .map_err(|e| Error::Sqlite(e.to_string()))?;
        drop(conn);

        self.snapshot(session_id, lane)
    }

    /// Journals `canceled(item_id, at)`. A no-op (still journaled) if the
    /// item was already materialized or canceled — cancellation only
    /// removes an item from `pending` while it is still pending.
    pub fn cancel(
        &self,
        session_id: &str,
        lane: Lane,
        item_id: &str,
        at: chrono::DateTime<Utc>,
    ) -> Result<QueueSnapshot> {
        let conn = self.conn.lock().unwrap();
        let envelope = serde_json::json!({"item_id": item_id});
        conn.execute(
            "INSERT INTO queue_entries (session_id, lane, cursor, kind, payload, created_at) \
             VALUES (?1, ?2, 0, 'canceled', ?3, ?4)",
            params![session_id, lane.as_str(), envelope.to_string(), at.to_rfc3339()],
        )
        .map_err(|e| Error::Sqlite(e.to_string()))?;
        let row_id = conn.last_insert_rowid();
        conn.execute(
            "UPDATE queue_entries SET cursor = ?1 WHERE id = ?1",
            params![row_id],
        )
        .map_err(|e| Error::Sqlite(e.to_string()))?;
        drop(conn);

        self.snapshot(session_id, lane)
    }

    /// Journals `materialized(item_id, transcript_entry_id, at)`: the item
    /// became a persisted entry via the Entry Store.
    pub fn materialize(
        &self,
        session_id: &str,
        lane: Lane,
        item_id: &str,
        transcript_entry_id: i64,
        at: chrono::DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let envelope = serde_json::json!({
            "item_id": item_id,
            "transcript_entry_id": transcript_entry_id,
        });
        conn.execute(
            "INSERT INTO queue_entries (session_id, lane, cursor, kind, payload, created_at) \
             VALUES (?1, ?2, 0, 'materialized', ?3, ?4)",
            params![session_id, lane.as_str(), envelope.to_string(), at.to_rfc3339()],
        )
        .map_err(|e| Error::Sqlite(e.to_string()))?;
        let row_id = conn.last_insert_rowid();
        conn.execute(
            "UPDATE queue_entries SET cursor = ?1 WHERE id = ?1",
            params![row_id],
        )
        .map_err(|e| Error::Sqlite(e.to_string()))?;
        Ok(())
    }

    /// Journal events for `lane` strictly after `since` (exclusive), in
    /// cursor order.
    pub fn journal_since(
        &self,
        session_id: &str,
        lane: Lane,
        since: Option<&str>,
    ) -> Result<Vec<LedgerEvent>> {
        let since_id = match since {
            Some(c) => Self::decode_cursor(c)?,
            None => 0,
        };
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, kind, payload, created_at FROM queue_entries \
                 WHERE session_id = ?1 AND lane = ?2 AND id > ?3 ORDER BY id ASC",
            )
            .map_err(|e| Error::Sqlite(e.to_string()))?;
        let rows = stmt
            .query_map(params![session_id, lane.as_str(), since_id], |row| {
                let id: i64 = row.get(0)?;
                let kind: String = row.get(1)?;
                let payload_json: String = row.get(2)?;
                let created_at: String = row.get(3)?;
                Ok((id, kind, payload_json, created_at))
            })
            .map_err(|e| Error::Sqlite(e.to_string()))?;

        let mut events = Vec::new();
        for row in rows {
            let (id, kind, payload_json, created_at) =
                row.map_err(|e| Error::Sqlite(e.to_string()))?;
            let envelope: serde_json::Value = serde_json::from_str(&payload_json)?;
            let kind_enum = match kind.as_str() {
                "enqueued" => LedgerEventKind::Enqueued,
                "canceled" => LedgerEventKind::Canceled,
                "materialized" => LedgerEventKind::Materialized,
                other => return Err(Error::Store(format!("unknown ledger event kind: {other}"))),
            };
            events.push(LedgerEvent {
                cursor: Self::encode_cursor(id),
                item_id: envelope
                    .get("item_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                kind: kind_enum,
                payload: envelope.get("payload").cloned(),
                transcript_entry_id: envelope
                    .get("transcript_entry_id")
                    .and_then(|v| v.as_i64()),
                at: chrono::DateTime::parse_from_rfc3339(&created_at)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            });
        }
        Ok(events)
    }

    /// Replays the full journal for `lane` and derives `pending`:
    /// enqueued ∧ ¬canceled ∧ ¬materialized.
    pub fn snapshot(&self, session_id: &str, lane: Lane) -> Result<QueueSnapshot> {
        let events = self.journal_since(session_id, lane, None)?;
        let mut resolved: HashSet<String> = HashSet::new();
        let mut enqueued_payload = std::collections::HashMap::new();
        let mut order = Vec::new();
        let mut last_cursor = None;

        for ev in &events {
            last_cursor = Some(ev.cursor.clone());
            match ev.kind {
                LedgerEventKind::Enqueued => {
                    enqueued_payload.insert(ev.item_id.clone(), ev.payload.clone().unwrap_or(serde_json::Value::Null));
                    order.push(ev.item_id.clone());
                }
                LedgerEventKind::Canceled | LedgerEventKind::Materialized => {
                    resolved.insert(ev.item_id.clone());
                }
            }
        }

        let pending = order
            .into_iter()
            .filter(|id| !resolved.contains(id))
            .map(|id| {
                let payload = enqueued_payload.remove(&id).unwrap_or(serde_json::Value::Null);
                (id, payload)
            })
            .collect();

        Ok(QueueSnapshot {
            pending,
            cursor: last_cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> QueueLedger {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_migrations(&mut conn).unwrap();
        QueueLedger::new(conn)
    }

    #[test]
    fn pending_excludes_canceled_and_materialized() {
        let l = ledger();
        let now = Utc::now();
        l.enqueue("s1", Lane::FollowUp, "a", serde_json::json!("hi"), now)
            .unwrap();
        l.enqueue("s1", Lane::FollowUp, "b", serde_json::json!("bye"), now)
            .unwrap();
        l.cancel("s1", Lane::FollowUp, "a", now).unwrap();
        l.materialize("s1", Lane::FollowUp, "b", 42, now).unwrap();
        let snap = l.snapshot("s1", Lane::FollowUp).unwrap();
        assert!(snap.pending.is_empty());
    }

    #[test]
    fn pending_keeps_unresolved_items_in_enqueue_order() {
        let l = ledger();
        let now = Utc::now();
        l.enqueue("s1", Lane::Steer, "a", serde_json::json!(1), now).unwrap();
        l.enqueue("s1", Lane::Steer, "b", serde_json::json!(2), now).unwrap();
        let snap = l.snapshot("s1", Lane::Steer).unwrap();
        assert_eq!(snap.pending.len(), 2);
        assert_eq!(snap.pending[0].0, "a");
        assert_eq!(snap.pending[1].0, "b");
    }

    #[test]
    fn lanes_are_independent() {
        let l = ledger();
        let now = Utc::now();
        l.enqueue("s1", Lane::SystemUrgent, "x", serde_json::json!(1), now)
            .unwrap();
        let steer = l.snapshot("s1", Lane::Steer).unwrap();
        assert!(steer.pending.is_empty());
        let urgent = l.snapshot("s1", Lane::SystemUrgent).unwrap();
        assert_eq!(urgent.pending.len(), 1);
    }

    #[test]
    fn journal_since_cursor_returns_only_newer_events() {
        let l = ledger();
        let now = Utc::now();
        let snap1 = l
            .enqueue("s1", Lane::FollowUp, "a", serde_json::json!(1), now)
            .unwrap();
        l.enqueue("s1", Lane::FollowUp, "b", serde_json::json!(2), now)
            .unwrap();
        let events = l
            .journal_since("s1", Lane::FollowUp, snap1.cursor.as_deref())
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].item_id, "b");
    }

    #[test]
    fn cancel_after_materialize_is_journaled_but_harmless() {
        let l = ledger();
        let now = Utc::now();
        l.enqueue("s1", Lane::FollowUp, "a", serde_json::json!(1), now)
            .unwrap();
        l.materialize("s1", Lane::FollowUp, "a", 7, now).unwrap();
        l.cancel("s1", Lane::FollowUp, "a", now).unwrap();
        let snap = l.snapshot("s1", Lane::FollowUp).unwrap();
        assert!(snap.pending.is_empty());
    }
}
