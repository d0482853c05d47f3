//! The Entry Store (§4.1): durable backing for sessions and their
//! append-only entry chains, on SQLite via `rusqlite`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use sa_domain::entry::{Entry, Environment, EnvironmentKind, Payload, Session, SessionType};
use sa_domain::{Error, Result};

use crate::migrations::apply_migrations;

/// Durable backing for sessions and entries with atomic append semantics.
///
/// All methods are synchronous; a caller on an async runtime drives them
/// through `tokio::task::spawn_blocking`. Writes are serialized on the
/// store's internal mutex (one writer per process, as SQLite itself
/// requires); reads share the same connection but never block each other
/// for longer than a single statement.
pub struct EntryStore {
    conn: Mutex<Connection>,
}

impl EntryStore {
    /// Opens (creating if absent) the SQLite database at `path` and applies
    /// schema migrations. `busy_timeout_ms` should be ≥5s to tolerate
    /// contention between the writer and concurrent readers.
    pub fn open(path: impl AsRef<Path>, busy_timeout_ms: u32) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(path).map_err(sqlite_err)?;
        conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms as u64))
            .map_err(sqlite_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(sqlite_err)?;
        apply_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests: same schema, no file on disk.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory().map_err(sqlite_err)?;
        apply_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_session(
        &self,
        id: &str,
        provider: &str,
        model: &str,
        system_prompt: &str,
        reasoning_effort: Option<String>,
        environment: Environment,
        cwd: &str,
        session_type: SessionType,
        runner: Option<String>,
        parent_session_id: Option<String>,
    ) -> Result<Session> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(sqlite_err)?;
        let now = Utc::now();

        let header = Payload::Header {
            system_prompt: system_prompt.to_string(),
            metadata: sa_domain::entry::HeaderMetadata {
                default_reasoning_effort: reasoning_effort,
            },
        };
        let header_json = serde_json::to_string(&header)?;

        tx.execute(
            "INSERT INTO sessions (id, provider, model, environment_name, environment_type, \
             environment_path, environment_template_path, environment_startup_script, cwd, \
             session_type, runner, parent_session_id, created_at, updated_at, head_entry_id, \
             tail_entry_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13, 0, 0)",
            params![
                id,
                provider,
                model,
                environment.name,
                environment_kind_str(environment.kind),
                environment.path,
                environment.template_path,
                environment.startup_script,
                cwd,
                session_type_str(session_type),
                runner,
                parent_session_id,
                now.to_rfc3339(),
            ],
        )
        .map_err(sqlite_err)?;

        tx.execute(
            "INSERT INTO session_entries (session_id, parent_entry_id, created_at, payload) \
             VALUES (?1, NULL, ?2, ?3)",
            params![id, now.to_rfc3339(), header_json],
        )
        .map_err(sqlite_err)?;
        let header_id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE sessions SET head_entry_id = ?1, tail_entry_id = ?1 WHERE id = ?2",
            params![header_id, id],
        )
        .map_err(sqlite_err)?;

        tx.commit().map_err(sqlite_err)?;
        drop(conn);

        self.get_session(id)?
            .ok_or_else(|| Error::SessionCorrupt {
                session_id: id.to_string(),
                detail: "header insert did not produce a readable session".into(),
            })
    }

    /// Appends `payload` as the new tail of `session_id`'s chain. If the
    /// payload is `session_settings`, the session's `provider`/`model`
    /// columns are updated in the same transaction.
    pub fn append_entry(&self, session_id: &str, payload: Payload) -> Result<Entry> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(sqlite_err)?;
        let now = Utc::now();

        let tail_entry_id: i64 = tx
            .query_row(
                "SELECT tail_entry_id FROM sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(sqlite_err)?
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        let parent_entry_id = if tail_entry_id == 0 {
            None
        } else {
            Some(tail_entry_id)
        };
        let payload_json = serde_json::to_string(&payload)?;

        tx.execute(
            "INSERT INTO session_entries (session_id, parent_entry_id, created_at, payload) \
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id, parent_entry_id, now.to_rfc3339(), payload_json],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(_, Some(ref msg)) if msg.contains("UNIQUE") => {
                Error::SessionCorrupt {
                    session_id: session_id.to_string(),
                    detail: format!("parent {tail_entry_id} already has a child"),
                }
            }
            other => sqlite_err(other),
        })?;
        let new_id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE sessions SET tail_entry_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![new_id, now.to_rfc3339(), session_id],
        )
        .map_err(sqlite_err)?;

        if let Payload::SessionSettings { provider, model, .. } = &payload {
            tx.execute(
                "UPDATE sessions SET provider = ?1, model = ?2 WHERE id = ?3",
                params![provider, model, session_id],
            )
            .map_err(sqlite_err)?;
        }

        tx.commit().map_err(sqlite_err)?;

        Ok(Entry {
            id: new_id,
            session_id: session_id.to_string(),
            parent_entry_id,
            created_at: now,
            payload,
        })
    }

    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, provider, model, environment_name, environment_type, environment_path, \
             environment_template_path, environment_startup_script, cwd, session_type, runner, \
             parent_session_id, created_at, updated_at, head_entry_id, tail_entry_id \
             FROM sessions WHERE id = ?1",
            params![id],
            row_to_session,
        )
        .optional()
        .map_err(sqlite_err)
    }

    pub fn list_sessions(&self, limit: Option<u32>) -> Result<Vec<Session>> {
        let conn = self.conn.lock().unwrap();
        let limit = limit.unwrap_or(100);
        let mut stmt = conn
            .prepare(
                "SELECT id, provider, model, environment_name, environment_type, \
                 environment_path, environment_template_path, environment_startup_script, cwd, \
                 session_type, runner, parent_session_id, created_at, updated_at, \
                 head_entry_id, tail_entry_id \
                 FROM sessions ORDER BY updated_at DESC LIMIT ?1",
            )
            .map_err(sqlite_err)?;
        let rows = stmt
            .query_map(params![limit], row_to_session)
            .map_err(sqlite_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(sqlite_err)
    }

    /// Reads the session's entries in chain order (header first, tail
    /// last), verifying the linearization invariant along the way.
    ///
    /// `since_cursor` restricts to entries with `id > since_cursor`;
    /// `since_time` restricts to entries created at or after that instant.
    /// Either filter skips the full-chain linearization check since the
    /// result is a suffix, not the whole chain.
    pub fn get_entries(
        &self,
        session_id: &str,
        since_cursor: Option<i64>,
        since_time: Option<chrono::DateTime<Utc>>,
    ) -> Result<Vec<Entry>> {
        let session = self
            .get_session(session_id)?
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, session_id, parent_entry_id, created_at, payload \
                 FROM session_entries WHERE session_id = ?1 ORDER BY id ASC",
            )
            .map_err(sqlite_err)?;
        let rows = stmt
            .query_map(params![session_id], row_to_entry)
            .map_err(sqlite_err)?;
        let all: Vec<Entry> = rows
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(sqlite_err)?;
        drop(stmt);
        drop(conn);

        let filtered = since_cursor.is_some() || since_time.is_some();
        if !filtered {
            linearize(session_id, &all, session.head_entry_id, session.tail_entry_id)?;
        }

        Ok(all
            .into_iter()
            .filter(|e| since_cursor.map(|c| e.id > c).unwrap_or(true))
            .filter(|e| since_time.map(|t| e.created_at >= t).unwrap_or(true))
            .collect())
    }
}

/// Walks the parent→child map from `head` and verifies it reaches exactly
/// `entries.len()` entries, ending at `tail`. Any mismatch (cycle, orphan
/// fork, count mismatch) is reported as `session_corrupt`.
fn linearize(session_id: &str, entries: &[Entry], head: i64, tail: i64) -> Result<()> {
    let children: HashMap<i64, i64> = entries
        .iter()
        .filter_map(|e| e.parent_entry_id.map(|p| (p, e.id)))
        .collect();

    if entries.is_empty() {
        return Ok(());
    }

    let mut current = head;
    let mut visited = 0usize;
    loop {
        visited += 1;
        if visited > entries.len() {
            return Err(Error::SessionCorrupt {
                session_id: session_id.to_string(),
                detail: "chain walk exceeded entry count: cycle suspected".into(),
            });
        }
        match children.get(&current) {
            Some(next) => current = *next,
            None => break,
        }
    }

    if visited != entries.len() || current != tail {
        return Err(Error::SessionCorrupt {
            session_id: session_id.to_string(),
            detail: format!(
                "linearization reached {visited} of {} entries, ended at {current}, expected tail {tail}",
                entries.len()
            ),
        });
    }
    Ok(())
}

fn session_type_str(t: SessionType) -> &'static str {
    match t {
        SessionType::Channel => "channel",
        SessionType::ForkedChannel => "forked_channel",
        SessionType::Coding => "coding",
    }
}

fn session_type_from_str(s: &str) -> SessionType {
    match s {
        "forked_channel" => SessionType::ForkedChannel,
        "coding" => SessionType::Coding,
        _ => SessionType::Channel,
    }
}

fn environment_kind_str(kind: EnvironmentKind) -> &'static str {
    match kind {
        EnvironmentKind::Local => "local",
        EnvironmentKind::FolderTemplate => "folder_template",
    }
}

fn environment_kind_from_str(s: &str) -> EnvironmentKind {
    match s {
        "folder_template" => EnvironmentKind::FolderTemplate,
        _ => EnvironmentKind::Local,
    }
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    let environment = Environment {
        name: row.get(3)?,
        kind: environment_kind_from_str(&row.get::<_, String>(4)?),
        path: row.get(5)?,
        template_path: row.get(6)?,
        startup_script: row.get(7)?,
    };
    let created_at: String = row.get(12)?;
    let updated_at: String = row.get(13)?;
    Ok(Session {
        id: row.get(0)?,
        provider: row.get(1)?,
        model: row.get(2)?,
        cwd: row.get(8)?,
        session_type: session_type_from_str(&row.get::<_, String>(9)?),
        environment,
        runner: row.get(10)?,
        parent_session_id: row.get(11)?,
        created_at: parse_rfc3339(&created_at),
        updated_at: parse_rfc3339(&updated_at),
        head_entry_id: row.get(14)?,
        tail_entry_id: row.get(15)?,
    })
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<Entry> {
    let payload_json: String = row.get(4)?;
    let payload: Payload = serde_json::from_str(&payload_json).unwrap_or_else(|_| Payload::Custom {
        custom_type: "wuhu_unreadable_payload".into(),
        data: serde_json::Value::Null,
    });
    let created_at: String = row.get(3)?;
    Ok(Entry {
        id: row.get(0)?,
        session_id: row.get(1)?,
        parent_entry_id: row.get(2)?,
        created_at: parse_rfc3339(&created_at),
        payload,
    })
}

fn parse_rfc3339(s: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn sqlite_err(e: rusqlite::Error) -> Error {
    Error::Sqlite(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        Environment {
            name: "default".into(),
            kind: EnvironmentKind::Local,
            path: "/tmp/work".into(),
            template_path: None,
            startup_script: None,
        }
    }

    #[test]
    fn create_session_sets_head_equal_tail() {
        let store = EntryStore::open_in_memory().unwrap();
        let session = store
            .create_session(
                "s1",
                "anthropic",
                "claude",
                "you are an agent",
                None,
                env(),
                "/tmp/work",
                SessionType::Coding,
                None,
                None,
            )
            .unwrap();
        assert_eq!(session.head_entry_id, session.tail_entry_id);
        assert!(session.head_entry_id > 0);
    }

    #[test]
    fn append_entry_advances_tail_and_chains_parent() {
        let store = EntryStore::open_in_memory().unwrap();
        let session = store
            .create_session(
                "s1", "anthropic", "claude", "sp", None, env(), "/tmp", SessionType::Coding, None, None,
            )
            .unwrap();
        let entry = store
            .append_entry(
                "s1",
                Payload::Message(sa_domain::entry::PersistedMessage::User {
                    user: None,
                    content: vec![sa_domain::entry::ContentBlock::text("hi")],
                    timestamp: Utc::now(),
                }),
            )
            .unwrap();
        assert_eq!(entry.parent_entry_id, Some(session.head_entry_id));
        let updated = store.get_session("s1").unwrap().unwrap();
        assert_eq!(updated.tail_entry_id, entry.id);
    }

    #[test]
    fn append_entry_unknown_session_fails() {
        let store = EntryStore::open_in_memory().unwrap();
        let err = store.append_entry(
            "missing",
            Payload::Custom {
                custom_type: "x".into(),
                data: serde_json::Value::Null,
            },
        );
        assert!(matches!(err, Err(Error::SessionNotFound(_))));
    }

    #[test]
    fn get_entries_linearizes_full_chain() {
        let store = EntryStore::open_in_memory().unwrap();
        store
            .create_session(
                "s1", "anthropic", "claude", "sp", None, env(), "/tmp", SessionType::Coding, None, None,
            )
            .unwrap();
        for i in 0..5 {
            store
                .append_entry(
                    "s1",
                    Payload::Custom {
                        custom_type: "t".into(),
                        data: serde_json::json!({"i": i}),
                    },
                )
                .unwrap();
        }
        let entries = store.get_entries("s1", None, None).unwrap();
        assert_eq!(entries.len(), 6); // header + 5
        assert!(entries[0].parent_entry_id.is_none());
    }

    #[test]
    fn session_settings_updates_provider_and_model() {
        let store = EntryStore::open_in_memory().unwrap();
        store
            .create_session(
                "s1", "anthropic", "claude-3", "sp", None, env(), "/tmp", SessionType::Coding, None, None,
            )
            .unwrap();
        store
            .append_entry(
                "s1",
                Payload::SessionSettings {
                    provider: "openai".into(),
                    model: "gpt-5".into(),
                    reasoning_effort: None,
                },
            )
            .unwrap();
        let session = store.get_session("s1").unwrap().unwrap();
        assert_eq!(session.provider, "openai");
        assert_eq!(session.model, "gpt-5");
    }

    #[test]
    fn since_cursor_returns_suffix_only() {
        let store = EntryStore::open_in_memory().unwrap();
        store
            .create_session(
                "s1", "anthropic", "claude", "sp", None, env(), "/tmp", SessionType::Coding, None, None,
            )
            .unwrap();
        let first = store
            .append_entry(
                "s1",
                Payload::Custom {
                    custom_type: "a".into(),
                    data: serde_json::Value::Null,
                },
            )
            .unwrap();
        store
            .append_entry(
                "s1",
                Payload::Custom {
                    custom_type: "b".into(),
                    data: serde_json::Value::Null,
                },
            )
            .unwrap();
        let suffix = store.get_entries("s1", Some(first.id), None).unwrap();
        assert_eq!(suffix.len(), 1);
    }
}
