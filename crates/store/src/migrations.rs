//! Schema migrations for the Entry Store and Queue Ledger (§4.1, §4.4, §6).
//!
//! Applied via `PRAGMA user_version` as the version marker, the same way
//! the teacher's `sessions/src/store.rs` tracks its own schema version:
//! named, monotonic migrations run in order inside one transaction, each
//! only if the connection's current version is below it.

use rusqlite::Connection;
use sa_domain::{Error, Result};

/// One named, monotonic migration. `version` is the `user_version` the
/// connection is left at after `sql` runs; migrations must be listed in
/// strictly increasing `version` order.
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

/// Migration 1: the base schema — `sessions` (with separate
/// `environment_name`/`environment_type`/`environment_path` columns, per
/// spec §6's bit-exact layout), `session_entries` with its two chain-
/// integrity unique indexes, and `queue_entries` for the three-lane ledger.
const MIGRATION_1_INIT: &str = r#"
CREATE TABLE sessions (
    id                  TEXT PRIMARY KEY,
    provider            TEXT NOT NULL,
    model               TEXT NOT NULL,
    environment_name    TEXT NOT NULL,
    environment_type    TEXT NOT NULL,
    environment_path    TEXT NOT NULL,
    cwd                 TEXT NOT NULL,
    session_type        TEXT NOT NULL,
    runner              TEXT,
    parent_session_id   TEXT,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL,
    head_entry_id       INTEGER NOT NULL DEFAULT 0,
    tail_entry_id       INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE session_entries (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id          TEXT NOT NULL REFERENCES sessions(id),
    parent_entry_id     INTEGER REFERENCES session_entries(id) ON DELETE RESTRICT,
    created_at          TEXT NOT NULL,
    payload             TEXT NOT NULL
);

-- One entry may claim a parent at most once: enforces the linear-chain
-- invariant (no parent has two children) at the storage layer.
CREATE UNIQUE INDEX session_entries_parent_unique
    ON session_entries(parent_entry_id)
    WHERE parent_entry_id IS NOT NULL;

-- At most one header (parent_entry_id IS NULL) per session.
CREATE UNIQUE INDEX session_entries_header_unique
    ON session_entries(session_id)
    WHERE parent_entry_id IS NULL;

CREATE INDEX session_entries_session_idx
    ON session_entries(session_id);

CREATE INDEX session_entries_created_at_idx
    ON session_entries(created_at);

CREATE TABLE queue_entries (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id          TEXT NOT NULL,
    lane                TEXT NOT NULL,
    cursor              INTEGER NOT NULL,
    kind                TEXT NOT NULL,
    payload             TEXT NOT NULL,
    created_at          TEXT NOT NULL
);

CREATE INDEX queue_entries_session_lane_idx
    ON queue_entries(session_id, lane, cursor);
"#;

/// Migration 2 (§6): adds the optional environment template columns —
/// `environment_template_path` and `environment_startup_script` — that the
/// base schema left out for environments of kind `local`.
const MIGRATION_2_ENVIRONMENT_TEMPLATE_COLUMNS: &str = r#"
ALTER TABLE sessions ADD COLUMN environment_template_path TEXT;
ALTER TABLE sessions ADD COLUMN environment_startup_script TEXT;
"#;

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "init",
        sql: MIGRATION_1_INIT,
    },
    Migration {
        version: 2,
        name: "environment_template_columns",
        sql: MIGRATION_2_ENVIRONMENT_TEMPLATE_COLUMNS,
    },
];

/// Applies every migration whose `version` exceeds the connection's current
/// `user_version`, in order, each inside its own transaction, and advances
/// `user_version` to match. Idempotent: calling this on an already
/// up-to-date connection is a no-op.
pub fn apply_migrations(conn: &mut Connection) -> Result<()> {
    let current: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| Error::Sqlite(e.to_string()))?;

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        let tx = conn.transaction().map_err(|e| Error::Sqlite(e.to_string()))?;
        tx.execute_batch(migration.sql)
            .map_err(|e| Error::Sqlite(format!("migration {} failed: {e}", migration.name)))?;
        tx.pragma_update(None, "user_version", migration.version)
            .map_err(|e| Error::Sqlite(e.to_string()))?;
        tx.commit().map_err(|e| Error::Sqlite(e.to_string()))?;
        tracing::info!(version = migration.version, name = migration.name, "applied migration");
    }
    Ok(())
}
