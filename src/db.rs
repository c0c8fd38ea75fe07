// SQLite persistence layer: device identity and the observed bid log.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::session::model::Bid;

/// SQLite-backed store for the local device identity (stable device id and
/// last-used display name) and an audit log of bids this client has observed,
/// scoped by session id.
///
/// The device id is what keys this installation's participant row server-side:
/// rejoining a session with the same device id updates the existing row
/// instead of creating a duplicate.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS identity (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS bid_log (
                id             TEXT NOT NULL,
                session_id     TEXT NOT NULL,
                participant_id TEXT NOT NULL,
                delta          REAL NOT NULL,
                created_at     TEXT,
                observed_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                PRIMARY KEY (id, session_id)
            );

            CREATE INDEX IF NOT EXISTS idx_bid_log_session ON bid_log(session_id);
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while holding
    /// it); at that point the connection state is suspect anyway.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // -----------------------------------------------------------------------
    // Device identity
    // -----------------------------------------------------------------------

    /// Return this installation's device id, generating and persisting a new
    /// one on first use.
    pub fn get_or_create_device_id(&self) -> Result<String> {
        let conn = self.lock();
        let existing: Option<String> = conn
            .query_row(
                "SELECT value FROM identity WHERE key = 'device_id'",
                [],
                |row| row.get(0),
            )
            .optional()
            .context("failed to read device_id")?;

        if let Some(id) = existing {
            return Ok(id);
        }

        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO identity (key, value) VALUES ('device_id', ?1)",
            params![id],
        )
        .context("failed to persist device_id")?;
        Ok(id)
    }

    /// The display name used on the last join, if any.
    pub fn display_name(&self) -> Result<Option<String>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT value FROM identity WHERE key = 'display_name'",
            [],
            |row| row.get(0),
        )
        .optional()
        .context("failed to read display_name")
    }

    /// Remember the display name so the next join pre-fills it.
    pub fn set_display_name(&self, name: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO identity (key, value) VALUES ('display_name', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![name],
        )
        .context("failed to persist display_name")?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bid log
    // -----------------------------------------------------------------------

    /// Record an observed bid. Re-recording the same bid id for the same
    /// session is a no-op, so at-least-once event delivery is safe here too.
    pub fn record_bid(&self, bid: &Bid) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO bid_log (id, session_id, participant_id, delta, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                bid.id,
                bid.session_id,
                bid.participant_id,
                bid.delta,
                bid.created_at.map(|t| t.to_rfc3339()),
            ],
        )
        .context("failed to record bid")?;
        Ok(())
    }

    /// Load the observed bid log for one session, newest first.
    pub fn load_bids(&self, session_id: &str) -> Result<Vec<Bid>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, participant_id, delta, created_at
                 FROM bid_log WHERE session_id = ?1
                 ORDER BY observed_at DESC, id DESC",
            )
            .context("failed to prepare bid query")?;

        let rows = stmt
            .query_map(params![session_id], |row| {
                let created_at: Option<String> = row.get(3)?;
                Ok(Bid {
                    id: row.get(0)?,
                    session_id: session_id.to_string(),
                    participant_id: row.get(1)?,
                    delta: row.get(2)?,
                    created_at: created_at
                        .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
                        .map(|t| t.with_timezone(&chrono::Utc)),
                })
            })
            .context("failed to query bids")?;

        let mut bids = Vec::new();
        for row in rows {
            bids.push(row.context("failed to read bid row")?);
        }
        Ok(bids)
    }

    /// Drop the stored log for a session (e.g. after the owner deleted it).
    pub fn clear_session(&self, session_id: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM bid_log WHERE session_id = ?1",
            params![session_id],
        )
        .context("failed to clear session bid log")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn bid(id: &str, session_id: &str, delta: f64) -> Bid {
        Bid {
            id: id.into(),
            session_id: session_id.into(),
            participant_id: "p1".into(),
            delta,
            created_at: None,
        }
    }

    #[test]
    fn device_id_is_stable() {
        let db = Database::open(":memory:").unwrap();
        let first = db.get_or_create_device_id().unwrap();
        let second = db.get_or_create_device_id().unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn device_ids_parse_as_uuids() {
        let db = Database::open(":memory:").unwrap();
        let id = db.get_or_create_device_id().unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn display_name_roundtrip() {
        let db = Database::open(":memory:").unwrap();
        assert!(db.display_name().unwrap().is_none());

        db.set_display_name("Asha").unwrap();
        assert_eq!(db.display_name().unwrap().as_deref(), Some("Asha"));

        // Overwrite keeps the latest value.
        db.set_display_name("Asha K").unwrap();
        assert_eq!(db.display_name().unwrap().as_deref(), Some("Asha K"));
    }

    #[test]
    fn bid_log_roundtrip() {
        let db = Database::open(":memory:").unwrap();
        db.record_bid(&bid("b1", "sess-1", 10.0)).unwrap();
        db.record_bid(&bid("b2", "sess-1", 25.0)).unwrap();
        db.record_bid(&bid("b3", "sess-2", 5.0)).unwrap();

        let bids = db.load_bids("sess-1").unwrap();
        assert_eq!(bids.len(), 2);
        assert!(bids.iter().all(|b| b.session_id == "sess-1"));
    }

    #[test]
    fn duplicate_bid_record_is_ignored() {
        let db = Database::open(":memory:").unwrap();
        db.record_bid(&bid("b1", "sess-1", 10.0)).unwrap();
        db.record_bid(&bid("b1", "sess-1", 10.0)).unwrap();
        assert_eq!(db.load_bids("sess-1").unwrap().len(), 1);
    }

    #[test]
    fn clear_session_removes_only_that_session() {
        let db = Database::open(":memory:").unwrap();
        db.record_bid(&bid("b1", "sess-1", 10.0)).unwrap();
        db.record_bid(&bid("b2", "sess-2", 20.0)).unwrap();

        db.clear_session("sess-1").unwrap();
        assert!(db.load_bids("sess-1").unwrap().is_empty());
        assert_eq!(db.load_bids("sess-2").unwrap().len(), 1);
    }
}
