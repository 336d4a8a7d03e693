//! Database repository layer
//!
//! Provides insert, lease and acknowledge operations for the event backlog
//! and key/value access to persisted client state.

use crate::error::Result;
use crate::types::{EventRecord, StoredEvent};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

const USER_ID_KEY: &str = "user_id";

/// Backlog statistics for status reporting.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// Events persisted and not yet accepted by the endpoint
    pub pending_events: i64,
    /// Events that failed delivery at least once
    pub retried_events: i64,
    /// Creation time of the oldest pending event
    pub oldest_event_at: Option<DateTime<Utc>>,
}

/// Database handle (single connection guarded by a mutex)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL keeps appends cheap while the sender reads
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn();
        super::schema::run_migrations(&conn)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave SQLite itself
        // inconsistent, so a poisoned lock is still usable.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ============================================
    // Event backlog
    // ============================================

    /// Append events in order within a single transaction.
    pub fn insert_events(&self, events: &[EventRecord]) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO events (event_name, session_id, payload, created_at)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )?;
            let now = Utc::now().to_rfc3339();
            for event in events {
                stmt.execute(params![
                    event.event,
                    event.session_id,
                    serde_json::to_string(event)?,
                    now,
                ])?;
            }
        }
        tx.commit()?;

        Ok(events.len())
    }

    /// Oldest `limit` pending events, in append order.
    ///
    /// Rows whose payload no longer decodes are dropped with a warning so
    /// they cannot block the backlog.
    pub fn lease_events(&self, limit: usize) -> Result<Vec<StoredEvent>> {
        let rows: Vec<(i64, String, u32)> = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT id, payload, attempts FROM events ORDER BY id ASC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let mut events = Vec::with_capacity(rows.len());
        let mut corrupt = Vec::new();
        for (id, payload, attempts) in rows {
            match serde_json::from_str::<EventRecord>(&payload) {
                Ok(record) => events.push(StoredEvent {
                    id,
                    record,
                    attempts,
                }),
                Err(e) => {
                    tracing::warn!(id, error = %e, "Dropping undecodable stored event");
                    corrupt.push(id);
                }
            }
        }

        if !corrupt.is_empty() {
            self.delete_events(&corrupt)?;
        }

        Ok(events)
    }

    /// Delete delivered events.
    pub fn delete_events(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let conn = self.conn();
        let sql = format!(
            "DELETE FROM events WHERE id IN ({})",
            placeholders(ids.len())
        );
        let deleted = conn.execute(&sql, params_from_iter(ids.iter()))?;
        Ok(deleted)
    }

    /// Record a failed delivery attempt for retained events.
    pub fn record_failed_attempt(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let conn = self.conn();
        let sql = format!(
            "UPDATE events SET attempts = attempts + 1, last_attempt_at = ? WHERE id IN ({})",
            placeholders(ids.len())
        );
        let now = Utc::now().to_rfc3339();
        let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(ids.len() + 1);
        values.push(now.into());
        values.extend(ids.iter().map(|id| rusqlite::types::Value::from(*id)));
        let updated = conn.execute(&sql, params_from_iter(values))?;
        Ok(updated)
    }

    /// Number of events waiting for delivery
    pub fn count_events(&self) -> Result<i64> {
        let conn = self.conn();
        let count = conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))?;
        Ok(count)
    }

    /// Backlog statistics
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn();
        let (pending_events, retried_events, oldest): (i64, i64, Option<String>) = conn
            .query_row(
                r#"
                SELECT COUNT(*),
                       COALESCE(SUM(CASE WHEN attempts > 0 THEN 1 ELSE 0 END), 0),
                       MIN(created_at)
                FROM events
                "#,
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )?;

        let oldest_event_at = oldest
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(StoreStats {
            pending_events,
            retried_events,
            oldest_event_at,
        })
    }

    // ============================================
    // Client state
    // ============================================

    /// Read a persisted client state value
    pub fn get_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn();
        let value = conn
            .query_row(
                "SELECT value FROM client_state WHERE key = ?1",
                [key],
                |r| r.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Insert or replace a persisted client state value
    pub fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO client_state (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Persisted durable user id, if one has been assigned
    pub fn get_user_id(&self) -> Result<Option<String>> {
        Ok(self.get_state(USER_ID_KEY)?.filter(|id| !id.is_empty()))
    }

    pub fn save_user_id(&self, user_id: &str) -> Result<()> {
        self.set_state(USER_ID_KEY, user_id)
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Properties;

    fn create_test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn create_test_event(name: &str) -> EventRecord {
        EventRecord::new(name, "session-1", "user-1", Properties::new(), None)
    }

    #[test]
    fn test_insert_and_lease_in_order() {
        let db = create_test_db();
        let events = vec![
            create_test_event("first"),
            create_test_event("second"),
            create_test_event("third"),
        ];
        assert_eq!(db.insert_events(&events).unwrap(), 3);

        let leased = db.lease_events(2).unwrap();
        assert_eq!(leased.len(), 2);
        assert_eq!(leased[0].record.event, "first");
        assert_eq!(leased[1].record.event, "second");
        assert_eq!(leased[0].attempts, 0);
    }

    #[test]
    fn test_delete_discards_only_given_rows() {
        let db = create_test_db();
        db.insert_events(&[create_test_event("a"), create_test_event("b")])
            .unwrap();

        let leased = db.lease_events(1).unwrap();
        assert_eq!(db.delete_events(&[leased[0].id]).unwrap(), 1);

        let remaining = db.lease_events(10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].record.event, "b");
    }

    #[test]
    fn test_failed_attempt_retains_rows() {
        let db = create_test_db();
        db.insert_events(&[create_test_event("a")]).unwrap();

        let leased = db.lease_events(10).unwrap();
        let ids: Vec<i64> = leased.iter().map(|e| e.id).collect();
        db.record_failed_attempt(&ids).unwrap();
        db.record_failed_attempt(&ids).unwrap();

        let again = db.lease_events(10).unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].attempts, 2);

        let stats = db.stats().unwrap();
        assert_eq!(stats.pending_events, 1);
        assert_eq!(stats.retried_events, 1);
        assert!(stats.oldest_event_at.is_some());
    }

    #[test]
    fn test_corrupt_payload_dropped() {
        let db = create_test_db();
        db.insert_events(&[create_test_event("good")]).unwrap();
        db.conn()
            .execute(
                "INSERT INTO events (event_name, session_id, payload, created_at) VALUES ('bad', 's', 'not json', '2025-01-01T00:00:00Z')",
                [],
            )
            .unwrap();

        let leased = db.lease_events(10).unwrap();
        assert_eq!(leased.len(), 1);
        assert_eq!(leased[0].record.event, "good");
        assert_eq!(db.count_events().unwrap(), 1);
    }

    #[test]
    fn test_user_id_persistence() {
        let db = create_test_db();
        assert!(db.get_user_id().unwrap().is_none());

        db.save_user_id("user-abc").unwrap();
        assert_eq!(db.get_user_id().unwrap().as_deref(), Some("user-abc"));

        db.save_user_id("user-def").unwrap();
        assert_eq!(db.get_user_id().unwrap().as_deref(), Some("user-def"));
    }

    #[test]
    fn test_empty_stats() {
        let db = create_test_db();
        let stats = db.stats().unwrap();
        assert_eq!(stats.pending_events, 0);
        assert_eq!(stats.retried_events, 0);
        assert!(stats.oldest_event_at.is_none());
    }
}
