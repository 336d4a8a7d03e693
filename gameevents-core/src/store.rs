//! Event store contract and the SQLite-backed local store
//!
//! The event manager only sees [`EventStore`]. The deliverer only sees
//! [`BatchSource`]. [`LocalEventStore`] implements both:
//!
//! ```text
//! add_event ──► memory buffer ──flush──► events table ──lease──► EventSender
//!                                              ▲                      │
//!                                              └── release (failure) ─┤
//!                                         delete ◄── acknowledge ─────┘
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Notify;

use crate::db::{Database, StoreStats};
use crate::error::Result;
use crate::types::{EventRecord, StoredEvent};

/// Durable event storage used by the event manager.
///
/// Implementations serialize their own internal access; the manager calls
/// these repeatedly from the coordination thread without extra locking.
pub trait EventStore: Send + Sync {
    /// Persisted durable user id, if one exists
    fn user_id(&self) -> Result<Option<String>>;

    /// Persist the durable user id
    fn save_user_id(&self, user_id: &str) -> Result<()>;

    /// Append an event. Ownership of the record passes to the store.
    fn add_event(&self, event: EventRecord) -> Result<()>;

    /// Make every event added so far durable and hand it to the deliverer.
    fn flush(&self) -> Result<()>;
}

/// Source of persisted events for the deliverer.
///
/// A leased batch stays in the store until it is acknowledged (deleted) or
/// released (kept for a later attempt).
pub trait BatchSource: Send + Sync {
    /// Oldest persisted events, at most `limit`, in append order
    fn lease_batch(&self, limit: usize) -> Result<Vec<StoredEvent>>;

    /// The endpoint accepted these events; discard them
    fn acknowledge(&self, ids: &[i64]) -> Result<()>;

    /// Delivery failed; keep these events for the next attempt
    fn release(&self, ids: &[i64]) -> Result<()>;
}

/// SQLite-backed store with an in-memory append buffer.
///
/// `add_event` only buffers. `flush` writes the buffer in one transaction
/// and wakes the deliverer. The buffer is also written once it reaches
/// `max_buffered` events so an unflushed burst cannot grow without bound.
pub struct LocalEventStore {
    db: Database,
    buffer: Mutex<Vec<EventRecord>>,
    max_buffered: usize,
    wake: Arc<Notify>,
}

impl LocalEventStore {
    /// Wrap a migrated database.
    pub fn new(db: Database, max_buffered: usize) -> Self {
        Self {
            db,
            buffer: Mutex::new(Vec::new()),
            max_buffered: max_buffered.max(1),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Notifier signalled whenever new events become durable.
    pub fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Events added but not yet flushed
    pub fn buffered(&self) -> usize {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.db.stats()
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn persist_buffer(&self) -> Result<usize> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        if buffer.is_empty() {
            return Ok(0);
        }

        // Keep the buffer intact if the write fails so the next flush retries.
        let written = self.db.insert_events(&buffer)?;
        buffer.clear();
        Ok(written)
    }
}

impl EventStore for LocalEventStore {
    fn user_id(&self) -> Result<Option<String>> {
        self.db.get_user_id()
    }

    fn save_user_id(&self, user_id: &str) -> Result<()> {
        self.db.save_user_id(user_id)
    }

    fn add_event(&self, event: EventRecord) -> Result<()> {
        let should_persist = {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            buffer.push(event);
            buffer.len() >= self.max_buffered
        };

        if should_persist {
            let written = self.persist_buffer()?;
            tracing::debug!(written, "Event buffer full, persisted without flush");
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let written = self.persist_buffer()?;
        if written > 0 {
            tracing::debug!(written, "Flushed events to local store");
        }
        // Wake even when nothing new was written: retained events from a
        // failed attempt get another chance on every flush.
        self.wake.notify_one();
        Ok(())
    }
}

impl BatchSource for LocalEventStore {
    fn lease_batch(&self, limit: usize) -> Result<Vec<StoredEvent>> {
        self.db.lease_events(limit)
    }

    fn acknowledge(&self, ids: &[i64]) -> Result<()> {
        self.db.delete_events(ids)?;
        Ok(())
    }

    fn release(&self, ids: &[i64]) -> Result<()> {
        self.db.record_failed_attempt(ids)?;
        Ok(())
    }
}
