//! Tracker stores: durable, ordered, per-conversation event logs

use super::event::Event;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Event serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Tracker store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Append-only event log keyed by conversation id
#[async_trait]
pub trait TrackerStore: Send + Sync {
    /// Durably append `events` after everything already stored for `sender_id`.
    /// Either all events are stored or none are.
    async fn append(&self, sender_id: &str, events: &[Event]) -> StoreResult<()>;

    /// Every stored event for `sender_id`, oldest first
    async fn load(&self, sender_id: &str) -> StoreResult<Vec<Event>>;

    /// Conversation ids with at least one stored event
    async fn sender_ids(&self) -> StoreResult<Vec<String>>;
}

#[async_trait]
impl<T: TrackerStore + ?Sized> TrackerStore for Arc<T> {
    async fn append(&self, sender_id: &str, events: &[Event]) -> StoreResult<()> {
        (**self).append(sender_id, events).await
    }

    async fn load(&self, sender_id: &str) -> StoreResult<Vec<Event>> {
        (**self).load(sender_id).await
    }

    async fn sender_ids(&self) -> StoreResult<Vec<String>> {
        (**self).sender_ids().await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> StoreResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
}

// ============================================================================
// In-memory store
// ============================================================================

/// Volatile store, used when no database path is configured and in tests
#[derive(Default)]
pub struct InMemoryTrackerStore {
    logs: Mutex<HashMap<String, Vec<Event>>>,
}

impl InMemoryTrackerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrackerStore for InMemoryTrackerStore {
    async fn append(&self, sender_id: &str, events: &[Event]) -> StoreResult<()> {
        lock(&self.logs)?
            .entry(sender_id.to_string())
            .or_default()
            .extend_from_slice(events);
        Ok(())
    }

    async fn load(&self, sender_id: &str) -> StoreResult<Vec<Event>> {
        Ok(lock(&self.logs)?.get(sender_id).cloned().unwrap_or_default())
    }

    async fn sender_ids(&self) -> StoreResult<Vec<String>> {
        let mut ids: Vec<String> = lock(&self.logs)?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

// ============================================================================
// SQLite store
// ============================================================================

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS events (
    sender_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    event_type TEXT NOT NULL,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (sender_id, sequence_id)
);

CREATE INDEX IF NOT EXISTS idx_events_sender ON events(sender_id, sequence_id);
";

/// Event log persisted in a SQLite database
#[derive(Clone)]
pub struct SqliteTrackerStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTrackerStore {
    /// Open or create the database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl TrackerStore for SqliteTrackerStore {
    async fn append(&self, sender_id: &str, events: &[Event]) -> StoreResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        let last: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) FROM events WHERE sender_id = ?1",
            params![sender_id],
            |row| row.get(0),
        )?;
        let now = Utc::now().to_rfc3339();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO events (sender_id, sequence_id, event_type, data, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (offset, event) in (1_i64..).zip(events) {
                let data = serde_json::to_string(event)?;
                stmt.execute(params![sender_id, last + offset, event.kind(), data, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn load(&self, sender_id: &str) -> StoreResult<Vec<Event>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT data FROM events WHERE sender_id = ?1 ORDER BY sequence_id ASC",
        )?;
        let rows = stmt.query_map(params![sender_id], |row| row.get::<_, String>(0))?;
        let mut events = Vec::new();
        for row in rows {
            events.push(serde_json::from_str(&row?)?);
        }
        Ok(events)
    }

    async fn sender_ids(&self) -> StoreResult<Vec<String>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare("SELECT DISTINCT sender_id FROM events ORDER BY sender_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_events() -> Vec<Event> {
        vec![
            Event::slot("cuisine", json!("thai")),
            Event::action("utter_greet"),
            Event::FormDeactivated,
        ]
    }

    #[tokio::test]
    async fn sqlite_store_preserves_order_across_appends() {
        let store = SqliteTrackerStore::open_in_memory().unwrap();
        let events = sample_events();
        store.append("alice", &events[..2]).await.unwrap();
        store.append("alice", &events[2..]).await.unwrap();
        store.append("bob", &[Event::Restarted]).await.unwrap();

        assert_eq!(store.load("alice").await.unwrap(), events);
        assert_eq!(store.load("bob").await.unwrap(), vec![Event::Restarted]);
        assert!(store.load("carol").await.unwrap().is_empty());
        assert_eq!(store.sender_ids().await.unwrap(), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.db");
        {
            let store = SqliteTrackerStore::open(&path).unwrap();
            store.append("alice", &sample_events()).await.unwrap();
        }
        let store = SqliteTrackerStore::open(&path).unwrap();
        assert_eq!(store.load("alice").await.unwrap(), sample_events());
    }

    #[tokio::test]
    async fn in_memory_store_keeps_conversations_apart() {
        let store = InMemoryTrackerStore::new();
        store.append("alice", &sample_events()).await.unwrap();
        assert!(store.load("bob").await.unwrap().is_empty());
        assert_eq!(store.load("alice").await.unwrap().len(), 3);
    }
}
