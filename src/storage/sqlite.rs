use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{EventStorage, StorageError, StorageFormat};
use crate::collection::EventCollection;
use crate::models::{EventRecord, EventRow};
use crate::tracking::SentTracker;
use crate::utils;

const UPSERT_EVENT: &str = "INSERT INTO events (id, payload, first_seen_utc, last_seen_utc)
     VALUES (?1, ?2, ?3, ?3)
     ON CONFLICT(id) DO UPDATE SET
       payload = excluded.payload,
       last_seen_utc = excluded.last_seen_utc";

/// Event rows keyed by `event_id`, plus a ledger of ids already sent in a digest.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        utils::ensure_parent(path)?;
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events(
                id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                first_seen_utc TEXT NOT NULL,
                last_seen_utc TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS sent_events(
                event_id TEXT PRIMARY KEY,
                sent_at_utc TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Insert or refresh; re-saving the same event only bumps `last_seen_utc`.
    pub fn upsert_event(&self, event: &EventRecord) -> Result<(), StorageError> {
        let now = Utc::now().to_rfc3339();
        let payload = serde_json::to_string(&event.to_row())?;
        self.conn.execute(
            UPSERT_EVENT,
            params![event.event_id(), payload, now],
        )?;
        Ok(())
    }

    pub fn upsert_events(&mut self, events: &EventCollection) -> Result<usize, StorageError> {
        let tx = self.conn.transaction()?;
        {
            let now = Utc::now().to_rfc3339();
            let mut stmt = tx.prepare(UPSERT_EVENT)?;
            for event in events {
                let payload = serde_json::to_string(&event.to_row())?;
                stmt.execute(params![event.event_id(), payload, now])?;
            }
        }
        tx.commit()?;
        Ok(events.len())
    }

    /// Makes the table hold exactly `events`. Ids that survive keep their
    /// `first_seen_utc`; ids missing from `events` are deleted.
    pub fn replace_events(&mut self, events: &EventCollection) -> Result<usize, StorageError> {
        let keep: HashSet<&str> = events.iter().map(EventRecord::event_id).collect();
        let tx = self.conn.transaction()?;
        let removed = {
            let now = Utc::now().to_rfc3339();
            let mut upsert = tx.prepare(UPSERT_EVENT)?;
            for event in events {
                let payload = serde_json::to_string(&event.to_row())?;
                upsert.execute(params![event.event_id(), payload, now])?;
            }

            let stored: Vec<String> = tx
                .prepare("SELECT id FROM events")?
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            let mut delete = tx.prepare("DELETE FROM events WHERE id = ?1")?;
            let mut removed = 0;
            for id in stored.iter().filter(|id| !keep.contains(id.as_str())) {
                removed += delete.execute(params![id])?;
            }
            removed
        };
        tx.commit()?;
        if removed > 0 {
            tracing::info!(removed, "dropped stored events no longer in the collection");
        }
        Ok(keep.len())
    }

    pub fn first_seen(&self, id: &str) -> Result<Option<String>, StorageError> {
        let seen = self
            .conn
            .query_row(
                "SELECT first_seen_utc FROM events WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(seen)
    }

    /// Rows come back in first-insert order; unreadable payloads are skipped.
    pub fn load_events(&self) -> Result<Vec<EventRecord>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, payload FROM events ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, payload) = row?;
            let parsed = serde_json::from_str::<EventRow>(&payload)
                .map_err(|err| err.to_string())
                .and_then(|row| EventRecord::from_row(row).map_err(|err| err.to_string()));
            match parsed {
                Ok(event) => out.push(event),
                Err(err) => tracing::error!(event_id = %id, "error loading stored event: {err}"),
            }
        }
        Ok(out)
    }

    pub fn get_event(&self, id: &str) -> Result<Option<EventRecord>, StorageError> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM events WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(payload) => {
                let row: EventRow = serde_json::from_str(&payload)?;
                Ok(Some(EventRecord::from_row(row)?))
            }
            None => Ok(None),
        }
    }

    pub fn sent_at(&self, event_id: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        let sent: Option<DateTime<Utc>> = self
            .conn
            .query_row(
                "SELECT sent_at_utc FROM sent_events WHERE event_id = ?1",
                params![event_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(sent)
    }
}

impl SentTracker for SqliteStore {
    fn contains(&self, event_id: &str) -> Result<bool, StorageError> {
        Ok(self.sent_at(event_id)?.is_some())
    }

    fn mark_sent(&mut self, event_ids: &[String], at: DateTime<Utc>) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO sent_events (event_id, sent_at_utc) VALUES (?1, ?2)
                 ON CONFLICT(event_id) DO UPDATE SET sent_at_utc = excluded.sent_at_utc",
            )?;
            for id in event_ids {
                stmt.execute(params![id, at])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

pub struct SqliteStorage;

impl EventStorage for SqliteStorage {
    fn format(&self) -> StorageFormat {
        StorageFormat::Sqlite
    }

    fn save(&self, events: &EventCollection, destination: &Path) -> Result<PathBuf, StorageError> {
        let mut store = SqliteStore::open(destination)?;
        let count = store.replace_events(events)?;
        tracing::info!(path = %destination.display(), count, "saved events");
        Ok(destination.to_path_buf())
    }

    fn load(&self, source: &Path) -> Result<EventCollection, StorageError> {
        if !source.exists() {
            tracing::warn!(path = %source.display(), "event database not found");
            return Ok(EventCollection::new());
        }
        let store = SqliteStore::open(source)?;
        let collection = EventCollection::from_records(store.load_events()?);
        tracing::info!(path = %source.display(), count = collection.len(), "loaded events");
        Ok(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawEvent;
    use chrono::{Duration, TimeZone};

    fn event(name: &str, day: u32) -> EventRecord {
        let date = Utc
            .with_ymd_and_hms(2025, 9, day, 20, 0, 0)
            .single()
            .expect("valid date");
        EventRecord::new(RawEvent::new(name, date, "Brooklyn Steel", "https://example.com"))
            .expect("valid event")
    }

    #[test]
    fn upsert_is_idempotent() {
        let mut store = SqliteStore::open_in_memory().expect("open");
        let collection =
            EventCollection::from_records(vec![event("Indie Night", 5), event("Jazz Brunch", 6)]);
        store.upsert_events(&collection).expect("first save");
        store.upsert_events(&collection).expect("second save");
        store.upsert_event(&collection[0]).expect("single upsert");

        let loaded = store.load_events().expect("load");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].name(), "Indie Night");

        let fetched = store
            .get_event(collection[1].event_id())
            .expect("lookup")
            .expect("present");
        assert_eq!(fetched.name(), "Jazz Brunch");
        assert!(store.get_event("ffffffffffff").expect("lookup").is_none());
    }

    #[test]
    fn save_after_dedup_drops_removed_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.sqlite");
        let mut collection = EventCollection::from_records(vec![
            event("NYC Food Festival", 7),
            event("NYC Food Festivals", 7),
            event("Jazz Brunch", 8),
        ]);
        SqliteStorage.save(&collection, &path).expect("first save");
        let kept_id = collection[0].event_id().to_string();
        let first_seen = SqliteStore::open(&path)
            .expect("open")
            .first_seen(&kept_id)
            .expect("lookup");

        assert_eq!(collection.remove_duplicates(), 1);
        SqliteStorage.save(&collection, &path).expect("second save");

        let loaded = SqliteStorage.load(&path).expect("load");
        assert_eq!(loaded.len(), 2);
        let names: Vec<_> = loaded.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["NYC Food Festival", "Jazz Brunch"]);
        let store = SqliteStore::open(&path).expect("reopen");
        assert_eq!(store.first_seen(&kept_id).expect("lookup"), first_seen);
    }

    #[test]
    fn tracks_sent_ids() {
        let mut store = SqliteStore::open_in_memory().expect("open");
        let at = Utc::now() - Duration::hours(1);
        store
            .mark_sent(&["abc123abc123".to_string()], at)
            .expect("mark sent");
        assert!(store.contains("abc123abc123").expect("contains"));
        assert!(!store.contains("000000000000").expect("contains"));
        let stored = store.sent_at("abc123abc123").expect("sent at").expect("present");
        assert_eq!(stored.timestamp(), at.timestamp());
    }

    #[test]
    fn storage_round_trip_through_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.sqlite");
        let collection =
            EventCollection::from_records(vec![event("Indie Night", 5), event("Jazz Brunch", 6)]);
        SqliteStorage.save(&collection, &path).expect("save");
        SqliteStorage.save(&collection, &path).expect("save again");
        let loaded = SqliteStorage.load(&path).expect("load");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].event_id(), collection[1].event_id());
    }
}
