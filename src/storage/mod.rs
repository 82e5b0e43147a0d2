pub mod csv_file;
pub mod json_file;
pub mod sqlite;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

use chrono::Local;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collection::EventCollection;
use crate::models::EventError;

pub use csv_file::CsvStorage;
pub use json_file::JsonStorage;
pub use sqlite::{SqliteStorage, SqliteStore};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Event(#[from] EventError),
    #[error("unsupported storage format: {0}")]
    UnsupportedFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    Json,
    Csv,
    Sqlite,
}

impl StorageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            StorageFormat::Json => "json",
            StorageFormat::Csv => "csv",
            StorageFormat::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for StorageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for StorageFormat {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(StorageFormat::Json),
            "csv" => Ok(StorageFormat::Csv),
            "sqlite" | "db" => Ok(StorageFormat::Sqlite),
            other => Err(StorageError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// A persistence backend. Backends only see the collection's plain-data
/// projection and rebuild records through `EventRecord::from_row`.
pub trait EventStorage {
    fn format(&self) -> StorageFormat;

    /// Writes `events` to `destination` and returns the path written.
    fn save(&self, events: &EventCollection, destination: &Path) -> Result<PathBuf, StorageError>;

    /// Loads a collection without duplicate checks. A missing file is an empty
    /// collection; malformed rows are skipped.
    fn load(&self, source: &Path) -> Result<EventCollection, StorageError>;
}

/// Names, finds and merges event files under one data directory.
pub struct StorageManager {
    data_dir: PathBuf,
    json: JsonStorage,
    csv: CsvStorage,
    sqlite: SqliteStorage,
}

impl StorageManager {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            json: JsonStorage,
            csv: CsvStorage,
            sqlite: SqliteStorage,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn backend(&self, format: StorageFormat) -> &dyn EventStorage {
        match format {
            StorageFormat::Json => &self.json,
            StorageFormat::Csv => &self.csv,
            StorageFormat::Sqlite => &self.sqlite,
        }
    }

    /// File-based formats get `events_<timestamp>.<ext>` (or `events.<ext>`);
    /// SQLite always upserts into `events.sqlite`.
    pub fn save_events(
        &self,
        events: &EventCollection,
        formats: &[StorageFormat],
        timestamp: bool,
    ) -> Result<BTreeMap<StorageFormat, PathBuf>, StorageError> {
        if formats.is_empty() {
            return Err(StorageError::UnsupportedFormat("no format given".into()));
        }
        let base_name = if timestamp {
            format!("events_{}", Local::now().format("%Y%m%d_%H%M%S"))
        } else {
            "events".to_string()
        };

        let mut saved = BTreeMap::new();
        for format in formats {
            let file_name = match format {
                StorageFormat::Sqlite => "events.sqlite".to_string(),
                other => format!("{base_name}.{}", other.extension()),
            };
            let path = self
                .backend(*format)
                .save(events, &self.data_dir.join(file_name))?;
            saved.insert(*format, path);
        }
        Ok(saved)
    }

    pub fn load_file(
        &self,
        file_name: &str,
        format: StorageFormat,
    ) -> Result<EventCollection, StorageError> {
        self.backend(format).load(&self.data_dir.join(file_name))
    }

    /// Loads the most recently modified `events*.<ext>` file.
    pub fn load_latest(&self, format: StorageFormat) -> Result<EventCollection, StorageError> {
        let latest = self
            .event_files(format)?
            .into_iter()
            .max_by(|(a_path, a_time), (b_path, b_time)| {
                a_time.cmp(b_time).then_with(|| a_path.cmp(b_path))
            });
        match latest {
            Some((path, _)) => self.backend(format).load(&path),
            None => {
                tracing::warn!(dir = %self.data_dir.display(), "no {format} event files found");
                Ok(EventCollection::new())
            }
        }
    }

    /// Merges every JSON event file (in file-name order) with duplicate checks.
    pub fn load_multiple(&self) -> Result<EventCollection, StorageError> {
        let mut files = self.event_files(StorageFormat::Json)?;
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let mut merged = EventCollection::new();
        for (path, _) in files {
            match self.json.load(&path) {
                Ok(loaded) => {
                    let added = merged.add_many(loaded, true);
                    tracing::info!(path = %path.display(), added, "merged unique events");
                }
                Err(err) => {
                    tracing::error!(path = %path.display(), "error loading event file: {err}");
                }
            }
        }
        Ok(merged)
    }

    pub fn merge_all(&self) -> Result<EventCollection, StorageError> {
        let mut collection = self.load_multiple()?;
        let removed = collection.remove_duplicates();
        tracing::info!(
            unique = collection.len(),
            removed,
            "merged events from all files"
        );
        Ok(collection)
    }

    fn event_files(
        &self,
        format: StorageFormat,
    ) -> Result<Vec<(PathBuf, SystemTime)>, StorageError> {
        if !self.data_dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let path = entry.path();
            let matches = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| {
                    name.starts_with("events")
                        && name.ends_with(&format!(".{}", format.extension()))
                })
                .unwrap_or(false);
            if !matches || !path.is_file() {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            files.push((path, modified));
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventRecord, RawEvent};
    use chrono::{TimeZone, Utc};

    fn sample_collection() -> EventCollection {
        let mut collection = EventCollection::new();
        for i in 1..=3 {
            let date = Utc
                .with_ymd_and_hms(2025, 7, 20 + i, 18, 0, 0)
                .single()
                .expect("valid date");
            let event = EventRecord::new(RawEvent::new(
                format!("Event {i}"),
                date,
                "NYC",
                format!("https://example.com/{i}"),
            ))
            .expect("valid event");
            collection.add(event, true);
        }
        collection
    }

    #[test]
    fn parses_formats() {
        assert_eq!("JSON".parse::<StorageFormat>().ok(), Some(StorageFormat::Json));
        assert_eq!("db".parse::<StorageFormat>().ok(), Some(StorageFormat::Sqlite));
        assert!(matches!(
            "xml".parse::<StorageFormat>(),
            Err(StorageError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn saves_every_requested_format() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = StorageManager::new(dir.path());
        let saved = manager
            .save_events(
                &sample_collection(),
                &[StorageFormat::Json, StorageFormat::Csv, StorageFormat::Sqlite],
                true,
            )
            .expect("save");
        assert_eq!(saved.len(), 3);
        assert!(saved.values().all(|path| path.exists()));

        let loaded = manager.load_latest(StorageFormat::Json).expect("load latest");
        assert_eq!(loaded.len(), 3);

        let csv_name = saved[&StorageFormat::Csv]
            .file_name()
            .and_then(|n| n.to_str())
            .expect("file name")
            .to_string();
        let from_csv = manager
            .load_file(&csv_name, StorageFormat::Csv)
            .expect("load csv");
        assert_eq!(from_csv.len(), 3);
    }

    #[test]
    fn rejects_empty_format_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = StorageManager::new(dir.path());
        assert!(manager.save_events(&sample_collection(), &[], false).is_err());
    }

    #[test]
    fn latest_of_nothing_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = StorageManager::new(dir.path().join("missing"));
        let loaded = manager.load_latest(StorageFormat::Csv).expect("load");
        assert!(loaded.is_empty());
    }
}
