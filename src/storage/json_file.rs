use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use super::{EventStorage, StorageError, StorageFormat};
use crate::collection::EventCollection;
use crate::models::{EventRecord, EventRow};
use crate::utils;

#[derive(Debug, Serialize)]
struct Metadata {
    total_events: usize,
    export_date: String,
    sources: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Document {
    metadata: Metadata,
    events: Vec<EventRow>,
}

/// `{ "metadata": {...}, "events": [...] }` on save; also reads a bare array.
pub struct JsonStorage;

impl EventStorage for JsonStorage {
    fn format(&self) -> StorageFormat {
        StorageFormat::Json
    }

    fn save(&self, events: &EventCollection, destination: &Path) -> Result<PathBuf, StorageError> {
        utils::ensure_parent(destination)?;
        let document = Document {
            metadata: Metadata {
                total_events: events.len(),
                export_date: Utc::now().to_rfc3339(),
                sources: events.sources(),
            },
            events: events.to_list(),
        };
        fs::write(destination, serde_json::to_string_pretty(&document)?)?;
        tracing::info!(path = %destination.display(), count = events.len(), "saved events");
        Ok(destination.to_path_buf())
    }

    fn load(&self, source: &Path) -> Result<EventCollection, StorageError> {
        if !source.exists() {
            tracing::warn!(path = %source.display(), "event file not found");
            return Ok(EventCollection::new());
        }
        let contents = fs::read_to_string(source)?;
        let document: Value = serde_json::from_str(&contents)?;
        let rows = match document {
            Value::Array(rows) => rows,
            Value::Object(mut map) => match map.remove("events") {
                Some(Value::Array(rows)) => rows,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };

        let mut records = Vec::with_capacity(rows.len());
        for (position, value) in rows.into_iter().enumerate() {
            let parsed = serde_json::from_value::<EventRow>(value)
                .map_err(|err| err.to_string())
                .and_then(|row| EventRecord::from_row(row).map_err(|err| err.to_string()));
            match parsed {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::error!(path = %source.display(), position, "error loading event: {err}")
                }
            }
        }

        let collection = EventCollection::from_records(records);
        tracing::info!(path = %source.display(), count = collection.len(), "loaded events");
        Ok(collection)
    }
}
