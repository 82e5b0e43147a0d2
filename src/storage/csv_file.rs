use std::path::{Path, PathBuf};

use super::{EventStorage, StorageError, StorageFormat};
use crate::collection::EventCollection;
use crate::models::{EventRecord, EventRow};
use crate::utils;

/// One row per event under the `EventRecord::csv_headers` header line.
pub struct CsvStorage;

impl EventStorage for CsvStorage {
    fn format(&self) -> StorageFormat {
        StorageFormat::Csv
    }

    fn save(&self, events: &EventCollection, destination: &Path) -> Result<PathBuf, StorageError> {
        utils::ensure_parent(destination)?;
        let mut writer = csv::Writer::from_path(destination)?;
        writer.write_record(EventRecord::csv_headers())?;
        for event in events {
            writer.write_record(event.to_csv_row())?;
        }
        writer.flush()?;
        tracing::info!(path = %destination.display(), count = events.len(), "saved events");
        Ok(destination.to_path_buf())
    }

    fn load(&self, source: &Path) -> Result<EventCollection, StorageError> {
        if !source.exists() {
            tracing::warn!(path = %source.display(), "event file not found");
            return Ok(EventCollection::new());
        }
        let mut reader = csv::Reader::from_path(source)?;
        let mut records = Vec::new();
        for (position, row) in reader.deserialize::<EventRow>().enumerate() {
            let parsed = row
                .map_err(|err| err.to_string())
                .and_then(|row| EventRecord::from_row(row).map_err(|err| err.to_string()));
            match parsed {
                Ok(record) => records.push(record),
                Err(err) => tracing::error!(
                    path = %source.display(),
                    position,
                    "error loading event from csv: {err}"
                ),
            }
        }

        let collection = EventCollection::from_records(records);
        tracing::info!(path = %source.display(), count = collection.len(), "loaded events");
        Ok(collection)
    }
}
