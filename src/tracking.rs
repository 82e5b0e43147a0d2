use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collection::EventCollection;
use crate::models::parse_timestamp;
use crate::storage::StorageError;
use crate::utils;

/// Remembers which events already went out in a digest.
pub trait SentTracker {
    fn contains(&self, event_id: &str) -> Result<bool, StorageError>;
    fn mark_sent(&mut self, event_ids: &[String], at: DateTime<Utc>) -> Result<(), StorageError>;
}

impl SentTracker for HashSet<String> {
    fn contains(&self, event_id: &str) -> Result<bool, StorageError> {
        Ok(HashSet::contains(self, event_id))
    }

    fn mark_sent(&mut self, event_ids: &[String], _at: DateTime<Utc>) -> Result<(), StorageError> {
        self.extend(event_ids.iter().cloned());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestRecord {
    pub date: String,
    pub event_count: usize,
    pub event_ids: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct TrackingData {
    sent_events: BTreeMap<String, String>,
    digest_history: Vec<DigestRecord>,
}

/// JSON-file tracker: `sent_events` maps id to digest date, `digest_history`
/// lists each digest in send order.
pub struct DigestTracker {
    path: PathBuf,
    data: TrackingData,
}

impl DigestTracker {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let data = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            TrackingData::default()
        };
        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<(), StorageError> {
        utils::ensure_parent(&self.path)?;
        fs::write(&self.path, serde_json::to_string_pretty(&self.data)?)?;
        Ok(())
    }

    pub fn history(&self) -> &[DigestRecord] {
        &self.data.digest_history
    }

    pub fn last_digest(&self) -> Option<&DigestRecord> {
        self.data.digest_history.last()
    }

    pub fn last_digest_date(&self) -> Option<DateTime<Utc>> {
        self.last_digest()
            .and_then(|record| parse_timestamp(&record.date))
    }
}

impl SentTracker for DigestTracker {
    fn contains(&self, event_id: &str) -> Result<bool, StorageError> {
        Ok(self.data.sent_events.contains_key(event_id))
    }

    fn mark_sent(&mut self, event_ids: &[String], at: DateTime<Utc>) -> Result<(), StorageError> {
        let date = at.to_rfc3339();
        for id in event_ids {
            self.data.sent_events.insert(id.clone(), date.clone());
        }
        self.data.digest_history.push(DigestRecord {
            date,
            event_count: event_ids.len(),
            event_ids: event_ids.to_vec(),
        });
        self.save()
    }
}

/// Events the tracker has not seen yet, in collection order.
pub fn filter_unsent(
    events: &EventCollection,
    tracker: &dyn SentTracker,
) -> Result<EventCollection, StorageError> {
    let mut fresh = EventCollection::new();
    for event in events {
        if !tracker.contains(event.event_id())? {
            fresh.add(event.clone(), false);
        }
    }
    Ok(fresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventRecord, RawEvent};
    use chrono::Duration;

    fn events() -> EventCollection {
        let now = Utc::now();
        EventCollection::from_records(
            ["Rooftop Cinema", "Salsa Social", "Book Fair"]
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    EventRecord::new(RawEvent::new(
                        *name,
                        now + Duration::days(i as i64 + 1),
                        "Manhattan",
                        "https://example.com",
                    ))
                    .expect("valid event")
                })
                .collect(),
        )
    }

    #[test]
    fn persists_sent_ids_and_history() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("digest_tracking.json");
        let collection = events();
        let sent = vec![collection[0].event_id().to_string()];
        let at = Utc::now();

        let mut tracker = DigestTracker::load(&path).expect("load");
        assert!(tracker.last_digest_date().is_none());
        tracker.mark_sent(&sent, at).expect("mark");

        let reloaded = DigestTracker::load(&path).expect("reload");
        assert!(reloaded.contains(&sent[0]).expect("contains"));
        assert_eq!(reloaded.history().len(), 1);
        assert_eq!(reloaded.history()[0].event_count, 1);
        assert_eq!(reloaded.last_digest_date(), Some(at));
    }

    #[test]
    fn filters_already_sent_events() {
        let collection = events();
        let mut tracker: HashSet<String> = HashSet::new();
        tracker
            .mark_sent(&[collection[1].event_id().to_string()], Utc::now())
            .expect("mark");
        let fresh = filter_unsent(&collection, &tracker).expect("filter");
        let names: Vec<_> = fresh.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["Rooftop Cinema", "Book Fair"]);
    }
}
