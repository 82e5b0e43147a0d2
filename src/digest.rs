use chrono::{DateTime, Utc};

use crate::collection::EventCollection;
use crate::models::EventRecord;
use crate::storage::StorageError;
use crate::tracking::SentTracker;

#[derive(Debug, Clone)]
pub struct DigestEntry {
    /// 1-based number the photographer replies with.
    pub number: usize,
    pub event: EventRecord,
}

/// Unsent upcoming events, sorted by date and numbered for the digest email.
#[derive(Debug, Clone)]
pub struct DigestPlan {
    pub digest_date: DateTime<Utc>,
    pub entries: Vec<DigestEntry>,
}

impl DigestPlan {
    pub fn build(
        events: &EventCollection,
        tracker: &dyn SentTracker,
        digest_date: DateTime<Utc>,
        max_events: Option<usize>,
    ) -> Result<Self, StorageError> {
        let mut upcoming = Vec::new();
        for event in events.get_upcoming(Some(digest_date)) {
            if !tracker.contains(event.event_id())? {
                upcoming.push(event.clone());
            }
        }
        upcoming.sort_by_key(|event| event.date());
        if let Some(max) = max_events {
            upcoming.truncate(max);
        }

        let entries = upcoming
            .into_iter()
            .enumerate()
            .map(|(i, event)| DigestEntry {
                number: i + 1,
                event,
            })
            .collect();
        Ok(Self {
            digest_date,
            entries,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn event_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.event.event_id().to_string())
            .collect()
    }

    pub fn subject(&self) -> String {
        format!(
            "Event digest for {}: {} new events",
            self.digest_date.format("%B %d, %Y"),
            self.entries.len()
        )
    }

    pub fn render_text(&self) -> String {
        let mut lines = vec![self.subject(), String::new()];
        for entry in &self.entries {
            let event = &entry.event;
            lines.push(format!("{}. {}", entry.number, event.name()));
            lines.push(format!(
                "   When: {}",
                event.date().format("%A, %B %d at %I:%M %p")
            ));
            lines.push(format!("   Where: {}", event.location()));
            if let Some(email) = event.contact_email() {
                lines.push(format!("   Contact: {email}"));
            }
            lines.push(format!("   Link: {}", event.source_url()));
            lines.push(String::new());
        }
        lines.push(
            "Reply with the numbers of the events you want to shoot (e.g. \"1, 3, 5\").".to_string(),
        );
        let mut text = lines.join("\n");
        text.push('\n');
        text
    }
}
