use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::collection::EventCollection;
use crate::storage::StorageError;
use crate::utils;

/// Digest numbers outside this range are treated as noise (years, phone numbers).
const MAX_SELECTION: usize = 50;

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid number regex"));
static LIST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d+(?:\s*,\s*\d+)*(?:\s+and\s+\d+)?").expect("valid list regex")
});
static LONE_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+[.):]?\s*$").expect("valid lone number regex"));
static CONTEXT_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(?:event|number|#)\s*(\d+)",
        r"(?i)(\d+)(?:st|nd|rd|th)\s+(?:event|one)",
        r"(?i)interested\s+in\s+(\d+)",
        r"(?i)select\s+(\d+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid context regex"))
    .collect()
});

/// Turns a free-text reply into sorted, distinct 1-based digest numbers.
///
/// Strategies run in order and the first one that finds anything wins:
/// comma lists, then numbers alone on a line, then phrases like "event 3".
pub fn parse_reply(body: &str) -> Vec<usize> {
    let cleaned = clean_reply_body(body);

    let mut numbers = comma_separated_numbers(&cleaned);
    if numbers.is_empty() {
        numbers = numbers_on_lines(&cleaned);
    }
    if numbers.is_empty() {
        numbers = numbers_with_context(&cleaned);
    }

    let selected: Vec<usize> = numbers
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    tracing::info!(?selected, "parsed event selections");
    selected
}

fn clean_reply_body(body: &str) -> String {
    let mut kept = Vec::new();
    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('>') {
            continue;
        }
        if trimmed == "--" || trimmed.starts_with("Sent from") {
            break;
        }
        if ["From:", "To:", "Subject:", "Date:"]
            .iter()
            .any(|header| line.contains(header))
        {
            continue;
        }
        kept.push(line);
    }
    kept.join("\n")
}

fn in_range(n: usize) -> bool {
    (1..=MAX_SELECTION).contains(&n)
}

fn comma_separated_numbers(text: &str) -> Vec<usize> {
    LIST_RE
        .find_iter(text)
        .flat_map(|m| NUMBER_RE.find_iter(m.as_str()))
        .filter_map(|n| n.as_str().parse::<usize>().ok())
        .filter(|n| in_range(*n))
        .collect()
}

fn numbers_on_lines(text: &str) -> Vec<usize> {
    text.lines()
        .map(str::trim)
        .filter(|line| LONE_NUMBER_RE.is_match(line))
        .filter_map(|line| NUMBER_RE.find(line))
        .filter_map(|n| n.as_str().parse::<usize>().ok())
        .filter(|n| in_range(*n))
        .collect()
}

fn numbers_with_context(text: &str) -> Vec<usize> {
    CONTEXT_RES
        .iter()
        .flat_map(|re| re.captures_iter(text))
        .filter_map(|caps| caps.get(1))
        .filter_map(|n| n.as_str().parse::<usize>().ok())
        .filter(|n| in_range(*n))
        .collect()
}

/// Maps digest numbers back onto events through the id order the digest was
/// sent with (`DigestRecord::event_ids` or `DigestPlan::event_ids`).
pub fn select_events(
    events: &EventCollection,
    numbers: &[usize],
    digest_order: &[String],
) -> EventCollection {
    let mut selected = EventCollection::new();
    for &number in numbers {
        let Some(id) = number.checked_sub(1).and_then(|i| digest_order.get(i)) else {
            tracing::warn!(number, max = digest_order.len(), "event number out of range");
            continue;
        };
        match events.get_by_id(id) {
            Some(event) => {
                selected.add(event.clone(), false);
            }
            None => tracing::warn!(number, event_id = %id, "digest event no longer stored"),
        }
    }
    selected
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStatus {
    PendingOutreach,
    OutreachSent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub date: String,
    pub from: String,
    pub event_ids: Vec<String>,
    pub event_names: Vec<String>,
    pub status: SelectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_date: Option<String>,
}

/// JSON log of photographer selections awaiting outreach.
pub struct SelectionLog {
    path: PathBuf,
    entries: Vec<Selection>,
}

impl SelectionLog {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            Vec::new()
        };
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), StorageError> {
        utils::ensure_parent(&self.path)?;
        fs::write(&self.path, serde_json::to_string_pretty(&self.entries)?)?;
        Ok(())
    }

    pub fn record(
        &mut self,
        selected: &EventCollection,
        from: &str,
        at: DateTime<Utc>,
    ) -> Result<&Selection, StorageError> {
        self.entries.push(Selection {
            date: at.to_rfc3339(),
            from: from.to_string(),
            event_ids: selected.iter().map(|e| e.event_id().to_string()).collect(),
            event_names: selected.iter().map(|e| e.name().to_string()).collect(),
            status: SelectionStatus::PendingOutreach,
            processed_date: None,
        });
        self.save()?;
        tracing::info!(count = selected.len(), from, "saved event selections");
        Ok(&self.entries[self.entries.len() - 1])
    }

    pub fn pending(&self) -> Vec<&Selection> {
        self.entries
            .iter()
            .filter(|s| s.status == SelectionStatus::PendingOutreach)
            .collect()
    }

    /// Distinct event ids across pending selections, in first-selected order.
    pub fn pending_event_ids(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.pending()
            .into_iter()
            .flat_map(|selection| selection.event_ids.iter())
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect()
    }

    /// Returns how many entries recorded at `date` were flipped to sent.
    pub fn mark_processed(&mut self, date: &str, at: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut updated = 0;
        for selection in self.entries.iter_mut().filter(|s| s.date == date) {
            selection.status = SelectionStatus::OutreachSent;
            selection.processed_date = Some(at.to_rfc3339());
            updated += 1;
        }
        if updated > 0 {
            self.save()?;
        }
        Ok(updated)
    }
}
