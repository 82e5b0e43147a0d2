use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{extract_email, EventRecord};
use crate::storage::StorageError;
use crate::tracking::SentTracker;
use crate::utils;

static DOMAIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://(?:www\.)?([^/]+)").expect("valid domain regex"));

/// A drafted email to the organizer of one selected event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutreachEmail {
    pub event_id: String,
    pub event_name: String,
    pub to: String,
    pub organizer_name: Option<String>,
    pub subject: String,
    pub body: String,
}

/// Contact email, then an address in the description, then `info@<domain>`
/// when the listing links to a contact page.
pub fn resolve_recipient(event: &EventRecord) -> Option<String> {
    if let Some(email) = event.contact_email() {
        return Some(email.to_string());
    }
    if let Some(email) = event.description().and_then(extract_email) {
        return Some(email);
    }
    let url = event.source_url();
    if !url.to_lowercase().contains("contact") {
        return None;
    }
    DOMAIN_RE
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|domain| format!("info@{}", domain.as_str()))
}

/// "Rooftop Films presented by Brooklyn Arts" names "Brooklyn Arts".
pub fn organizer_name(event: &EventRecord) -> Option<String> {
    let lowered = event.name().to_lowercase();
    let (_, rest) = lowered.split_once("presented by")?;
    let name = title_case(rest.trim());
    (!name.is_empty()).then_some(name)
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `None` when no recipient can be found.
pub fn compose(event: &EventRecord) -> Option<OutreachEmail> {
    let Some(to) = resolve_recipient(event) else {
        tracing::warn!(event = event.name(), "no organizer email found");
        return None;
    };
    let organizer = organizer_name(event);
    let greeting = organizer.as_deref().unwrap_or("there");

    let body = [
        format!("Hi {greeting},"),
        String::new(),
        format!(
            "I saw that {} is happening on {} at {}, and I'd love to photograph it.",
            event.name(),
            event.date().format("%B %d, %Y"),
            event.location()
        ),
        "I cover community events around the city and can share a portfolio and rates."
            .to_string(),
        String::new(),
        "Would you be open to a quick chat?".to_string(),
        String::new(),
        "Best regards".to_string(),
    ]
    .join("\n");

    Some(OutreachEmail {
        event_id: event.event_id().to_string(),
        event_name: event.name().to_string(),
        to,
        organizer_name: organizer,
        subject: format!("Photography Services for {}", event.name()),
        body,
    })
}

#[derive(Debug, Default)]
pub struct OutreachReport {
    pub drafted: Vec<OutreachEmail>,
    pub already_contacted: Vec<String>,
    pub missing_contact: Vec<String>,
}

/// Drafts an email per event, skipping ids the tracker has already seen.
pub fn plan_outreach<'a, I>(
    events: I,
    tracker: &dyn SentTracker,
) -> Result<OutreachReport, StorageError>
where
    I: IntoIterator<Item = &'a EventRecord>,
{
    let mut report = OutreachReport::default();
    for event in events {
        if tracker.contains(event.event_id())? {
            tracing::info!(event = event.name(), "skipping, organizer already contacted");
            report.already_contacted.push(event.event_id().to_string());
            continue;
        }
        match compose(event) {
            Some(email) => report.drafted.push(email),
            None => report.missing_contact.push(event.event_id().to_string()),
        }
    }
    tracing::info!(
        drafted = report.drafted.len(),
        skipped = report.already_contacted.len(),
        missing = report.missing_contact.len(),
        "outreach planned"
    );
    Ok(report)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutreachDetail {
    pub event_id: String,
    #[serde(default)]
    pub recipient: Option<String>,
    pub sent_at: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct LedgerData {
    sent_events: BTreeSet<String>,
    details: Vec<OutreachDetail>,
}

/// JSON ledger of organizers already contacted, one detail entry per send.
pub struct OutreachLedger {
    path: PathBuf,
    data: LedgerData,
}

impl OutreachLedger {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let data = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            LedgerData::default()
        };
        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn details(&self) -> &[OutreachDetail] {
        &self.data.details
    }

    fn save(&self) -> Result<(), StorageError> {
        utils::ensure_parent(&self.path)?;
        fs::write(&self.path, serde_json::to_string_pretty(&self.data)?)?;
        Ok(())
    }

    pub fn record(&mut self, email: &OutreachEmail, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.push(&email.event_id, Some(email.to.clone()), at);
        self.save()
    }

    fn push(&mut self, event_id: &str, recipient: Option<String>, at: DateTime<Utc>) {
        self.data.sent_events.insert(event_id.to_string());
        self.data.details.push(OutreachDetail {
            event_id: event_id.to_string(),
            recipient,
            sent_at: at.to_rfc3339(),
        });
    }
}

impl SentTracker for OutreachLedger {
    fn contains(&self, event_id: &str) -> Result<bool, StorageError> {
        Ok(self.data.sent_events.contains(event_id))
    }

    fn mark_sent(&mut self, event_ids: &[String], at: DateTime<Utc>) -> Result<(), StorageError> {
        for id in event_ids {
            self.push(id, None, at);
        }
        self.save()
    }
}
