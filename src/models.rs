use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{de, Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Names whose positional similarity exceeds this are treated as the same event
/// when they fall on the same calendar day.
pub const FUZZY_NAME_THRESHOLD: f64 = 0.8;

const EVENT_ID_LEN: usize = 12;
const CSV_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("valid email regex")
});

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("validation failed: {field} is required")]
    Validation { field: &'static str },
    #[error("cannot deserialize event: {0}")]
    Deserialization(String),
}

/// An event as handed over by a scraper, before normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawEvent {
    pub name: String,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub date: Option<DateTime<Utc>>,
    pub location: String,
    pub source_url: Option<String>,
    pub contact_email: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub scraped_at: Option<DateTime<Utc>>,
    pub event_id: Option<String>,
}

/// Scrapers emit offset-less timestamps as often as RFC 3339 ones.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(text) if !text.trim().is_empty() => parse_timestamp(&text)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("unparseable timestamp {text:?}"))),
        _ => Ok(None),
    }
}

impl RawEvent {
    pub fn new(
        name: impl Into<String>,
        date: DateTime<Utc>,
        location: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            date: Some(date),
            location: location.into(),
            source_url: Some(source_url.into()),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_contact_email(mut self, email: impl Into<String>) -> Self {
        self.contact_email = Some(email.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_scraped_at(mut self, scraped_at: DateTime<Utc>) -> Self {
        self.scraped_at = Some(scraped_at);
        self
    }
}

/// Plain-data projection used by storage backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    #[serde(default)]
    pub event_id: Option<String>,
    pub name: String,
    pub date: String,
    pub location: String,
    pub source_url: String,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub scraped_at: Option<String>,
}

/// One real-world event observed from one source.
///
/// Identity fields are fixed at construction; `event_id` is derived from the
/// normalized name, the calendar date and the normalized location.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    name: String,
    date: DateTime<Utc>,
    location: String,
    source_url: String,
    contact_email: Option<String>,
    description: Option<String>,
    source: Option<String>,
    scraped_at: DateTime<Utc>,
    event_id: String,
}

impl EventRecord {
    pub fn new(raw: RawEvent) -> Result<Self, EventError> {
        let name = clean_text(&raw.name);
        if name.is_empty() {
            return Err(EventError::Validation { field: "name" });
        }
        let location = clean_text(&raw.location);
        if location.is_empty() {
            return Err(EventError::Validation { field: "location" });
        }
        let date = raw.date.ok_or(EventError::Validation { field: "date" })?;
        let source_url = raw
            .source_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .ok_or(EventError::Validation {
                field: "source_url",
            })?;

        let description = raw
            .description
            .map(|text| clean_text(&text))
            .filter(|text| !text.is_empty());
        let contact_email = raw
            .contact_email
            .map(|email| email.trim().to_string())
            .filter(|email| !email.is_empty())
            .or_else(|| description.as_deref().and_then(extract_email));
        let event_id = raw
            .event_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| generate_id(&name, &date, &location));

        Ok(Self {
            name,
            date,
            location,
            source_url,
            contact_email,
            description,
            source: raw.source.filter(|s| !s.is_empty()),
            scraped_at: raw.scraped_at.unwrap_or_else(Utc::now),
            event_id,
        })
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    pub fn calendar_date(&self) -> NaiveDate {
        self.date.date_naive()
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn contact_email(&self) -> Option<&str> {
        self.contact_email.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn scraped_at(&self) -> DateTime<Utc> {
        self.scraped_at
    }

    /// `source` is administrative and may be re-tagged; it does not feed the identifier.
    pub fn set_source(&mut self, source: Option<String>) {
        self.source = source.filter(|s| !s.is_empty());
    }

    /// Exact identifier match, or (when `fuzzy`) same calendar day with a
    /// name similarity above [`FUZZY_NAME_THRESHOLD`].
    pub fn is_duplicate_of(&self, other: &EventRecord, fuzzy: bool) -> bool {
        if self.event_id == other.event_id {
            return true;
        }
        if !fuzzy {
            return false;
        }
        if self.calendar_date() != other.calendar_date() {
            return false;
        }
        string_similarity(&self.name.to_lowercase(), &other.name.to_lowercase())
            > FUZZY_NAME_THRESHOLD
    }

    pub fn to_row(&self) -> EventRow {
        EventRow {
            event_id: Some(self.event_id.clone()),
            name: self.name.clone(),
            date: self.date.to_rfc3339(),
            location: self.location.clone(),
            source_url: self.source_url.clone(),
            contact_email: self.contact_email.clone(),
            description: self.description.clone(),
            source: self.source.clone(),
            scraped_at: Some(self.scraped_at.to_rfc3339()),
        }
    }

    pub fn from_row(row: EventRow) -> Result<Self, EventError> {
        let date = parse_timestamp(&row.date).ok_or_else(|| {
            EventError::Deserialization(format!("unparseable date {:?}", row.date))
        })?;
        let scraped_at = match row.scraped_at.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => Some(parse_timestamp(text).ok_or_else(|| {
                EventError::Deserialization(format!("unparseable scraped_at {text:?}"))
            })?),
            _ => None,
        };

        let raw = RawEvent {
            name: row.name,
            date: Some(date),
            location: row.location,
            source_url: Some(row.source_url),
            contact_email: row.contact_email,
            description: row.description,
            source: row.source,
            scraped_at,
            event_id: row.event_id,
        };
        Self::new(raw).map_err(|err| match err {
            EventError::Validation { field } => {
                EventError::Deserialization(format!("missing required field {field}"))
            }
            other => other,
        })
    }

    pub fn csv_headers() -> [&'static str; 9] {
        [
            "event_id",
            "name",
            "date",
            "location",
            "source_url",
            "contact_email",
            "description",
            "source",
            "scraped_at",
        ]
    }

    pub fn to_csv_row(&self) -> [String; 9] {
        [
            self.event_id.clone(),
            self.name.clone(),
            self.date.format(CSV_DATE_FORMAT).to_string(),
            self.location.clone(),
            self.source_url.clone(),
            self.contact_email.clone().unwrap_or_default(),
            self.description.clone().unwrap_or_default(),
            self.source.clone().unwrap_or_default(),
            self.scraped_at.format(CSV_DATE_FORMAT).to_string(),
        ]
    }
}

/// Drops control characters other than whitespace, collapses
/// whitespace runs to a single space and trims.
pub fn clean_text(input: &str) -> String {
    input
        .chars()
        .filter(|ch| *ch as u32 >= 32 || ch.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn extract_email(text: &str) -> Option<String> {
    EMAIL_RE.find(text).map(|m| m.as_str().to_string())
}

pub fn generate_id(name: &str, date: &DateTime<Utc>, location: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b"|");
    hasher.update(date.date_naive().format("%Y-%m-%d").to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(location.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..EVENT_ID_LEN].to_string()
}

/// Position-aligned character matches divided by the longer length.
///
/// Insertions shift every later character, so "fest" vs "the fest" scores low.
pub fn string_similarity(first: &str, second: &str) -> f64 {
    let first: Vec<char> = first.chars().collect();
    let second: Vec<char> = second.chars().collect();
    let (longer, shorter) = if second.len() > first.len() {
        (&second, &first)
    } else {
        (&first, &second)
    };
    if longer.is_empty() {
        return 1.0;
    }
    let matches = shorter
        .iter()
        .zip(longer.iter())
        .filter(|(a, b)| a == b)
        .count();
    matches as f64 / longer.len() as f64
}

/// Accepts RFC 3339, naive ISO-8601 (`T` or space separated) and bare dates.
/// Naive values are read as UTC.
pub fn parse_timestamp(input: &str) -> Option<DateTime<Utc>> {
    let text = input.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
