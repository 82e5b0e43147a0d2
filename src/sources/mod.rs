pub mod json_feed;

use anyhow::Error;
use serde::Serialize;

use crate::collection::EventCollection;
use crate::models::RawEvent;

pub use json_feed::JsonFeed;

/// Anything that can hand over raw event records: a site scraper, a feed dump.
/// Fetching, parsing and retries all happen behind this trait.
pub trait EventSource: Send + Sync {
    fn source_id(&self) -> &str;
    fn fetch(&self) -> anyhow::Result<Vec<RawEvent>>;
}

#[derive(Clone, Debug, Serialize)]
pub struct SourceInfo {
    pub id: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub fetched: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub invalid: usize,
    pub failed_sources: Vec<String>,
}

pub fn list_sources(sources: &[Box<dyn EventSource>]) -> Vec<SourceInfo> {
    sources
        .iter()
        .map(|source| SourceInfo {
            id: source.source_id().to_string(),
        })
        .collect()
}

/// Fetches every source and feeds the results into `collection` in source order.
///
/// A failing source is logged and skipped; the run only fails when every
/// source failed and nothing was fetched.
pub fn run_all(
    sources: &[Box<dyn EventSource>],
    collection: &mut EventCollection,
) -> anyhow::Result<IngestReport> {
    let mut report = IngestReport::default();
    let mut errors: Vec<(String, Error)> = Vec::new();

    for source in sources {
        let source_id = source.source_id().to_string();
        match source.fetch() {
            Ok(raw) => {
                tracing::info!(source = %source_id, count = raw.len(), "fetched events");
                absorb(&source_id, raw, collection, &mut report);
            }
            Err(err) => {
                tracing::error!(source = %source_id, "source failed: {err:#}");
                report.failed_sources.push(source_id.clone());
                errors.push((source_id, err));
            }
        }
    }

    if report.fetched == 0 && !errors.is_empty() {
        let joined = errors
            .into_iter()
            .map(|(id, err)| format!("{id}: {err}"))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(anyhow::anyhow!("sources failed: {joined}"));
    }

    Ok(report)
}

pub fn run_single(
    sources: &[Box<dyn EventSource>],
    id: &str,
    collection: &mut EventCollection,
) -> anyhow::Result<IngestReport> {
    let source = sources
        .iter()
        .find(|source| source.source_id() == id)
        .ok_or_else(|| anyhow::anyhow!("unknown source id: {id}"))?;
    let raw = source.fetch()?;
    let mut report = IngestReport::default();
    absorb(id, raw, collection, &mut report);
    Ok(report)
}

fn absorb(
    source_id: &str,
    raw: Vec<RawEvent>,
    collection: &mut EventCollection,
    report: &mut IngestReport,
) {
    for mut event in raw {
        report.fetched += 1;
        if event.source.as_deref().map_or(true, str::is_empty) {
            event.source = Some(source_id.to_string());
        }
        match collection.add_raw(event) {
            Ok(true) => report.accepted += 1,
            Ok(false) => report.duplicates += 1,
            Err(_) => report.invalid += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    struct Fixed {
        id: &'static str,
        events: Vec<RawEvent>,
    }

    impl EventSource for Fixed {
        fn source_id(&self) -> &str {
            self.id
        }

        fn fetch(&self) -> anyhow::Result<Vec<RawEvent>> {
            Ok(self.events.clone())
        }
    }

    struct Broken;

    impl EventSource for Broken {
        fn source_id(&self) -> &str {
            "broken"
        }

        fn fetch(&self) -> anyhow::Result<Vec<RawEvent>> {
            Err(anyhow::anyhow!("connection reset"))
        }
    }

    fn raw(name: &str, days: i64) -> RawEvent {
        RawEvent::new(
            name,
            Utc::now() + Duration::days(days),
            "Prospect Park",
            "https://example.com",
        )
    }

    #[test]
    fn merges_sources_and_counts_outcomes() {
        let sources: Vec<Box<dyn EventSource>> = vec![
            Box::new(Fixed {
                id: "eventbrite",
                events: vec![raw("Drum Circle", 1), raw("Food Truck Rally", 2)],
            }),
            Box::new(Broken),
            Box::new(Fixed {
                id: "nycforfree",
                events: vec![raw("Drum Circle", 1), raw("   ", 3)],
            }),
        ];

        let mut collection = EventCollection::new();
        let report = run_all(&sources, &mut collection).expect("partial success");
        assert_eq!(report.fetched, 4);
        assert_eq!(report.accepted, 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.failed_sources, vec!["broken".to_string()]);
        assert_eq!(collection.get_by_source("eventbrite").len(), 2);
    }

    #[test]
    fn fails_when_every_source_fails() {
        let sources: Vec<Box<dyn EventSource>> = vec![Box::new(Broken)];
        let mut collection = EventCollection::new();
        let err = run_all(&sources, &mut collection).expect_err("all failed");
        assert!(err.to_string().contains("broken: connection reset"));
    }

    #[test]
    fn runs_a_single_source_by_id() {
        let sources: Vec<Box<dyn EventSource>> = vec![Box::new(Fixed {
            id: "eventbrite",
            events: vec![raw("Drum Circle", 1)],
        })];
        let mut collection = EventCollection::new();
        let report = run_single(&sources, "eventbrite", &mut collection).expect("run");
        assert_eq!(report.accepted, 1);
        assert!(run_single(&sources, "nope", &mut collection).is_err());
        assert_eq!(list_sources(&sources)[0].id, "eventbrite");
    }
}
