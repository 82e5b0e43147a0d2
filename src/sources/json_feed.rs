use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::Value;

use super::EventSource;
use crate::models::RawEvent;

/// Raw records a scraper dumped to disk as a JSON array.
pub struct JsonFeed {
    id: String,
    path: PathBuf,
}

impl JsonFeed {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }

    /// Parses `id=path`, as given on the command line.
    pub fn parse_spec(spec: &str) -> Result<Self> {
        let (id, path) = spec
            .split_once('=')
            .with_context(|| format!("expected <id>=<path>, got {spec:?}"))?;
        if id.trim().is_empty() || path.trim().is_empty() {
            anyhow::bail!("expected <id>=<path>, got {spec:?}");
        }
        Ok(Self::new(id.trim(), path.trim()))
    }
}

impl EventSource for JsonFeed {
    fn source_id(&self) -> &str {
        &self.id
    }

    /// A record that does not parse is logged and skipped; only an unreadable
    /// file or a document that is not an array fails the fetch.
    fn fetch(&self) -> Result<Vec<RawEvent>> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("unable to read feed {}", self.path.display()))?;
        let records: Vec<Value> = serde_json::from_str(&contents)
            .with_context(|| format!("invalid feed {}", self.path.display()))?;

        let mut events = Vec::with_capacity(records.len());
        for (position, record) in records.into_iter().enumerate() {
            match serde_json::from_value::<RawEvent>(record) {
                Ok(event) => events.push(event),
                Err(err) => tracing::warn!(
                    source = %self.id,
                    position,
                    "skipping unreadable feed record: {err}"
                ),
            }
        }
        Ok(events)
    }
}
