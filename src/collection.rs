use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::{EventError, EventRecord, EventRow, RawEvent};

/// Points at which a collection reports what happened to an incoming record.
#[derive(Debug, Clone, Copy)]
pub enum CollectionEvent<'a> {
    Accepted(&'a EventRecord),
    RejectedDuplicate(&'a EventRecord),
    ValidationFailed(&'a EventError),
}

pub type Observer = Arc<dyn Fn(&CollectionEvent<'_>) + Send + Sync>;

pub fn observer_fn<F>(callback: F) -> Observer
where
    F: Fn(&CollectionEvent<'_>) + Send + Sync + 'static,
{
    Arc::new(callback)
}

/// Observer that forwards collection events to `tracing`.
pub fn tracing_observer() -> Observer {
    observer_fn(|event| match event {
        CollectionEvent::Accepted(record) => {
            tracing::trace!(event_id = record.event_id(), name = record.name(), "event accepted")
        }
        CollectionEvent::RejectedDuplicate(record) => {
            tracing::debug!(
                event_id = record.event_id(),
                name = record.name(),
                "skipping duplicate event"
            )
        }
        CollectionEvent::ValidationFailed(err) => {
            tracing::warn!(error = %err, "dropping invalid event")
        }
    })
}

/// Ordered events plus an `event_id` index.
///
/// The index maps each identifier to the position of its latest occurrence, so a
/// repeated id added without checks shadows the earlier record in lookups.
/// Duplicates can only enter through `add(_, false)` or [`EventCollection::from_records`],
/// and [`EventCollection::remove_duplicates`] clears them out again.
#[derive(Clone, Default)]
pub struct EventCollection {
    events: Vec<EventRecord>,
    index: HashMap<String, usize>,
    observer: Option<Observer>,
}

impl fmt::Debug for EventCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCollection")
            .field("events", &self.events)
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

impl EventCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps already-materialized records without any duplicate checks.
    pub fn from_records(events: Vec<EventRecord>) -> Self {
        let mut collection = Self {
            events,
            index: HashMap::new(),
            observer: None,
        };
        collection.rebuild_index();
        collection
    }

    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn set_observer(&mut self, observer: Option<Observer>) {
        self.observer = observer;
    }

    fn notify(&self, event: CollectionEvent<'_>) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (position, event) in self.events.iter().enumerate() {
            self.index.insert(event.event_id().to_string(), position);
        }
    }

    pub fn add(&mut self, event: EventRecord, check_duplicates: bool) -> bool {
        if check_duplicates && self.has_duplicate(&event, true) {
            self.notify(CollectionEvent::RejectedDuplicate(&event));
            return false;
        }
        let position = self.events.len();
        self.index.insert(event.event_id().to_string(), position);
        self.events.push(event);
        self.notify(CollectionEvent::Accepted(&self.events[position]));
        true
    }

    /// Builds a record from scraper output and adds it with duplicate checks.
    pub fn add_raw(&mut self, raw: RawEvent) -> Result<bool, EventError> {
        match EventRecord::new(raw) {
            Ok(event) => Ok(self.add(event, true)),
            Err(err) => {
                self.notify(CollectionEvent::ValidationFailed(&err));
                Err(err)
            }
        }
    }

    /// Adds in input order; the first of several near-duplicates wins.
    pub fn add_many<I>(&mut self, events: I, check_duplicates: bool) -> usize
    where
        I: IntoIterator<Item = EventRecord>,
    {
        events
            .into_iter()
            .map(|event| self.add(event, check_duplicates))
            .filter(|added| *added)
            .count()
    }

    /// Identifier lookup first, then (when `fuzzy`) a linear scan.
    pub fn has_duplicate(&self, event: &EventRecord, fuzzy: bool) -> bool {
        if self.index.contains_key(event.event_id()) {
            return true;
        }
        fuzzy
            && self
                .events
                .iter()
                .any(|existing| event.is_duplicate_of(existing, true))
    }

    /// Single first-seen-wins pass. Only exact identifier repeats enter the seen
    /// set, so the result depends on order when fuzzy matches are intransitive.
    pub fn remove_duplicates(&mut self) -> usize {
        let mut seen_ids: HashSet<String> = HashSet::new();
        let mut kept: Vec<EventRecord> = Vec::with_capacity(self.events.len());
        let mut removed = 0;

        for event in std::mem::take(&mut self.events) {
            if seen_ids.contains(event.event_id()) {
                removed += 1;
                continue;
            }
            if kept.iter().any(|unique| event.is_duplicate_of(unique, true)) {
                removed += 1;
                continue;
            }
            seen_ids.insert(event.event_id().to_string());
            kept.push(event);
        }

        self.events = kept;
        self.rebuild_index();
        removed
    }

    pub fn get_by_id(&self, event_id: &str) -> Option<&EventRecord> {
        self.index
            .get(event_id)
            .and_then(|position| self.events.get(*position))
    }

    /// Inclusive on both ends.
    pub fn get_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<&EventRecord> {
        self.events
            .iter()
            .filter(|event| start <= event.date() && event.date() <= end)
            .collect()
    }

    pub fn get_by_source(&self, source: &str) -> Vec<&EventRecord> {
        self.events
            .iter()
            .filter(|event| event.source() == Some(source))
            .collect()
    }

    /// Events on or after `from`, defaulting to now.
    pub fn get_upcoming(&self, from: Option<DateTime<Utc>>) -> Vec<&EventRecord> {
        let from = from.unwrap_or_else(Utc::now);
        self.events
            .iter()
            .filter(|event| event.date() >= from)
            .collect()
    }

    /// Stable sort; ties keep their current relative order.
    pub fn sort_by_date(&mut self, descending: bool) {
        if descending {
            self.events.sort_by(|a, b| b.date().cmp(&a.date()));
        } else {
            self.events.sort_by_key(|event| event.date());
        }
        self.rebuild_index();
    }

    pub fn to_list(&self) -> Vec<EventRow> {
        self.events.iter().map(EventRecord::to_row).collect()
    }

    /// Distinct non-empty sources in first-seen order.
    pub fn sources(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.events
            .iter()
            .filter_map(EventRecord::source)
            .filter(|source| seen.insert(*source))
            .map(str::to_string)
            .collect()
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.events
    }

    pub fn into_records(self) -> Vec<EventRecord> {
        self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EventRecord> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Index<usize> for EventCollection {
    type Output = EventRecord;

    fn index(&self, position: usize) -> &EventRecord {
        &self.events[position]
    }
}

impl<'a> IntoIterator for &'a EventCollection {
    type Item = &'a EventRecord;
    type IntoIter = std::slice::Iter<'a, EventRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

impl IntoIterator for EventCollection {
    type Item = EventRecord;
    type IntoIter = std::vec::IntoIter<EventRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex;

    fn event(name: &str, date: DateTime<Utc>, location: &str) -> EventRecord {
        EventRecord::new(RawEvent::new(name, date, location, "https://example.com"))
            .expect("valid event")
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, d, 12, 0, 0)
            .single()
            .expect("valid date")
    }

    fn sample_events() -> Vec<EventRecord> {
        let now = Utc::now();
        (1..=5)
            .map(|i| {
                event(
                    &format!("Event {i}"),
                    now + Duration::days(i),
                    &format!("Location {i}"),
                )
            })
            .collect()
    }

    #[test]
    fn adds_events_and_indexes_them() {
        let mut collection = EventCollection::new();
        for e in sample_events() {
            assert!(collection.add(e, true));
        }
        assert_eq!(collection.len(), 5);
        assert_eq!(collection[0].name(), "Event 1");
        let id = collection[3].event_id().to_string();
        assert_eq!(collection.get_by_id(&id).map(|e| e.name()), Some("Event 4"));
        assert!(collection.get_by_id("000000000000").is_none());
    }

    #[test]
    fn rejects_exact_duplicate() {
        let mut collection = EventCollection::new();
        let e = event("Test Event", day(20), "NYC");
        assert!(collection.add(e.clone(), true));
        assert!(!collection.add(e, true));
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn rejects_fuzzy_duplicate_but_not_without_checks() {
        let mut collection = EventCollection::new();
        assert!(collection.add(event("Summer Jazz Night", day(20), "Pier 17"), true));
        let near = event("Summer Jazz Nights", day(20), "Pier 17, NYC");
        assert!(collection.has_duplicate(&near, true));
        assert!(!collection.has_duplicate(&near, false));
        assert!(!collection.add(near.clone(), true));
        assert!(collection.add(near, false));
        assert_eq!(collection.len(), 2);
    }

    #[test]
    fn add_many_counts_accepted_first_seen_wins() {
        let mut collection = EventCollection::new();
        let first = event("Harbor Lights Parade", day(12), "Harbor");
        let second = event("Harbor Lights Parades", day(12), "Waterfront");
        let other = event("Chess in the Park", day(12), "Bryant Park");
        let added = collection.add_many(vec![first.clone(), second, other], true);
        assert_eq!(added, 2);
        assert_eq!(collection[0].event_id(), first.event_id());
    }

    #[test]
    fn remove_duplicates_counts_repeated_ids() {
        let mut collection = EventCollection::new();
        let a = event("Duplicate Event", day(20), "NYC");
        let b = EventRecord::new(RawEvent::new(
            "Duplicate Event",
            day(20),
            "NYC",
            "https://other.example.com",
        ))
        .expect("valid event");
        let c = event("Gallery Opening", day(21), "Chelsea");
        collection.add(a.clone(), false);
        collection.add(b, false);
        collection.add(c, false);
        assert_eq!(collection.len(), 3);
        assert_eq!(
            collection.get_by_id(a.event_id()).map(|e| e.source_url()),
            Some("https://other.example.com")
        );

        assert_eq!(collection.remove_duplicates(), 1);
        assert_eq!(collection.len(), 2);
        assert_eq!(collection[0].source_url(), a.source_url());
        assert_eq!(
            collection.get_by_id(a.event_id()).map(|e| e.source_url()),
            Some(a.source_url())
        );
    }

    #[test]
    fn remove_duplicates_is_order_dependent_for_chains() {
        // a~b and b~c, but a and c are too far apart
        let a = event("abcdefghij", day(5), "X");
        let b = event("abcdefghiz", day(5), "Y");
        let c = event("abcdefghyz", day(5), "Z");
        assert!(a.is_duplicate_of(&b, true));
        assert!(b.is_duplicate_of(&c, true));
        assert!(!a.is_duplicate_of(&c, true));

        let mut forward = EventCollection::from_records(vec![a.clone(), b.clone(), c.clone()]);
        assert_eq!(forward.remove_duplicates(), 1);
        assert_eq!(forward.len(), 2);

        let mut middle_first = EventCollection::from_records(vec![b, a, c]);
        assert_eq!(middle_first.remove_duplicates(), 2);
        assert_eq!(middle_first.len(), 1);
    }

    #[test]
    fn filters_by_source() {
        let mut collection = EventCollection::new();
        for mut e in sample_events() {
            let tag = if e.name() == "Event 1" || e.name() == "Event 3" {
                "TestSource"
            } else {
                "Other"
            };
            e.set_source(Some(tag.to_string()));
            collection.add(e, true);
        }
        let filtered = collection.get_by_source("TestSource");
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|e| e.source() == Some("TestSource")));
        assert_eq!(collection.sources(), vec!["TestSource", "Other"]);
    }

    #[test]
    fn upcoming_excludes_past() {
        let now = Utc::now();
        let mut collection = EventCollection::new();
        collection.add(event("Past Event", now - Duration::days(1), "NYC"), true);
        collection.add(event("Future Event", now + Duration::days(1), "NYC"), true);
        let upcoming = collection.get_upcoming(None);
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].name(), "Future Event");
    }

    #[test]
    fn date_range_is_inclusive() {
        let base = Utc::now();
        let mut collection = EventCollection::new();
        for offset in -2..=2 {
            collection.add(
                event(&format!("Event {offset}"), base + Duration::days(offset), "NYC"),
                true,
            );
        }
        assert_eq!(collection.len(), 5);
        let filtered =
            collection.get_by_date_range(base + Duration::days(1), base + Duration::days(2));
        let names: Vec<_> = filtered.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["Event 1", "Event 2"]);
    }

    #[test]
    fn sorts_by_date_and_keeps_index() {
        let mut collection = EventCollection::new();
        for e in sample_events().into_iter().rev() {
            collection.add(e, true);
        }
        collection.sort_by_date(false);
        let dates: Vec<_> = collection.iter().map(|e| e.date()).collect();
        assert!(dates.windows(2).all(|w| w[0] <= w[1]));
        let id = collection[0].event_id().to_string();
        assert_eq!(collection.get_by_id(&id).map(|e| e.name()), Some("Event 1"));

        collection.sort_by_date(true);
        assert_eq!(collection[0].name(), "Event 5");
    }

    #[test]
    fn list_round_trip_preserves_ids() {
        let mut collection = EventCollection::new();
        collection.add_many(sample_events(), true);
        let rows = collection.to_list();
        let restored = EventCollection::from_records(
            rows.into_iter()
                .map(|row| EventRecord::from_row(row).expect("row"))
                .collect(),
        );
        assert_eq!(restored.len(), collection.len());
        let ids = |c: &EventCollection| {
            c.iter()
                .map(|e| e.event_id().to_string())
                .collect::<HashSet<_>>()
        };
        assert_eq!(ids(&restored), ids(&collection));
    }

    #[test]
    fn observer_sees_accept_reject_and_invalid() {
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let mut collection =
            EventCollection::new().with_observer(observer_fn(move |event| {
                let entry = match event {
                    CollectionEvent::Accepted(e) => format!("accepted {}", e.name()),
                    CollectionEvent::RejectedDuplicate(e) => format!("duplicate {}", e.name()),
                    CollectionEvent::ValidationFailed(err) => format!("invalid {err}"),
                };
                sink.lock().expect("log mutex").push(entry);
            }));

        let raw = RawEvent::new("Open Mic", day(3), "Cafe", "https://example.com");
        assert_eq!(collection.add_raw(raw.clone()), Ok(true));
        assert_eq!(collection.add_raw(raw), Ok(false));
        assert!(collection
            .add_raw(RawEvent::new("", day(3), "Cafe", "https://example.com"))
            .is_err());

        let log = log.lock().expect("log mutex");
        assert_eq!(log[0], "accepted Open Mic");
        assert_eq!(log[1], "duplicate Open Mic");
        assert!(log[2].starts_with("invalid"));
    }
}
