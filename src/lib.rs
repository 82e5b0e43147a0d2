pub mod collection;
pub mod config;
pub mod digest;
pub mod models;
pub mod outreach;
pub mod selection;
pub mod sources;
pub mod storage;
pub mod tracking;
mod utils;

pub use collection::{observer_fn, tracing_observer, CollectionEvent, EventCollection, Observer};
pub use config::{AppConfig, ConfigError, ConfigStore};
pub use digest::{DigestEntry, DigestPlan};
pub use models::{EventError, EventRecord, EventRow, RawEvent};
pub use outreach::{plan_outreach, OutreachEmail, OutreachLedger, OutreachReport};
pub use selection::{parse_reply, select_events, Selection, SelectionLog, SelectionStatus};
pub use sources::{run_all, run_single, EventSource, IngestReport, JsonFeed};
pub use storage::{EventStorage, StorageError, StorageFormat, StorageManager};
pub use tracking::{filter_unsent, DigestTracker, SentTracker};
