//! Command-line front end: ingest feeds, merge stored files, build the
//! photographer digest, record their reply and draft organizer outreach.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use event_scout::{
    parse_reply, plan_outreach, run_all, select_events, tracing_observer, AppConfig, ConfigStore,
    DigestPlan, DigestTracker, EventCollection, EventSource, JsonFeed, OutreachLedger,
    SelectionLog, SentTracker, StorageFormat, StorageManager,
};

#[derive(Parser, Debug)]
#[command(name = "event-scout")]
#[command(about = "Collect, deduplicate and digest event listings")]
#[command(version)]
struct Args {
    /// Config file (defaults to the platform data dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the data directory from the config file
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch raw records from feed files and store the accepted events
    Ingest {
        /// Feed as <source-id>=<path>, repeatable
        #[arg(long = "feed", required = true)]
        feeds: Vec<String>,

        /// Output formats (comma-separated); defaults to the configured ones
        #[arg(long, value_delimiter = ',')]
        format: Option<Vec<StorageFormat>>,
    },
    /// Merge every stored JSON file into one deduplicated file
    Merge {
        #[arg(long, value_delimiter = ',')]
        format: Option<Vec<StorageFormat>>,
    },
    /// Print the digest of unsent upcoming events
    Digest {
        #[arg(long)]
        limit: Option<usize>,

        /// Record the listed events as sent
        #[arg(long)]
        mark_sent: bool,

        /// Also write the digest text to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Parse a reply to the last digest and log the selected events
    Select {
        /// File holding the reply body
        #[arg(long)]
        reply: PathBuf,

        #[arg(long)]
        from: Option<String>,
    },
    /// Draft organizer emails for events in pending selections
    Outreach {
        /// Write each draft to <dir>/<event_id>.txt
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Record drafts as sent and close selections that are fully handled
        #[arg(long)]
        mark_sent: bool,
    },
    /// Mark a logged selection as handled
    Processed {
        /// The selection's recorded date, as shown by `stats`
        date: String,
    },
    /// Summarise stored events, digests and pending selections
    Stats,
    /// Show or change persisted settings
    Config {
        #[arg(long)]
        set_data_dir: Option<PathBuf>,

        #[arg(long, value_delimiter = ',')]
        set_formats: Option<Vec<StorageFormat>>,

        #[arg(long)]
        set_max_events: Option<usize>,

        #[arg(long)]
        set_photographer: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let store = match &args.config {
        Some(path) => ConfigStore::load_from(path.clone()),
        None => ConfigStore::load(),
    };
    let mut config = store.read();
    if let Some(dir) = &args.data_dir {
        config.data_dir = Some(dir.clone());
    }

    match args.command {
        Command::Ingest { feeds, format } => ingest(&config, &feeds, format),
        Command::Merge { format } => merge(&config, format),
        Command::Digest {
            limit,
            mark_sent,
            output,
        } => digest(&config, limit, mark_sent, output),
        Command::Select { reply, from } => select(&config, &reply, from),
        Command::Outreach {
            output_dir,
            mark_sent,
        } => outreach(&config, output_dir, mark_sent),
        Command::Processed { date } => processed(&config, &date),
        Command::Stats => stats(&config),
        Command::Config {
            set_data_dir,
            set_formats,
            set_max_events,
            set_photographer,
        } => {
            let updated = store.update(|config| {
                if let Some(dir) = set_data_dir {
                    config.data_dir = Some(dir);
                }
                if let Some(formats) = set_formats {
                    config.formats = formats;
                }
                if let Some(max) = set_max_events {
                    config.digest_max_events = Some(max);
                }
                if let Some(email) = set_photographer {
                    config.photographer_email = Some(email);
                }
            })?;
            println!("{}", serde_json::to_string_pretty(&updated)?);
            println!("config file: {}", store.path().display());
            Ok(())
        }
    }
}

fn ingest(config: &AppConfig, feeds: &[String], format: Option<Vec<StorageFormat>>) -> Result<()> {
    let sources = feeds
        .iter()
        .map(|spec| JsonFeed::parse_spec(spec).map(|feed| Box::new(feed) as Box<dyn EventSource>))
        .collect::<Result<Vec<_>>>()?;

    let mut collection = EventCollection::new().with_observer(tracing_observer());
    let report = run_all(&sources, &mut collection)?;
    tracing::info!(
        fetched = report.fetched,
        accepted = report.accepted,
        duplicates = report.duplicates,
        invalid = report.invalid,
        "ingest finished"
    );
    if !report.failed_sources.is_empty() {
        tracing::warn!(failed = ?report.failed_sources, "some sources failed");
    }
    if collection.is_empty() {
        println!("no events accepted");
        return Ok(());
    }

    collection.sort_by_date(false);
    let manager = StorageManager::new(config.data_dir());
    let formats = format.unwrap_or_else(|| config.formats.clone());
    for (format, path) in manager.save_events(&collection, &formats, config.timestamp_files)? {
        println!("{format}: {}", path.display());
    }
    Ok(())
}

fn merge(config: &AppConfig, format: Option<Vec<StorageFormat>>) -> Result<()> {
    let manager = StorageManager::new(config.data_dir());
    let mut merged = manager.merge_all()?;
    if merged.is_empty() {
        println!("nothing to merge in {}", manager.data_dir().display());
        return Ok(());
    }
    merged.sort_by_date(false);
    let formats = format.unwrap_or_else(|| config.formats.clone());
    for (format, path) in manager.save_events(&merged, &formats, true)? {
        println!("{format}: {} ({} events)", path.display(), merged.len());
    }
    Ok(())
}

fn digest(
    config: &AppConfig,
    limit: Option<usize>,
    mark_sent: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let events = StorageManager::new(config.data_dir()).merge_all()?;
    let mut tracker = DigestTracker::load(config.digest_tracking_path())?;
    let now = Utc::now();
    let plan = DigestPlan::build(
        &events,
        &tracker,
        now,
        limit.or(config.digest_max_events),
    )?;
    if plan.is_empty() {
        println!("no new events to send");
        return Ok(());
    }

    let text = plan.render_text();
    print!("{text}");
    if let Some(path) = output {
        fs::write(&path, &text).with_context(|| format!("writing {}", path.display()))?;
    }
    if mark_sent {
        tracker.mark_sent(&plan.event_ids(), now)?;
        tracing::info!(
            count = plan.entries.len(),
            path = %tracker.path().display(),
            "marked events as sent"
        );
    }
    Ok(())
}

fn select(config: &AppConfig, reply: &Path, from: Option<String>) -> Result<()> {
    let body = fs::read_to_string(reply).with_context(|| format!("reading {}", reply.display()))?;
    let numbers = parse_reply(&body);
    if numbers.is_empty() {
        println!("no event numbers found in reply");
        return Ok(());
    }

    let tracker = DigestTracker::load(config.digest_tracking_path())?;
    let last = tracker
        .last_digest()
        .context("no digest has been marked as sent yet")?;
    let events = StorageManager::new(config.data_dir()).merge_all()?;
    let selected = select_events(&events, &numbers, &last.event_ids);
    if selected.is_empty() {
        println!("none of {numbers:?} matched the last digest");
        return Ok(());
    }

    let from = from
        .or_else(|| config.photographer_email.clone())
        .unwrap_or_else(|| "unknown".to_string());
    let mut log = SelectionLog::load(config.selections_path())?;
    let entry = log.record(&selected, &from, Utc::now())?;
    for name in &entry.event_names {
        println!("selected: {name}");
    }
    Ok(())
}

fn outreach(config: &AppConfig, output_dir: Option<PathBuf>, mark_sent: bool) -> Result<()> {
    let mut log = SelectionLog::load(config.selections_path())?;
    let wanted = log.pending_event_ids();
    if wanted.is_empty() {
        println!("no pending selections");
        return Ok(());
    }

    let events = StorageManager::new(config.data_dir()).merge_all()?;
    let selected: Vec<_> = wanted
        .iter()
        .filter_map(|id| {
            let found = events.get_by_id(id);
            if found.is_none() {
                tracing::warn!(event_id = %id, "selected event not found in stored events");
            }
            found
        })
        .collect();

    let mut ledger = OutreachLedger::load(config.outreach_tracking_path())?;
    let report = plan_outreach(selected, &ledger)?;
    for email in &report.drafted {
        let text = format!("To: {}\nSubject: {}\n\n{}\n", email.to, email.subject, email.body);
        println!("{text}");
        if let Some(dir) = &output_dir {
            fs::create_dir_all(dir)?;
            let path = dir.join(format!("{}.txt", email.event_id));
            fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
        }
    }
    for id in &report.missing_contact {
        println!("no contact found for {id}");
    }
    if !mark_sent {
        return Ok(());
    }

    let now = Utc::now();
    for email in &report.drafted {
        ledger.record(email, now)?;
    }
    let handled: HashSet<&str> = report
        .drafted
        .iter()
        .map(|email| email.event_id.as_str())
        .chain(report.already_contacted.iter().map(String::as_str))
        .collect();
    let done: Vec<String> = log
        .pending()
        .into_iter()
        .filter(|selection| selection.event_ids.iter().all(|id| handled.contains(id.as_str())))
        .map(|selection| selection.date.clone())
        .collect();
    for date in &done {
        log.mark_processed(date, now)?;
    }
    println!(
        "recorded {} outreach email(s), closed {} selection(s)",
        report.drafted.len(),
        done.len()
    );
    Ok(())
}

fn processed(config: &AppConfig, date: &str) -> Result<()> {
    let mut log = SelectionLog::load(config.selections_path())?;
    let updated = log.mark_processed(date, Utc::now())?;
    if updated == 0 {
        anyhow::bail!("no selection recorded at {date}");
    }
    println!("marked {updated} selection(s) as processed");
    Ok(())
}

fn stats(config: &AppConfig) -> Result<()> {
    let events = StorageManager::new(config.data_dir()).merge_all()?;
    let tracker = DigestTracker::load(config.digest_tracking_path())?;
    let log = SelectionLog::load(config.selections_path())?;

    println!("data dir: {}", config.data_dir().display());
    println!("events: {}", events.len());
    for source in events.sources() {
        println!("  {source}: {}", events.get_by_source(&source).len());
    }
    println!("upcoming: {}", events.get_upcoming(None).len());
    println!("digests sent: {}", tracker.history().len());
    if let Some(last) = tracker.last_digest_date() {
        println!("last digest: {}", last.to_rfc3339());
    }
    let pending = log.pending();
    println!("pending selections: {}", pending.len());
    for selection in pending {
        println!("  {} from {}: {}", selection.date, selection.from, selection.event_names.join(", "));
    }
    Ok(())
}
