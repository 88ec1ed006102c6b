use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;

use crate::commands::{CommandReport, open_workspace};
use crate::sift::event::{NewEvent, parse_timestamp};
use crate::sift::store::SiftStore;

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub source: Option<String>,
    pub event_type: Option<String>,
    pub occurred_at: Option<String>,
    pub payload: Option<String>,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct Tally {
    inserted: usize,
    duplicates: usize,
    unparsed_timestamps: usize,
}

fn store_one(store: &SiftStore, event: &NewEvent, tally: &mut Tally) -> Result<()> {
    if parse_timestamp(&event.occurred_at).is_none() {
        tally.unparsed_timestamps += 1;
    }
    match store.insert_event(event, Utc::now())? {
        Some(_) => tally.inserted += 1,
        None => tally.duplicates += 1,
    }
    Ok(())
}

fn event_from_flags(opts: &IngestOptions, report: &mut CommandReport) -> Option<NewEvent> {
    let source = opts.source.as_deref().map(str::trim).unwrap_or_default();
    let event_type = opts.event_type.as_deref().map(str::trim).unwrap_or_default();
    if source.is_empty() || event_type.is_empty() {
        report.issue("need --source and --event-type, or --file");
        return None;
    }

    let payload = match opts.payload.as_deref() {
        Some(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(value) => value,
            Err(err) => {
                report.issue(format!("invalid --payload json: {err}"));
                return None;
            }
        },
        None => Value::Object(Default::default()),
    };

    let occurred_at = opts
        .occurred_at
        .clone()
        .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));

    Some(NewEvent {
        source: source.to_string(),
        event_type: event_type.to_string(),
        payload,
        occurred_at,
    })
}

pub fn run(opts: &IngestOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("ingest");
    let ws = open_workspace()?;
    let mut tally = Tally::default();

    if let Some(file) = &opts.file {
        let raw = fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        for (index, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<NewEvent>(line) {
                Ok(event) => store_one(&ws.store, &event, &mut tally)?,
                Err(err) => report.issue(format!("line {}: {err}", index + 1)),
            }
        }
        report.detail(format!("file={}", file.display()));
    } else if let Some(event) = event_from_flags(opts, &mut report) {
        store_one(&ws.store, &event, &mut tally)?;
    }

    report.detail(format!("inserted={}", tally.inserted));
    report.detail(format!("duplicates={}", tally.duplicates));
    if tally.unparsed_timestamps > 0 {
        report.detail(format!(
            "unparsed_timestamps={} (stored as given)",
            tally.unparsed_timestamps
        ));
    }
    report.detail(format!("pending_events={}", ws.store.unprocessed_event_count()?));
    Ok(report)
}
