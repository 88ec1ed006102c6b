use crate::sift::paths::SiftPaths;
use crate::sift::util::now_epoch_secs;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

const AUDIT_FILE: &str = "audit.log";

/// One JSON line in `logs/audit.log`. Cycle records carry the gate label
/// and, when analysis ran, the processing run id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub at_epoch_secs: u64,
    pub phase: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<i64>,
    pub message: String,
}

impl AuditEvent {
    pub fn new(phase: &str, status: &str, message: impl Into<String>) -> Self {
        Self {
            at_epoch_secs: 0,
            phase: phase.to_string(),
            status: status.to_string(),
            gate: None,
            run_id: None,
            message: message.into(),
        }
    }

    pub fn gate(mut self, gate: &str) -> Self {
        self.gate = Some(gate.to_string());
        self
    }

    pub fn run(mut self, run_id: Option<i64>) -> Self {
        self.run_id = run_id;
        self
    }
}

fn audit_path(paths: &SiftPaths) -> PathBuf {
    paths.logs_dir.join(AUDIT_FILE)
}

/// Stamp `event` with the current time and append it.
pub fn append(paths: &SiftPaths, mut event: AuditEvent) -> Result<()> {
    fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("failed to create {}", paths.logs_dir.display()))?;
    event.at_epoch_secs = now_epoch_secs()?;

    let line = format!("{}\n", serde_json::to_string(&event)?);
    let path = audit_path(paths);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("failed to append {}", path.display()))?;
    Ok(())
}

/// Latest `limit` records, oldest first. Lines that do not parse are skipped.
pub fn recent(paths: &SiftPaths, limit: usize) -> Result<Vec<AuditEvent>> {
    let path = audit_path(paths);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut events: Vec<AuditEvent> = raw
        .lines()
        .rev()
        .filter_map(|line| serde_json::from_str(line).ok())
        .take(limit)
        .collect();
    events.reverse();
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sift::paths::paths_under;

    #[test]
    fn cycle_records_keep_gate_and_run() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = paths_under(tmp.path().to_path_buf());
        append(
            &paths,
            AuditEvent::new("cycle", "completed", "processed=2").gate("ready").run(Some(7)),
        )
        .expect("append cycle");
        append(&paths, AuditEvent::new("cache-cleanup", "ok", "removed=0")).expect("append");

        let raw = fs::read_to_string(paths.logs_dir.join(AUDIT_FILE)).expect("read");
        let first = raw.lines().next().expect("line");
        assert!(first.contains("\"gate\":\"ready\""));
        assert!(first.contains("\"run_id\":7"));
        assert!(!raw.lines().nth(1).expect("line").contains("run_id"));

        let events = recent(&paths, 1).expect("recent");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].phase, "cache-cleanup");
        assert!(events[0].at_epoch_secs > 0);
    }

    #[test]
    fn recent_skips_garbage_and_missing_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = paths_under(tmp.path().to_path_buf());
        assert!(recent(&paths, 5).expect("empty").is_empty());

        append(&paths, AuditEvent::new("watcher", "degraded", "x")).expect("append");
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(paths.logs_dir.join(AUDIT_FILE))
            .expect("open");
        writeln!(file, "not json").expect("write");

        let events = recent(&paths, 5).expect("recent");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, "degraded");
    }
}
