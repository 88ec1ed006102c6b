pub mod batch;
pub mod cache_cleanup;
pub mod group;
pub mod ingest;
pub mod projects;
pub mod status;
pub mod watch;

use anyhow::Result;
use serde::Serialize;

use crate::error::SiftError;
use crate::sift::config::{SiftConfig, load_config};
use crate::sift::paths::{SiftPaths, ensure_layout, resolve_paths};
use crate::sift::store::SiftStore;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    pub fn merge(&mut self, mut other: CommandReport) {
        self.ok &= other.ok;
        self.details.append(&mut other.details);
        self.issues.append(&mut other.issues);
    }
}

/// Everything a store-backed command needs.
pub struct Workspace {
    pub paths: SiftPaths,
    pub cfg: SiftConfig,
    pub store: SiftStore,
}

pub fn open_workspace() -> Result<Workspace> {
    let paths = resolve_paths()?;
    ensure_layout(&paths)?;
    let cfg = load_config().map_err(|err| SiftError::InvalidConfig(format!("{err:#}")))?;
    let store = SiftStore::open(&paths.db_path).map_err(SiftError::Store)?;
    Ok(Workspace { paths, cfg, store })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_flip_ok_and_merge_keeps_order() {
        let mut report = CommandReport::new("status");
        report.detail("a");
        let mut other = CommandReport::new("batch");
        other.detail("b");
        other.issue("broken");
        report.merge(other);
        assert!(!report.ok);
        assert_eq!(report.details, vec!["a", "b"]);
        assert_eq!(report.issues, vec!["broken"]);
    }
}
