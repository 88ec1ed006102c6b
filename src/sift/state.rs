use crate::sift::paths::SiftPaths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftState {
    pub schema_version: u32,
    pub last_heartbeat_epoch_secs: u64,
    pub last_cache_cleanup_epoch_secs: Option<u64>,
    pub last_cycle_status: Option<String>,
    pub last_run_id: Option<i64>,
}

impl Default for SiftState {
    fn default() -> Self {
        Self {
            schema_version: 1,
            last_heartbeat_epoch_secs: 0,
            last_cache_cleanup_epoch_secs: None,
            last_cycle_status: None,
            last_run_id: None,
        }
    }
}

pub fn load(paths: &SiftPaths) -> Result<SiftState> {
    let file = &paths.state_file;
    if !file.exists() {
        return Ok(SiftState::default());
    }

    let raw =
        fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
    let parsed: SiftState = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    Ok(parsed)
}

/// Write the state file through a temp file in the same directory so a crash
/// never leaves a half-written JSON document behind.
pub fn save(paths: &SiftPaths, state: &SiftState) -> Result<PathBuf> {
    let file = paths.state_file.clone();
    let parent = file
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| paths.sift_home.clone());
    fs::create_dir_all(&parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;

    let data = serde_json::to_string_pretty(state)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent)
        .with_context(|| format!("failed to stage state in {}", parent.display()))?;
    tmp.write_all(format!("{data}\n").as_bytes())?;
    tmp.persist(&file)
        .with_context(|| format!("failed to write {}", file.display()))?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sift::paths::paths_under;

    #[test]
    fn missing_state_loads_default() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = paths_under(tmp.path().to_path_buf());
        let state = load(&paths).expect("load");
        assert_eq!(state.schema_version, 1);
        assert!(state.last_cache_cleanup_epoch_secs.is_none());
    }

    #[test]
    fn save_then_load_keeps_cleanup_marker() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = paths_under(tmp.path().to_path_buf());
        let state = SiftState {
            last_cache_cleanup_epoch_secs: Some(42),
            last_cycle_status: Some("completed".into()),
            ..SiftState::default()
        };
        save(&paths, &state).expect("save");
        let loaded = load(&paths).expect("load");
        assert_eq!(loaded.last_cache_cleanup_epoch_secs, Some(42));
        assert_eq!(loaded.last_cycle_status.as_deref(), Some("completed"));
    }
}
