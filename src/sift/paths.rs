use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct SiftPaths {
    pub sift_home: PathBuf,
    pub db_path: PathBuf,
    pub logs_dir: PathBuf,
    pub state_file: PathBuf,
    pub lock_file: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<SiftPaths> {
    let sift_home = match env::var("SIFT_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => required_home_dir()?.join(".sift"),
    };
    Ok(paths_under(sift_home))
}

pub fn paths_under(sift_home: PathBuf) -> SiftPaths {
    let db_path = env_or_default_path("SIFT_DB_PATH", sift_home.join("sift.db"));
    let logs_dir = env_or_default_path("SIFT_LOGS_DIR", sift_home.join("logs"));
    let state_file = sift_home.join("state").join("sift_state.json");
    let lock_file = sift_home.join("state").join("cycle.lock");

    SiftPaths {
        sift_home,
        db_path,
        logs_dir,
        state_file,
        lock_file,
    }
}

/// Create the home, database, log and state directories.
pub fn ensure_layout(paths: &SiftPaths) -> Result<()> {
    let mut dirs = vec![paths.sift_home.clone(), paths.logs_dir.clone()];
    for file in [&paths.db_path, &paths.state_file, &paths.lock_file] {
        if let Some(parent) = file.parent() {
            dirs.push(parent.to_path_buf());
        }
    }
    for dir in dirs {
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    Ok(())
}
