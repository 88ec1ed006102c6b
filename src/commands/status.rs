use anyhow::Result;
use std::env;

use crate::commands::{CommandReport, batch, open_workspace};
use crate::sift::audit;
use crate::sift::state;
use crate::sift::util::epoch_to_utc;

include!(concat!(env!("OUT_DIR"), "/sift_env_allowlist.rs"));

const RECENT_RUNS: usize = 3;

/// `SIFT_*` names that no code path reads, usually typos.
fn unknown_sift_keys<I>(names: I, allowlist: &[&str]) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut unknown: Vec<String> = names
        .into_iter()
        .filter(|name| name.starts_with("SIFT_") && !allowlist.contains(&name.as_str()))
        .collect();
    unknown.sort();
    unknown
}

fn format_epoch(epoch: i64) -> String {
    u64::try_from(epoch)
        .ok()
        .and_then(epoch_to_utc)
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_else(|| epoch.to_string())
}

pub fn run() -> Result<CommandReport> {
    let ws = open_workspace()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("build_id={}", env!("BUILD_UUID")));
    report.detail(format!("sift_home={}", ws.paths.sift_home.display()));
    report.detail(format!("db_path={}", ws.paths.db_path.display()));
    report.detail(format!("logs_dir={}", ws.paths.logs_dir.display()));
    report.detail(format!("state_file={}", ws.paths.state_file.display()));
    report.detail(format!("schema_version={}", ws.store.schema_version()?));

    report.detail(format!("analysis.provider={}", ws.cfg.analysis.provider));
    report.detail(format!("analysis.model={}", ws.cfg.analysis.model));
    report.detail(format!(
        "analysis.api_key={}",
        if ws.cfg.analysis.api_key.is_some() { "set" } else { "unset" }
    ));
    report.detail(format!(
        "analysis.summarize_pages={}",
        ws.cfg.analysis.summarize_pages
    ));

    report.detail(format!("events.pending={}", ws.store.unprocessed_event_count()?));
    report.detail(format!("sessions.total={}", ws.store.session_count()?));
    report.detail(format!("cache.entries={}", ws.store.summary_count()?));
    report.detail(format!("analysis.calls={}", ws.store.analysis_call_count()?));
    report.detail(format!("tweet_drafts={}", ws.store.tweet_draft_count()?));

    for run in ws.store.recent_runs(RECENT_RUNS)? {
        let mut line = format!(
            "run.{} status={} started={} events={} processed={} tokens={}",
            run.id,
            run.status,
            format_epoch(run.started_at_epoch),
            run.total_events,
            run.processed_count,
            run.tokens_used
        );
        if let Some(err) = run.error_message {
            line.push_str(&format!(" error={err}"));
        }
        report.detail(line);
    }

    match state::load(&ws.paths) {
        Ok(saved) => {
            report.detail(format!(
                "state.last_heartbeat_epoch_secs={}",
                saved.last_heartbeat_epoch_secs
            ));
            report.detail(format!(
                "state.last_cycle_status={}",
                saved.last_cycle_status.as_deref().unwrap_or("none")
            ));
            if let Some(cleanup) = saved.last_cache_cleanup_epoch_secs {
                report.detail(format!("state.last_cache_cleanup_epoch_secs={cleanup}"));
            }
        }
        Err(err) => report.issue(format!("state file unreadable: {err:#}")),
    }

    match audit::recent(&ws.paths, 1) {
        Ok(events) => {
            if let Some(last) = events.last() {
                report.detail(format!(
                    "audit.last={} status={} gate={} run={} at={}",
                    last.phase,
                    last.status,
                    last.gate.as_deref().unwrap_or("-"),
                    last.run_id.map_or_else(|| "-".to_string(), |id| id.to_string()),
                    format_epoch(i64::try_from(last.at_epoch_secs).unwrap_or(i64::MAX))
                ));
            }
        }
        Err(err) => report.issue(format!("audit log unreadable: {err:#}")),
    }

    report.merge(batch::stats_report(&ws));

    let names = env::vars_os().filter_map(|(key, _)| key.into_string().ok());
    for key in unknown_sift_keys(names, GENERATED_SIFT_ENV_ALLOWLIST) {
        report.issue(format!("unknown environment variable {key}"));
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_keys_skip_allowlisted_and_foreign_names() {
        let names = vec![
            "SIFT_HOME".to_string(),
            "SIFT_BATCH_MAX_TOKEN".to_string(),
            "PATH".to_string(),
            "SIFT_AAA".to_string(),
        ];
        assert_eq!(
            unknown_sift_keys(names, &["SIFT_HOME"]),
            vec!["SIFT_AAA".to_string(), "SIFT_BATCH_MAX_TOKEN".to_string()]
        );
    }

    #[test]
    fn generated_allowlist_covers_config_keys() {
        assert!(GENERATED_SIFT_ENV_ALLOWLIST.contains(&"SIFT_HOME"));
        assert!(GENERATED_SIFT_ENV_ALLOWLIST.contains(&"SIFT_SESSION_GAP_MINUTES"));
        assert!(!GENERATED_SIFT_ENV_ALLOWLIST.contains(&"SIFT_WARN"));
    }
}
