use anyhow::Result;

use crate::commands::CommandReport;
use crate::sift::watcher::{self, CycleStatus};

#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub once: bool,
    pub daemon: bool,
    pub force: bool,
}

pub fn run(opts: &WatchOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("watch");

    if opts.once && opts.daemon {
        report.issue("invalid flags: use only one of --once or --daemon");
        return Ok(report);
    }

    if opts.daemon {
        report.detail("starting sift watcher in daemon mode");
        watcher::run_daemon(opts.force)?;
        return Ok(report);
    }

    let cycle = watcher::run_once(opts.force)?;
    report.detail(format!("cycle.status={}", cycle.status.as_str()));
    report.detail(format!("cycle.gate={}", cycle.gate));
    report.detail(format!("cycle.forced={}", cycle.forced));
    report.detail(format!("sessions.grouped={}", cycle.sessions_grouped));
    report.detail(format!("sessions.processed={}", cycle.sessions_processed));
    report.detail(format!("sessions.failed={}", cycle.sessions_failed));
    report.detail(format!("events.processed={}", cycle.events_processed));
    if let Some(run_id) = cycle.run_id {
        report.detail(format!("run.id={run_id}"));
    }
    if let Some(analyzer) = &cycle.analyzer {
        report.detail(format!("run.analyzer={analyzer}"));
    }
    report.detail(format!("run.tokens_used={}", cycle.tokens_used));
    report.detail(format!(
        "projects.created={}",
        cycle.projects_created.join(",")
    ));
    report.detail(format!("projects.merged={}", cycle.projects_merged.join(",")));
    report.detail(format!("tweet_drafts={}", cycle.tweet_drafts));
    if let Some(removed) = cycle.cache_entries_removed {
        report.detail(format!("cache.removed={removed}"));
    }
    report.detail(format!("state_file={}", cycle.state_file));
    report.detail(format!("heartbeat_epoch_secs={}", cycle.heartbeat_epoch_secs));
    report.detail(format!("poll_interval_secs={}", cycle.poll_interval_secs));

    if cycle.status == CycleStatus::Failed {
        report.issue(format!(
            "every session failed ({}); they stay pending for the next cycle",
            cycle.sessions_failed
        ));
    }
    Ok(report)
}
