use anyhow::Result;

use crate::commands::{CommandReport, open_workspace};
use crate::sift::audit::{self, AuditEvent};
use crate::sift::cache::SummaryCache;
use crate::sift::state;
use crate::sift::util::now_epoch_secs;

pub fn run() -> Result<CommandReport> {
    let mut report = CommandReport::new("cache-cleanup");
    let ws = open_workspace()?;

    let removed = SummaryCache::new(&ws.store, &ws.cfg.cache).cleanup_expired();
    let mut saved = state::load(&ws.paths)?;
    saved.last_cache_cleanup_epoch_secs = Some(now_epoch_secs()?);
    state::save(&ws.paths, &saved)?;
    audit::append(
        &ws.paths,
        AuditEvent::new("cache-cleanup", "ok", format!("removed={removed} manual=true")),
    )?;

    report.detail(format!("expiry_days={}", ws.cfg.cache.expiry_days));
    report.detail(format!("removed={removed}"));
    report.detail(format!("remaining={}", ws.store.summary_count()?));
    Ok(report)
}
