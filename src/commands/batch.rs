use anyhow::Result;
use chrono::Utc;

use crate::commands::{CommandReport, Workspace, open_workspace};
use crate::sift::batch::BatchTrigger;
use crate::sift::tokens::estimate_tokens;

/// Backlog and gate state, shared with `status`.
pub fn stats_report(ws: &Workspace) -> CommandReport {
    let mut report = CommandReport::new("batch");
    let trigger = BatchTrigger::new(&ws.store, &ws.cfg.batch);
    let stats = trigger.stats();
    let pending = if stats.pending_scan_capped {
        format!("{}+", stats.pending_events)
    } else {
        stats.pending_events.to_string()
    };
    report.detail(format!("batch.pending_events={pending}"));
    report.detail(format!("batch.estimated_tokens={}", stats.estimated_tokens));
    report.detail(format!(
        "batch.limits=min_tokens:{} min_events:{} max_tokens:{} interval_hours:{}",
        stats.min_tokens, stats.min_events, stats.max_tokens, stats.interval_hours
    ));
    report.detail(format!(
        "batch.last_process_time={}",
        stats.last_process_time.as_deref().unwrap_or("never")
    ));
    report.detail(format!("batch.ready={}", stats.ready_to_process));
    report
}

pub fn run(limit: Option<usize>) -> Result<CommandReport> {
    let ws = open_workspace()?;
    let mut report = stats_report(&ws);
    let trigger = BatchTrigger::new(&ws.store, &ws.cfg.batch);

    report.detail(format!(
        "gate={}",
        trigger.evaluate_at(Utc::now()).label()
    ));
    report.detail(format!("should_process={}", trigger.should_process()));

    let events = trigger.get_events_for_batch(limit);
    report.detail(format!(
        "next_batch.limit={}",
        limit.unwrap_or_else(|| trigger.default_limit())
    ));
    report.detail(format!("next_batch.events={}", events.len()));
    report.detail(format!(
        "next_batch.estimated_tokens={}",
        if events.is_empty() { 0 } else { estimate_tokens(&events) }
    ));
    if let (Some(first), Some(last)) = (events.first(), events.last()) {
        report.detail(format!(
            "next_batch.span={}..{}",
            first.occurred_at, last.occurred_at
        ));
    }
    Ok(report)
}
