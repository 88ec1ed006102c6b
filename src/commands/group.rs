use anyhow::Result;

use crate::commands::{CommandReport, open_workspace};
use crate::sift::sessions::SessionClusterer;

pub fn run() -> Result<CommandReport> {
    let mut report = CommandReport::new("group");
    let ws = open_workspace()?;

    let created = SessionClusterer::new(&ws.store, &ws.cfg.sessions).group_pending();
    report.detail(format!("gap_minutes={}", ws.cfg.sessions.gap_minutes));
    report.detail(format!("sessions_created={}", created.len()));
    if !created.is_empty() {
        let ids = created
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        report.detail(format!("session_ids={ids}"));
    }
    report.detail(format!("sessions_total={}", ws.store.session_count()?));
    Ok(report)
}
