use crate::sift::config::SiftSessionConfig;
use crate::sift::event::RawEvent;
use crate::sift::store::EventStore;
use crate::sift::warn::{self, WarnEvent};
use chrono::Duration;
use tracing::{debug, info};

/// Groups ungrouped events into sessions separated by idle gaps.
pub struct SessionClusterer<'a, S: EventStore + ?Sized> {
    store: &'a S,
    gap: Duration,
}

impl<'a, S: EventStore + ?Sized> SessionClusterer<'a, S> {
    pub fn new(store: &'a S, cfg: &SiftSessionConfig) -> Self {
        Self {
            store,
            gap: Duration::minutes(cfg.gap_minutes as i64),
        }
    }

    /// Assign every pending event to a session. Returns the ids of the
    /// sessions created; a group that fails to persist keeps its events
    /// ungrouped for the next cycle.
    pub fn group_pending(&self) -> Vec<i64> {
        let events = match self.store.ungrouped_events() {
            Ok(events) => events,
            Err(err) => {
                warn::emit(WarnEvent {
                    code: "STORE_READ_FAILED",
                    stage: "group",
                    action: "skip-cycle",
                    unit: "events",
                    retry: "next-cycle",
                    reason: "ungrouped-query",
                    err: &err.to_string(),
                });
                return Vec::new();
            }
        };
        if events.is_empty() {
            debug!(event = "group_noop", "no ungrouped events");
            return Vec::new();
        }

        let groups = group_by_gap(&events, self.gap);
        let mut created = Vec::with_capacity(groups.len());
        for group in groups {
            let ids: Vec<i64> = group.iter().map(|e| e.id).collect();
            let (start, end) = session_bounds(&group);
            match self.store.create_session(&ids, &start, &end) {
                Ok(session_id) => {
                    debug!(
                        event = "session_created",
                        session_id,
                        events = ids.len(),
                        start = %start,
                        end = %end
                    );
                    created.push(session_id);
                }
                Err(err) => {
                    warn::emit(WarnEvent {
                        code: "SESSION_PERSIST_FAILED",
                        stage: "group",
                        action: "skip-group",
                        unit: &start,
                        retry: "next-cycle",
                        reason: "create-session",
                        err: &err.to_string(),
                    });
                }
            }
        }

        info!(
            event = "group_pending",
            events = events.len(),
            sessions = created.len()
        );
        created
    }
}

/// Partition a time-ordered slice so that every adjacent gap inside a group
/// is at most `gap` and every boundary gap exceeds it. An event whose time,
/// or whose predecessor's time, cannot be parsed stays in the current group.
pub fn group_by_gap(events: &[RawEvent], gap: Duration) -> Vec<Vec<&RawEvent>> {
    let mut groups: Vec<Vec<&RawEvent>> = Vec::new();
    let mut current: Vec<&RawEvent> = Vec::new();

    for event in events {
        let Some(prev) = current.last() else {
            current.push(event);
            continue;
        };

        match (prev.occurred_at_utc(), event.occurred_at_utc()) {
            (Some(prev_at), Some(at)) => {
                if at - prev_at > gap {
                    groups.push(std::mem::take(&mut current));
                }
                current.push(event);
            }
            _ => {
                warn::emit(WarnEvent {
                    code: "TIMESTAMP_UNPARSABLE",
                    stage: "group",
                    action: "keep-in-session",
                    unit: &event.id.to_string(),
                    retry: "none",
                    reason: "timestamp",
                    err: &format!("{} / {}", prev.occurred_at, event.occurred_at),
                });
                current.push(event);
            }
        }
    }

    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// Earliest and latest parseable member timestamps, falling back to the
/// first and last raw values when none parse.
pub fn session_bounds(group: &[&RawEvent]) -> (String, String) {
    let mut parsed = group
        .iter()
        .filter_map(|e| e.occurred_at_utc().map(|at| (at, e.occurred_at.as_str())));
    let Some(first) = parsed.next() else {
        let start = group.first().map(|e| e.occurred_at.clone()).unwrap_or_default();
        let end = group.last().map(|e| e.occurred_at.clone()).unwrap_or_default();
        return (start, end);
    };
    let (min, max) = parsed.fold((first, first), |(min, max), item| {
        (
            if item.0 < min.0 { item } else { min },
            if item.0 > max.0 { item } else { max },
        )
    });
    (min.1.to_string(), max.1.to_string())
}
