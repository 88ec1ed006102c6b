use crate::sift::config::SiftBatchConfig;
use crate::sift::event::RawEvent;
use crate::sift::store::{EventStore, StoreError};
use crate::sift::tokens::estimate_tokens;
use crate::sift::warn::{self, WarnEvent};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};

const STATS_SCAN_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum GateDecision {
    /// A completed run ended less than `interval_hours` ago.
    TooSoon { next_eligible_epoch: i64 },
    NothingPending,
    BelowThreshold { events: usize, estimated_tokens: u64 },
    Ready { events: usize, estimated_tokens: u64 },
}

impl GateDecision {
    pub fn is_ready(&self) -> bool {
        matches!(self, GateDecision::Ready { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            GateDecision::TooSoon { .. } => "too-soon",
            GateDecision::NothingPending => "nothing-pending",
            GateDecision::BelowThreshold { .. } => "below-threshold",
            GateDecision::Ready { .. } => "ready",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchStats {
    pub pending_events: usize,
    pub pending_scan_capped: bool,
    pub estimated_tokens: u64,
    pub max_tokens: u64,
    pub min_tokens: u64,
    pub min_events: usize,
    pub interval_hours: u64,
    pub last_process_time: Option<String>,
    pub ready_to_process: bool,
}

/// Decides whether the pending backlog justifies an analysis cycle and
/// sizes the batch to the token budget.
pub struct BatchTrigger<'a, S: EventStore + ?Sized> {
    store: &'a S,
    cfg: SiftBatchConfig,
}

impl<'a, S: EventStore + ?Sized> BatchTrigger<'a, S> {
    pub fn new(store: &'a S, cfg: &SiftBatchConfig) -> Self {
        Self {
            store,
            cfg: cfg.clone(),
        }
    }

    pub fn should_process(&self) -> bool {
        self.should_process_at(Utc::now())
    }

    pub fn should_process_at(&self, now: DateTime<Utc>) -> bool {
        self.evaluate_at(now).is_ready()
    }

    /// Run the time, existence and volume gates in order. Storage errors
    /// are contained and read as "not now".
    pub fn evaluate_at(&self, now: DateTime<Utc>) -> GateDecision {
        if self.cfg.interval_hours > 0 {
            match self.store.last_completed_run_end() {
                Ok(Some(last_end)) => {
                    let next = last_end + Duration::hours(self.cfg.interval_hours as i64);
                    if now < next {
                        debug!(
                            event = "gate_too_soon",
                            last_end = %last_end.to_rfc3339(),
                            next_eligible = %next.to_rfc3339()
                        );
                        return GateDecision::TooSoon {
                            next_eligible_epoch: next.timestamp(),
                        };
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    self.warn_store("run-ledger", &err);
                    return GateDecision::NothingPending;
                }
            }
        }

        match self.store.unprocessed_events(1) {
            Ok(events) if events.is_empty() => {
                debug!(event = "gate_nothing_pending");
                return GateDecision::NothingPending;
            }
            Ok(_) => {}
            Err(err) => {
                self.warn_store("pending-check", &err);
                return GateDecision::NothingPending;
            }
        }

        let batch = self.get_events_for_batch(None);
        if batch.is_empty() {
            return GateDecision::NothingPending;
        }
        let estimated_tokens = estimate_tokens(&batch);
        let events = batch.len();
        if estimated_tokens >= self.cfg.min_tokens || events >= self.cfg.min_events {
            info!(event = "gate_ready", events, estimated_tokens);
            GateDecision::Ready {
                events,
                estimated_tokens,
            }
        } else {
            debug!(event = "gate_below_threshold", events, estimated_tokens);
            GateDecision::BelowThreshold {
                events,
                estimated_tokens,
            }
        }
    }

    pub fn default_limit(&self) -> usize {
        let per_budget = (self.cfg.max_tokens / self.cfg.avg_tokens_per_event.max(1)) as usize;
        self.cfg.min_batch_events.max(per_budget)
    }

    /// Oldest pending events, trimmed `trim_step` at a time from the tail
    /// while the estimate exceeds `max_tokens` and more than
    /// `min_batch_events` remain. A trim may land below that floor.
    pub fn get_events_for_batch(&self, limit: Option<usize>) -> Vec<RawEvent> {
        let limit = limit.unwrap_or_else(|| self.default_limit());
        let mut events = match self.store.unprocessed_events(limit) {
            Ok(events) => events,
            Err(err) => {
                self.warn_store("batch-select", &err);
                return Vec::new();
            }
        };

        let floor = self.cfg.min_batch_events;
        let step = self.cfg.trim_step.max(1);
        while estimate_tokens(&events) > self.cfg.max_tokens && events.len() > floor {
            events.truncate(events.len().saturating_sub(step));
        }
        events
    }

    pub fn stats(&self) -> BatchStats {
        self.stats_at(Utc::now())
    }

    pub fn stats_at(&self, now: DateTime<Utc>) -> BatchStats {
        let pending = match self.store.unprocessed_events(STATS_SCAN_LIMIT) {
            Ok(events) => events,
            Err(err) => {
                self.warn_store("stats", &err);
                Vec::new()
            }
        };
        let last_process_time = self
            .store
            .last_completed_run_end()
            .ok()
            .flatten()
            .map(|at| at.to_rfc3339());

        BatchStats {
            pending_events: pending.len(),
            pending_scan_capped: pending.len() >= STATS_SCAN_LIMIT,
            estimated_tokens: estimate_tokens(&pending),
            max_tokens: self.cfg.max_tokens,
            min_tokens: self.cfg.min_tokens,
            min_events: self.cfg.min_events,
            interval_hours: self.cfg.interval_hours,
            last_process_time,
            ready_to_process: self.should_process_at(now),
        }
    }

    pub fn begin_run(
        &self,
        total_events: usize,
        model: &str,
        at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let run_id = self.store.begin_run(total_events, model, at)?;
        info!(event = "run_started", run_id, total_events, model);
        Ok(run_id)
    }

    pub fn complete_run(
        &self,
        run_id: i64,
        processed_count: usize,
        tokens_used: u64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.store
            .complete_run(run_id, processed_count, tokens_used, at)?;
        info!(event = "run_completed", run_id, processed_count, tokens_used);
        Ok(())
    }

    pub fn fail_run(&self, run_id: i64, error: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.store.fail_run(run_id, error, at)?;
        tracing::error!(event = "run_failed", run_id, error);
        Ok(())
    }

    fn warn_store(&self, reason: &str, err: &StoreError) {
        warn::emit(WarnEvent {
            code: "STORE_READ_FAILED",
            stage: "batch",
            action: "skip",
            unit: "backlog",
            retry: "next-cycle",
            reason,
            err: &err.to_string(),
        });
    }
}
