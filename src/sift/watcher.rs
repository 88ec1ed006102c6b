use crate::error::SiftError;
use crate::sift::analysis::{AnalysisRequest, AnalysisResult, ProjectFinding};
use crate::sift::analyzer::{Analyzer, RecordingAnalyzer, build_analyzer};
use crate::sift::audit::{self, AuditEvent};
use crate::sift::batch::BatchTrigger;
use crate::sift::cache::SummaryCache;
use crate::sift::config::{SiftConfig, load_config};
use crate::sift::context::{ContextSplitter, render_event_line};
use crate::sift::event::{RawEvent, Session};
use crate::sift::paths::{SiftPaths, ensure_layout, resolve_paths};
use crate::sift::projects::{
    Activity, MISC_PROJECT, Project, ProjectClassifier, ProjectDecision, ProposedProject,
};
use crate::sift::sessions::SessionClusterer;
use crate::sift::state;
use crate::sift::store::{EventStore, ProjectRegistry, SiftStore};
use crate::sift::summarizer::{PageSummarizer, build_summarizer};
use crate::sift::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

pub const ANALYSIS_TASK: &str = "daily_process";
const DEFAULT_ACTIVITY_KIND: &str = "development";
const MAX_DAEMON_BACKOFF_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// The batch gate refused the backlog.
    Skipped,
    /// Admitted, but there was no unprocessed session to analyze.
    Idle,
    Completed,
    Failed,
}

impl CycleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CycleStatus::Skipped => "skipped",
            CycleStatus::Idle => "idle",
            CycleStatus::Completed => "completed",
            CycleStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleOutcome {
    pub status: CycleStatus,
    pub gate: String,
    pub forced: bool,
    pub sessions_grouped: usize,
    pub sessions_processed: usize,
    pub sessions_failed: usize,
    pub events_processed: usize,
    pub run_id: Option<i64>,
    pub analyzer: Option<String>,
    pub tokens_used: u64,
    pub projects_created: Vec<String>,
    pub projects_merged: Vec<String>,
    pub tweet_drafts: usize,
    pub cache_entries_removed: Option<usize>,
    pub state_file: String,
    pub heartbeat_epoch_secs: u64,
    pub poll_interval_secs: u64,
}

impl CycleOutcome {
    fn audit_message(&self) -> String {
        format!(
            "forced={} grouped={} processed={} failed={} events={} created={} merged={} tokens={}",
            self.forced,
            self.sessions_grouped,
            self.sessions_processed,
            self.sessions_failed,
            self.events_processed,
            self.projects_created.len(),
            self.projects_merged.len(),
            self.tokens_used
        )
    }
}

/// Collaborators a cycle runs against.
pub struct CycleDeps<'a> {
    pub store: &'a SiftStore,
    pub analyzer: &'a dyn Analyzer,
    pub summarizer: Option<&'a dyn PageSummarizer>,
}

#[derive(Debug, Default)]
struct SessionOutcome {
    events: usize,
    created: Vec<String>,
    merged: Vec<String>,
    tweet_drafts: usize,
}

fn push_unique(into: &mut Vec<String>, name: String) {
    if !into.contains(&name) {
        into.push(name);
    }
}

fn proposal_from_finding(finding: &ProjectFinding, fallback_at: &str) -> ProposedProject {
    let activities = finding
        .activities
        .iter()
        .map(|a| Activity {
            description: a.description().trim().to_string(),
            kind: a.kind().unwrap_or(DEFAULT_ACTIVITY_KIND).to_string(),
            occurred_at: a.occurred_at().unwrap_or(fallback_at).to_string(),
            technologies: a.technologies().to_vec(),
        })
        .collect();
    ProposedProject {
        name: finding.name.clone(),
        rationale: finding.rationale.clone(),
        keywords: finding.keywords.clone(),
        activities,
        technologies: finding.technologies_used.clone(),
    }
}

/// Activities of every proposal folded into `canonical`, deduplicated.
fn group_activities(groups: &BTreeMap<String, Vec<ProposedProject>>, canonical: &str) -> Vec<Activity> {
    let mut out: Vec<Activity> = Vec::new();
    for proposal in groups.get(canonical).into_iter().flatten() {
        for activity in &proposal.activities {
            if !out.contains(activity) {
                out.push(activity.clone());
            }
        }
    }
    out
}

struct CycleRunner<'a> {
    cfg: &'a SiftConfig,
    store: &'a SiftStore,
    summarizer: Option<&'a dyn PageSummarizer>,
    classifier: ProjectClassifier,
    splitter: ContextSplitter,
}

impl<'a> CycleRunner<'a> {
    fn page_summary(&self, event: &RawEvent) -> Option<String> {
        let summarizer = self.summarizer?;
        let url = event.url()?;
        let title = event.title();
        SummaryCache::new(self.store, &self.cfg.cache).get_or_create(url, title, || {
            summarizer.summarize(url, title)
        })
    }

    fn process_session<A: Analyzer + ?Sized>(
        &self,
        session: &Session,
        analyzer: &RecordingAnalyzer<'_, A>,
        now: DateTime<Utc>,
    ) -> Result<SessionOutcome> {
        let events = self.store.session_events(session.id)?;
        let primary = events
            .iter()
            .map(|event| {
                let summary = self.page_summary(event);
                render_event_line(event, summary.as_deref(), &self.cfg.context)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let existing = self.store.projects()?;
        let known_projects = existing
            .iter()
            .filter(|p| p.active)
            .map(|p| p.name.clone())
            .collect();
        let repositories: BTreeSet<String> = events
            .iter()
            .filter_map(|event| event.payload.get("repo").and_then(|repo| repo.as_str()))
            .map(|repo| repo.trim().to_string())
            .filter(|repo| !repo.is_empty())
            .collect();
        let request = AnalysisRequest::new(ANALYSIS_TASK, primary)
            .with_context(known_projects, self.store.technologies()?)
            .with_repositories(repositories.into_iter().collect());

        let (calls_before, failures_before) = analyzer.call_counts();
        let result = if events.is_empty() {
            None
        } else {
            self.splitter.analyze(analyzer, &request)
        };
        let (calls_after, failures_after) = analyzer.call_counts();
        let calls = calls_after - calls_before;
        let failures = failures_after - failures_before;
        if result.is_none() && calls > 0 && failures == calls {
            anyhow::bail!("all {calls} analysis call(s) failed");
        }

        let mut outcome = SessionOutcome::default();
        match result {
            Some(result) => self.apply_findings(session, &result, &existing, now, &mut outcome)?,
            None => debug!(event = "session_no_findings", session_id = session.id),
        }
        outcome.events = self.store.mark_session_processed(session.id, now)?;
        Ok(outcome)
    }

    fn apply_findings(
        &self,
        session: &Session,
        result: &AnalysisResult,
        existing: &[Project],
        now: DateTime<Utc>,
        outcome: &mut SessionOutcome,
    ) -> Result<()> {
        let proposals: Vec<ProposedProject> = result
            .projects
            .iter()
            .flatten()
            .map(|finding| proposal_from_finding(finding, &session.end_time))
            .collect();

        let mut history: BTreeMap<String, Vec<Activity>> = BTreeMap::new();
        for proposal in &proposals {
            if !history.contains_key(&proposal.name) {
                history.insert(proposal.name.clone(), self.store.activities_for(&proposal.name)?);
            }
        }

        let groups = self.classifier.merge_similar(&proposals);
        for decision in self.classifier.resolve(&proposals, existing, &history) {
            match decision {
                ProjectDecision::Create { name, keywords } => {
                    let rationale = groups
                        .get(&name)
                        .and_then(|group| group.iter().find(|p| !p.rationale.is_empty()))
                        .map(|p| p.rationale.clone())
                        .unwrap_or_default();
                    let project = Project {
                        description: rationale,
                        keywords,
                        ..Project::named(&name)
                    };
                    if self.store.create_project(&project, now)? {
                        push_unique(&mut outcome.created, name.clone());
                    }
                    for activity in group_activities(&groups, &name) {
                        self.store.record_activity(&name, &activity, Some(session.id))?;
                    }
                }
                ProjectDecision::MergeInto { proposed, existing } => {
                    self.store.touch_project(&existing, now)?;
                    for activity in group_activities(&groups, &proposed) {
                        self.store
                            .record_activity(&existing, &activity, Some(session.id))?;
                    }
                    push_unique(&mut outcome.merged, existing);
                }
                ProjectDecision::Discard { name, reason } => {
                    // Kept as candidate activity so later sessions can reach the bar.
                    debug!(event = "project_candidate", name = %name, reason = %reason);
                    for activity in group_activities(&groups, &name) {
                        self.store.record_activity(&name, &activity, Some(session.id))?;
                    }
                }
            }
        }

        let attributed: BTreeSet<&str> = proposals
            .iter()
            .flat_map(|p| p.activities.iter().map(|a| a.description.as_str()))
            .collect();
        for finding in result.activities.iter().flatten() {
            let description = finding.description().trim();
            if attributed.contains(description) {
                continue;
            }
            let project =
                self.classifier
                    .suggest_project(description, finding.technologies(), existing);
            if project == MISC_PROJECT {
                continue;
            }
            let activity = Activity {
                description: description.to_string(),
                kind: finding.kind().unwrap_or(DEFAULT_ACTIVITY_KIND).to_string(),
                occurred_at: finding.occurred_at().unwrap_or(&session.end_time).to_string(),
                technologies: finding.technologies().to_vec(),
            };
            self.store.record_activity(&project, &activity, Some(session.id))?;
            self.store.touch_project(&project, now)?;
            push_unique(&mut outcome.merged, project);
        }

        let mut technologies: BTreeSet<String> = BTreeSet::new();
        technologies.extend(result.technologies.iter().flatten().cloned());
        for proposal in &proposals {
            technologies.extend(proposal.technologies.iter().cloned());
            for activity in &proposal.activities {
                technologies.extend(activity.technologies.iter().cloned());
            }
        }
        for technology in technologies.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            self.store.record_technology(technology, now)?;
        }

        for draft in result.all_tweet_drafts() {
            let description = draft.description.as_deref().unwrap_or(&draft.text);
            self.store.record_tweet_draft(
                draft.project.as_deref(),
                description,
                &draft.text,
                Some(session.id),
                now,
            )?;
            outcome.tweet_drafts += 1;
        }
        Ok(())
    }
}

/// One processing cycle: group, gate, analyze sessions, record the run,
/// then housekeeping. Per-session failures are contained.
pub fn run_cycle(
    cfg: &SiftConfig,
    paths: &SiftPaths,
    deps: &CycleDeps<'_>,
    force: bool,
    now: DateTime<Utc>,
) -> Result<CycleOutcome> {
    let store = deps.store;
    let mut state =
        state::load(paths).map_err(|err| SiftError::StateCorrupt(format!("{err:#}")))?;

    let grouped = SessionClusterer::new(store, &cfg.sessions).group_pending();
    let trigger = BatchTrigger::new(store, &cfg.batch);
    let decision = trigger.evaluate_at(now);

    let mut outcome = CycleOutcome {
        status: CycleStatus::Skipped,
        gate: decision.label().to_string(),
        forced: force,
        sessions_grouped: grouped.len(),
        sessions_processed: 0,
        sessions_failed: 0,
        events_processed: 0,
        run_id: None,
        analyzer: None,
        tokens_used: 0,
        projects_created: Vec::new(),
        projects_merged: Vec::new(),
        tweet_drafts: 0,
        cache_entries_removed: None,
        state_file: paths.state_file.display().to_string(),
        heartbeat_epoch_secs: u64::try_from(now.timestamp()).unwrap_or_default(),
        poll_interval_secs: cfg.watcher.poll_interval_secs,
    };

    if force || decision.is_ready() {
        process_backlog(cfg, deps, &trigger, now, &mut outcome)?;
    } else {
        debug!(event = "cycle_skipped", gate = decision.label());
    }

    audit::append(
        paths,
        AuditEvent::new("cycle", outcome.status.as_str(), outcome.audit_message())
            .gate(&outcome.gate)
            .run(outcome.run_id),
    )?;

    let now_epoch = outcome.heartbeat_epoch_secs;
    let cleanup_every = cfg.cache.cleanup_interval_hours.saturating_mul(3600);
    let cleanup_due = state
        .last_cache_cleanup_epoch_secs
        .is_none_or(|last| now_epoch.saturating_sub(last) >= cleanup_every);
    if cleanup_due {
        let removed = SummaryCache::new(store, &cfg.cache).cleanup_expired_at(now);
        state.last_cache_cleanup_epoch_secs = Some(now_epoch);
        audit::append(
            paths,
            AuditEvent::new("cache-cleanup", "ok", format!("removed={removed}")),
        )?;
        outcome.cache_entries_removed = Some(removed);
    }

    state.last_heartbeat_epoch_secs = now_epoch;
    state.last_cycle_status = Some(outcome.status.as_str().to_string());
    if outcome.run_id.is_some() {
        state.last_run_id = outcome.run_id;
    }
    let file = state::save(paths, &state)?;
    outcome.state_file = file.display().to_string();
    Ok(outcome)
}

fn process_backlog(
    cfg: &SiftConfig,
    deps: &CycleDeps<'_>,
    trigger: &BatchTrigger<'_, SiftStore>,
    now: DateTime<Utc>,
    outcome: &mut CycleOutcome,
) -> Result<()> {
    let store = deps.store;
    outcome.status = CycleStatus::Idle;
    let sessions = match store.unprocessed_sessions(cfg.batch.max_sessions_per_cycle) {
        Ok(sessions) => sessions,
        Err(err) => {
            warn::emit(WarnEvent {
                code: "STORE_READ_FAILED",
                stage: "cycle",
                action: "skip-cycle",
                unit: "sessions",
                retry: "next-cycle",
                reason: "unprocessed-sessions",
                err: &err.to_string(),
            });
            return Ok(());
        }
    };
    if sessions.is_empty() {
        debug!(event = "cycle_idle", "no unprocessed sessions");
        return Ok(());
    }

    let recorder = RecordingAnalyzer::new(deps.analyzer, store, ANALYSIS_TASK);
    let label = recorder.label();
    let total_events: usize = sessions.iter().map(|s| s.event_count).sum();
    let run_id = trigger
        .begin_run(total_events, &label, now)
        .map_err(SiftError::Store)?;
    outcome.run_id = Some(run_id);
    outcome.analyzer = Some(label);

    let runner = CycleRunner {
        cfg,
        store,
        summarizer: deps.summarizer,
        classifier: ProjectClassifier::new(&cfg.projects),
        splitter: ContextSplitter::new(&cfg.context),
    };
    let mut last_error = None;
    for session in &sessions {
        match runner.process_session(session, &recorder, now) {
            Ok(done) => {
                outcome.sessions_processed += 1;
                outcome.events_processed += done.events;
                outcome.tweet_drafts += done.tweet_drafts;
                for name in done.created {
                    push_unique(&mut outcome.projects_created, name);
                }
                for name in done.merged {
                    push_unique(&mut outcome.projects_merged, name);
                }
            }
            Err(err) => {
                outcome.sessions_failed += 1;
                warn::emit(WarnEvent {
                    code: "SESSION_PROCESS_FAILED",
                    stage: "cycle",
                    action: "leave-unprocessed",
                    unit: &session.id.to_string(),
                    retry: "next-cycle",
                    reason: "process-session",
                    err: &format!("{err:#}"),
                });
                last_error = Some(format!("{err:#}"));
            }
        }
    }
    outcome.tokens_used = recorder.tokens_used();

    match last_error {
        Some(err) if outcome.sessions_processed == 0 => {
            trigger
                .fail_run(run_id, &err, now)
                .map_err(SiftError::Store)?;
            outcome.status = CycleStatus::Failed;
        }
        _ => {
            trigger
                .complete_run(run_id, outcome.events_processed, outcome.tokens_used, now)
                .map_err(SiftError::Store)?;
            outcome.status = CycleStatus::Completed;
        }
    }
    info!(
        event = "cycle_finished",
        status = outcome.status.as_str(),
        run_id,
        processed = outcome.sessions_processed,
        failed = outcome.sessions_failed,
        created = outcome.projects_created.len()
    );
    Ok(())
}

/// Advisory single-instance lock, held for as long as the file is open.
pub fn acquire_cycle_lock(paths: &SiftPaths) -> Result<File> {
    ensure_layout(paths)?;
    let lock_path = &paths.lock_file;
    let mut lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .with_context(|| format!("failed to open cycle lock {}", lock_path.display()))?;

    match lock_file.try_lock_exclusive() {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::WouldBlock => {
            return Err(SiftError::Locked(lock_path.display().to_string()).into());
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to lock {}", lock_path.display()));
        }
    }

    lock_file
        .set_len(0)
        .with_context(|| format!("failed to truncate cycle lock {}", lock_path.display()))?;
    writeln!(&mut lock_file, "{}", std::process::id())
        .with_context(|| format!("failed to write cycle lock {}", lock_path.display()))?;
    Ok(lock_file)
}

fn load_cycle_config() -> Result<SiftConfig> {
    load_config().map_err(|err| SiftError::InvalidConfig(format!("{err:#}")).into())
}

fn run_unlocked(cfg: &SiftConfig, paths: &SiftPaths, force: bool) -> Result<CycleOutcome> {
    let store = SiftStore::open(&paths.db_path).map_err(SiftError::Store)?;
    let analyzer = build_analyzer(&cfg.analysis).map_err(SiftError::Analyzer)?;
    let summarizer = match build_summarizer(&cfg.analysis) {
        Ok(summarizer) => summarizer,
        Err(err) => {
            warn::emit(WarnEvent {
                code: "SUMMARIZER_UNAVAILABLE",
                stage: "cycle",
                action: "skip-summaries",
                unit: "pages",
                retry: "next-cycle",
                reason: "build-summarizer",
                err: &err.to_string(),
            });
            None
        }
    };
    let deps = CycleDeps {
        store: &store,
        analyzer: &*analyzer,
        summarizer: summarizer.as_deref(),
    };
    run_cycle(cfg, paths, &deps, force, Utc::now())
}

/// Daemon delay after `consecutive_failures` failed cycles: the poll
/// interval doubled per failure, capped.
fn retry_delay_secs(poll_interval_secs: u64, consecutive_failures: u32) -> u64 {
    let exponent = consecutive_failures.saturating_sub(1).min(4);
    poll_interval_secs
        .max(1)
        .saturating_mul(1u64 << exponent)
        .min(MAX_DAEMON_BACKOFF_SECS)
}

pub fn run_once(force: bool) -> Result<CycleOutcome> {
    let cfg = load_cycle_config()?;
    let paths = resolve_paths()?;
    let _lock = acquire_cycle_lock(&paths)?;
    run_unlocked(&cfg, &paths, force)
}

pub fn run_daemon(force: bool) -> Result<()> {
    let cfg = load_cycle_config()?;
    let paths = resolve_paths()?;
    let _lock = acquire_cycle_lock(&paths)?;
    info!(
        event = "daemon_started",
        poll_interval_secs = cfg.watcher.poll_interval_secs,
        lock = %paths.lock_file.display()
    );
    let mut consecutive_failures = 0u32;
    loop {
        match run_unlocked(&cfg, &paths, force) {
            Ok(cycle) => {
                consecutive_failures = 0;
                thread::sleep(Duration::from_secs(cycle.poll_interval_secs.max(1)));
            }
            Err(err) => {
                consecutive_failures = consecutive_failures.saturating_add(1);
                let retry_in_secs =
                    retry_delay_secs(cfg.watcher.poll_interval_secs, consecutive_failures);
                let _ = audit::append(
                    &paths,
                    AuditEvent::new(
                        "watcher",
                        "degraded",
                        format!("cycle failed: {err:#}; retry in {retry_in_secs}s"),
                    ),
                );
                tracing::error!(
                    event = "cycle_error",
                    error = %format!("{err:#}"),
                    retry_in_secs,
                    consecutive_failures
                );
                thread::sleep(Duration::from_secs(retry_in_secs));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sift::analysis::{ActivityFinding, AnalysisError, NotableMoment};
    use crate::sift::analyzer::LocalAnalyzer;
    use crate::sift::event::NewEvent;
    use crate::sift::paths::paths_under;
    use crate::sift::summarizer::SummarizeError;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 20, 12, 0, 0).single().expect("ts")
    }

    fn insert(store: &SiftStore, at: &str, payload: serde_json::Value) {
        store
            .insert_event(
                &NewEvent {
                    source: "git".into(),
                    event_type: "commit".into(),
                    payload,
                    occurred_at: at.into(),
                },
                now(),
            )
            .expect("insert");
    }

    fn setup() -> (tempfile::TempDir, SiftPaths, SiftConfig, SiftStore) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = paths_under(tmp.path().to_path_buf());
        ensure_layout(&paths).expect("layout");
        let store = SiftStore::open_in_memory().expect("store");
        (tmp, paths, SiftConfig::default(), store)
    }

    struct Down;

    impl Analyzer for Down {
        fn label(&self) -> String {
            "down".into()
        }

        fn analyze(&self, _: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
            Err(AnalysisError::Transport("offline".into()))
        }
    }

    #[test]
    fn gate_refusal_records_skip_and_keeps_sessions() {
        let (_tmp, paths, cfg, store) = setup();
        insert(&store, "2024-01-20T09:00:00Z", json!({"message": "one"}));
        let deps = CycleDeps {
            store: &store,
            analyzer: &LocalAnalyzer,
            summarizer: None,
        };
        let outcome = run_cycle(&cfg, &paths, &deps, false, now()).expect("cycle");
        assert_eq!(outcome.status, CycleStatus::Skipped);
        assert_eq!(outcome.gate, "below-threshold");
        assert_eq!(outcome.sessions_grouped, 1);
        assert_eq!(store.unprocessed_event_count().expect("count"), 1);

        let saved = state::load(&paths).expect("state");
        assert_eq!(saved.last_cycle_status.as_deref(), Some("skipped"));
        assert!(saved.last_cache_cleanup_epoch_secs.is_some());
    }

    #[test]
    fn repository_behind_a_long_payload_is_still_attributed() {
        let (_tmp, paths, cfg, store) = setup();
        insert(
            &store,
            "2024-01-18T09:00:00Z",
            json!({"diff": "+".repeat(900), "message": "bulk import", "repo": "acme/orchard"}),
        );
        let deps = CycleDeps {
            store: &store,
            analyzer: &LocalAnalyzer,
            summarizer: None,
        };
        let outcome = run_cycle(&cfg, &paths, &deps, true, now()).expect("cycle");
        assert_eq!(outcome.status, CycleStatus::Completed);
        assert_eq!(store.activities_for("orchard").expect("candidates").len(), 1);
    }

    #[test]
    fn repeated_repo_activity_creates_project_across_sessions() {
        let (_tmp, paths, cfg, store) = setup();
        insert(
            &store,
            "2024-01-18T09:00:00Z",
            json!({"repo": "acme/ledger", "message": "add reconciliation"}),
        );
        insert(
            &store,
            "2024-01-18T09:20:00Z",
            json!({"repo": "acme/ledger", "message": "fix rounding"}),
        );
        let deps = CycleDeps {
            store: &store,
            analyzer: &LocalAnalyzer,
            summarizer: None,
        };

        let first = run_cycle(&cfg, &paths, &deps, true, now()).expect("first cycle");
        assert_eq!(first.status, CycleStatus::Completed);
        assert!(first.projects_created.is_empty());
        assert_eq!(store.activities_for("ledger").expect("candidates").len(), 2);

        insert(
            &store,
            "2024-01-19T14:00:00Z",
            json!({"repo": "acme/ledger", "message": "ship export"}),
        );
        let second = run_cycle(&cfg, &paths, &deps, true, now()).expect("second cycle");
        assert_eq!(second.projects_created, vec!["ledger".to_string()]);
        let projects = store.projects().expect("projects");
        assert_eq!(projects.len(), 1);
        assert!(projects[0].keywords.contains(&"ledger".to_string()));
        assert_eq!(store.unprocessed_event_count().expect("pending"), 0);
        assert_eq!(store.recent_runs(5).expect("runs").len(), 2);
    }

    #[test]
    fn known_project_mentions_merge_into_it() {
        let (_tmp, paths, cfg, store) = setup();
        store
            .create_project(&Project::named("orchard"), now())
            .expect("seed project");
        insert(&store, "2024-01-20T08:00:00Z", json!({"message": "orchard sync tuning"}));
        let deps = CycleDeps {
            store: &store,
            analyzer: &LocalAnalyzer,
            summarizer: None,
        };
        let outcome = run_cycle(&cfg, &paths, &deps, true, now()).expect("cycle");
        assert_eq!(outcome.projects_merged, vec!["orchard".to_string()]);
        assert_eq!(store.activities_for("orchard").expect("activities").len(), 1);
    }

    #[test]
    fn every_session_failing_fails_the_run_and_leaves_work_pending() {
        let (_tmp, paths, cfg, store) = setup();
        insert(&store, "2024-01-20T08:00:00Z", json!({"message": "a"}));
        insert(&store, "2024-01-20T11:00:00Z", json!({"message": "b"}));
        let deps = CycleDeps {
            store: &store,
            analyzer: &Down,
            summarizer: None,
        };
        let outcome = run_cycle(&cfg, &paths, &deps, true, now()).expect("cycle");
        assert_eq!(outcome.status, CycleStatus::Failed);
        assert_eq!(outcome.sessions_failed, 2);
        assert_eq!(store.unprocessed_event_count().expect("pending"), 2);
        let runs = store.recent_runs(1).expect("runs");
        assert_eq!(runs[0].status, "failed");
    }

    #[test]
    fn forced_cycle_without_sessions_is_idle() {
        let (_tmp, paths, cfg, store) = setup();
        let deps = CycleDeps {
            store: &store,
            analyzer: &LocalAnalyzer,
            summarizer: None,
        };
        let outcome = run_cycle(&cfg, &paths, &deps, true, now()).expect("cycle");
        assert_eq!(outcome.status, CycleStatus::Idle);
        assert!(outcome.run_id.is_none());
    }

    struct Counting(AtomicUsize);

    impl PageSummarizer for Counting {
        fn summarize(&self, _url: &str, _title: Option<&str>) -> Result<String, SummarizeError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok("Reference docs for the runtime.".into())
        }
    }

    struct Drafting;

    impl Analyzer for Drafting {
        fn label(&self) -> String {
            "drafting".into()
        }

        fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
            assert!(request.primary.contains("Summary: Reference docs"));
            Ok(AnalysisResult {
                activities: Some(vec![ActivityFinding::Text("read runtime docs".into())]),
                notable_moments: Some(vec![NotableMoment {
                    description: "found the scheduler docs".into(),
                    tweetable: true,
                    tweet_draft: Some("Today I learned how the scheduler works".into()),
                    project: None,
                }]),
                technologies: Some(vec!["tokio".into()]),
                ..AnalysisResult::default()
            })
        }
    }

    #[test]
    fn page_summaries_are_cached_and_findings_recorded() {
        let (_tmp, paths, cfg, store) = setup();
        insert(
            &store,
            "2024-01-20T08:00:00Z",
            json!({"url": "https://docs.rs/tokio", "title": "tokio"}),
        );
        insert(
            &store,
            "2024-01-20T08:05:00Z",
            json!({"url": "https://docs.rs/tokio", "title": "tokio", "tab": 2}),
        );
        let summarizer = Counting(AtomicUsize::new(0));
        let deps = CycleDeps {
            store: &store,
            analyzer: &Drafting,
            summarizer: Some(&summarizer),
        };
        let outcome = run_cycle(&cfg, &paths, &deps, true, now()).expect("cycle");
        assert_eq!(outcome.status, CycleStatus::Completed);
        assert_eq!(summarizer.0.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.tweet_drafts, 1);
        assert_eq!(store.tweet_draft_count().expect("drafts"), 1);
        assert_eq!(store.technologies().expect("techs"), vec!["tokio".to_string()]);
        assert_eq!(store.summary_count().expect("summaries"), 1);
    }

    #[test]
    fn daemon_backoff_doubles_from_poll_interval_and_caps() {
        assert_eq!(retry_delay_secs(30, 1), 30);
        assert_eq!(retry_delay_secs(30, 2), 60);
        assert_eq!(retry_delay_secs(30, 4), 240);
        assert_eq!(retry_delay_secs(30, 9), MAX_DAEMON_BACKOFF_SECS);
        assert_eq!(retry_delay_secs(0, 1), 1);
    }

    #[test]
    fn second_lock_holder_is_refused() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = paths_under(tmp.path().to_path_buf());
        let _held = acquire_cycle_lock(&paths).expect("first lock");
        let err = acquire_cycle_lock(&paths).expect_err("second lock");
        assert!(matches!(
            err.downcast_ref::<SiftError>(),
            Some(SiftError::Locked(_))
        ));
    }
}
