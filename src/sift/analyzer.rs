use crate::sift::analysis::{
    ActivityFinding, AnalysisError, AnalysisRequest, AnalysisResult, ProjectFinding,
    parse_analysis_response,
};
use crate::sift::config::SiftAnalysisConfig;
use crate::sift::store::{AnalysisCall, SiftStore};
use crate::sift::tokens::estimate_text_tokens;
use crate::sift::util::truncate_with_ellipsis;
use chrono::Utc;
use reqwest::blocking::Client;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const MAX_LOCAL_ACTIVITY_CHARS: usize = 200;

pub trait Analyzer: Send + Sync {
    fn label(&self) -> String;
    fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError>;
}

impl<A: Analyzer + ?Sized> Analyzer for Box<A> {
    fn label(&self) -> String {
        (**self).label()
    }

    fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
        (**self).analyze(request)
    }
}

/// Offline fallback: turns event lines into activities and attributes them
/// to known projects and technologies by name.
pub struct LocalAnalyzer;

/// OpenAI-compatible chat completions endpoint.
pub struct RemoteAnalyzer {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

pub struct RetryingAnalyzer<A> {
    inner: A,
    max_attempts: u32,
    initial_backoff: Duration,
}

/// Records every call in the `analysis_calls` ledger and keeps a running
/// token estimate for the current processing run.
pub struct RecordingAnalyzer<'a, A: ?Sized> {
    inner: &'a A,
    store: &'a SiftStore,
    task: &'a str,
    tokens: AtomicU64,
    calls: AtomicU64,
    failures: AtomicU64,
}

pub fn build_analyzer(cfg: &SiftAnalysisConfig) -> Result<Box<dyn Analyzer>, AnalysisError> {
    let provider = cfg.provider.trim().to_ascii_lowercase();
    let remote = |api_key: String| RemoteAnalyzer {
        api_key,
        model: cfg.model.clone(),
        base_url: cfg.base_url.clone(),
        timeout: Duration::from_secs(cfg.request_timeout_secs),
    };
    let backoff = Duration::from_secs(cfg.initial_backoff_secs);

    match provider.as_str() {
        "local" => Ok(Box::new(LocalAnalyzer)),
        "auto" => match cfg.api_key.clone() {
            Some(key) => Ok(Box::new(RetryingAnalyzer::new(
                remote(key),
                cfg.max_attempts,
                backoff,
            ))),
            None => {
                info!(event = "analyzer_local_fallback", "no api key configured");
                Ok(Box::new(LocalAnalyzer))
            }
        },
        "remote" => {
            let key = cfg.api_key.clone().ok_or_else(|| {
                AnalysisError::Config(format!("provider `{provider}` needs SIFT_API_KEY"))
            })?;
            Ok(Box::new(RetryingAnalyzer::new(
                remote(key),
                cfg.max_attempts,
                backoff,
            )))
        }
        other => Err(AnalysisError::Config(format!("unknown provider `{other}`"))),
    }
}

fn build_prompt(request: &AnalysisRequest) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "Analyze the activity log below. Reply with one JSON object with the keys \
         `projects` (name, activities, technologies_used, new_project), `technologies`, \
         `notable_moments` (description, tweetable, tweet_draft) and `tweet_drafts`.\n",
    );
    if let Some((index, total)) = request.chunk {
        prompt.push_str(&format!("This is part {} of {}.\n", index + 1, total));
    }
    prompt.push_str(&request.auxiliary_text());
    prompt.push_str("\n\nActivity log:\n");
    prompt.push_str(&request.primary);
    prompt
}

fn extract_openai_compatible_text(json: &Value) -> Option<String> {
    let choices = json.get("choices").and_then(Value::as_array)?;
    let first = choices.first()?;
    let content = first.get("message")?.get("content")?;
    match content {
        Value::String(s) => Some(s.to_string()),
        Value::Array(parts) => {
            let chunks: Vec<&str> = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect();
            if chunks.is_empty() {
                None
            } else {
                Some(chunks.join("\n"))
            }
        }
        _ => None,
    }
}

impl Analyzer for RemoteAnalyzer {
    fn label(&self) -> String {
        self.model.clone()
    }

    fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
        let base = self.base_url.trim_end_matches('/');
        let url = format!("{base}/v1/chat/completions");
        let payload = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": build_prompt(request)}
            ],
            "temperature": 0.2
        });

        let client = Client::builder().timeout(self.timeout).build()?;
        let response = client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AnalysisError::Status {
                status: status.as_u16(),
                body: truncate_with_ellipsis(&body, 200),
            });
        }

        let json: Value = response.json()?;
        let text = extract_openai_compatible_text(&json).ok_or_else(|| {
            AnalysisError::Invalid("response missing message content".to_string())
        })?;
        parse_analysis_response(&text)
    }
}

/// Split an event line `[ts] (source/type) rest` into its timestamp and
/// the remaining text.
fn split_event_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix('[')?;
    let close = rest.find(']')?;
    Some((&rest[..close], rest[close + 1..].trim()))
}

fn last_segment(repo: &str) -> Option<String> {
    let name = repo.trim().trim_end_matches('/').rsplit('/').next()?.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Repository named by one rendered event line. The payload object is
/// parsed when it survived rendering intact; a truncated payload falls back
/// to the repositories carried on the request.
fn repo_name(rest: &str, repositories: &[String]) -> Option<String> {
    for (idx, _) in rest.match_indices('{') {
        let mut objects = serde_json::Deserializer::from_str(&rest[idx..]).into_iter::<Value>();
        if let Some(Ok(Value::Object(payload))) = objects.next() {
            if let Some(repo) = payload.get("repo").and_then(Value::as_str) {
                return last_segment(repo);
            }
            return None;
        }
    }
    repositories
        .iter()
        .filter(|repo| !repo.trim().is_empty() && rest.contains(repo.trim()))
        .max_by_key(|repo| repo.len())
        .and_then(|repo| last_segment(repo))
}

impl Analyzer for LocalAnalyzer {
    fn label(&self) -> String {
        "local".to_string()
    }

    fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
        let lowered = request.primary.to_lowercase();
        let technologies: Vec<String> = request
            .known_technologies
            .iter()
            .filter(|t| !t.is_empty() && lowered.contains(&t.to_lowercase()))
            .cloned()
            .collect();

        let mut activities = Vec::new();
        let mut projects: Vec<ProjectFinding> = Vec::new();
        for line in request.primary.lines() {
            let Some((ts, rest)) = split_event_line(line.trim()) else {
                continue;
            };
            let finding = ActivityFinding::Detailed {
                description: truncate_with_ellipsis(rest, MAX_LOCAL_ACTIVITY_CHARS),
                kind: None,
                occurred_at: Some(ts.to_string()),
                technologies: technologies
                    .iter()
                    .filter(|t| rest.to_lowercase().contains(&t.to_lowercase()))
                    .cloned()
                    .collect(),
            };

            let rest_lower = rest.to_lowercase();
            let mut names: Vec<(String, bool)> = request
                .known_projects
                .iter()
                .filter(|name| !name.is_empty() && rest_lower.contains(&name.to_lowercase()))
                .map(|name| (name.clone(), false))
                .collect();
            if let Some(repo) = repo_name(rest, &request.repositories)
                && !names.iter().any(|(n, _)| n.eq_ignore_ascii_case(&repo))
            {
                names.push((repo, true));
            }

            for (name, new_project) in names {
                match projects.iter_mut().find(|p| p.name == name) {
                    Some(project) => project.activities.push(finding.clone()),
                    None => projects.push(ProjectFinding {
                        name,
                        rationale: if new_project {
                            "repository activity".to_string()
                        } else {
                            "mentioned by name".to_string()
                        },
                        keywords: Vec::new(),
                        activities: vec![finding.clone()],
                        technologies_used: finding.technologies().to_vec(),
                        new_project,
                    }),
                }
            }
            activities.push(finding);
        }

        Ok(AnalysisResult {
            projects: (!projects.is_empty()).then_some(projects),
            activities: (!activities.is_empty()).then_some(activities),
            notable_moments: None,
            tweet_drafts: None,
            technologies: (!technologies.is_empty()).then_some(technologies),
        })
    }
}

impl<A: Analyzer> RetryingAnalyzer<A> {
    pub fn new(inner: A, max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            initial_backoff,
        }
    }
}

impl<A: Analyzer> Analyzer for RetryingAnalyzer<A> {
    fn label(&self) -> String {
        self.inner.label()
    }

    /// Retry with exponential backoff (`initial`, `2·initial`, ...).
    fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
        let mut delay = self.initial_backoff;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.inner.analyze(request) {
                Ok(result) => return Ok(result),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) if attempt >= self.max_attempts => {
                    return Err(AnalysisError::Exhausted {
                        attempts: attempt,
                        last: err.to_string(),
                    });
                }
                Err(err) => {
                    warn!(
                        event = "analysis_retry",
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_secs = delay.as_secs_f64(),
                        error = %err
                    );
                    std::thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }
}

impl<'a, A: Analyzer + ?Sized> RecordingAnalyzer<'a, A> {
    pub fn new(inner: &'a A, store: &'a SiftStore, task: &'a str) -> Self {
        Self {
            inner,
            store,
            task,
            tokens: AtomicU64::new(0),
            calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn tokens_used(&self) -> u64 {
        self.tokens.load(Ordering::Relaxed)
    }

    /// `(calls, failed calls)` since construction.
    pub fn call_counts(&self) -> (u64, u64) {
        (
            self.calls.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed),
        )
    }
}

impl<A: Analyzer + ?Sized> Analyzer for RecordingAnalyzer<'_, A> {
    fn label(&self) -> String {
        self.inner.label()
    }

    fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
        let started = Instant::now();
        let outcome = self.inner.analyze(request);
        let duration_secs = started.elapsed().as_secs_f64();

        let input_tokens = estimate_text_tokens(request.total_chars());
        let output_tokens = match &outcome {
            Ok(result) => serde_json::to_string(result)
                .map(|s| estimate_text_tokens(s.chars().count()))
                .unwrap_or(0),
            Err(_) => 0,
        };
        self.tokens
            .fetch_add(input_tokens + output_tokens, Ordering::Relaxed);
        self.calls.fetch_add(1, Ordering::Relaxed);
        if outcome.is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }

        let label = self.inner.label();
        let error = outcome.as_ref().err().map(ToString::to_string);
        let call = AnalysisCall {
            task: self.task,
            model: &label,
            input_tokens,
            output_tokens,
            duration_secs,
            error: error.as_deref(),
        };
        if let Err(err) = self.store.log_analysis_call(&call, Utc::now()) {
            warn!(event = "analysis_call_log_failed", error = %err);
        }
        debug!(
            event = "analysis_call",
            task = self.task,
            model = %label,
            input_tokens,
            output_tokens,
            duration_secs,
            ok = outcome.is_ok()
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Flaky {
        failures: Mutex<u32>,
        calls: Mutex<u32>,
    }

    impl Analyzer for Flaky {
        fn label(&self) -> String {
            "flaky".into()
        }

        fn analyze(&self, _request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
            *self.calls.lock().expect("lock") += 1;
            let mut failures = self.failures.lock().expect("lock");
            if *failures > 0 {
                *failures -= 1;
                return Err(AnalysisError::Transport("connection reset".into()));
            }
            Ok(AnalysisResult {
                technologies: Some(vec!["rust".into()]),
                ..AnalysisResult::default()
            })
        }
    }

    fn flaky(failures: u32) -> Flaky {
        Flaky {
            failures: Mutex::new(failures),
            calls: Mutex::new(0),
        }
    }

    fn request() -> AnalysisRequest {
        AnalysisRequest::new("daily_process", "[2024-01-15T10:00:00Z] (github/push) ledger - schema".into())
    }

    #[test]
    fn retry_recovers_from_transient_failures() {
        let analyzer = RetryingAnalyzer::new(flaky(2), 3, Duration::ZERO);
        assert!(analyzer.analyze(&request()).is_ok());
        assert_eq!(*analyzer.inner.calls.lock().expect("lock"), 3);
    }

    #[test]
    fn retry_gives_up_after_max_attempts() {
        let analyzer = RetryingAnalyzer::new(flaky(5), 3, Duration::ZERO);
        let err = analyzer.analyze(&request()).expect_err("exhausted");
        assert!(matches!(err, AnalysisError::Exhausted { attempts: 3, .. }));
        assert_eq!(*analyzer.inner.calls.lock().expect("lock"), 3);
    }

    #[test]
    fn local_analyzer_attributes_known_names() {
        let req = AnalysisRequest::new(
            "daily_process",
            "[2024-01-15T10:00:00Z] (github/push) ledger - wired Rust importer\n\
             [2024-01-15T11:00:00Z] (browser/visit) docs - reading about gardens"
                .into(),
        )
        .with_context(vec!["ledger".into()], vec!["rust".into(), "haskell".into()]);
        let result = LocalAnalyzer.analyze(&req).expect("analyze");
        assert_eq!(result.activities.as_ref().map(Vec::len), Some(2));
        let projects = result.projects.expect("projects");
        assert_eq!(projects[0].name, "ledger");
        assert_eq!(projects[0].activities[0].occurred_at(), Some("2024-01-15T10:00:00Z"));
        assert_eq!(result.technologies, Some(vec!["rust".to_string()]));
    }

    #[test]
    fn repo_is_read_from_spaced_and_truncated_payloads() {
        let spaced = r#"(git/commit) - { "message": "init", "repo" : "me/orchard" }"#;
        assert_eq!(repo_name(spaced, &[]), Some("orchard".to_string()));

        let titled = r#"(git/commit) fix {braces} - {"repo":"me/ledger"}"#;
        assert_eq!(repo_name(titled, &[]), Some("ledger".to_string()));

        let truncated = r#"(git/commit) - {"message":"long","repo":"me/orchard","diff":"+++ a/b..."#;
        assert_eq!(repo_name(truncated, &[]), None);
        assert_eq!(
            repo_name(truncated, &["me/orchard".to_string()]),
            Some("orchard".to_string())
        );

        let no_repo = r#"(git/commit) - {"message":"mentions me/orchard"}"#;
        assert_eq!(repo_name(no_repo, &["me/orchard".to_string()]), None);
    }

    #[test]
    fn local_analyzer_proposes_repositories() {
        let req = AnalysisRequest::new(
            "daily_process",
            r#"[2024-01-15T10:00:00Z] (github/push) - {"repo":"me/ledger","message":"init"}"#.into(),
        );
        let result = LocalAnalyzer.analyze(&req).expect("analyze");
        let projects = result.projects.expect("projects");
        assert_eq!(projects[0].name, "ledger");
        assert!(projects[0].new_project);
    }

    #[test]
    fn recording_analyzer_logs_calls_and_tokens() {
        let store = SiftStore::open_in_memory().expect("store");
        let inner = flaky(0);
        let recorder = RecordingAnalyzer::new(&inner, &store, "daily_process");
        recorder.analyze(&request()).expect("analyze");
        assert!(recorder.tokens_used() > 0);
        assert_eq!(recorder.call_counts(), (1, 0));
        assert_eq!(store.analysis_call_count().expect("count"), 1);
    }

    #[test]
    fn build_analyzer_requires_key_for_remote() {
        let cfg = SiftAnalysisConfig {
            provider: "remote".into(),
            api_key: None,
            ..SiftAnalysisConfig::default()
        };
        assert!(matches!(build_analyzer(&cfg), Err(AnalysisError::Config(_))));

        let auto = SiftAnalysisConfig {
            provider: "auto".into(),
            api_key: None,
            ..SiftAnalysisConfig::default()
        };
        assert_eq!(build_analyzer(&auto).expect("local").label(), "local");
    }

    #[test]
    fn openai_compatible_text_extraction() {
        let json = serde_json::json!({"choices": [{"message": {"content": "{\"technologies\": []}"}}]});
        assert_eq!(
            extract_openai_compatible_text(&json).as_deref(),
            Some("{\"technologies\": []}")
        );
    }
}
