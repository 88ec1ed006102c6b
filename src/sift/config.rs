use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiftSessionConfig {
    pub gap_minutes: u64,
}

impl Default for SiftSessionConfig {
    fn default() -> Self {
        Self { gap_minutes: 60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftBatchConfig {
    pub max_tokens: u64,
    pub min_tokens: u64,
    pub min_events: usize,
    pub interval_hours: u64,
    pub avg_tokens_per_event: u64,
    pub trim_step: usize,
    pub min_batch_events: usize,
    pub max_sessions_per_cycle: usize,
}

impl Default for SiftBatchConfig {
    fn default() -> Self {
        Self {
            max_tokens: 8_000,
            min_tokens: 1_000,
            min_events: 10,
            interval_hours: 24,
            avg_tokens_per_event: 200,
            trim_step: 5,
            min_batch_events: 10,
            max_sessions_per_cycle: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftCacheConfig {
    pub expiry_days: u64,
    pub cleanup_interval_hours: u64,
}

impl Default for SiftCacheConfig {
    fn default() -> Self {
        Self {
            expiry_days: 7,
            cleanup_interval_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftProjectConfig {
    pub similarity_threshold: f64,
    pub min_activities: usize,
    pub min_distinct_days: usize,
    pub max_keywords: usize,
    pub suggest_min_score: u32,
    /// IANA zone used to decide which calendar day an activity falls on.
    pub timezone: String,
}

impl Default for SiftProjectConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.75,
            min_activities: 3,
            min_distinct_days: 2,
            max_keywords: 20,
            suggest_min_score: 5,
            timezone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftContextConfig {
    pub max_context_chars: usize,
    pub reserve_chars: usize,
    pub min_chunk_chars: usize,
    pub event_payload_chars: usize,
    pub summary_chars: usize,
}

impl Default for SiftContextConfig {
    fn default() -> Self {
        Self {
            max_context_chars: 50_000,
            reserve_chars: 1_000,
            min_chunk_chars: 1_000,
            event_payload_chars: 500,
            summary_chars: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftAnalysisConfig {
    /// `auto`, `local` or `remote`.
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub max_attempts: u32,
    pub initial_backoff_secs: u64,
    pub request_timeout_secs: u64,
    /// Fetch and summarize pages behind browsing events.
    pub summarize_pages: bool,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for SiftAnalysisConfig {
    fn default() -> Self {
        Self {
            provider: "auto".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://openrouter.ai/api".to_string(),
            max_attempts: 3,
            initial_backoff_secs: 2,
            request_timeout_secs: 45,
            summarize_pages: true,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiftWatcherConfig {
    pub poll_interval_secs: u64,
}

impl Default for SiftWatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SiftConfig {
    pub sessions: SiftSessionConfig,
    pub batch: SiftBatchConfig,
    pub cache: SiftCacheConfig,
    pub projects: SiftProjectConfig,
    pub context: SiftContextConfig,
    pub analysis: SiftAnalysisConfig,
    pub watcher: SiftWatcherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialSiftConfig {
    sessions: Option<SiftSessionConfig>,
    batch: Option<SiftBatchConfig>,
    cache: Option<SiftCacheConfig>,
    projects: Option<SiftProjectConfig>,
    context: Option<SiftContextConfig>,
    analysis: Option<SiftAnalysisConfig>,
    watcher: Option<SiftWatcherConfig>,
}

fn env_or_f64(var: &str, fallback: f64) -> f64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<f64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_non_empty_first(vars: &[&str]) -> Option<String> {
    vars.iter().find_map(|var| match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    })
}

pub fn validate(cfg: &SiftConfig) -> Result<()> {
    if cfg.sessions.gap_minutes == 0 {
        return Err(anyhow!("invalid session gap: must be >= 1 minute"));
    }
    if cfg.batch.max_tokens == 0 {
        return Err(anyhow!("invalid batch max tokens: must be >= 1"));
    }
    if cfg.batch.avg_tokens_per_event == 0 {
        return Err(anyhow!("invalid average tokens per event: must be >= 1"));
    }
    if cfg.batch.trim_step == 0 {
        return Err(anyhow!("invalid batch trim step: must be >= 1"));
    }
    if cfg.batch.max_sessions_per_cycle == 0 {
        return Err(anyhow!("invalid max sessions per cycle: must be >= 1"));
    }
    if cfg.cache.expiry_days == 0 {
        return Err(anyhow!("invalid cache expiry: must be >= 1 day"));
    }
    let t = cfg.projects.similarity_threshold;
    if !(t > 0.0 && t <= 1.0) {
        return Err(anyhow!(
            "invalid similarity threshold: require 0 < threshold <= 1.0"
        ));
    }
    if cfg.projects.max_keywords == 0 {
        return Err(anyhow!("invalid max keywords: must be >= 1"));
    }
    if cfg.projects.timezone.parse::<chrono_tz::Tz>().is_err() {
        return Err(anyhow!(
            "invalid project timezone `{}`: use an IANA zone name",
            cfg.projects.timezone
        ));
    }
    if cfg.context.min_chunk_chars == 0 {
        return Err(anyhow!("invalid min chunk chars: must be >= 1"));
    }
    if cfg.context.max_context_chars < cfg.context.min_chunk_chars {
        return Err(anyhow!(
            "invalid context budget: require max_context_chars >= min_chunk_chars"
        ));
    }
    if cfg.analysis.max_attempts == 0 {
        return Err(anyhow!("invalid analysis attempts: must be >= 1"));
    }
    if !matches!(cfg.analysis.provider.as_str(), "auto" | "local" | "remote") {
        return Err(anyhow!(
            "invalid analysis provider: use `auto`, `local` or `remote`"
        ));
    }
    if cfg.watcher.poll_interval_secs == 0 {
        return Err(anyhow!(
            "invalid watcher poll interval: must be >= 1 second"
        ));
    }
    Ok(())
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("SIFT_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    if let Ok(home) = env::var("SIFT_HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed).join("sift.toml"));
        }
    }

    let home = dirs::home_dir()?;
    Some(home.join(".sift").join("sift.toml"))
}

fn merge_file_config(base: &mut SiftConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    merge_toml(base, &raw)
        .map_err(|err| anyhow!("failed to parse sift config {}: {err}", path.display()))
}

fn merge_toml(base: &mut SiftConfig, raw: &str) -> Result<()> {
    let parsed: PartialSiftConfig = toml::from_str(raw)?;
    if let Some(sessions) = parsed.sessions {
        base.sessions = sessions;
    }
    if let Some(batch) = parsed.batch {
        base.batch = batch;
    }
    if let Some(cache) = parsed.cache {
        base.cache = cache;
    }
    if let Some(projects) = parsed.projects {
        base.projects = projects;
    }
    if let Some(context) = parsed.context {
        base.context = context;
    }
    if let Some(analysis) = parsed.analysis {
        base.analysis = analysis;
    }
    if let Some(watcher) = parsed.watcher {
        base.watcher = watcher;
    }
    Ok(())
}

fn apply_env_overrides(cfg: &mut SiftConfig) {
    cfg.sessions.gap_minutes = env_or_u64("SIFT_SESSION_GAP_MINUTES", cfg.sessions.gap_minutes);

    cfg.batch.max_tokens = env_or_u64("SIFT_BATCH_MAX_TOKENS", cfg.batch.max_tokens);
    cfg.batch.min_tokens = env_or_u64("SIFT_BATCH_MIN_TOKENS", cfg.batch.min_tokens);
    cfg.batch.min_events = env_or_usize("SIFT_BATCH_MIN_EVENTS", cfg.batch.min_events);
    cfg.batch.interval_hours =
        env_or_u64("SIFT_PROCESSING_INTERVAL_HOURS", cfg.batch.interval_hours);
    cfg.batch.max_sessions_per_cycle = env_or_usize(
        "SIFT_MAX_SESSIONS_PER_CYCLE",
        cfg.batch.max_sessions_per_cycle,
    );

    cfg.cache.expiry_days = env_or_u64("SIFT_CACHE_EXPIRY_DAYS", cfg.cache.expiry_days);
    cfg.cache.cleanup_interval_hours = env_or_u64(
        "SIFT_CACHE_CLEANUP_INTERVAL_HOURS",
        cfg.cache.cleanup_interval_hours,
    );

    cfg.projects.similarity_threshold = env_or_f64(
        "SIFT_SIMILARITY_THRESHOLD",
        cfg.projects.similarity_threshold,
    );
    cfg.projects.timezone = env_or_string("SIFT_TIMEZONE", &cfg.projects.timezone);

    cfg.context.max_context_chars =
        env_or_usize("SIFT_MAX_CONTEXT_CHARS", cfg.context.max_context_chars);

    cfg.analysis.provider = env_or_string("SIFT_ANALYSIS_PROVIDER", &cfg.analysis.provider);
    cfg.analysis.model = env_or_string("SIFT_ANALYSIS_MODEL", &cfg.analysis.model);
    cfg.analysis.base_url = env_or_string("SIFT_ANALYSIS_BASE_URL", &cfg.analysis.base_url);
    cfg.analysis.max_attempts = env_or_u64(
        "SIFT_ANALYSIS_MAX_ATTEMPTS",
        u64::from(cfg.analysis.max_attempts),
    )
    .try_into()
    .unwrap_or(cfg.analysis.max_attempts);
    cfg.analysis.summarize_pages =
        env_or_bool("SIFT_SUMMARIZE_PAGES", cfg.analysis.summarize_pages);
    cfg.analysis.api_key =
        env_non_empty_first(&["SIFT_API_KEY", "OPENROUTER_API_KEY", "OPENAI_API_KEY"]);

    cfg.watcher.poll_interval_secs =
        env_or_u64("SIFT_POLL_INTERVAL_SECS", cfg.watcher.poll_interval_secs);
}

/// Build the process-wide configuration: defaults, then the TOML file, then
/// `SIFT_*` environment overrides. Called once at startup.
pub fn load_config() -> Result<SiftConfig> {
    let mut cfg = SiftConfig::default();
    merge_file_config(&mut cfg)?;
    apply_env_overrides(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}
