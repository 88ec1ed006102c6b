use crate::sift::config::SiftAnalysisConfig;
use crate::sift::util::truncate_with_ellipsis;
use regex::Regex;
use reqwest::blocking::Client;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const MAX_PAGE_CHARS: usize = 10_000;
const FETCH_TIMEOUT_SECS: u64 = 15;
const EXTRACTIVE_SUMMARY_CHARS: usize = 300;
const USER_AGENT: &str = concat!("sift/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("page fetch failed: {0}")]
    Fetch(String),
    #[error("page fetch returned status {0}")]
    Status(u16),
    #[error("page has no readable text")]
    Empty,
    #[error("summary model failed: {0}")]
    Model(String),
    #[error("invalid html pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl From<reqwest::Error> for SummarizeError {
    fn from(err: reqwest::Error) -> Self {
        SummarizeError::Fetch(err.to_string())
    }
}

pub trait PageSummarizer: Send + Sync {
    fn summarize(&self, url: &str, title: Option<&str>) -> Result<String, SummarizeError>;
}

/// Reduces HTML to visible text, one non-empty line per block.
pub struct HtmlText {
    hidden: Regex,
    block: Regex,
    tag: Regex,
}

impl HtmlText {
    pub fn new() -> Result<Self, SummarizeError> {
        Ok(Self {
            hidden: Regex::new(r"(?is)<(script|style|noscript|head)\b.*?</(script|style|noscript|head)\s*>")?,
            block: Regex::new(r"(?i)<(br|/p|/div|/li|/h[1-6]|/tr|/section|/article)\b[^>]*>")?,
            tag: Regex::new(r"(?s)<[^>]*>")?,
        })
    }

    pub fn extract(&self, html: &str) -> String {
        let without_hidden = self.hidden.replace_all(html, " ");
        let with_breaks = self.block.replace_all(&without_hidden, "\n");
        let text = self.tag.replace_all(&with_breaks, " ");
        let decoded = decode_entities(&text);
        decoded
            .lines()
            .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Fetches a page and returns at most `MAX_PAGE_CHARS` of its text.
pub struct PageFetcher {
    client: Client,
    html: HtmlText,
}

impl PageFetcher {
    pub fn new() -> Result<Self, SummarizeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            html: HtmlText::new()?,
        })
    }

    pub fn fetch_text(&self, url: &str) -> Result<String, SummarizeError> {
        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(SummarizeError::Status(status.as_u16()));
        }
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/html") || ct.contains("application/xhtml"));
        let body = response.text()?;
        let text = if is_html { self.html.extract(&body) } else { body };
        let text: String = text.chars().take(MAX_PAGE_CHARS).collect();
        if text.trim().is_empty() {
            return Err(SummarizeError::Empty);
        }
        debug!(event = "page_fetched", url, chars = text.chars().count());
        Ok(text)
    }
}

/// Opening sentences of the page text, no model involved.
pub struct ExtractiveSummarizer {
    fetcher: PageFetcher,
}

/// Asks an OpenAI-compatible model for a short summary of the page text.
pub struct ModelSummarizer {
    fetcher: PageFetcher,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

pub fn build_summarizer(
    cfg: &SiftAnalysisConfig,
) -> Result<Option<Box<dyn PageSummarizer>>, SummarizeError> {
    if !cfg.summarize_pages {
        return Ok(None);
    }
    let fetcher = PageFetcher::new()?;
    let use_model = cfg.provider != "local";
    match cfg.api_key.clone() {
        Some(api_key) if use_model => Ok(Some(Box::new(ModelSummarizer {
            fetcher,
            api_key,
            model: cfg.model.clone(),
            base_url: cfg.base_url.clone(),
            timeout: Duration::from_secs(cfg.request_timeout_secs),
        }))),
        _ => Ok(Some(Box::new(ExtractiveSummarizer { fetcher }))),
    }
}

/// Leading sentences of `text` that fit in `max_chars`.
pub fn lead_sentences(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::new();
    for piece in flat.split_inclusive(['.', '!', '?']) {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let needed = out.chars().count() + piece.chars().count() + usize::from(!out.is_empty());
        if needed > max_chars {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(piece);
    }
    if out.is_empty() {
        truncate_with_ellipsis(&flat, max_chars)
    } else {
        out
    }
}

impl PageSummarizer for ExtractiveSummarizer {
    fn summarize(&self, url: &str, title: Option<&str>) -> Result<String, SummarizeError> {
        let text = self.fetcher.fetch_text(url)?;
        let lead = lead_sentences(&text, EXTRACTIVE_SUMMARY_CHARS);
        Ok(match title {
            Some(title) if !lead.starts_with(title) => format!("{title}: {lead}"),
            _ => lead,
        })
    }
}

impl PageSummarizer for ModelSummarizer {
    fn summarize(&self, url: &str, title: Option<&str>) -> Result<String, SummarizeError> {
        let content = self.fetcher.fetch_text(url)?;
        let prompt = format!(
            "Summarize this webpage in 1-2 paragraphs focusing on key technical information and main points.\n\nPage Title: {}\nPage Content:\n{}\n\nProvide a concise summary:",
            title.unwrap_or(url),
            content
        );
        let base = self.base_url.trim_end_matches('/');
        let payload = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.2
        });
        let client = Client::builder().timeout(self.timeout).build()?;
        let response = client
            .post(format!("{base}/v1/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()?;
        if !response.status().is_success() {
            return Err(SummarizeError::Model(format!(
                "status {}",
                response.status()
            )));
        }
        let json: Value = response.json()?;
        json.get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SummarizeError::Model("response missing message content".into()))
    }
}
