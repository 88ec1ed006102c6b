use crate::sift::analysis::{AnalysisRequest, AnalysisResult};
use crate::sift::analyzer::Analyzer;
use crate::sift::config::SiftContextConfig;
use crate::sift::event::RawEvent;
use crate::sift::util::truncate_with_ellipsis;
use crate::sift::warn::{self, WarnEvent};
use tracing::{debug, info};

/// One line per event, `[ts] (source/type) title - payload`, with the
/// cached page summary on an indented line when there is one.
pub fn render_event_line(
    event: &RawEvent,
    summary: Option<&str>,
    cfg: &SiftContextConfig,
) -> String {
    let mut payload = truncate_with_ellipsis(&event.payload_text(), cfg.event_payload_chars);
    if let Some(repo) = event.payload.get("repo").and_then(|repo| repo.as_str())
        && !repo.is_empty()
        && !payload.contains(repo)
    {
        payload.push_str(&format!(" [repo: {repo}]"));
    }
    let mut line = match event.title() {
        Some(title) => format!(
            "[{}] ({}/{}) {} - {}",
            event.occurred_at, event.source, event.event_type, title, payload
        ),
        None => format!(
            "[{}] ({}/{}) - {}",
            event.occurred_at, event.source, event.event_type, payload
        ),
    };
    if let Some(summary) = summary.map(str::trim).filter(|s| !s.is_empty()) {
        line.push_str("\n  Summary: ");
        line.push_str(&truncate_with_ellipsis(summary, cfg.summary_chars));
    }
    line
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Split after `.`, `!` or `?` when followed by whitespace. The whitespace
/// run between sentences is dropped.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        if !matches!(ch, '.' | '!' | '?') {
            continue;
        }
        let Some(&(next_idx, next)) = chars.peek() else {
            continue;
        };
        if !next.is_whitespace() {
            continue;
        }
        sentences.push(&text[start..idx + ch.len_utf8()]);
        let mut resume = next_idx;
        while let Some(&(ws_idx, ws)) = chars.peek() {
            if !ws.is_whitespace() {
                resume = ws_idx;
                break;
            }
            chars.next();
            resume = ws_idx + ws.len_utf8();
        }
        start = resume;
    }
    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences
}

fn hard_slices(word: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    chars
        .chunks(max_chars)
        .map(|slice| slice.iter().collect())
        .collect()
}

/// Split `text` into chunks of at most `max_chars` characters, preferring
/// sentence boundaries, then word boundaries, then hard slices.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(text) {
        let joined = if current.is_empty() {
            char_len(sentence)
        } else {
            char_len(&current) + 1 + char_len(sentence)
        };
        if joined <= max_chars {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(sentence);
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if char_len(sentence) <= max_chars {
            current = sentence.to_string();
            continue;
        }

        let mut word_chunk = String::new();
        for word in sentence.split_whitespace() {
            let joined = if word_chunk.is_empty() {
                char_len(word)
            } else {
                char_len(&word_chunk) + 1 + char_len(word)
            };
            if joined <= max_chars {
                if !word_chunk.is_empty() {
                    word_chunk.push(' ');
                }
                word_chunk.push_str(word);
                continue;
            }
            if !word_chunk.is_empty() {
                chunks.push(std::mem::take(&mut word_chunk));
            }
            if char_len(word) > max_chars {
                chunks.extend(hard_slices(word, max_chars));
            } else {
                word_chunk = word.to_string();
            }
        }
        current = word_chunk;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Keeps analysis requests inside the context budget by splitting the
/// primary text and merging the per-chunk results.
#[derive(Debug, Clone)]
pub struct ContextSplitter {
    cfg: SiftContextConfig,
}

impl ContextSplitter {
    pub fn new(cfg: &SiftContextConfig) -> Self {
        Self { cfg: cfg.clone() }
    }

    /// Room left for primary text once the auxiliary context and the
    /// reserve are taken out, never below `min_chunk_chars`.
    pub fn chunk_budget(&self, auxiliary_chars: usize) -> usize {
        let budget = self
            .cfg
            .max_context_chars
            .saturating_sub(auxiliary_chars)
            .saturating_sub(self.cfg.reserve_chars);
        if budget < self.cfg.min_chunk_chars {
            warn::emit(WarnEvent {
                code: "CONTEXT_BUDGET_FLOOR",
                stage: "context",
                action: "use-min-chunk",
                unit: &auxiliary_chars.to_string(),
                retry: "none",
                reason: "auxiliary-context-too-large",
                err: &format!("budget {budget} below {}", self.cfg.min_chunk_chars),
            });
            return self.cfg.min_chunk_chars;
        }
        budget
    }

    /// Analyze in one call when it fits, otherwise chunk by chunk. Returns
    /// `None` when no call produced any finding.
    pub fn analyze<A: Analyzer + ?Sized>(
        &self,
        analyzer: &A,
        request: &AnalysisRequest,
    ) -> Option<AnalysisResult> {
        let auxiliary_chars = char_len(&request.auxiliary_text());
        let primary_chars = char_len(&request.primary);

        if primary_chars + auxiliary_chars <= self.cfg.max_context_chars {
            debug!(event = "context_single_call", primary_chars, auxiliary_chars);
            return match analyzer.analyze(request) {
                Ok(result) if !result.is_empty() => Some(result),
                Ok(_) => None,
                Err(err) => {
                    self.warn_chunk(0, 1, &err.to_string());
                    None
                }
            };
        }

        let budget = self.chunk_budget(auxiliary_chars);
        let chunks = chunk_text(&request.primary, budget);
        let total = chunks.len();
        info!(
            event = "context_split",
            primary_chars,
            auxiliary_chars,
            budget,
            chunks = total
        );

        let mut merged: Option<AnalysisResult> = None;
        for (index, chunk) in chunks.into_iter().enumerate() {
            let chunk_request = request.for_chunk(chunk, index, total);
            match analyzer.analyze(&chunk_request) {
                Ok(result) => {
                    if result.is_empty() {
                        debug!(event = "context_chunk_empty", index, total);
                    }
                    match merged.as_mut() {
                        Some(acc) => acc.merge(result),
                        None => merged = Some(result),
                    }
                }
                Err(err) => self.warn_chunk(index, total, &err.to_string()),
            }
        }
        // Lists named only by empty chunks survive as long as something was found.
        merged.filter(|result| !result.is_empty())
    }

    fn warn_chunk(&self, index: usize, total: usize, err: &str) {
        warn::emit(WarnEvent {
            code: "ANALYSIS_CHUNK_FAILED",
            stage: "context",
            action: "omit-chunk",
            unit: &format!("{}/{}", index + 1, total),
            retry: "next-session-run",
            reason: "analyze",
            err,
        });
    }
}
