use crate::sift::event::RawEvent;

/// Flat allowance for prompt scaffolding around a batch.
pub const PROMPT_OVERHEAD_TOKENS: u64 = 500;
pub const CHARS_PER_TOKEN: u64 = 4;

/// Rough token count for a batch of events: four characters per token over
/// source, type, payload text and timestamp, plus the prompt overhead.
pub fn estimate_tokens(events: &[RawEvent]) -> u64 {
    let chars: usize = events
        .iter()
        .map(|event| {
            event.payload_text().chars().count()
                + event.source.chars().count()
                + event.event_type.chars().count()
                + event.occurred_at.chars().count()
        })
        .sum();
    estimate_text_tokens(chars)
}

pub fn estimate_text_tokens(chars: usize) -> u64 {
    (chars as u64).div_ceil(CHARS_PER_TOKEN) + PROMPT_OVERHEAD_TOKENS
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(payload: &str) -> RawEvent {
        RawEvent {
            id: 1,
            source: "git".into(),
            event_type: "push".into(),
            payload: json!(payload),
            occurred_at: "2024-01-15T10:00:00Z".into(),
            session_id: None,
            processed: false,
        }
    }

    #[test]
    fn empty_batch_costs_only_overhead() {
        assert_eq!(estimate_tokens(&[]), PROMPT_OVERHEAD_TOKENS);
    }

    #[test]
    fn estimate_counts_every_field() {
        // 3 + 4 + 20 + 13 chars = 40 chars = 10 tokens
        let tokens = estimate_tokens(&[event("thirteen char")]);
        assert_eq!(tokens, 510);
    }

    #[test]
    fn partial_tokens_round_up() {
        assert_eq!(estimate_text_tokens(5), PROMPT_OVERHEAD_TOKENS + 2);
    }
}
