use anyhow::Result;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Return the current Unix epoch in seconds.
///
/// This is the single, canonical implementation; do not duplicate
/// this helper in other modules.
pub fn now_epoch_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

pub fn epoch_to_utc(epoch_secs: u64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(i64::try_from(epoch_secs).ok()?, 0)
}

/// Truncate `input` to at most `max_chars` Unicode characters, stripping
/// control characters and appending `...` when truncated.
pub fn truncate_with_ellipsis(input: &str, max_chars: usize) -> String {
    let clean: String = input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n')
        .collect();
    if clean.chars().count() <= max_chars {
        return clean;
    }
    if max_chars <= 3 {
        return "...".chars().take(max_chars).collect();
    }
    let mut out: String = clean.chars().take(max_chars - 3).collect();
    out.push_str("...");
    out
}

pub fn content_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}
