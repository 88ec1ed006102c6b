use crate::sift::config::SiftCacheConfig;
use crate::sift::store::SummaryStore;
use crate::sift::warn::{self, WarnEvent};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub title: Option<String>,
    pub value: String,
    pub cached_at: DateTime<Utc>,
}

/// TTL cache in front of expensive per-URL summaries.
pub struct SummaryCache<'a, S: SummaryStore + ?Sized> {
    store: &'a S,
    expiry: Duration,
}

impl<'a, S: SummaryStore + ?Sized> SummaryCache<'a, S> {
    pub fn new(store: &'a S, cfg: &SiftCacheConfig) -> Self {
        Self {
            store,
            expiry: Duration::days(cfg.expiry_days as i64),
        }
    }

    pub fn get_or_create<F, E>(&self, key: &str, title: Option<&str>, compute: F) -> Option<String>
    where
        F: FnOnce() -> Result<String, E>,
        E: Display,
    {
        self.get_or_create_at(key, title, compute, Utc::now())
    }

    /// Return the cached value while it is fresh, otherwise compute, store
    /// and return it. Empty or failed computations are never cached.
    pub fn get_or_create_at<F, E>(
        &self,
        key: &str,
        title: Option<&str>,
        compute: F,
        now: DateTime<Utc>,
    ) -> Option<String>
    where
        F: FnOnce() -> Result<String, E>,
        E: Display,
    {
        let key = key.trim();
        if key.is_empty() {
            tracing::warn!(event = "cache_empty_key", "summary requested without a url");
            return None;
        }

        match self.store.fresh_summary(key, now - self.expiry) {
            Ok(Some(entry)) => {
                debug!(event = "cache_hit", key);
                return Some(entry.value);
            }
            Ok(None) => {}
            Err(err) => self.warn("lookup", key, &err.to_string()),
        }

        let value = match compute() {
            Ok(value) if !value.trim().is_empty() => value,
            Ok(_) => {
                debug!(event = "cache_compute_empty", key);
                return None;
            }
            Err(err) => {
                self.warn("compute", key, &err.to_string());
                return None;
            }
        };

        let entry = CacheEntry {
            key: key.to_string(),
            title: title.map(str::to_string),
            value,
            cached_at: now,
        };
        if let Err(err) = self.store.upsert_summary(&entry) {
            self.warn("upsert", key, &err.to_string());
        } else {
            debug!(event = "cache_store", key);
        }
        Some(entry.value)
    }

    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Utc::now())
    }

    /// Delete entries whose age has reached the expiry. Returns the count.
    pub fn cleanup_expired_at(&self, now: DateTime<Utc>) -> usize {
        match self.store.delete_summaries_at_or_before(now - self.expiry) {
            Ok(removed) => {
                info!(event = "cache_cleanup", removed);
                removed
            }
            Err(err) => {
                self.warn("cleanup", "summary_cache", &err.to_string());
                0
            }
        }
    }

    fn warn(&self, reason: &str, unit: &str, err: &str) {
        warn::emit(WarnEvent {
            code: "CACHE_DEGRADED",
            stage: "cache",
            action: "continue-uncached",
            unit,
            retry: "next-lookup",
            reason,
            err,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sift::store::SiftStore;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).single().expect("ts")
    }

    fn ok(value: &str) -> impl FnOnce() -> Result<String, String> + '_ {
        move || Ok(value.to_string())
    }

    #[test]
    fn repeated_lookups_compute_once_within_ttl() {
        let store = SiftStore::open_in_memory().expect("store");
        let cache = SummaryCache::new(&store, &SiftCacheConfig::default());
        let calls = AtomicUsize::new(0);
        let compute = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>("summary of docs".to_string())
        };

        let first = cache.get_or_create_at("https://docs.rs", Some("Docs"), compute, now());
        let second = cache.get_or_create_at(
            "https://docs.rs",
            None,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>("recomputed".to_string())
            },
            now() + Duration::days(6),
        );
        assert_eq!(first.as_deref(), Some("summary of docs"));
        assert_eq!(second.as_deref(), Some("summary of docs"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expired_entry_is_recomputed() {
        let store = SiftStore::open_in_memory().expect("store");
        let cache = SummaryCache::new(&store, &SiftCacheConfig::default());
        cache.get_or_create_at("https://a.dev", None, ok("old"), now());
        let fresh = cache.get_or_create_at("https://a.dev", None, ok("new"), now() + Duration::days(7));
        assert_eq!(fresh.as_deref(), Some("new"));
    }

    #[test]
    fn empty_key_and_failures_are_not_cached() {
        let store = SiftStore::open_in_memory().expect("store");
        let cache = SummaryCache::new(&store, &SiftCacheConfig::default());
        assert!(cache.get_or_create_at("  ", None, ok("x"), now()).is_none());
        assert!(cache.get_or_create_at("https://b.dev", None, ok("   "), now()).is_none());
        assert!(
            cache
                .get_or_create_at(
                    "https://b.dev",
                    None,
                    || Err::<String, _>("timeout"),
                    now()
                )
                .is_none()
        );
        assert_eq!(store.summary_count().expect("count"), 0);
    }

    #[test]
    fn cleanup_removes_only_entries_past_cutoff() {
        let store = SiftStore::open_in_memory().expect("store");
        let cache = SummaryCache::new(&store, &SiftCacheConfig::default());
        cache.get_or_create_at("https://old.dev", None, ok("old"), now() - Duration::days(8));
        cache.get_or_create_at("https://edge.dev", None, ok("edge"), now() - Duration::days(7));
        cache.get_or_create_at("https://new.dev", None, ok("new"), now() - Duration::days(1));

        assert_eq!(cache.cleanup_expired_at(now()), 2);
        assert_eq!(store.summary_count().expect("count"), 1);
        assert_eq!(cache.cleanup_expired_at(now()), 0);
    }

    #[test]
    fn concurrent_misses_settle_on_one_row() {
        let store = SiftStore::open_in_memory().expect("store");
        let cache = SummaryCache::new(&store, &SiftCacheConfig::default());
        std::thread::scope(|scope| {
            for i in 0..4 {
                let cache = &cache;
                scope.spawn(move || {
                    let value = cache.get_or_create_at(
                        "https://race.dev",
                        None,
                        move || Ok::<_, String>(format!("writer {i}")),
                        now(),
                    );
                    assert!(value.is_some());
                });
            }
        });
        assert_eq!(store.summary_count().expect("count"), 1);
    }
}
