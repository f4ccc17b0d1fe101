use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Source of "now" for expiry checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Used to test expiry without sleeping.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner()) += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// One row of [`TtlCache::status`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct KeyStatus {
    pub key: String,
    /// Negative once the entry has expired but not yet been swept by a read.
    pub ttl_remaining_secs: i64,
}

/// Process-local key/value store where every entry carries its own expiry.
///
/// Expired entries are removed lazily on `get`; there is no background sweep
/// and no capacity bound. Values are cloned out, so `V` is usually an `Arc`.
pub struct TtlCache<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    generation: AtomicU64,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_clock(default_ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            default_ttl,
            clock,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            match entries.get(key) {
                None => return None,
                Some(entry) if now < entry.expires_at => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        // Expired: drop it, unless a writer replaced it in the meantime.
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) if now < entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let expires_at = self.clock.now() + ttl;
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), CacheEntry { value, expires_at });
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        self.generation.fetch_add(1, Ordering::SeqCst);
        entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        self.generation.fetch_add(1, Ordering::SeqCst);
        entries.clear();
    }

    /// Remove every key containing `pattern` (literal, case-sensitive).
    /// Returns how many entries were dropped.
    pub fn clear_pattern(&self, pattern: &str) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        self.generation.fetch_add(1, Ordering::SeqCst);
        let before = entries.len();
        entries.retain(|key, _| !key.contains(pattern));
        before - entries.len()
    }

    /// Store `value` only if nothing was removed since `generation` was read.
    fn set_if_current(&self, key: &str, value: V, ttl: Duration, generation: u64) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        let expires_at = self.clock.now() + ttl;
        entries.insert(key.to_string(), CacheEntry { value, expires_at });
        true
    }

    /// Every stored key with its remaining TTL, sorted by key.
    pub fn status(&self) -> Vec<KeyStatus> {
        let now = self.clock.now();
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<KeyStatus> = entries
            .iter()
            .map(|(key, entry)| KeyStatus {
                key: key.clone(),
                ttl_remaining_secs: signed_secs_until(now, entry.expires_at),
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached value for `key`, or run `compute`, store its `Ok`
    /// result for `ttl` and return it. Errors are passed through and nothing
    /// is stored. Concurrent misses on the same key each run `compute`.
    ///
    /// A result is returned but not stored when any entry was removed while
    /// `compute` ran, since it may reflect data that invalidation targeted.
    pub async fn get_or_compute<F, Fut, E>(&self, key: &str, ttl: Duration, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(key) {
            tracing::debug!(key, "cache hit");
            return Ok(hit);
        }
        tracing::debug!(key, "cache miss");
        let generation = self.generation.load(Ordering::SeqCst);
        let value = compute().await?;
        if !self.set_if_current(key, value.clone(), ttl, generation) {
            tracing::debug!(key, "invalidated during compute, result not cached");
        }
        Ok(value)
    }
}

fn signed_secs_until(now: Instant, deadline: Instant) -> i64 {
    if deadline >= now {
        deadline.duration_since(now).as_secs() as i64
    } else {
        -(now.duration_since(deadline).as_secs() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn cache_with_clock() -> (TtlCache<i32>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = TtlCache::with_clock(Duration::from_secs(300), clock.clone());
        (cache, clock)
    }

    #[test]
    fn test_set_then_get_returns_last_value() {
        let (cache, _) = cache_with_clock();
        cache.set("a", 1);
        cache.set("a", 2);
        assert_eq!(cache.get("a"), Some(2));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn test_entry_expires_and_is_removed_on_read() {
        let (cache, clock) = cache_with_clock();
        cache.set_with_ttl("k", 7, Duration::from_secs(1));
        clock.advance(Duration::from_millis(999));
        assert_eq!(cache.get("k"), Some(7));

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_default_ttl_applies_to_set() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", 1);
        clock.advance(Duration::from_secs(299));
        assert_eq!(cache.get("k"), Some(1));
        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_clear_pattern_removes_only_matching_keys() {
        let (cache, _) = cache_with_clock();
        cache.set("material_consumption", 1);
        cache.set("daily_analytics:2024-01-01", 2);
        cache.set("weekly_analytics:2024-01-01", 3);
        cache.set("unrelated", 4);

        let removed = cache.clear_pattern("analytics");
        assert_eq!(removed, 2);
        assert_eq!(cache.get("material_consumption"), Some(1));
        assert_eq!(cache.get("unrelated"), Some(4));
        assert_eq!(cache.get("daily_analytics:2024-01-01"), None);
    }

    #[test]
    fn test_clear_pattern_is_case_sensitive() {
        let (cache, _) = cache_with_clock();
        cache.set("Daily", 1);
        assert_eq!(cache.clear_pattern("daily"), 0);
        assert_eq!(cache.get("Daily"), Some(1));
    }

    #[test]
    fn test_clear_empties_cache() {
        let (cache, _) = cache_with_clock();
        cache.set("a", 1);
        cache.set("b", 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_status_reports_negative_ttl_for_unswept_entries() {
        let (cache, clock) = cache_with_clock();
        cache.set_with_ttl("short", 1, Duration::from_secs(10));
        cache.set_with_ttl("long", 2, Duration::from_secs(600));
        clock.advance(Duration::from_secs(20));

        let status = cache.status();
        assert_eq!(
            status,
            vec![
                KeyStatus { key: "long".into(), ttl_remaining_secs: 580 },
                KeyStatus { key: "short".into(), ttl_remaining_secs: -10 },
            ]
        );
    }

    #[tokio::test]
    async fn test_get_or_compute_runs_once_until_expiry() {
        let (cache, clock) = cache_with_clock();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let compute = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(42)
        };

        let ttl = Duration::from_secs(60);
        assert_eq!(cache.get_or_compute("k", ttl, compute).await, Ok(42));
        assert_eq!(cache.get_or_compute("k", ttl, compute).await, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(61));
        assert_eq!(cache.get_or_compute("k", ttl, compute).await, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_get_or_compute_does_not_store_errors() {
        let (cache, _) = cache_with_clock();
        let result = cache
            .get_or_compute("k", Duration::from_secs(60), || async {
                Err::<i32, _>("store down".to_string())
            })
            .await;
        assert_eq!(result, Err("store down".to_string()));
        assert_eq!(cache.get("k"), None);

        let result = cache
            .get_or_compute("k", Duration::from_secs(60), || async { Ok::<_, String>(5) })
            .await;
        assert_eq!(result, Ok(5));
    }

    #[tokio::test]
    async fn test_removal_during_compute_skips_store() {
        let (cache, _) = cache_with_clock();
        cache.set("daily_analytics:2024-01-01", 1);
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let reader = cache.get_or_compute("material_consumption", Duration::from_secs(600), || async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
            Ok::<_, String>(10)
        });
        let writer = async {
            let _ = started_rx.await;
            // The key being computed is not stored yet, so only the daily entry goes.
            assert_eq!(cache.clear_pattern("analytics"), 1);
            let _ = release_tx.send(());
        };
        let (result, ()) = tokio::join!(reader, writer);

        assert_eq!(result, Ok(10));
        assert_eq!(cache.get("material_consumption"), None);

        let result = cache
            .get_or_compute("material_consumption", Duration::from_secs(600), || async {
                Ok::<_, String>(13)
            })
            .await;
        assert_eq!(result, Ok(13));
        assert_eq!(cache.get("material_consumption"), Some(13));
    }
}
