pub mod handler;
pub mod ttl;

use crate::analytics::consumption::MaterialConsumption;
use crate::analytics::periodic::PeriodSummary;
use crate::config::CacheConfig;
use crate::error::AppResult;
use chrono::NaiveDate;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use ttl::{Clock, KeyStatus, ManualClock, SystemClock, TtlCache};

/// Groups of cache keys that are invalidated together. The family name is
/// the substring handed to [`TtlCache::clear_pattern`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyticsFamily {
    MaterialConsumption,
    DailyAnalytics,
    WeeklyAnalytics,
}

impl AnalyticsFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyticsFamily::MaterialConsumption => "material_consumption",
            AnalyticsFamily::DailyAnalytics => "daily_analytics",
            AnalyticsFamily::WeeklyAnalytics => "weekly_analytics",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyticsKey {
    MaterialConsumption,
    DailyAnalytics(NaiveDate),
    /// Seven days ending at (and including) the given date.
    WeeklyAnalytics(NaiveDate),
}

impl AnalyticsKey {
    pub fn family(&self) -> AnalyticsFamily {
        match self {
            AnalyticsKey::MaterialConsumption => AnalyticsFamily::MaterialConsumption,
            AnalyticsKey::DailyAnalytics(_) => AnalyticsFamily::DailyAnalytics,
            AnalyticsKey::WeeklyAnalytics(_) => AnalyticsFamily::WeeklyAnalytics,
        }
    }

    pub fn cache_key(&self) -> String {
        match self {
            AnalyticsKey::MaterialConsumption => self.family().as_str().to_string(),
            AnalyticsKey::DailyAnalytics(date) | AnalyticsKey::WeeklyAnalytics(date) => {
                format!("{}:{}", self.family().as_str(), date.format("%Y-%m-%d"))
            }
        }
    }
}

/// Writes that change the rows the analytics are computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteEvent {
    EntryWritten,
    BatchWritten,
    BatchMaterialsWritten,
}

const ALL_FAMILIES: &[AnalyticsFamily] = &[
    AnalyticsFamily::MaterialConsumption,
    AnalyticsFamily::DailyAnalytics,
    AnalyticsFamily::WeeklyAnalytics,
];

impl WriteEvent {
    /// Families made stale by this write. Entries feed the casting totals and
    /// batches feed the per-type totals; both appear in every family.
    pub fn invalidates(&self) -> &'static [AnalyticsFamily] {
        match self {
            WriteEvent::EntryWritten
            | WriteEvent::BatchWritten
            | WriteEvent::BatchMaterialsWritten => ALL_FAMILIES,
        }
    }
}

#[derive(Debug, Clone)]
pub enum CachedAnalytics {
    MaterialConsumption(Arc<MaterialConsumption>),
    Daily(Arc<PeriodSummary>),
    Weekly(Arc<PeriodSummary>),
}

/// The analytics cache owned by the application state.
pub struct AnalyticsCache {
    inner: TtlCache<CachedAnalytics>,
    consumption_ttl: Duration,
}

impl AnalyticsCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: TtlCache::with_clock(Duration::from_secs(config.default_ttl_secs), clock),
            consumption_ttl: Duration::from_secs(config.consumption_ttl_secs),
        }
    }

    pub async fn material_consumption<F, Fut>(
        &self,
        compute: F,
    ) -> AppResult<Arc<MaterialConsumption>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<MaterialConsumption>>,
    {
        self.typed(
            AnalyticsKey::MaterialConsumption,
            self.consumption_ttl,
            CachedAnalytics::MaterialConsumption,
            |cached| match cached {
                CachedAnalytics::MaterialConsumption(v) => Some(v),
                _ => None,
            },
            compute,
        )
        .await
    }

    pub async fn daily<F, Fut>(&self, date: NaiveDate, compute: F) -> AppResult<Arc<PeriodSummary>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<PeriodSummary>>,
    {
        self.typed(
            AnalyticsKey::DailyAnalytics(date),
            self.inner.default_ttl(),
            CachedAnalytics::Daily,
            |cached| match cached {
                CachedAnalytics::Daily(v) => Some(v),
                _ => None,
            },
            compute,
        )
        .await
    }

    pub async fn weekly<F, Fut>(&self, date: NaiveDate, compute: F) -> AppResult<Arc<PeriodSummary>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<PeriodSummary>>,
    {
        self.typed(
            AnalyticsKey::WeeklyAnalytics(date),
            self.inner.default_ttl(),
            CachedAnalytics::Weekly,
            |cached| match cached {
                CachedAnalytics::Weekly(v) => Some(v),
                _ => None,
            },
            compute,
        )
        .await
    }

    async fn typed<T, F, Fut>(
        &self,
        key: AnalyticsKey,
        ttl: Duration,
        wrap: fn(Arc<T>) -> CachedAnalytics,
        unwrap: fn(CachedAnalytics) -> Option<Arc<T>>,
        compute: F,
    ) -> AppResult<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let cache_key = key.cache_key();

        // A value of the wrong shape under a typed key is treated as a miss.
        if let Some(found) = self.inner.get(&cache_key) {
            if let Some(value) = unwrap(found) {
                return Ok(value);
            }
            tracing::warn!(key = %cache_key, "cached analytics variant mismatch, recomputing");
            self.inner.remove(&cache_key);
        }

        let cached = self
            .inner
            .get_or_compute(&cache_key, ttl, || async move {
                let value = compute().await?;
                Ok::<_, crate::error::AppError>(wrap(Arc::new(value)))
            })
            .await?;

        unwrap(cached).ok_or_else(|| {
            crate::error::AppError::Internal(format!("cache returned wrong variant for {cache_key}"))
        })
    }

    /// Drop every family the write event makes stale. Returns the number of
    /// entries removed.
    pub fn invalidate(&self, event: WriteEvent) -> usize {
        let removed: usize = event
            .invalidates()
            .iter()
            .map(|family| self.inner.clear_pattern(family.as_str()))
            .sum();
        tracing::debug!(?event, removed, "analytics cache invalidated");
        removed
    }

    pub fn clear(&self) {
        self.inner.clear();
    }

    pub fn status(&self) -> Vec<KeyStatus> {
        self.inner.status()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::consumption::fold_consumption;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache() -> (AnalyticsCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = AnalyticsCache::with_clock(&CacheConfig::default(), clock.clone());
        (cache, clock)
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_key_strings() {
        assert_eq!(AnalyticsKey::MaterialConsumption.cache_key(), "material_consumption");
        assert_eq!(
            AnalyticsKey::DailyAnalytics(day("2024-03-05")).cache_key(),
            "daily_analytics:2024-03-05"
        );
        assert_eq!(
            AnalyticsKey::WeeklyAnalytics(day("2024-03-05")).cache_key(),
            "weekly_analytics:2024-03-05"
        );
    }

    #[test]
    fn test_every_write_event_invalidates_all_families() {
        for event in [
            WriteEvent::EntryWritten,
            WriteEvent::BatchWritten,
            WriteEvent::BatchMaterialsWritten,
        ] {
            assert_eq!(event.invalidates(), ALL_FAMILIES);
        }
    }

    #[tokio::test]
    async fn test_consumption_uses_longer_ttl() {
        let (cache, clock) = cache();
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let compute = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(fold_consumption(Vec::new()))
        };

        cache.material_consumption(compute).await.unwrap();
        clock.advance(Duration::from_secs(599));
        cache.material_consumption(compute).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(1));
        cache.material_consumption(compute).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_recompute() {
        let (cache, _) = cache();
        let date = day("2024-03-05");
        cache
            .daily(date, || async { Ok(PeriodSummary::empty(date, date)) })
            .await
            .unwrap();
        cache
            .material_consumption(|| async { Ok(fold_consumption(Vec::new())) })
            .await
            .unwrap();
        assert_eq!(cache.len(), 2);

        let removed = cache.invalidate(WriteEvent::EntryWritten);
        assert_eq!(removed, 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_failed_compute_leaves_key_unset() {
        let (cache, _) = cache();
        let result = cache
            .material_consumption(|| async {
                Err(crate::error::AppError::Internal("store down".into()))
            })
            .await;
        assert!(result.is_err());
        assert!(cache.status().is_empty());
    }

    #[tokio::test]
    async fn test_write_during_consumption_compute_is_not_cached() {
        let (cache, _) = cache();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let reader = cache.material_consumption(|| async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
            Ok(fold_consumption(Vec::new()))
        });
        let writer = async {
            let _ = started_rx.await;
            cache.invalidate(WriteEvent::EntryWritten);
            let _ = release_tx.send(());
        };
        let (result, ()) = tokio::join!(reader, writer);

        assert!(result.is_ok());
        assert!(cache.status().is_empty());
    }
}
