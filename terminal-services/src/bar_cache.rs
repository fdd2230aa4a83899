//! Bar Cache
//!
//! In-memory cache of bar series keyed by `(symbol, timeframe)`. Each key
//! has at most one history fetch in flight; concurrent callers for the same
//! key share its result. Entries live for the process lifetime.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use terminal_core::{
    Bar, BarUpdate, HistorySource, RawBar, SeriesKey, SeriesSource, SeriesStats, TerminalError,
    Tick, Timeframe, VolumePoint, INCOMPLETE_BAR_THRESHOLD,
};
use tracing::{debug, info, warn};

use crate::live;
use crate::resample::resample;

type FetchResult = Result<Arc<CacheEntry>, BarCacheError>;
type InFlightFetch = Shared<BoxFuture<'static, FetchResult>>;

/// One cached series with its derived volume histogram and stats
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub key: SeriesKey,
    pub bars: Vec<Bar>,
    pub volume: Vec<VolumePoint>,
    pub stats: SeriesStats,
    pub fetched_at: DateTime<Utc>,
    /// Fewer bars than a full chart normally shows
    pub incomplete: bool,
}

impl CacheEntry {
    /// Derive the volume series and stats for `bars`
    pub fn new(key: SeriesKey, bars: Vec<Bar>) -> Self {
        let volume = bars.iter().map(VolumePoint::from).collect();
        let stats = SeriesStats::from_bars(&bars);
        let incomplete = bars.len() < INCOMPLETE_BAR_THRESHOLD;

        Self {
            key,
            bars,
            volume,
            stats,
            fetched_at: Utc::now(),
            incomplete,
        }
    }

    pub fn last_bar(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

/// Map raw history rows to a clean ascending series
///
/// Rows whose timestamp cannot be read are skipped. Rows sharing a
/// timestamp collapse to the one that came later in the response.
pub fn normalize_history(raw: &[RawBar]) -> Result<Vec<Bar>, BarCacheError> {
    let mut bars = Vec::with_capacity(raw.len());

    for row in raw {
        match row.to_bar() {
            Ok(bar) => bars.push(bar),
            Err(e) => debug!("[BarCache] Skipping history row: {}", e),
        }
    }

    if bars.is_empty() && !raw.is_empty() {
        return Err(BarCacheError::Malformed(format!(
            "none of {} bars had a usable timestamp",
            raw.len()
        )));
    }

    // Stable, so equal timestamps keep response order
    bars.sort_by_key(|bar| bar.time);

    let mut series: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match series.last_mut() {
            Some(prev) if prev.time == bar.time => *prev = bar,
            _ => series.push(bar),
        }
    }

    Ok(series)
}

/// Shared bar cache
pub struct BarCache {
    entries: Arc<RwLock<HashMap<SeriesKey, Arc<CacheEntry>>>>,
    in_flight: Arc<Mutex<HashMap<SeriesKey, InFlightFetch>>>,
}

impl BarCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Cached entry for `key`; never fetches
    pub fn get(&self, key: &SeriesKey) -> Option<Arc<CacheEntry>> {
        self.entries.read().get(key).cloned()
    }

    /// Fetch `key` and store the result
    ///
    /// Joins the fetch already in flight for `key` if there is one. On
    /// failure any existing entry is left untouched. Resampled timeframes
    /// are built from their cached source series when one exists.
    pub async fn fetch_and_store(
        &self,
        key: &SeriesKey,
        fetcher: Arc<dyn HistorySource>,
    ) -> FetchResult {
        self.fetch(key, fetcher, false).await
    }

    async fn fetch(
        &self,
        key: &SeriesKey,
        fetcher: Arc<dyn HistorySource>,
        refetch_source: bool,
    ) -> FetchResult {
        let fetch = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(key) {
                Some(pending) => {
                    debug!("[BarCache] Joining in-flight fetch for {}", key);
                    pending.clone()
                }
                None => {
                    let fetch = self
                        .spawn_fetch(key.clone(), fetcher, refetch_source)
                        .shared();
                    in_flight.insert(key.clone(), fetch.clone());
                    fetch
                }
            }
        };

        fetch.await
    }

    /// Cached entry if present, otherwise fetch it
    ///
    /// Failures are logged and absorbed: the result is whatever the cache
    /// holds afterwards.
    pub async fn load(
        &self,
        key: &SeriesKey,
        fetcher: Arc<dyn HistorySource>,
    ) -> Option<Arc<CacheEntry>> {
        if let Some(entry) = self.get(key) {
            return Some(entry);
        }

        match self.fetch_and_store(key, fetcher).await {
            Ok(entry) => Some(entry),
            Err(_) => self.get(key),
        }
    }

    /// Re-fetch `key` even if it is cached
    ///
    /// A resampled timeframe re-fetches its source series too. Returns the
    /// new entry, or the previous one if the fetch failed.
    pub async fn refresh(
        &self,
        key: &SeriesKey,
        fetcher: Arc<dyn HistorySource>,
    ) -> Option<Arc<CacheEntry>> {
        match self.fetch(key, fetcher, true).await {
            Ok(entry) => Some(entry),
            Err(_) => self.get(key),
        }
    }

    /// Patch the trailing bar of every cached series for the tick's symbol
    ///
    /// Entries are copied on write, so snapshots handed out earlier keep
    /// their old bars.
    pub fn apply_tick(&self, tick: &Tick) -> Vec<BarUpdate> {
        if tick.last.is_none() {
            return Vec::new();
        }

        let mut updates = Vec::new();
        let mut entries = self.entries.write();

        for (key, entry) in entries.iter_mut() {
            if key.symbol != tick.symbol || entry.is_empty() {
                continue;
            }
            if let Some(bar) = live::apply_tick(Arc::make_mut(entry), tick) {
                updates.push(BarUpdate {
                    symbol: key.symbol.clone(),
                    timeframe: key.timeframe,
                    volume: VolumePoint::from(&bar),
                    bar,
                });
            }
        }

        updates.sort_by_key(|update| update.timeframe);
        updates
    }

    /// Timeframes cached for a symbol, finest first
    pub fn timeframes_for(&self, symbol: &str) -> Vec<Timeframe> {
        let mut timeframes: Vec<Timeframe> = self
            .entries
            .read()
            .keys()
            .filter(|key| key.symbol == symbol)
            .map(|key| key.timeframe)
            .collect();
        timeframes.sort();
        timeframes
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read();

        let symbols: BTreeSet<&str> = entries.keys().map(|k| k.symbol.as_str()).collect();
        let oldest = entries.values().map(|e| e.fetched_at).min();

        CacheStats {
            entries: entries.len(),
            in_flight: self.in_flight.lock().len(),
            symbols: symbols.into_iter().map(String::from).collect(),
            oldest_entry: oldest,
        }
    }

    fn spawn_fetch(
        &self,
        key: SeriesKey,
        fetcher: Arc<dyn HistorySource>,
        refetch_source: bool,
    ) -> BoxFuture<'static, FetchResult> {
        let cache = self.clone();

        async move {
            let result = cache
                .build_entry(&key, fetcher, refetch_source)
                .await
                .map(Arc::new);

            match &result {
                Ok(entry) => {
                    cache.entries.write().insert(key.clone(), Arc::clone(entry));
                    info!("[BarCache] Stored {} bars for {}", entry.len(), key);
                }
                Err(e) => warn!("[BarCache] Fetch failed for {}: {}", key, e),
            }

            cache.in_flight.lock().remove(&key);
            result
        }
        .boxed()
    }

    async fn build_entry(
        &self,
        key: &SeriesKey,
        fetcher: Arc<dyn HistorySource>,
        refetch_source: bool,
    ) -> Result<CacheEntry, BarCacheError> {
        let source = match key.timeframe.series_source() {
            SeriesSource::Native { .. } => {
                let raw = fetcher.fetch_bars(&key.symbol, key.timeframe).await?;
                let bars = normalize_history(&raw)?;
                return Ok(CacheEntry::new(key.clone(), bars));
            }
            SeriesSource::Resampled(source) => source,
        };

        let source_key = key.with_timeframe(source);
        let source_entry = match self.get(&source_key) {
            Some(entry) if !refetch_source => entry,
            _ => self.fetch_and_store(&source_key, fetcher).await?,
        };

        debug!("[BarCache] Resampling {} into {}", source_key, key);
        Ok(CacheEntry::new(
            key.clone(),
            resample(&source_entry.bars, key.timeframe),
        ))
    }
}

impl Default for BarCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for BarCache {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl std::fmt::Debug for BarCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BarCache")
            .field("entries", &self.entries.read().len())
            .field("in_flight", &self.in_flight.lock().len())
            .finish()
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    pub symbols: Vec<String>,
    pub oldest_entry: Option<DateTime<Utc>>,
}

/// Errors from bar cache operations
///
/// `Clone` because one fetch result is handed to every joined caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BarCacheError {
    #[error("Fetch failed: {0}")]
    Fetch(TerminalError),

    #[error("Malformed history response: {0}")]
    Malformed(String),
}

impl From<TerminalError> for BarCacheError {
    fn from(e: TerminalError) -> Self {
        match e {
            TerminalError::Parse(msg) => BarCacheError::Malformed(msg),
            other => BarCacheError::Fetch(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use terminal_core::{RawTime, TerminalResult};

    /// History source serving hourly bars from memory
    struct MemorySource {
        calls: AtomicUsize,
        fail: AtomicBool,
        /// Raise every close by the call number
        drift: AtomicBool,
        delay: Duration,
        bars: Vec<RawBar>,
        requested: Mutex<Vec<Timeframe>>,
    }

    impl MemorySource {
        fn new(bars: Vec<RawBar>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                drift: AtomicBool::new(false),
                delay: Duration::ZERO,
                bars,
                requested: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn requested(&self) -> Vec<Timeframe> {
            self.requested.lock().clone()
        }
    }

    #[async_trait]
    impl HistorySource for MemorySource {
        async fn fetch_bars(
            &self,
            _symbol: &str,
            timeframe: Timeframe,
        ) -> TerminalResult<Vec<RawBar>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.requested.lock().push(timeframe);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(TerminalError::network("connection refused"));
            }

            let mut bars = self.bars.clone();
            if self.drift.load(Ordering::SeqCst) {
                for bar in &mut bars {
                    bar.close += Decimal::from(call);
                }
            }
            Ok(bars)
        }
    }

    fn raw(time: i64, close: Decimal, volume: i64) -> RawBar {
        RawBar {
            time: RawTime::Text(time.to_string()),
            open: close,
            high: close,
            low: close,
            close,
            volume,
        }
    }

    fn hourly(count: i64) -> Vec<RawBar> {
        (0..count)
            .map(|i| raw(1_704_067_200 + i * 3600, Decimal::from(100 + i), 10))
            .collect()
    }

    #[test]
    fn test_normalize_sorts_and_keeps_later_duplicate() {
        let rows = vec![
            raw(120, dec!(3), 1),
            raw(60, dec!(1), 1),
            raw(60, dec!(2), 1),
            RawBar {
                time: RawTime::Text("garbage".into()),
                ..raw(0, dec!(9), 1)
            },
        ];
        let bars = normalize_history(&rows).unwrap();

        assert_eq!(bars.iter().map(|b| b.time).collect::<Vec<_>>(), vec![60, 120]);
        assert_eq!(bars[0].close, dec!(2));
    }

    #[test]
    fn test_normalize_rejects_all_bad_rows() {
        let rows = vec![RawBar {
            time: RawTime::Text("garbage".into()),
            ..raw(0, dec!(1), 1)
        }];
        assert!(matches!(normalize_history(&rows), Err(BarCacheError::Malformed(_))));
        assert!(normalize_history(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_entry_derives_volume_and_stats() {
        let bars = normalize_history(&hourly(3)).unwrap();
        let entry = CacheEntry::new(SeriesKey::new("AAPL", Timeframe::OneHour), bars);

        assert_eq!(entry.volume.len(), 3);
        assert_eq!(entry.stats.first_close, Some(dec!(100)));
        assert_eq!(entry.stats.last_bar.as_ref().map(|b| b.close), Some(dec!(102)));
        assert!(entry.incomplete);
    }

    #[tokio::test]
    async fn test_cache_hit_short_circuits() {
        let cache = BarCache::new();
        let source = Arc::new(MemorySource::new(hourly(5)));
        let key = SeriesKey::new("AAPL", Timeframe::OneHour);

        assert!(cache.get(&key).is_none());
        let first = cache.load(&key, source.clone()).await.unwrap();
        let second = cache.load(&key, source.clone()).await.unwrap();

        assert_eq!(source.calls(), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_fetch() {
        let cache = BarCache::new();
        let source = Arc::new(MemorySource {
            delay: Duration::from_millis(50),
            ..MemorySource::new(hourly(5))
        });
        let key = SeriesKey::new("AAPL", Timeframe::OneHour);

        let (a, b, c) = tokio::join!(
            cache.load(&key, source.clone()),
            cache.load(&key, source.clone()),
            cache.fetch_and_store(&key, source.clone()),
        );

        assert_eq!(source.calls(), 1);
        assert!(a.is_some() && b.is_some() && c.is_ok());
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_failed_refetch_keeps_stale_entry() {
        let cache = BarCache::new();
        let source = Arc::new(MemorySource::new(hourly(5)));
        let key = SeriesKey::new("AAPL", Timeframe::OneHour);

        let original = cache.load(&key, source.clone()).await.unwrap();

        source.fail.store(true, Ordering::SeqCst);
        let err = cache.fetch_and_store(&key, source.clone()).await.unwrap_err();
        assert!(matches!(err, BarCacheError::Fetch(TerminalError::Network(_))));

        let kept = cache.refresh(&key, source.clone()).await.unwrap();
        assert!(Arc::ptr_eq(&original, &kept));
        assert!(Arc::ptr_eq(&original, &cache.get(&key).unwrap()));
    }

    #[tokio::test]
    async fn test_failed_first_fetch_creates_nothing() {
        let cache = BarCache::new();
        let source = Arc::new(MemorySource::new(hourly(5)));
        source.fail.store(true, Ordering::SeqCst);
        let key = SeriesKey::new("AAPL", Timeframe::OneHour);

        assert!(cache.load(&key, source).await.is_none());
        assert!(cache.get(&key).is_none());
    }

    #[tokio::test]
    async fn test_resampled_timeframe_builds_from_hourly() {
        let cache = BarCache::new();
        let source = Arc::new(MemorySource::new(hourly(12)));
        let key = SeriesKey::new("AAPL", Timeframe::SixHours);

        let entry = cache.load(&key, source.clone()).await.unwrap();

        assert_eq!(source.calls(), 1);
        assert_eq!(entry.len(), 2);
        assert_eq!(entry.bars[0].volume, 60);
        assert!(cache.get(&key.with_timeframe(Timeframe::OneHour)).is_some());

        // Twelve-hour reuses the cached hourly series
        cache
            .load(&key.with_timeframe(Timeframe::TwelveHours), source.clone())
            .await
            .unwrap();
        assert_eq!(source.calls(), 1);
        assert_eq!(cache.timeframes_for("AAPL").len(), 3);
    }

    #[tokio::test]
    async fn test_resampled_timeframes_only_request_their_source() {
        let cache = BarCache::new();
        let source = Arc::new(MemorySource::new(hourly(12)));

        for timeframe in [Timeframe::SixHours, Timeframe::TwelveHours] {
            let key = SeriesKey::new("AAPL", timeframe);
            cache.load(&key, source.clone()).await.unwrap();
            cache.refresh(&key, source.clone()).await.unwrap();
        }

        assert!(source.requested().iter().all(|tf| *tf == Timeframe::OneHour));
    }

    #[tokio::test]
    async fn test_refresh_of_resampled_timeframe_refetches_source() {
        let cache = BarCache::new();
        let source = Arc::new(MemorySource::new(hourly(12)));
        source.drift.store(true, Ordering::SeqCst);
        let key = SeriesKey::new("AAPL", Timeframe::SixHours);

        let before = cache.load(&key, source.clone()).await.unwrap();
        assert_eq!(source.calls(), 1);
        assert_eq!(before.last_bar().unwrap().close, dec!(112));

        let after = cache.refresh(&key, source.clone()).await.unwrap();
        assert_eq!(source.calls(), 2);
        assert_eq!(after.last_bar().unwrap().close, dec!(113));

        // The hourly source series was replaced as well
        let hourly_entry = cache.get(&key.with_timeframe(Timeframe::OneHour)).unwrap();
        assert_eq!(hourly_entry.last_bar().unwrap().close, dec!(113));

        // A plain load still reuses what is cached
        cache.load(&key, source.clone()).await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_apply_tick_patches_every_timeframe_copy_on_write() {
        let cache = BarCache::new();
        let source = Arc::new(MemorySource::new(hourly(12)));
        let hourly_key = SeriesKey::new("AAPL", Timeframe::OneHour);

        let snapshot = cache.load(&hourly_key, source.clone()).await.unwrap();
        cache
            .load(&hourly_key.with_timeframe(Timeframe::SixHours), source.clone())
            .await
            .unwrap();

        let updates = cache.apply_tick(&Tick::last("AAPL", dec!(250)));
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].timeframe, Timeframe::OneHour);
        assert!(updates.iter().all(|u| u.bar.close == dec!(250)));

        assert_eq!(snapshot.last_bar().unwrap().close, dec!(111));
        assert_eq!(cache.get(&hourly_key).unwrap().last_bar().unwrap().close, dec!(250));

        assert!(cache.apply_tick(&Tick::last("MSFT", dec!(1))).is_empty());
    }

    #[test]
    fn test_parse_errors_map_to_malformed() {
        let err: BarCacheError = TerminalError::parse("bad json").into();
        assert_eq!(err, BarCacheError::Malformed("bad json".into()));
    }
}
