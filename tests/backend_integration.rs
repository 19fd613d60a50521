//! Backend Integration Tests
//!
//! Exercises the seams between query execution and the pluggable backends:
//!
//! 1. **Deadlines** - a slow store makes the query time out and stops
//!    waiting fetches from ever reaching it
//! 2. **Backend Failures** - errors name the failing series
//! 3. **Metadata Cache** - repeated queries are answered from the cache
//!    while a background refresh keeps it warm

use async_trait::async_trait;
use mqe::cache::{MetadataCache, MetadataCacheConfig};
use mqe::engine::{MemoryMetadata, MetricMetadata, TimeseriesStorage};
use mqe::error::FetchError;
use mqe::fetch::{FetchRequest, ParallelFetcher};
use mqe::query::command::CommandBody;
use mqe::query::parser::parse_at;
use mqe::query::ExecutionContext;
use mqe::types::{MetricKey, TagSet, TaggedMetric, Timerange, Timeseries};
use mqe::QueryError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const NOW: i64 = 1_433_203_200_000;

// =============================================================================
// Test Backends
// =============================================================================

/// Storage answering every fetch with its host number after a delay
struct SlowStorage {
    calls: AtomicUsize,
    delay: Duration,
    fail: bool,
}

impl SlowStorage {
    fn new(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Duration::ZERO)
        }
    }
}

#[async_trait]
impl TimeseriesStorage for SlowStorage {
    async fn choose_resolution(&self, _requested: &Timerange, _smallest: i64) -> Result<i64, FetchError> {
        Ok(30_000)
    }

    async fn fetch_single(&self, request: &FetchRequest) -> Result<Timeseries, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(FetchError::io("connection reset").with_metric(request.metric.clone()));
        }
        let value = request
            .metric
            .tagset
            .get("host")
            .and_then(|host| host.parse().ok())
            .unwrap_or(f64::NAN);
        Ok(Timeseries::new(
            vec![value; request.timerange.slots()],
            request.metric.tagset.clone(),
        ))
    }
}

/// Metadata store counting tag enumerations
#[derive(Default)]
struct CountingMetadata {
    inner: MemoryMetadata,
    tag_calls: AtomicUsize,
}

#[async_trait]
impl MetricMetadata for CountingMetadata {
    async fn get_all_tags(&self, metric: &MetricKey) -> Result<Vec<TagSet>, FetchError> {
        self.tag_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_all_tags(metric).await
    }

    async fn get_all_metrics(&self) -> Result<Vec<MetricKey>, FetchError> {
        self.inner.get_all_metrics().await
    }

    async fn get_metrics_for_tag(&self, key: &str, value: &str) -> Result<Vec<MetricKey>, FetchError> {
        self.inner.get_metrics_for_tag(key, value).await
    }

    fn can_add_metrics(&self) -> bool {
        true
    }

    async fn add_metric(&self, metric: TaggedMetric) -> Result<(), FetchError> {
        self.inner.add_metric(metric).await
    }
}

async fn hosts(metadata: &dyn MetricMetadata, metric: &str, count: usize) {
    for host in 1..=count {
        let tagset = TagSet::from_pairs(&[("host", host.to_string().as_str())]);
        metadata
            .add_metric(TaggedMetric::new(MetricKey::from(metric), tagset))
            .await
            .unwrap();
    }
}

fn series_count(body: &CommandBody) -> usize {
    match body {
        CommandBody::Results(results) => results[0].series.as_ref().map_or(0, Vec::len),
        other => panic!("expected select results, got {:?}", other),
    }
}

// =============================================================================
// Deadlines
// =============================================================================

#[tokio::test]
async fn test_timeout_cancels_waiting_fetches() {
    let storage = Arc::new(SlowStorage::new(Duration::from_millis(300)));
    let metadata = Arc::new(MemoryMetadata::new());
    hosts(metadata.as_ref(), "slow", 6).await;

    let fetcher = Arc::new(ParallelFetcher::new(storage.clone(), 2));
    let mut ctx = ExecutionContext::new(Arc::clone(&fetcher), metadata, 100);
    ctx.timeout = Some(Duration::from_millis(50));

    let command = parse_at("select slow from -5m to now", NOW).unwrap();
    let err = command.execute(&ctx).await.unwrap_err();
    assert!(matches!(err, QueryError::Timeout), "{:?}", err);
    assert_eq!(err.to_string(), "Timeout while executing the query.");

    // Only the fetches holding a ticket reached the backend
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(storage.calls.load(Ordering::SeqCst), 2);
    assert_eq!(fetcher.available_tickets(), 2);
}

#[tokio::test]
async fn test_query_within_deadline_succeeds() {
    let storage = Arc::new(SlowStorage::new(Duration::from_millis(5)));
    let metadata = Arc::new(MemoryMetadata::new());
    hosts(metadata.as_ref(), "slow", 3).await;

    let fetcher = Arc::new(ParallelFetcher::new(storage.clone(), 2));
    let mut ctx = ExecutionContext::new(fetcher, metadata, 100);
    ctx.timeout = Some(Duration::from_secs(5));

    let result = parse_at("select slow from -5m to now", NOW)
        .unwrap()
        .execute(&ctx)
        .await
        .unwrap();
    assert_eq!(series_count(&result.body), 3);
    assert_eq!(storage.calls.load(Ordering::SeqCst), 3);
}

// =============================================================================
// Backend Failures
// =============================================================================

#[tokio::test]
async fn test_backend_error_names_series() {
    let storage = Arc::new(SlowStorage::failing());
    let metadata = Arc::new(MemoryMetadata::new());
    hosts(metadata.as_ref(), "broken", 1).await;

    let ctx = ExecutionContext::new(Arc::new(ParallelFetcher::new(storage, 2)), metadata, 100);
    let err = parse_at("select broken from -5m to now", NOW)
        .unwrap()
        .execute(&ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::Fetch(_)), "{:?}", err);
    let message = err.to_string();
    assert!(message.contains("broken"), "{}", message);
    assert!(message.contains("connection reset"), "{}", message);
}

// =============================================================================
// Metadata Cache
// =============================================================================

#[tokio::test]
async fn test_cache_answers_repeated_queries() {
    let backend = Arc::new(CountingMetadata::default());
    hosts(backend.as_ref(), "cpu", 3).await;
    let cache = Arc::new(MetadataCache::spawn(
        backend.clone(),
        MetadataCacheConfig {
            ttl_ms: 60_000,
            request_limit: 8,
        },
    ));

    let storage = Arc::new(SlowStorage::new(Duration::ZERO));
    let ctx = ExecutionContext::new(Arc::new(ParallelFetcher::new(storage, 4)), cache.clone(), 100);
    let command = parse_at("select cpu from -5m to now", NOW).unwrap();

    let first = command.execute(&ctx).await.unwrap();
    assert_eq!(series_count(&first.body), 3);
    assert_eq!(backend.tag_calls.load(Ordering::SeqCst), 1);
    assert!(cache.entry(&MetricKey::from("cpu")).await.is_some());

    // A new series is invisible until the refresh queued by the hit lands
    hosts(backend.as_ref(), "cpu", 4).await;
    let second = command.execute(&ctx).await.unwrap();
    assert_eq!(series_count(&second.body), 3);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.tag_calls.load(Ordering::SeqCst), 2);
    let third = command.execute(&ctx).await.unwrap();
    assert_eq!(series_count(&third.body), 4);
}

#[tokio::test]
async fn test_cache_passes_listing_through() {
    let backend = Arc::new(CountingMetadata::default());
    hosts(backend.as_ref(), "cpu", 1).await;
    hosts(backend.as_ref(), "mem", 1).await;
    let cache = Arc::new(MetadataCache::spawn(
        backend.clone(),
        MetadataCacheConfig {
            ttl_ms: 60_000,
            request_limit: 1,
        },
    ));

    let ctx = ExecutionContext::new(
        Arc::new(ParallelFetcher::new(Arc::new(SlowStorage::new(Duration::ZERO)), 1)),
        cache.clone(),
        100,
    );
    let all = parse_at("describe all", NOW).unwrap().execute(&ctx).await.unwrap();
    assert_eq!(
        all.body,
        CommandBody::Metrics(vec![MetricKey::from("cpu"), MetricKey::from("mem")])
    );
    assert_eq!(backend.tag_calls.load(Ordering::SeqCst), 0);
    assert!(cache.is_empty().await);
}
