//! Read-through metadata cache
//!
//! Wraps any [`MetricMetadata`] and caches `get_all_tags` per metric.
//!
//! # Behavior
//!
//! - **Miss or expired**: fetch from the backend and wait for the answer
//! - **Hit**: answer from the cache immediately and queue a background
//!   refresh so the entry stays warm
//! - **Store**: an entry is never replaced by one expiring earlier, so a
//!   slow response started before a faster one cannot overwrite fresher data
//! - Entries are never evicted; they are only replaced
//!
//! The refresh queue is bounded. When it is full the refresh is dropped;
//! the next hit queues it again. A single worker drains the queue.
//!
//! All other metadata operations pass straight through.
//!
//! # Example
//!
//! ```rust,ignore
//! use mqe::cache::{MetadataCache, MetadataCacheConfig};
//!
//! let cache = MetadataCache::spawn(backend, MetadataCacheConfig { ttl_ms: 60_000, request_limit: 128 });
//! let tagsets = cache.get_all_tags(&"cpu.user".into()).await?;
//! ```

use crate::engine::traits::MetricMetadata;
use crate::error::FetchError;
use crate::metrics;
use crate::types::{MetricKey, TagSet, TaggedMetric};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Cached value with TTL tracking
#[derive(Clone, Debug)]
pub struct CachedEntry<T: Clone> {
    /// The cached data
    pub data: T,
    /// When the request producing `data` started (milliseconds since epoch)
    cached_at: i64,
    /// Time-to-live in milliseconds
    ttl_ms: i64,
}

impl<T: Clone> CachedEntry<T> {
    /// Entry for data requested at `cached_at`
    pub fn new(data: T, cached_at: i64, ttl_ms: i64) -> Self {
        Self {
            data,
            cached_at,
            ttl_ms,
        }
    }

    /// Expiry time in milliseconds since epoch
    pub fn expires_at(&self) -> i64 {
        self.cached_at + self.ttl_ms
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp_millis() > self.expires_at()
    }

    /// The data if not expired
    pub fn get_if_valid(&self) -> Option<&T> {
        if self.is_expired() {
            None
        } else {
            Some(&self.data)
        }
    }
}

/// Cache tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataCacheConfig {
    /// Entry lifetime in milliseconds
    pub ttl_ms: i64,
    /// Capacity of the background refresh queue
    pub request_limit: usize,
}

type Entries = RwLock<HashMap<MetricKey, CachedEntry<Vec<TagSet>>>>;

struct Shared {
    inner: Arc<dyn MetricMetadata>,
    entries: Entries,
    ttl_ms: i64,
}

impl Shared {
    /// Fetch from the backend and store unless the cached entry expires later
    async fn fetch_and_store(&self, metric: &MetricKey) -> Result<Vec<TagSet>, FetchError> {
        let started = Utc::now().timestamp_millis();
        let tagsets = self.inner.get_all_tags(metric).await?;
        let entry = CachedEntry::new(tagsets.clone(), started, self.ttl_ms);

        let mut entries = self.entries.write().await;
        let newer = entries
            .get(metric)
            .map_or(true, |existing| existing.expires_at() <= entry.expires_at());
        if newer {
            entries.insert(metric.clone(), entry);
        }
        Ok(tagsets)
    }
}

/// [`MetricMetadata`] wrapper caching tag enumeration
pub struct MetadataCache {
    shared: Arc<Shared>,
    refresh: mpsc::Sender<MetricKey>,
}

impl MetadataCache {
    /// Wrap `inner` and start the refresh worker on the current runtime
    pub fn spawn(inner: Arc<dyn MetricMetadata>, config: MetadataCacheConfig) -> Self {
        let shared = Arc::new(Shared {
            inner,
            entries: RwLock::new(HashMap::new()),
            ttl_ms: config.ttl_ms,
        });
        let (refresh, mut queue) = mpsc::channel::<MetricKey>(config.request_limit.max(1));

        let worker = Arc::clone(&shared);
        tokio::spawn(async move {
            while let Some(metric) = queue.recv().await {
                match worker.fetch_and_store(&metric).await {
                    Ok(_) => metrics::CACHE_EVENTS.with_label_values(&["refresh"]).inc(),
                    Err(e) => warn!(metric = %metric, error = %e, "background metadata refresh failed"),
                }
            }
            debug!("metadata refresh worker stopped");
        });

        Self { shared, refresh }
    }

    /// Number of cached metrics, including expired entries
    pub async fn len(&self) -> usize {
        self.shared.entries.read().await.len()
    }

    /// True when nothing has been cached yet
    pub async fn is_empty(&self) -> bool {
        self.shared.entries.read().await.is_empty()
    }

    /// Cached entry for `metric`, expired or not
    pub async fn entry(&self, metric: &MetricKey) -> Option<CachedEntry<Vec<TagSet>>> {
        self.shared.entries.read().await.get(metric).cloned()
    }

    fn queue_refresh(&self, metric: &MetricKey) {
        match self.refresh.try_send(metric.clone()) {
            Ok(()) => {},
            Err(TrySendError::Full(_)) => {
                metrics::CACHE_EVENTS.with_label_values(&["dropped"]).inc();
                warn!(metric = %metric, "metadata refresh queue is full; dropping refresh");
            },
            Err(TrySendError::Closed(_)) => {
                warn!(metric = %metric, "metadata refresh worker is gone");
            },
        }
    }
}

#[async_trait]
impl MetricMetadata for MetadataCache {
    async fn get_all_tags(&self, metric: &MetricKey) -> Result<Vec<TagSet>, FetchError> {
        let cached = {
            let entries = self.shared.entries.read().await;
            entries
                .get(metric)
                .and_then(|entry| entry.get_if_valid().cloned())
        };
        match cached {
            Some(tagsets) => {
                metrics::CACHE_EVENTS.with_label_values(&["hit"]).inc();
                self.queue_refresh(metric);
                Ok(tagsets)
            },
            None => {
                metrics::CACHE_EVENTS.with_label_values(&["miss"]).inc();
                self.shared.fetch_and_store(metric).await
            },
        }
    }

    async fn get_all_metrics(&self) -> Result<Vec<MetricKey>, FetchError> {
        self.shared.inner.get_all_metrics().await
    }

    async fn get_metrics_for_tag(&self, key: &str, value: &str) -> Result<Vec<MetricKey>, FetchError> {
        self.shared.inner.get_metrics_for_tag(key, value).await
    }

    fn can_add_metrics(&self) -> bool {
        self.shared.inner.can_add_metrics()
    }

    async fn add_metric(&self, metric: TaggedMetric) -> Result<(), FetchError> {
        self.shared.inner.add_metric(metric).await
    }

    async fn add_metrics(&self, metrics: Vec<TaggedMetric>) -> Result<(), FetchError> {
        self.shared.inner.add_metrics(metrics).await
    }
}
