//! Backend trait definitions
//!
//! The query engine never talks to a concrete store. It sees series data
//! through [`TimeseriesStorage`] and tag enumeration through
//! [`MetricMetadata`]; both are object-safe so backends can be swapped at
//! startup and wrapped (the metadata cache wraps any [`MetricMetadata`]).

use crate::error::FetchError;
use crate::fetch::FetchRequest;
use crate::types::{MetricKey, TagSet, TaggedMetric, Timerange, Timeseries};
use async_trait::async_trait;

// =============================================================================
// Timeseries Storage
// =============================================================================

/// Source of sampled series data
#[async_trait]
pub trait TimeseriesStorage: Send + Sync + 'static {
    /// Pick the resolution to evaluate `requested` at
    ///
    /// The answer must be at least `smallest_resolution` milliseconds and
    /// should be one the store can serve for the whole range.
    async fn choose_resolution(
        &self,
        requested: &Timerange,
        smallest_resolution: i64,
    ) -> Result<i64, FetchError>;

    /// Fetch one series, sampled into `request.timerange` slots
    async fn fetch_single(&self, request: &FetchRequest) -> Result<Timeseries, FetchError>;
}

// =============================================================================
// Metric Metadata
// =============================================================================

/// Enumeration of metrics and their tagsets
#[async_trait]
pub trait MetricMetadata: Send + Sync + 'static {
    /// Every tagset recorded for `metric`
    async fn get_all_tags(&self, metric: &MetricKey) -> Result<Vec<TagSet>, FetchError>;

    /// Every known metric key
    async fn get_all_metrics(&self) -> Result<Vec<MetricKey>, FetchError>;

    /// Metric keys with at least one series tagged `key=value`
    async fn get_metrics_for_tag(&self, key: &str, value: &str) -> Result<Vec<MetricKey>, FetchError>;

    /// Whether [`add_metric`](Self::add_metric) is supported
    fn can_add_metrics(&self) -> bool {
        false
    }

    /// Record a tagged metric
    async fn add_metric(&self, metric: TaggedMetric) -> Result<(), FetchError> {
        let _ = metric;
        Err(FetchError::unsupported("metadata store does not support updates"))
    }

    /// Record several tagged metrics
    async fn add_metrics(&self, metrics: Vec<TaggedMetric>) -> Result<(), FetchError> {
        for metric in metrics {
            self.add_metric(metric).await?;
        }
        Ok(())
    }
}
