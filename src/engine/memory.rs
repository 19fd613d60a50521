//! In-memory backends
//!
//! [`MemoryStorage`] keeps raw `(timestamp, value)` points per tagged metric
//! and samples them on demand; [`MemoryMetadata`] keeps the tagsets known
//! for each metric. Both are suitable for tests, demos and small
//! deployments fed through the ingestion endpoint. Nothing is persisted.
//!
//! # Bucketing
//!
//! A point at time `t` lands in slot `(t - start) / resolution` (floored).
//! Points before the window or past its last slot are ignored, and each
//! slot's points are folded with the request's [`SampleMethod`]; an empty
//! slot is NaN.
//!
//! # Resolution choice
//!
//! The answer is the smallest configured resolution that is at least the
//! requested lower bound and satisfies every age rule: data older than a
//! rule's cutoff is only served at that rule's coarser resolution.

use super::traits::{MetricMetadata, TimeseriesStorage};
use crate::error::FetchError;
use crate::fetch::FetchRequest;
use crate::types::{MetricKey, SampleMethod, TagSet, TaggedMetric, Timerange, Timeseries};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Group raw points into per-slot buckets of `range`
pub fn bucket(points: &[(i64, f64)], range: &Timerange) -> Vec<Vec<f64>> {
    let mut buckets = vec![Vec::new(); range.slots()];
    for &(t, value) in points {
        if t < range.start() {
            continue;
        }
        let index = ((t - range.start()) / range.resolution()) as usize;
        if let Some(bucket) = buckets.get_mut(index) {
            bucket.push(value);
        }
    }
    buckets
}

/// Sample raw points into one value per slot
pub fn sample(points: &[(i64, f64)], range: &Timerange, method: SampleMethod) -> Vec<f64> {
    bucket(points, range)
        .iter()
        .map(|bucket| method.sample(bucket))
        .collect()
}

// =============================================================================
// MemoryStorage
// =============================================================================

/// Data older than `age` milliseconds needs at least `resolution`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgeRule {
    /// Age cutoff in milliseconds before "now"
    pub age: i64,
    /// Minimum resolution for older data
    pub resolution: i64,
}

/// Raw points held in memory
#[derive(Debug)]
pub struct MemoryStorage {
    points: RwLock<HashMap<TaggedMetric, Vec<(i64, f64)>>>,
    resolutions: Vec<i64>,
    age_rules: Vec<AgeRule>,
    now: Option<i64>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Empty store offering 30s, 5m and 1h resolutions
    pub fn new() -> Self {
        Self {
            points: RwLock::new(HashMap::new()),
            resolutions: vec![30_000, 300_000, 3_600_000],
            age_rules: Vec::new(),
            now: None,
        }
    }

    /// Replace the offered resolutions
    pub fn with_resolutions(mut self, mut resolutions: Vec<i64>) -> Self {
        resolutions.retain(|r| *r > 0);
        resolutions.sort_unstable();
        resolutions.dedup();
        self.resolutions = resolutions;
        self
    }

    /// Require `resolution` for data older than `age`
    pub fn with_age_rule(mut self, age: i64, resolution: i64) -> Self {
        self.age_rules.push(AgeRule { age, resolution });
        self
    }

    /// Pin "now" for age rules instead of reading the clock
    pub fn with_now(mut self, now: i64) -> Self {
        self.now = Some(now);
        self
    }

    fn now(&self) -> i64 {
        self.now.unwrap_or_else(|| Utc::now().timestamp_millis())
    }

    /// Record one raw point
    pub fn add_point(&self, metric: TaggedMetric, timestamp: i64, value: f64) {
        self.points.write().entry(metric).or_default().push((timestamp, value));
    }

    /// Record many raw points for one series
    pub fn add_points(&self, metric: TaggedMetric, points: impl IntoIterator<Item = (i64, f64)>) {
        self.points.write().entry(metric).or_default().extend(points);
    }

    /// Number of series holding at least one point
    pub fn series_count(&self) -> usize {
        self.points.read().len()
    }
}

#[async_trait]
impl TimeseriesStorage for MemoryStorage {
    async fn choose_resolution(
        &self,
        requested: &Timerange,
        smallest_resolution: i64,
    ) -> Result<i64, FetchError> {
        let age = self.now().saturating_sub(requested.start());
        let required = self
            .age_rules
            .iter()
            .filter(|rule| age > rule.age)
            .map(|rule| rule.resolution)
            .fold(smallest_resolution.max(1), i64::max);

        if let Some(resolution) = self.resolutions.iter().copied().find(|r| *r >= required) {
            return Ok(resolution);
        }
        // Coarser than anything configured: round up to a multiple of the
        // largest offered resolution
        match self.resolutions.last() {
            Some(&largest) => Ok((required / largest + i64::from(required % largest != 0)).saturating_mul(largest)),
            None => Err(FetchError::unsupported("no resolutions are configured")),
        }
    }

    async fn fetch_single(&self, request: &FetchRequest) -> Result<Timeseries, FetchError> {
        let points = self.points.read();
        let values = match points.get(&request.metric) {
            Some(raw) => sample(raw, &request.timerange, request.sample_method),
            None => vec![f64::NAN; request.timerange.slots()],
        };
        Ok(Timeseries::new(values, request.metric.tagset.clone()))
    }
}

// =============================================================================
// MemoryMetadata
// =============================================================================

/// Metric to tagset index
#[derive(Debug, Default)]
pub struct MemoryMetadata {
    metrics: DashMap<MetricKey, Vec<TagSet>>,
}

impl MemoryMetadata {
    /// Empty index
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, metric: TaggedMetric) {
        let mut tagsets = self.metrics.entry(metric.metric_key).or_default();
        if !tagsets.contains(&metric.tagset) {
            tagsets.push(metric.tagset);
        }
    }
}

#[async_trait]
impl MetricMetadata for MemoryMetadata {
    async fn get_all_tags(&self, metric: &MetricKey) -> Result<Vec<TagSet>, FetchError> {
        Ok(self
            .metrics
            .get(metric)
            .map(|tagsets| tagsets.clone())
            .unwrap_or_default())
    }

    async fn get_all_metrics(&self) -> Result<Vec<MetricKey>, FetchError> {
        let mut keys: Vec<MetricKey> = self.metrics.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }

    async fn get_metrics_for_tag(&self, key: &str, value: &str) -> Result<Vec<MetricKey>, FetchError> {
        let mut keys: Vec<MetricKey> = self
            .metrics
            .iter()
            .filter(|entry| entry.value().iter().any(|tagset| tagset.get(key) == Some(value)))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn can_add_metrics(&self) -> bool {
        true
    }

    async fn add_metric(&self, metric: TaggedMetric) -> Result<(), FetchError> {
        self.insert(metric);
        Ok(())
    }

    async fn add_metrics(&self, metrics: Vec<TaggedMetric>) -> Result<(), FetchError> {
        for metric in metrics {
            self.insert(metric);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucketing_floors_timestamps() {
        let range = Timerange::new(4000, 4800, 100).unwrap();
        let points = [
            (4100, 1.0),
            (4299, 2.0),
            (4403, 3.0),
            (4500, 4.0),
            (4700, 5.0),
            (4749, 6.0),
            (3999, 7.0),
            (4900, 8.0),
        ];
        let buckets = bucket(&points, &range);
        let expected: Vec<Vec<f64>> = vec![
            vec![],
            vec![1.0],
            vec![2.0],
            vec![],
            vec![3.0],
            vec![4.0],
            vec![],
            vec![5.0, 6.0],
            vec![],
        ];
        assert_eq!(buckets, expected);

        let means = sample(&points, &range, SampleMethod::Mean);
        assert_eq!(means[7], 5.5);
        assert!(means[0].is_nan());
        assert_eq!(sample(&points, &range, SampleMethod::Max)[7], 6.0);
    }

    #[tokio::test]
    async fn test_choose_resolution_with_age_rule() {
        let now = 1_700_000_100_000;
        let day = 86_400_000;
        let storage = MemoryStorage::new()
            .with_resolutions(vec![30_000, 300_000])
            .with_now(now)
            .with_age_rule(day, 300_000);

        let recent = Timerange::snapped(now - day, now, 30_000).unwrap();
        assert_eq!(storage.choose_resolution(&recent, 1_000).await.unwrap(), 30_000);

        let old = Timerange::snapped(now - day - 60_000, now, 30_000).unwrap();
        assert_eq!(storage.choose_resolution(&old, 1_000).await.unwrap(), 300_000);

        // Past the largest resolution: a multiple of it
        assert_eq!(storage.choose_resolution(&recent, 400_000).await.unwrap(), 600_000);
    }

    #[tokio::test]
    async fn test_fetch_unknown_series_is_nan() {
        let storage = MemoryStorage::new();
        let metric = TaggedMetric::new(MetricKey::from("cpu"), TagSet::from_pairs(&[("host", "a")]));
        storage.add_points(metric.clone(), vec![(0, 1.0), (30_000, 3.0)]);
        let range = Timerange::new(0, 60_000, 30_000).unwrap();

        let request = FetchRequest {
            metric: metric.clone(),
            sample_method: SampleMethod::Mean,
            timerange: range,
        };
        let series = storage.fetch_single(&request).await.unwrap();
        assert_eq!(&series.values[..2], &[1.0, 3.0]);
        assert!(series.values[2].is_nan());

        let missing = FetchRequest {
            metric: TaggedMetric::new(MetricKey::from("cpu"), TagSet::new()),
            ..request
        };
        let series = storage.fetch_single(&missing).await.unwrap();
        assert_eq!(series.values.len(), 3);
        assert!(series.values.iter().all(|v| v.is_nan()));
    }

    #[tokio::test]
    async fn test_metadata_index() {
        let metadata = MemoryMetadata::new();
        let a = TaggedMetric::new(MetricKey::from("b.cpu"), TagSet::from_pairs(&[("host", "a")]));
        metadata.add_metrics(vec![a.clone(), a.clone()]).await.unwrap();
        metadata
            .add_metric(TaggedMetric::new(MetricKey::from("a.mem"), TagSet::from_pairs(&[("host", "b")])))
            .await
            .unwrap();

        assert_eq!(metadata.get_all_tags(&MetricKey::from("b.cpu")).await.unwrap().len(), 1);
        assert!(metadata.get_all_tags(&MetricKey::from("none")).await.unwrap().is_empty());
        assert_eq!(
            metadata.get_all_metrics().await.unwrap(),
            vec![MetricKey::from("a.mem"), MetricKey::from("b.cpu")]
        );
        assert_eq!(
            metadata.get_metrics_for_tag("host", "a").await.unwrap(),
            vec![MetricKey::from("b.cpu")]
        );
        assert!(metadata.can_add_metrics());
    }
}
