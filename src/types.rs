//! Core data types for the query engine
//!
//! This module defines the value objects every other module works with:
//!
//! - **`Timerange`**: snapped `[start, end]` window with a fixed resolution
//! - **`TagSet`**: key/value tags identifying one series of a metric
//! - **`TaggedMetric`**: a metric name together with one tagset
//! - **`Timeseries`**: the values of one series across a timerange
//! - **`SeriesList`**: the series produced by one expression
//! - **`SampleMethod`**: how raw points are folded into one slot
//!
//! # Example
//!
//! ```rust
//! use mqe::types::{Timerange, TagSet};
//!
//! // Snapping floors the start and ceils the end
//! let range = Timerange::snapped(4050, 4720, 100).unwrap();
//! assert_eq!(range.start(), 4000);
//! assert_eq!(range.end(), 4800);
//! assert_eq!(range.slots(), 9);
//!
//! let tags = TagSet::from_pairs(&[("host", "a"), ("dc", "west")]);
//! assert_eq!(tags.serialize(), "dc=west,host=a");
//! ```

use crate::error::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// Timerange
// =============================================================================

fn floor_to(value: i64, boundary: i64) -> Option<i64> {
    value.div_euclid(boundary).checked_mul(boundary)
}

fn ceil_to(value: i64, boundary: i64) -> Option<i64> {
    floor_to(value.checked_neg()?, boundary)?.checked_neg()
}

/// Inclusive time window `[start, end]` sampled every `resolution` milliseconds
///
/// Invariants: `resolution > 0`, `start` and `end` are multiples of
/// `resolution`, and `start <= end`. The number of samples is
/// `(end - start) / resolution + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timerange {
    start: i64,
    end: i64,
    resolution: i64,
}

impl Timerange {
    /// Create a validated timerange
    ///
    /// Fails with [`QueryError::InvalidTimerange`] if the resolution is not
    /// positive, an endpoint is not aligned to it, `start > end`, or the
    /// window is too long to measure in milliseconds.
    pub fn new(start: i64, end: i64, resolution: i64) -> Result<Self> {
        let invalid = |reason: String| QueryError::InvalidTimerange {
            start,
            end,
            resolution,
            reason,
        };
        if resolution <= 0 {
            return Err(invalid(format!("invalid resolution {}", resolution)));
        }
        if start % resolution != 0 {
            return Err(invalid("start is not a multiple of the resolution".into()));
        }
        if end % resolution != 0 {
            return Err(invalid("end is not a multiple of the resolution".into()));
        }
        if start > end {
            return Err(invalid("start must be <= end".into()));
        }
        if end.checked_sub(start).is_none() {
            return Err(invalid("window is too long".into()));
        }
        Ok(Self {
            start,
            end,
            resolution,
        })
    }

    /// Create a timerange whose start is rounded down and end rounded up
    /// to multiples of `resolution`
    pub fn snapped(start: i64, end: i64, resolution: i64) -> Result<Self> {
        if resolution <= 0 || start > end {
            return Self::new(start, end, resolution);
        }
        match (floor_to(start, resolution), ceil_to(end, resolution)) {
            (Some(floored), Some(ceiled)) => Self::new(floored, ceiled, resolution),
            _ => Err(QueryError::InvalidTimerange {
                start,
                end,
                resolution,
                reason: "endpoints overflow when snapped".into(),
            }),
        }
    }

    /// Start in epoch milliseconds (inclusive)
    pub fn start(&self) -> i64 {
        self.start
    }

    /// End in epoch milliseconds (inclusive)
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Resolution in milliseconds
    pub fn resolution(&self) -> i64 {
        self.resolution
    }

    /// Length of the window in milliseconds (`end - start`)
    pub fn duration(&self) -> i64 {
        self.end - self.start
    }

    /// Number of samples in the window
    pub fn slots(&self) -> usize {
        ((self.end - self.start) / self.resolution) as usize + 1
    }

    /// Timestamp of the given slot
    pub fn slot_time(&self, slot: usize) -> i64 {
        self.start + slot as i64 * self.resolution
    }

    /// Move the window by `shift` milliseconds, flooring the new start
    ///
    /// The slot count is preserved so shifted results line up slot for slot
    /// with the original window.
    pub fn shift(&self, shift: i64) -> Result<Self> {
        let start = self
            .start
            .checked_add(shift)
            .and_then(|start| floor_to(start, self.resolution));
        let end = start.and_then(|start| start.checked_add(self.duration()));
        match (start, end) {
            (Some(start), Some(end)) => Self::new(start, end, self.resolution),
            _ => Err(self.overflow(format!("shift by {}ms overflows", shift))),
        }
    }

    /// Move the start earlier by `length` milliseconds and re-snap
    pub fn extend_before(&self, length: i64) -> Result<Self> {
        match self.start.checked_sub(length.max(0)) {
            Some(start) => Self::snapped(start, self.end, self.resolution),
            None => Err(self.overflow(format!("extending by {}ms overflows", length))),
        }
    }

    /// Keep the end and set `start = end - length`, re-snapped
    pub fn select_length(&self, length: i64) -> Result<Self> {
        match self.end.checked_sub(length.max(0)) {
            Some(start) => Self::snapped(start, self.end, self.resolution),
            None => Err(self.overflow(format!("selecting {}ms overflows", length))),
        }
    }

    /// Same endpoints at a different resolution, snapped outward
    pub fn with_resolution(&self, resolution: i64) -> Result<Self> {
        Self::snapped(self.start, self.end, resolution)
    }

    fn overflow(&self, reason: String) -> QueryError {
        QueryError::InvalidTimerange {
            start: self.start,
            end: self.end,
            resolution: self.resolution,
            reason,
        }
    }
}

impl fmt::Display for Timerange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}] @ {}ms", self.start, self.end, self.resolution)
    }
}

// =============================================================================
// Tags
// =============================================================================

/// Name of a metric in the metadata store
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricKey(pub String);

impl MetricKey {
    /// Borrow the metric name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MetricKey {
    fn from(name: &str) -> Self {
        MetricKey(name.to_string())
    }
}

impl From<String> for MetricKey {
    fn from(name: String) -> Self {
        MetricKey(name)
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mapping from tag key to tag value
///
/// Keys are kept sorted so equality, hashing and [`TagSet::serialize`] do
/// not depend on insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, String>);

fn escape_tag_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | ',' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl TagSet {
    /// Empty tagset
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Build a tagset from `(key, value)` pairs
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    /// Value for a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether the key is present
    pub fn has_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Set a key in place
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Copy with one key set
    pub fn with(&self, key: &str, value: &str) -> Self {
        let mut copy = self.clone();
        copy.insert(key, value);
        copy
    }

    /// Copy with one key removed
    pub fn without(&self, key: &str) -> Self {
        let mut copy = self.clone();
        copy.0.remove(key);
        copy
    }

    /// Number of tags
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if there are no tags
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(key, value)` in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Canonical encoding: sorted `key=value` pairs joined by `,`
    ///
    /// `\`, `,` and `=` inside keys and values are backslash-escaped so
    /// distinct tagsets never encode to the same string.
    pub fn serialize(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", escape_tag_text(k), escape_tag_text(v)))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// True when every key present in both tagsets has the same value
    pub fn agrees_with(&self, other: &TagSet) -> bool {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small
            .0
            .iter()
            .all(|(k, v)| large.0.get(k).map_or(true, |w| w == v))
    }

    /// Union of both tagsets, or `None` if a shared key disagrees
    pub fn merge(&self, other: &TagSet) -> Option<TagSet> {
        if !self.agrees_with(other) {
            return None;
        }
        let mut merged = self.clone();
        for (k, v) in &other.0 {
            merged.0.entry(k.clone()).or_insert_with(|| v.clone());
        }
        Some(merged)
    }

    /// Keep only the listed keys (`group by`) or drop them (`collapse by`)
    pub fn project(&self, tags: &[String], collapses: bool) -> TagSet {
        TagSet(
            self.0
                .iter()
                .filter(|(k, _)| tags.iter().any(|t| t == *k) != collapses)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl FromIterator<(String, String)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        TagSet(iter.into_iter().collect())
    }
}

/// A metric name with one tagset: the identity of a stored series
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaggedMetric {
    /// Metric name
    #[serde(rename = "name")]
    pub metric_key: MetricKey,
    /// Tags of the series
    #[serde(rename = "tags")]
    pub tagset: TagSet,
}

impl TaggedMetric {
    /// Pair a metric with a tagset
    pub fn new(metric_key: MetricKey, tagset: TagSet) -> Self {
        Self { metric_key, tagset }
    }
}

impl fmt::Display for TaggedMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.metric_key, self.tagset)
    }
}

// =============================================================================
// Series
// =============================================================================

/// Values of one series, one per slot; NaN marks a missing sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeseries {
    /// Slot values
    pub values: Vec<f64>,
    /// Tags identifying the series
    pub tagset: TagSet,
}

impl Timeseries {
    /// Create a series
    pub fn new(values: Vec<f64>, tagset: TagSet) -> Self {
        Self { values, tagset }
    }
}

/// The series produced by one expression, sharing a timerange
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesList {
    /// Member series in metadata enumeration order
    pub series: Vec<Timeseries>,
    /// Timerange every member is sampled on
    pub timerange: Timerange,
    /// Display name, if one was assigned
    #[serde(skip)]
    pub name: String,
    /// Query text that produced this list
    #[serde(skip)]
    pub query: String,
}

impl SeriesList {
    /// Create an unnamed list
    pub fn new(series: Vec<Timeseries>, timerange: Timerange) -> Self {
        Self {
            series,
            timerange,
            name: String::new(),
            query: String::new(),
        }
    }

    /// List with no series
    pub fn empty(timerange: Timerange) -> Self {
        Self::new(Vec::new(), timerange)
    }

    /// Number of member series
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// True if the list has no series
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Drop the first `count` slots of every series and of the timerange
    ///
    /// Used after evaluating against a range extended backwards.
    pub fn drop_leading(mut self, count: usize, timerange: Timerange) -> Self {
        for series in &mut self.series {
            let skip = count.min(series.values.len());
            series.values.drain(..skip);
        }
        self.timerange = timerange;
        self
    }
}

/// How raw points falling in one slot are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleMethod {
    /// Arithmetic mean of the points
    #[default]
    Mean,
    /// Smallest point
    Min,
    /// Largest point
    Max,
}

impl SampleMethod {
    /// Fold a bucket of points; an empty bucket is NaN
    pub fn sample(&self, points: &[f64]) -> f64 {
        if points.is_empty() {
            return f64::NAN;
        }
        match self {
            SampleMethod::Mean => points.iter().sum::<f64>() / points.len() as f64,
            SampleMethod::Min => points.iter().copied().fold(f64::INFINITY, f64::min),
            SampleMethod::Max => points.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

impl fmt::Display for SampleMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SampleMethod::Mean => "mean",
            SampleMethod::Min => "min",
            SampleMethod::Max => "max",
        };
        f.write_str(text)
    }
}
