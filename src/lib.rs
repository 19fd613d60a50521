//! MQE - a metrics query engine over tagged time series
//!
//! This library provides:
//! - A SQL-flavored query language (`select`, `describe`) with positioned
//!   syntax errors
//! - NaN-aware transforms, aggregations, filters and natural joins over
//!   series lists
//! - Holt-Winters, seasonal and linear forecasting with anomaly scoring
//! - Parallel, ticket-gated fetching with per-request quotas and deadlines
//! - Pluggable storage and metadata backends with a read-through tag cache
//!
//! # Example
//!
//! ```rust
//! use mqe::engine::{MemoryMetadata, MemoryStorage, MetricMetadata};
//! use mqe::fetch::ParallelFetcher;
//! use mqe::query::{parser, CommandResult, ExecutionContext};
//! use mqe::types::{MetricKey, TagSet, TaggedMetric};
//! use std::sync::Arc;
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! runtime.block_on(async {
//!     let metadata = Arc::new(MemoryMetadata::new());
//!     let metric = TaggedMetric::new(MetricKey::from("cpu"), TagSet::from_pairs(&[("host", "a")]));
//!     metadata.add_metric(metric).await.unwrap();
//!
//!     let fetcher = Arc::new(ParallelFetcher::new(Arc::new(MemoryStorage::new()), 4));
//!     let ctx = ExecutionContext::new(fetcher, metadata, 100);
//!     let command = parser::parse("describe all").unwrap();
//!     let result: CommandResult = command.execute(&ctx).await.unwrap();
//!     assert_eq!(result.metadata["count"], 1);
//! });
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod function;
pub mod profile;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Query language: parsing, planning, evaluation and commands
pub mod query;

// Re-export main types
pub use error::{QueryError, Result};
pub use query::{Command, CommandResult, ExecutionContext};
pub use types::{SeriesList, TagSet, Timerange, Timeseries};
