//! Pluggable backends for series data and metadata
//!
//! - [`traits`]: the [`TimeseriesStorage`] and [`MetricMetadata`] seams
//! - [`memory`]: in-process implementations of both

pub mod memory;
pub mod traits;

pub use memory::{MemoryMetadata, MemoryStorage};
pub use traits::{MetricMetadata, TimeseriesStorage};
