//! Caching layers in front of backends

pub mod metadata;

pub use metadata::{CachedEntry, MetadataCache, MetadataCacheConfig};
