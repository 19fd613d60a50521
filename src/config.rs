//! Configuration management for the query engine
//!
//! Configuration is read from a TOML file, then overridden from the
//! environment. Every field has a default, so an empty file (or no file at
//! all) yields a working single-node setup:
//!
//! ```toml
//! [server]
//! listen_addr = "0.0.0.0:9090"
//! static_dir = "ui/static"
//!
//! [query]
//! timeout_ms = 30000
//! fetch_limit = 2000
//!
//! [metadata_cache]
//! ttl_ms = 300000
//! ```

use crate::cache::MetadataCacheConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// HTTP server
    #[serde(default)]
    pub server: ServerConfig,

    /// Query execution limits
    #[serde(default)]
    pub query: QueryConfig,

    /// Metadata cache tuning
    #[serde(default)]
    pub metadata_cache: CacheConfig,

    /// Ingestion endpoints
    #[serde(default)]
    pub ingestion: IngestionConfig,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Log level (error, warn, info, debug, trace) used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory served at `/static` (disabled when unset)
    #[serde(default)]
    pub static_dir: Option<String>,

    /// CORS allowed origins (empty = allow all origins)
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

/// Query execution configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QueryConfig {
    /// Evaluation deadline per `select` in milliseconds (0 = none)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Single-series fetches allowed per request
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,

    /// Slots allowed per `select`
    #[serde(default = "default_slot_limit")]
    pub slot_limit: usize,

    /// Backend calls allowed in flight across all requests
    #[serde(default = "default_concurrent_fetches")]
    pub concurrent_fetches: usize,
}

/// Metadata cache configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Entry lifetime in milliseconds
    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: i64,

    /// Capacity of the background refresh queue
    #[serde(default = "default_cache_request_limit")]
    pub request_limit: usize,
}

/// Ingestion configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IngestionConfig {
    /// Enable `POST /ingest`
    #[serde(default = "default_true")]
    pub http_ingestion_enabled: bool,

    /// Accept JSON bodies on `POST /ingest`
    #[serde(default = "default_true")]
    pub json_ingestion_enabled: bool,
}

// Default value functions
fn default_listen_addr() -> String { "0.0.0.0:9090".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_timeout_ms() -> u64 { 30_000 }
fn default_fetch_limit() -> usize { 2_000 }
fn default_slot_limit() -> usize { 5_000 }
fn default_concurrent_fetches() -> usize { 16 }
fn default_cache_ttl_ms() -> i64 { 300_000 }
fn default_cache_request_limit() -> usize { 500 }
fn default_true() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            log_level: default_log_level(),
            static_dir: None,
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            fetch_limit: default_fetch_limit(),
            slot_limit: default_slot_limit(),
            concurrent_fetches: default_concurrent_fetches(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_cache_ttl_ms(),
            request_limit: default_cache_request_limit(),
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            http_ingestion_enabled: true,
            json_ingestion_enabled: true,
        }
    }
}

impl QueryConfig {
    /// Deadline as a duration, `None` when disabled
    pub fn timeout(&self) -> Option<Duration> {
        match self.timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl From<&CacheConfig> for MetadataCacheConfig {
    fn from(config: &CacheConfig) -> Self {
        Self {
            ttl_ms: config.ttl_ms,
            request_limit: config.request_limit,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Some(value) = std::env::var(name).ok().and_then(|v| v.parse().ok()) {
        *target = value;
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;

        toml::from_str(&contents).map_err(|e| format!("Failed to parse config file {}: {}", path, e))
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self, String> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_env_overrides(&mut self) {
        // Server
        if let Ok(addr) = std::env::var("MQE_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Ok(dir) = std::env::var("MQE_STATIC_DIR") {
            self.server.static_dir = Some(dir);
        }
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.server.log_level = log_level;
        }

        // Query
        env_parse("MQE_TIMEOUT_MS", &mut self.query.timeout_ms);
        env_parse("MQE_FETCH_LIMIT", &mut self.query.fetch_limit);
        env_parse("MQE_SLOT_LIMIT", &mut self.query.slot_limit);
        env_parse("MQE_CONCURRENT_FETCHES", &mut self.query.concurrent_fetches);

        // Metadata cache
        env_parse("MQE_CACHE_TTL_MS", &mut self.metadata_cache.ttl_ms);
        env_parse("MQE_CACHE_REQUEST_LIMIT", &mut self.metadata_cache.request_limit);
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.server.listen_addr.trim().is_empty() {
            return Err("Listen address cannot be empty".to_string());
        }

        if self.query.fetch_limit == 0 {
            return Err("Fetch limit must be > 0".to_string());
        }
        // Two slots are reserved for snapping the endpoints
        if self.query.slot_limit < 3 {
            return Err("Slot limit must be at least 3".to_string());
        }
        if self.query.concurrent_fetches == 0 {
            return Err("Concurrent fetches must be > 0".to_string());
        }

        if self.metadata_cache.ttl_ms <= 0 {
            return Err("Metadata cache TTL must be > 0".to_string());
        }
        if self.metadata_cache.request_limit == 0 {
            return Err("Metadata cache request limit must be > 0".to_string());
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: &str) -> Result<(), String> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| format!("Failed to serialize config: {}", e))?;

        std::fs::write(path, contents).map_err(|e| format!("Failed to write config file {}: {}", path, e))
    }
}
