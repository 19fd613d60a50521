//! MQE HTTP Server
//!
//! This binary serves the metrics query engine over HTTP.
//!
//! # Endpoints
//!
//! ## Query
//! - `POST /query` - Execute a query (JSON body or form fields; `GET` with a
//!   query string is accepted too)
//! - `GET /token` - Function and metric names for autocomplete
//!
//! ## Ingestion
//! - `POST /ingest` - Record tagged metrics in the metadata store (when
//!   enabled and the store supports updates)
//!
//! ## Admin
//! - `GET /health` - Health check
//! - `GET /metrics` - Prometheus metrics
//!
//! ## UI (when `static_dir` is configured)
//! - `GET /ui`, `GET /embed` - `index.html` and `embed.html`
//! - `GET /static/*` - Files under the static directory
//!
//! # CLI Commands
//!
//! - `start` - Start the HTTP server (default if no command specified)
//! - `check-config` - Validate configuration file
//!
//! # Configuration
//!
//! The server reads configuration from:
//! 1. `--config` on the command line
//! 2. `MQE_CONFIG` environment variable (path to TOML file)
//! 3. `./mqe.toml` in current directory
//! 4. Default configuration
//!
//! `MQE_*` environment variables override file values.

mod config;
mod handlers;
mod types;

use clap::{Parser, Subcommand};

use axum::{
    http::{HeaderValue, Method},
    response::Redirect,
    routing::{get, post},
    Router,
};
use handlers::AppState;
use mqe::{
    cache::{MetadataCache, MetadataCacheConfig},
    config::Config,
    engine::{MemoryMetadata, MemoryStorage, MetricMetadata},
    fetch::ParallelFetcher,
    function::registry,
};
use std::{net::SocketAddr, path::Path, sync::Arc};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
};
use tracing::{debug, info, warn};

// =============================================================================
// Router and Server Setup
// =============================================================================

/// Build CORS layer from configuration
fn build_cors_layer(cors_origins: &[String]) -> CorsLayer {
    if cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
    }
}

/// Routes for the bundled UI
fn static_routes(dir: &str) -> Router<Arc<AppState>> {
    let dir = Path::new(dir);
    Router::new()
        .route("/", get(|| async { Redirect::temporary("/ui") }))
        .route_service("/ui", ServeFile::new(dir.join("index.html")))
        .route_service("/embed", ServeFile::new(dir.join("embed.html")))
        .nest_service("/static", ServeDir::new(dir))
}

/// Build the application router
fn build_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        // Health and metrics
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        // Query API
        .route("/query", get(handlers::query).post(handlers::query))
        .route("/token", get(handlers::token));

    if state.ingestion_enabled() {
        router = router.route("/ingest", post(handlers::ingest));
    }
    if let Some(dir) = &state.config.server.static_dir {
        router = router.merge(static_routes(dir));
    }

    router
        .with_state(state.clone())
        .layer(build_cors_layer(&state.config.server.cors_allowed_origins))
}

/// Graceful shutdown signal handler
///
/// Signal registration failures are logged and that signal is then never
/// delivered; the server must be killed forcefully.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {},
            Err(e) => {
                warn!(
                    error = %e,
                    "Ctrl+C handler installation failed - graceful shutdown unavailable"
                );
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                warn!(
                    error = %e,
                    "SIGTERM handler installation failed - SIGTERM shutdown unavailable"
                );
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

/// Wire the backends into the shared state
///
/// Series data and metadata live in memory; metadata reads go through the
/// TTL cache. Must run inside the runtime (the cache spawns its refresh
/// worker).
fn init_state(config: Config) -> Result<Arc<AppState>, String> {
    let storage = Arc::new(MemoryStorage::new());
    let backend: Arc<dyn MetricMetadata> = Arc::new(MemoryMetadata::new());

    let ingestion = &config.ingestion;
    if ingestion.http_ingestion_enabled && ingestion.json_ingestion_enabled && !backend.can_add_metrics() {
        return Err("HTTP ingestion is on, but the metadata store does not support updates".to_string());
    }

    let metadata = Arc::new(MetadataCache::spawn(
        backend,
        MetadataCacheConfig::from(&config.metadata_cache),
    ));
    let fetcher = Arc::new(ParallelFetcher::new(storage, config.query.concurrent_fetches));

    Ok(Arc::new(AppState {
        fetcher,
        metadata,
        registry: registry::standard(),
        config,
    }))
}

// =============================================================================
// CLI Definition
// =============================================================================

/// MQE - metrics query engine
#[derive(Parser)]
#[command(name = "mqe-server")]
#[command(version)]
#[command(about = "Query engine for tagged time series", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file (overrides MQE_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Override listen address (e.g., 0.0.0.0:8080)
    #[arg(short, long, global = true)]
    listen: Option<String>,

    /// Override the static file directory
    #[arg(short, long, global = true)]
    static_dir: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Start,

    /// Validate configuration file without starting the server
    CheckConfig,
}

/// Configuration with command-line overrides applied
fn resolve_config(cli: &Cli) -> Result<Config, String> {
    let mut config = config::load_config(cli.config.as_deref())?;
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen.clone();
    }
    if let Some(dir) = &cli.static_dir {
        config.server.static_dir = Some(dir.clone());
    }
    config.validate()?;
    Ok(config)
}

// =============================================================================
// CLI Command Handlers
// =============================================================================

/// Validate configuration and print summary
fn cmd_check_config(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(cli)?;

    println!("Configuration is valid!");
    println!();
    println!("Server Settings:");
    println!("  Listen address: {}", config.server.listen_addr);
    println!("  Static directory: {:?}", config.server.static_dir);
    println!("  Log level: {}", config.server.log_level);
    println!();
    println!("Query Limits:");
    println!("  Timeout: {} ms", config.query.timeout_ms);
    println!("  Fetch limit: {}", config.query.fetch_limit);
    println!("  Slot limit: {}", config.query.slot_limit);
    println!("  Concurrent fetches: {}", config.query.concurrent_fetches);
    println!();
    println!("Metadata Cache:");
    println!("  TTL: {} ms", config.metadata_cache.ttl_ms);
    println!("  Refresh queue: {}", config.metadata_cache.request_limit);
    println!();
    println!("Ingestion:");
    println!("  HTTP: {}", config.ingestion.http_ingestion_enabled);
    println!("  JSON: {}", config.ingestion.json_ingestion_enabled);

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::CheckConfig) => return cmd_check_config(&cli),
        Some(Commands::Start) | None => {},
    }

    let config = resolve_config(&cli)?;

    // RUST_LOG wins over the configured level
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!("Starting MQE Server v{}", env!("CARGO_PKG_VERSION"));
    debug!(
        listen_addr = %config.server.listen_addr,
        timeout_ms = config.query.timeout_ms,
        fetch_limit = config.query.fetch_limit,
        slot_limit = config.query.slot_limit,
        "Configuration loaded"
    );

    mqe::metrics::init();

    let addr: SocketAddr = config.server.listen_addr.parse()?;
    let state = init_state(config)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    mqe::metrics::HEALTH_STATUS.set(0.0);
    info!("Server shutdown complete");
    Ok(())
}
