//! HTTP Handlers for the MQE Server
//!
//! This module contains all HTTP endpoint handlers for the REST API.
//!
//! # Query Flow
//!
//! ```text
//! request ──► decode form ──► parse ──► attach `where` ──► execute ──► JSON
//!  (JSON body or form)       (profiled)  (extra predicate)  (profiled)
//! ```
//!
//! Every failure is answered with `{success: false, message}` and the
//! error's HTTP status.

use super::types::*;
use axum::{
    body::Bytes,
    extract::{FromRequest, Request, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use mqe::config::Config;
use mqe::engine::MetricMetadata;
use mqe::fetch::ParallelFetcher;
use mqe::function::Registry;
use mqe::profile::Profiler;
use mqe::query::parser::parse;
use mqe::{CommandResult, ExecutionContext, QueryError};
use std::sync::Arc;
use tracing::{debug, info, warn};

// =============================================================================
// Application State
// =============================================================================

/// Shared application state: backends, function registry and configuration
pub struct AppState {
    /// Ticketed access to the timeseries backend
    pub fetcher: Arc<ParallelFetcher>,
    /// Metadata backend (normally wrapped in the metadata cache)
    pub metadata: Arc<dyn MetricMetadata>,
    /// Function lookup
    pub registry: Arc<Registry>,
    /// Server configuration
    pub config: Config,
}

impl AppState {
    /// Execution context for one request
    pub fn context(&self, profiler: Arc<Profiler>) -> ExecutionContext {
        ExecutionContext {
            fetcher: Arc::clone(&self.fetcher),
            metadata: Arc::clone(&self.metadata),
            fetch_limit: self.config.query.fetch_limit,
            slot_limit: self.config.query.slot_limit,
            timeout: self.config.query.timeout(),
            registry: Arc::clone(&self.registry),
            profiler,
            additional_constraints: Default::default(),
        }
    }

    /// Whether `POST /ingest` is served
    pub fn ingestion_enabled(&self) -> bool {
        let ingestion = &self.config.ingestion;
        ingestion.http_ingestion_enabled && ingestion.json_ingestion_enabled
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim_start().starts_with("application/json"))
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(QueryResponse::error(message))).into_response()
}

fn query_error_response(error: &QueryError) -> Response {
    let status = StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::BAD_REQUEST);
    error_response(status, error.to_string())
}

// =============================================================================
// Health & Metrics Handlers
// =============================================================================

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Prometheus metrics endpoint
pub async fn metrics() -> Response {
    match mqe::metrics::gather_metrics() {
        Ok(text) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to gather metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e).into_response()
        },
    }
}

// =============================================================================
// Query Handler
// =============================================================================

/// Decode the query form from a JSON body, or from form fields otherwise
async fn decode_query_form(request: Request) -> Result<QueryForm, Response> {
    if is_json(request.headers()) {
        return Json::<QueryForm>::from_request(request, &())
            .await
            .map(|Json(form)| form)
            .map_err(|rejection| error_response(StatusCode::BAD_REQUEST, rejection.body_text()));
    }
    let Form(raw) = Form::<RawQueryForm>::from_request(request, &())
        .await
        .map_err(|rejection| error_response(StatusCode::BAD_REQUEST, rejection.body_text()))?;
    QueryForm::try_from(raw).map_err(|e| query_error_response(&e))
}

/// Parse and execute one query
async fn process(
    state: &AppState,
    profiler: &Arc<Profiler>,
    form: &QueryForm,
) -> Result<(&'static str, CommandResult), QueryError> {
    let command = profiler.run("Parsing Query", || parse(&form.query))?;

    let mut context = state.context(Arc::clone(profiler));
    if let Some(constraint) = &form.constraint {
        context.additional_constraints = constraint.to_predicate()?;
    }

    let result = {
        let _span = profiler.record("Total Execution");
        command.execute(&context).await?
    };
    Ok((command.name(), result))
}

/// Execute a query
///
/// Accepts `query`, `profile`, `include_raw` and `where` either as a JSON
/// body (`Content-Type: application/json`) or as form fields.
pub async fn query(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let form = match decode_query_form(request).await {
        Ok(form) => form,
        Err(response) => return response,
    };
    info!(
        query = %form.query,
        profile = form.profile,
        include_raw = form.include_raw,
        constrained = form.constraint.is_some(),
        "Received query"
    );

    let profiler = Arc::new(if form.profile {
        Profiler::new()
    } else {
        Profiler::disabled()
    });

    let (name, mut result) = match process(&state, &profiler, &form).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(query = %form.query, error = %e, "Query failed");
            return query_error_response(&e);
        },
    };

    // Spans are reported once, at the top level
    result.metadata.remove("profile");
    let mut response = match QueryResponse::success(name, result) {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "Failed to encode query result");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode the result message.");
        },
    };
    if form.profile {
        response.profile = Some(profiler.all());
    }
    (StatusCode::OK, Json(response)).into_response()
}

// =============================================================================
// Token & Ingest Handlers
// =============================================================================

/// Function and metric names for autocomplete
pub async fn token(State(state): State<Arc<AppState>>) -> Response {
    match state.metadata.get_all_metrics().await {
        Ok(mut metrics) => {
            metrics.sort();
            Json(TokenResponse {
                functions: state.registry.all(),
                metrics,
            })
            .into_response()
        },
        Err(e) => {
            warn!(error = %e, "Failed to list metrics for autocomplete");
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        },
    }
}

/// Record tagged metrics in the metadata store
///
/// Body: `[{"name": "...", "tags": {"key": "value"}}, ...]`
pub async fn ingest(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    if !is_json(&headers) {
        return error_response(
            StatusCode::BAD_REQUEST,
            "index endpoint expects Content-Type: application/json",
        );
    }
    let metrics: IngestRequest = match serde_json::from_slice(&body) {
        Ok(metrics) => metrics,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let count = metrics.len();
    match state.metadata.add_metrics(metrics).await {
        Ok(()) => {
            debug!(metrics = count, "Ingested metrics");
            Json(SimpleResponse {
                success: true,
                message: None,
            })
            .into_response()
        },
        Err(e) => {
            warn!(error = %e, "Ingestion failed");
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        },
    }
}
