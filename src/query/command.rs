//! Executable commands
//!
//! The parser produces one of four [`Command`]s:
//!
//! | Command            | Query form                               | Body                         |
//! |--------------------|------------------------------------------|------------------------------|
//! | `select`           | `select expr, ... [where] from .. to ..` | one [`QueryResult`] per expr |
//! | `describe`         | `describe metric [where pred]`           | tag key → sorted values      |
//! | `describe all`     | `describe all [match 'regex']`           | sorted metric keys           |
//! | `describe metrics` | `describe metrics where tag = 'value'`   | metric keys carrying the tag |
//!
//! Every command runs inside a `"{name}.Execute"` profiler span and is
//! counted in the process metrics.

use super::ast::Expression;
use super::evaluate::evaluate_many;
use super::natural_sort;
use super::plan::negotiate_resolution;
use super::predicate::Predicate;
use crate::engine::traits::MetricMetadata;
use crate::error::{QueryError, Result};
use crate::fetch::{CancellationOwner, FetchCounter, ParallelFetcher};
use crate::function::{registry, EvaluationContext, EvaluationNotes, Registry, ScalarSet, Value};
use crate::metrics;
use crate::profile::Profiler;
use crate::types::{MetricKey, SampleMethod, Timerange, Timeseries};
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Map, Value as Json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Slot limit used when the execution context leaves it at zero
pub const DEFAULT_SLOT_LIMIT: usize = 1000;

// =============================================================================
// Execution Context
// =============================================================================

/// Everything a command needs from the server
#[derive(Clone)]
pub struct ExecutionContext {
    /// Ticketed access to the timeseries backend
    pub fetcher: Arc<ParallelFetcher>,
    /// Tag enumeration backend
    pub metadata: Arc<dyn MetricMetadata>,
    /// Maximum single-series fetches per `select`
    pub fetch_limit: usize,
    /// Maximum slots per `select` (0 means [`DEFAULT_SLOT_LIMIT`])
    pub slot_limit: usize,
    /// Evaluation deadline for `select`
    pub timeout: Option<Duration>,
    /// Function lookup
    pub registry: Arc<Registry>,
    /// Span collector for this request
    pub profiler: Arc<Profiler>,
    /// Applied on top of every `select` and `describe` predicate
    pub additional_constraints: Predicate,
}

impl ExecutionContext {
    /// Context with the built-in functions, no deadline and a disabled profiler
    pub fn new(fetcher: Arc<ParallelFetcher>, metadata: Arc<dyn MetricMetadata>, fetch_limit: usize) -> Self {
        Self {
            fetcher,
            metadata,
            fetch_limit,
            slot_limit: 0,
            timeout: None,
            registry: registry::standard(),
            profiler: Arc::new(Profiler::disabled()),
            additional_constraints: Predicate::True,
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// One evaluated `select` expression
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// Expression rendered back to query syntax
    pub query: String,
    /// Display name
    pub name: String,
    /// `"series"` or `"scalars"`
    #[serde(rename = "type")]
    pub kind: String,
    /// Result series, for `"series"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<Vec<Timeseries>>,
    /// Result scalars, for `"scalars"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scalars: Option<ScalarSet>,
    /// Evaluation window, for `"series"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timerange: Option<Timerange>,
}

/// Payload of a command result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandBody {
    /// `select`
    Results(Vec<QueryResult>),
    /// `describe`
    Tags(BTreeMap<String, Vec<String>>),
    /// `describe all` and `describe metrics`
    Metrics(Vec<MetricKey>),
}

/// Body plus metadata returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    /// Command output
    pub body: CommandBody,
    /// Side information (`description`, `notes`, `count`, `profile`)
    pub metadata: Map<String, Json>,
}

impl CommandResult {
    fn new(body: CommandBody) -> Self {
        Self {
            body,
            metadata: Map::new(),
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

/// Timerange and sampling of a `select`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectContext {
    /// Start in epoch milliseconds
    pub start: i64,
    /// End in epoch milliseconds
    pub end: i64,
    /// Requested resolution in milliseconds
    pub resolution: i64,
    /// How raw points fold into slots
    pub sample_method: SampleMethod,
}

/// `select expr, ... [where pred] from .. to ..`
#[derive(Debug, Clone)]
pub struct SelectCommand {
    /// Expressions in output order
    pub expressions: Vec<Expression>,
    /// `where` clause (`True` when absent)
    pub predicate: Predicate,
    /// Property clause
    pub context: SelectContext,
}

/// `describe metric [where pred]`
#[derive(Debug, Clone)]
pub struct DescribeCommand {
    /// Metric to enumerate
    pub metric: String,
    /// Tagset filter
    pub predicate: Predicate,
}

/// `describe all [match 'regex']`
#[derive(Debug, Clone)]
pub struct DescribeAllCommand {
    /// Metric name filter
    pub matcher: Option<Regex>,
}

/// `describe metrics where tag = 'value'`
#[derive(Debug, Clone)]
pub struct DescribeMetricsCommand {
    /// Tag key
    pub tag: String,
    /// Required tag value
    pub value: String,
}

/// A parsed command
#[derive(Debug, Clone)]
pub enum Command {
    /// Evaluate expressions
    Select(SelectCommand),
    /// Enumerate one metric's tags
    Describe(DescribeCommand),
    /// Enumerate metrics
    DescribeAll(DescribeAllCommand),
    /// Find metrics by tag
    DescribeMetrics(DescribeMetricsCommand),
}

impl Command {
    /// Name reported in responses and metrics
    pub fn name(&self) -> &'static str {
        match self {
            Command::Select(_) => "select",
            Command::Describe(_) => "describe",
            Command::DescribeAll(_) => "describe all",
            Command::DescribeMetrics(_) => "describe metrics",
        }
    }

    /// Run the command
    ///
    /// Finished profiler spans are attached to the metadata under
    /// `"profile"` when the profiler recorded any.
    pub async fn execute(&self, ctx: &ExecutionContext) -> Result<CommandResult> {
        let name = self.name();
        let started = Instant::now();
        debug!(command = name, "executing command");

        let result = {
            let _span = ctx.profiler.record(format!("{}.Execute", name));
            match self {
                Command::Select(cmd) => cmd.execute(ctx).await,
                Command::Describe(cmd) => cmd.execute(ctx).await,
                Command::DescribeAll(cmd) => cmd.execute(ctx).await,
                Command::DescribeMetrics(cmd) => cmd.execute(ctx).await,
            }
        };

        let elapsed = started.elapsed();
        metrics::record_query(name, elapsed.as_secs_f64(), result.is_ok());
        debug!(command = name, elapsed_ms = elapsed.as_millis() as u64, ok = result.is_ok(), "command finished");

        let mut result = result?;
        let profiles = ctx.profiler.all();
        if !profiles.is_empty() {
            result.metadata.insert("profile".to_string(), json!(profiles));
        }
        Ok(result)
    }
}

impl SelectCommand {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<CommandResult> {
        let user_range = Timerange::snapped(self.context.start, self.context.end, self.context.resolution)?;
        let slot_limit = match ctx.slot_limit {
            0 => DEFAULT_SLOT_LIMIT,
            limit => limit,
        };
        // A snap can add one slot at each end
        let smallest_resolution = user_range.duration() / slot_limit.saturating_sub(2).max(1) as i64;

        let resolution = negotiate_resolution(
            &**ctx.fetcher.storage(),
            &user_range,
            smallest_resolution,
            &self.expressions,
            &ctx.registry,
        )
        .await?;
        let timerange = Timerange::snapped(user_range.start(), user_range.end(), resolution)?;
        if timerange.slots() > slot_limit {
            return Err(QueryError::SlotLimitExceeded {
                slots: timerange.slots(),
                limit: slot_limit,
            });
        }

        // Dropping the owner cancels outstanding fetches on every exit path
        let owner = CancellationOwner::new();
        let eval = EvaluationContext {
            metadata: Arc::clone(&ctx.metadata),
            fetcher: Arc::clone(&ctx.fetcher),
            fetch_counter: Arc::new(FetchCounter::new(ctx.fetch_limit)),
            predicate: Arc::new(Predicate::all(vec![
                self.predicate.clone(),
                ctx.additional_constraints.clone(),
            ])),
            sample_method: self.context.sample_method,
            timerange,
            slot_limit,
            cancellation: owner.token(),
            registry: Arc::clone(&ctx.registry),
            profiler: Arc::clone(&ctx.profiler),
            notes: Arc::new(EvaluationNotes::new()),
        };

        let task = {
            let eval = eval.clone();
            let expressions = self.expressions.clone();
            tokio::spawn(async move { evaluate_many(&expressions, &eval).await })
        };
        let joined = match ctx.timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    owner.cancel();
                    warn!(timeout_ms = limit.as_millis() as u64, "select timed out");
                    return Err(QueryError::Timeout);
                },
            },
            None => task.await,
        };
        let values = joined.map_err(|e| QueryError::assertion(format!("evaluation task failed: {}", e)))??;

        let description = describe_values(&values, timerange);
        let mut body = Vec::with_capacity(values.len());
        for (expr, value) in self.expressions.iter().zip(values) {
            body.push(shape_result(expr, value, timerange)?);
        }

        let mut result = CommandResult::new(CommandBody::Results(body));
        result.metadata.insert("description".to_string(), json!(description));
        result.metadata.insert("notes".to_string(), json!(eval.notes.notes()));
        Ok(result)
    }
}

/// Per tag key, the naturally sorted distinct values present in `values`
fn describe_values(values: &[Value], timerange: Timerange) -> BTreeMap<String, Vec<String>> {
    let mut description: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for value in values {
        let Ok(list) = value.clone().into_series_list(timerange) else {
            continue;
        };
        for series in &list.series {
            for (key, tag) in series.tagset.iter() {
                description.entry(key.to_string()).or_default().push(tag.to_string());
            }
        }
    }
    for tags in description.values_mut() {
        natural_sort::sort(tags);
        tags.dedup();
    }
    description
}

fn shape_result(expr: &Expression, value: Value, timerange: Timerange) -> Result<QueryResult> {
    let query = expr.query_string();
    let name = expr.name();
    match value {
        Value::SeriesList(list) => Ok(QueryResult {
            query,
            name,
            kind: "series".to_string(),
            series: Some(list.series),
            scalars: None,
            timerange: Some(timerange),
        }),
        other => match other.into_scalar_set() {
            Ok(scalars) => Ok(QueryResult {
                query,
                name,
                kind: "scalars".to_string(),
                series: None,
                scalars: Some(scalars),
                timerange: None,
            }),
            Err(_) => Err(QueryError::invalid_argument(format!(
                "Query {} does not result in a timeseries or scalar.",
                query
            ))),
        },
    }
}

impl DescribeCommand {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<CommandResult> {
        let tagsets = {
            let _span = ctx.profiler.record("fetchAllTags");
            ctx.metadata.get_all_tags(&MetricKey::from(self.metric.as_str())).await?
        };

        let predicate = Predicate::all(vec![self.predicate.clone(), ctx.additional_constraints.clone()]);
        let mut sets: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for tagset in tagsets.iter().filter(|tagset| predicate.apply(tagset)) {
            for (key, value) in tagset.iter() {
                sets.entry(key.to_string()).or_default().insert(value.to_string());
            }
        }

        let tags = sets
            .into_iter()
            .map(|(key, values)| {
                let mut values: Vec<String> = values.into_iter().collect();
                natural_sort::sort(&mut values);
                (key, values)
            })
            .collect();
        Ok(CommandResult::new(CommandBody::Tags(tags)))
    }
}

impl DescribeAllCommand {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<CommandResult> {
        let mut metrics = ctx.metadata.get_all_metrics().await?;
        if let Some(matcher) = &self.matcher {
            metrics.retain(|metric| matcher.is_match(metric.as_str()));
        }
        metrics.sort();

        let count = metrics.len();
        let mut result = CommandResult::new(CommandBody::Metrics(metrics));
        result.metadata.insert("count".to_string(), json!(count));
        Ok(result)
    }
}

impl DescribeMetricsCommand {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<CommandResult> {
        let metrics = ctx.metadata.get_metrics_for_tag(&self.tag, &self.value).await?;
        let count = metrics.len();
        let mut result = CommandResult::new(CommandBody::Metrics(metrics));
        result.metadata.insert("count".to_string(), json!(count));
        Ok(result)
    }
}
