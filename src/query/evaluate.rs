//! Expression tree interpreter
//!
//! Leaves resolve directly (literals) or through the fetch pipeline
//! (metric references):
//!
//! ```text
//!   metric[pred]
//!        │ get_all_tags
//!        ▼
//!   tagsets ──▶ filter by pred ∧ ctx.predicate ──▶ reserve quota ──▶ fetch_many
//! ```
//!
//! Calls look the function up in the registry and run it; functions decide
//! themselves how (and in which context) to evaluate their arguments.

use super::ast::Expression;
use super::predicate::Predicate;
use crate::error::{QueryError, Result};
use crate::fetch::FetchRequest;
use crate::function::{EvaluationContext, Groups, Value};
use crate::types::{MetricKey, SeriesList, TaggedMetric};
use futures::future::try_join_all;
use tracing::debug;

/// Evaluate one expression in `ctx`
pub async fn evaluate(expr: &Expression, ctx: &EvaluationContext) -> Result<Value> {
    match expr {
        Expression::Scalar(value) => Ok(Value::Scalar(*value)),
        Expression::Duration { literal, millis } => Ok(Value::Duration {
            literal: literal.clone(),
            millis: *millis,
        }),
        Expression::String(text) => Ok(Value::String(text.clone())),
        Expression::Annotation { expr, .. } => expr.evaluate(ctx).await,
        Expression::Metric { name, predicate } => {
            let list = fetch_metric(name, predicate, ctx).await?;
            Ok(Value::SeriesList(SeriesList {
                name: expr.name(),
                query: expr.query_string(),
                ..list
            }))
        },
        Expression::Function { name, args, groups } => evaluate_call(expr, name, args, groups, ctx).await,
    }
}

/// Evaluate several top-level expressions concurrently
pub async fn evaluate_many(exprs: &[Expression], ctx: &EvaluationContext) -> Result<Vec<Value>> {
    try_join_all(exprs.iter().map(|expr| expr.evaluate(ctx))).await
}

fn expr_name(expr: &Expression, list: &SeriesList) -> String {
    if list.name.is_empty() {
        expr.name()
    } else {
        list.name.clone()
    }
}

async fn fetch_metric(name: &str, predicate: &Predicate, ctx: &EvaluationContext) -> Result<SeriesList> {
    ctx.check_slots(&ctx.timerange)?;
    let metric = MetricKey::from(name);
    let tagsets = {
        let _span = ctx.profiler.record("fetchAllTags");
        ctx.metadata.get_all_tags(&metric).await?
    };

    let filter = Predicate::all(vec![predicate.clone(), (*ctx.predicate).clone()]);
    let matched: Vec<_> = tagsets.into_iter().filter(|tagset| filter.apply(tagset)).collect();
    ctx.fetch_counter.consume(matched.len())?;
    debug!(metric = %metric, series = matched.len(), range = %ctx.timerange, "fetching metric");

    let requests: Vec<FetchRequest> = matched
        .into_iter()
        .map(|tagset| FetchRequest {
            metric: TaggedMetric::new(metric.clone(), tagset),
            sample_method: ctx.sample_method,
            timerange: ctx.timerange,
        })
        .collect();

    let series = {
        let _span = ctx.profiler.record("fetchMultipleSeries");
        ctx.fetcher.fetch_many(requests, &ctx.cancellation).await?
    };
    Ok(SeriesList::new(series, ctx.timerange))
}

async fn evaluate_call(
    expr: &Expression,
    name: &str,
    args: &[Expression],
    groups: &Groups,
    ctx: &EvaluationContext,
) -> Result<Value> {
    let function = ctx.registry.get(name).ok_or_else(|| QueryError::NotFound {
        name: name.to_string(),
    })?;
    let value = function.run(ctx, args, groups).await?;

    match value {
        Value::SeriesList(mut list) => {
            let slots = ctx.timerange.slots();
            if let Some(bad) = list.series.iter().find(|s| s.values.len() != slots) {
                return Err(QueryError::assertion(format!(
                    "{} produced a series of length {} (tags {}) over a range of {} slots",
                    name,
                    bad.values.len(),
                    bad.tagset,
                    slots
                )));
            }
            list.timerange = ctx.timerange;
            list.query = expr.query_string();
            list.name = expr_name(expr, &list);
            Ok(Value::SeriesList(list))
        },
        other => Ok(other),
    }
}
