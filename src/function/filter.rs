//! Ranking and threshold filters
//!
//! Series are ranked by a summary (mean, max or min) of their most recent
//! slots. Missing summaries (NaN) always sort last, and ties keep the input
//! order.

use super::aggregate::{self, Aggregator};
use super::{Arguments, MetricFunction, Value};
use crate::error::{QueryError, Result};
use crate::types::{SeriesList, Timeseries};
use std::cmp::Ordering;

fn recent_summary(values: &[f64], summary: Aggregator, slots: usize) -> f64 {
    let slots = slots.max(1);
    if slots < values.len() {
        summary(&values[values.len() - slots..])
    } else {
        summary(values)
    }
}

/// Sort series by their recent summary, ascending or descending, NaN last
fn sort_series(list: &SeriesList, summary: Aggregator, ascending: bool, slots: usize) -> Vec<(f64, &Timeseries)> {
    let mut ranked: Vec<(f64, &Timeseries)> = list
        .series
        .iter()
        .map(|s| (recent_summary(&s.values, summary, slots), s))
        .collect();
    ranked.sort_by(|(a, _), (b, _)| match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) if ascending => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        (false, false) => b.partial_cmp(a).unwrap_or(Ordering::Equal),
    });
    ranked
}

/// Keep the `count` series with the lowest (or highest) recent summary
pub fn by_recent(list: &SeriesList, count: usize, summary: Aggregator, lowest: bool, slots: usize) -> SeriesList {
    let series = sort_series(list, summary, lowest, slots)
        .into_iter()
        .take(count)
        .map(|(_, s)| s.clone())
        .collect();
    SeriesList::new(series, list.timerange)
}

/// Keep the series whose recent summary is at most (`below`) or at least
/// the threshold; missing summaries never pass
pub fn threshold_by_recent(list: &SeriesList, threshold: f64, summary: Aggregator, below: bool, slots: usize) -> SeriesList {
    let series = sort_series(list, summary, below, slots)
        .into_iter()
        .take_while(|(value, _)| if below { *value <= threshold } else { *value >= threshold })
        .map(|(_, s)| s.clone())
        .collect();
    SeriesList::new(series, list.timerange)
}

/// Number of trailing slots covered by `duration`, defaulting to the whole
/// window
fn recent_slots(args: &Arguments<'_>, duration: Option<i64>) -> Result<usize> {
    let range = args.timerange();
    let duration = duration.unwrap_or_else(|| range.duration());
    if duration < 0 {
        return Err(QueryError::invalid_argument(format!(
            "expected positive recent duration but got {}ms",
            duration
        )));
    }
    Ok(1 + (duration / range.resolution()) as usize)
}

fn count_filter(name: String, summary: Aggregator, lowest: bool, duration_required: bool) -> MetricFunction {
    let min_arguments = if duration_required { 3 } else { 2 };
    MetricFunction::eager(name, min_arguments, Some(3), move |_ctx, args, _groups| {
        let count = (args.scalar(1)? + 0.5).floor() as i64;
        if count < 0 {
            return Err(QueryError::invalid_argument(format!(
                "expected positive count but got {}",
                count
            )));
        }
        let slots = recent_slots(args, args.optional_duration(2)?)?;
        let list = args.series_list(0)?;
        Ok(Value::SeriesList(by_recent(&list, count as usize, summary, lowest, slots)))
    })
}

fn threshold_filter(name: &str, summary: Aggregator, below: bool) -> MetricFunction {
    MetricFunction::eager(name, 2, Some(3), move |_ctx, args, _groups| {
        let threshold = args.scalar(1)?;
        let slots = recent_slots(args, args.optional_duration(2)?)?;
        let list = args.series_list(0)?;
        Ok(Value::SeriesList(threshold_by_recent(&list, threshold, summary, below, slots)))
    })
}

/// `filter.*` functions
pub fn functions() -> Vec<MetricFunction> {
    let summaries: [(&str, Aggregator); 3] = [
        ("mean", aggregate::mean),
        ("max", aggregate::max),
        ("min", aggregate::min),
    ];
    let mut functions = Vec::new();
    for (label, summary) in summaries {
        for (direction, lowest) in [("highest", false), ("lowest", true)] {
            functions.push(count_filter(format!("filter.{}_{}", direction, label), summary, lowest, false));
            functions.push(count_filter(
                format!("filter.recent_{}_{}", direction, label),
                summary,
                lowest,
                true,
            ));
        }
        functions.push(threshold_filter(&format!("filter.{}_above", label), summary, false));
        functions.push(threshold_filter(&format!("filter.{}_below", label), summary, true));
    }
    functions
}
