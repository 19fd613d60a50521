//! NaN-aware aggregators and `aggregate_by`
//!
//! Aggregators fold one column of values into a scalar. Missing samples
//! (NaN) are skipped; an empty column yields NaN for every aggregator except
//! `count` and `total`, which always return a number.

use super::{EvaluationContext, Groups, MetricFunction, Value};
use crate::error::Result;
use crate::types::{SeriesList, TagSet, Timeseries};

/// Column aggregator
pub type Aggregator = fn(&[f64]) -> f64;

fn finite_values(values: &[f64]) -> impl Iterator<Item = f64> + '_ {
    values.iter().copied().filter(|v| !v.is_nan())
}

/// Sum of the non-NaN values; NaN when there are none
pub fn sum(values: &[f64]) -> f64 {
    let mut present = false;
    let total = finite_values(values).fold(0.0, |acc, v| {
        present = true;
        acc + v
    });
    if present {
        total
    } else {
        f64::NAN
    }
}

/// Arithmetic mean of the non-NaN values
pub fn mean(values: &[f64]) -> f64 {
    let (total, count) = finite_values(values).fold((0.0, 0usize), |(t, c), v| (t + v, c + 1));
    if count == 0 {
        f64::NAN
    } else {
        total / count as f64
    }
}

/// Smallest non-NaN value
pub fn min(values: &[f64]) -> f64 {
    finite_values(values).fold(f64::NAN, |acc, v| if acc.is_nan() { v } else { acc.min(v) })
}

/// Largest non-NaN value
pub fn max(values: &[f64]) -> f64 {
    finite_values(values).fold(f64::NAN, |acc, v| if acc.is_nan() { v } else { acc.max(v) })
}

/// Number of non-NaN values
pub fn count(values: &[f64]) -> f64 {
    finite_values(values).count() as f64
}

/// Number of values, missing or not
pub fn total(values: &[f64]) -> f64 {
    values.len() as f64
}

/// Group the series of `list` by projected tagset and aggregate each group
/// slot by slot
///
/// With `collapses == false` each tagset keeps only `tags`; otherwise the
/// listed tags are removed. Groups appear in order of first member.
pub fn aggregate_by(list: &SeriesList, aggregator: Aggregator, tags: &[String], collapses: bool) -> SeriesList {
    let mut groups: Vec<(TagSet, Vec<&Timeseries>)> = Vec::new();
    for series in &list.series {
        let projected = series.tagset.project(tags, collapses);
        match groups.iter_mut().find(|(tagset, _)| *tagset == projected) {
            Some((_, members)) => members.push(series),
            None => groups.push((projected, vec![series])),
        }
    }

    let slots = list.timerange.slots();
    let mut column = Vec::new();
    let series = groups
        .into_iter()
        .map(|(tagset, members)| {
            let values = (0..slots)
                .map(|slot| {
                    column.clear();
                    column.extend(members.iter().map(|s| s.values[slot]));
                    aggregator(&column)
                })
                .collect();
            Timeseries::new(values, tagset)
        })
        .collect();

    SeriesList {
        series,
        timerange: list.timerange,
        name: list.name.clone(),
        query: list.query.clone(),
    }
}

fn aggregate_function(name: &str, aggregator: Aggregator) -> MetricFunction {
    MetricFunction::eager(name, 1, Some(1), move |_ctx: &EvaluationContext, args, groups: &Groups| {
        let list = args.series_list(0)?;
        Ok(Value::SeriesList(aggregate_by(
            &list,
            aggregator,
            &groups.list,
            groups.collapses,
        )))
    })
    .with_group_by()
}

/// `aggregate.*` functions
pub fn functions() -> Vec<MetricFunction> {
    vec![
        aggregate_function("aggregate.max", max),
        aggregate_function("aggregate.min", min),
        aggregate_function("aggregate.mean", mean),
        aggregate_function("aggregate.sum", sum),
        aggregate_function("aggregate.total", total),
        aggregate_function("aggregate.count", count),
    ]
}

/// Series fixture shared by the aggregate and filter tests
#[cfg(test)]
pub(crate) mod fixtures {
    use crate::types::{SeriesList, TagSet, Timerange, Timeseries};

    pub fn series(values: &[f64], tags: &[(&str, &str)]) -> Timeseries {
        Timeseries::new(values.to_vec(), TagSet::from_pairs(tags))
    }

    /// Five hosts across two environments and two datacenters
    pub fn environment_list() -> SeriesList {
        let nan = f64::NAN;
        SeriesList::new(
            vec![
                series(&[0.0, 1.0, 2.0], &[("env", "staging"), ("dc", "A"), ("host", "q")]),
                series(&[4.0, 4.0, 4.0], &[("env", "staging"), ("dc", "B"), ("host", "r")]),
                series(&[-1.0, -1.0, 2.0], &[("env", "production"), ("dc", "A"), ("host", "s")]),
                series(&[0.0, 2.0, 0.0], &[("env", "production"), ("dc", "A"), ("host", "t")]),
                series(&[2.0, nan, 0.0], &[("env", "production"), ("dc", "B"), ("host", "u")]),
            ],
            Timerange::new(0, 200, 100).unwrap(),
        )
    }
}
