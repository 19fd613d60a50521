//! Series transforms
//!
//! Slot-wise transforms map each series of a list to a new series of the
//! same length and tagset. Windowed transforms (`moving_average`,
//! `exponential_moving_average`, `derivative`, `rate`) need samples from
//! before the caller's window: they evaluate their input over an extended
//! range and trim the extra leading slots from the result. `timeshift`
//! evaluates its input over a shifted range.

use super::{
    evaluate_to_duration, evaluate_to_series_list, literal_duration, Arguments, EvaluationContext,
    EvaluationNotes, FunctionBody, Groups, MetricFunction, Value,
};
use crate::error::{QueryError, Result};
use crate::query::ast::Expression;
use crate::types::{SeriesList, TagSet, Timerange, Timeseries};
use async_trait::async_trait;

// =============================================================================
// Slot-wise Primitives
// =============================================================================

/// Running sum of the non-NaN values after the first slot, scaled by the
/// resolution in seconds
///
/// Values are read as "per second" rates; the result estimates the total
/// accumulated since the first slot.
pub fn integral(values: &[f64], resolution_seconds: f64) -> Vec<f64> {
    cumulative(values)
        .into_iter()
        .map(|v| v * resolution_seconds)
        .collect()
}

/// Running sum of the non-NaN values after the first slot
pub fn cumulative(values: &[f64]) -> Vec<f64> {
    let mut sum = 0.0;
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            if i > 0 && !v.is_nan() {
                sum += v;
            }
            sum
        })
        .collect()
}

/// Replace missing values with `default`
pub fn nan_fill(values: &[f64], default: f64) -> Vec<f64> {
    values
        .iter()
        .map(|v| if v.is_nan() { default } else { *v })
        .collect()
}

/// Replace missing values with the most recent present one
///
/// Leading missing values stay missing.
pub fn nan_keep_last(values: &[f64]) -> Vec<f64> {
    let mut last = f64::NAN;
    values
        .iter()
        .map(|v| {
            if !v.is_nan() {
                last = *v;
            }
            last
        })
        .collect()
}

/// Clamp every value into `[lower, upper]`
pub fn bound(values: &[f64], lower: f64, upper: f64) -> Result<Vec<f64>> {
    if lower > upper {
        return Err(QueryError::InvalidBound { lower, upper });
    }
    Ok(values.iter().map(|v| clamp_below(clamp_above(*v, lower), upper)).collect())
}

fn clamp_above(value: f64, lower: f64) -> f64 {
    if value < lower {
        lower
    } else {
        value
    }
}

fn clamp_below(value: f64, upper: f64) -> f64 {
    if value > upper {
        upper
    } else {
        value
    }
}

/// Raise values below `lower` to `lower`
pub fn lower_bound(values: &[f64], lower: f64) -> Vec<f64> {
    values.iter().map(|v| clamp_above(*v, lower)).collect()
}

/// Lower values above `upper` to `upper`
pub fn upper_bound(values: &[f64], upper: f64) -> Vec<f64> {
    values.iter().map(|v| clamp_below(*v, upper)).collect()
}

/// Mean of the non-NaN values among the `window` samples ending at each slot
///
/// The input carries `window - 1` leading samples; the output is that much
/// shorter.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut result = Vec::with_capacity(values.len().saturating_sub(window - 1));
    let mut sum = 0.0;
    let mut count = 0usize;
    for i in 0..values.len() {
        if !values[i].is_nan() {
            sum += values[i];
            count += 1;
        }
        if i >= window && !values[i - window].is_nan() {
            sum -= values[i - window];
            count -= 1;
        }
        if i + 1 >= window {
            result.push(if count == 0 { f64::NAN } else { sum / count as f64 });
        }
    }
    result
}

/// Exponentially weighted mean where a sample loses half its weight every
/// `half_life_slots` slots
///
/// Missing samples decay the accumulated weight without adding a value.
/// The first `skip` outputs are dropped.
pub fn exponential_moving_average(values: &[f64], half_life_slots: f64, skip: usize) -> Vec<f64> {
    let decay = (0.5f64.ln() / half_life_slots).exp();
    let mut weight = 0.0;
    let mut sum = 0.0;
    let mut result = Vec::with_capacity(values.len().saturating_sub(skip));
    for (i, v) in values.iter().enumerate() {
        weight *= decay;
        sum *= decay;
        if !v.is_nan() {
            weight += 1.0;
            sum += v;
        }
        if i >= skip {
            result.push(sum / weight);
        }
    }
    result
}

/// Per-second change between consecutive slots
///
/// The input carries one leading sample; the output is one shorter.
pub fn derivative(values: &[f64], resolution_seconds: f64) -> Vec<f64> {
    values
        .windows(2)
        .map(|pair| (pair[1] - pair[0]) / resolution_seconds)
        .collect()
}

/// Per-second change of a monotonic counter
///
/// Negative changes are clamped to zero. A drop that is followed by growth
/// is read as a counter reset: the post-reset value is used as the change
/// and a note is recorded.
pub fn rate(values: &[f64], resolution_seconds: f64, tagset: &TagSet, notes: &EvaluationNotes) -> Vec<f64> {
    let mut result = Vec::with_capacity(values.len().saturating_sub(1));
    for i in 1..values.len() {
        let mut change = ((values[i] - values[i - 1]) / resolution_seconds).max(0.0);
        if i + 1 < values.len() && values[i - 1] > values[i] && values[i] <= values[i + 1] {
            notes.add_note(format!(
                "Rate({}): The underlying counter reset between {:.6}, {:.6}",
                tagset,
                values[i - 1],
                values[i]
            ));
            change = values[i].max(0.0) / resolution_seconds;
        }
        result.push(change);
    }
    result
}

/// Apply `f` to every series, keeping tagsets and the timerange
pub fn map_series<F>(list: SeriesList, mut f: F) -> Result<SeriesList>
where
    F: FnMut(&Timeseries) -> Result<Vec<f64>>,
{
    let series = list
        .series
        .iter()
        .map(|s| Ok(Timeseries::new(f(s)?, s.tagset.clone())))
        .collect::<Result<Vec<_>>>()?;
    Ok(SeriesList {
        series,
        timerange: list.timerange,
        name: list.name,
        query: list.query,
    })
}

fn resolution_seconds(range: &Timerange) -> f64 {
    range.resolution() as f64 / 1000.0
}

// =============================================================================
// Eager Transforms
// =============================================================================

fn simple(name: &str, extra: usize, f: fn(&[f64], &mut Arguments<'_>) -> Result<Vec<f64>>) -> MetricFunction {
    MetricFunction::eager(name, 1 + extra, Some(1 + extra), move |_ctx, args, _groups| {
        let list = args.series_list(0)?;
        let list = map_series(list, |s| f(&s.values, args))?;
        Ok(Value::SeriesList(list))
    })
}

fn alias() -> MetricFunction {
    MetricFunction::eager("transform.alias", 2, Some(2), |ctx: &EvaluationContext, args, _groups: &Groups| {
        ctx.notes.add_note("transform.alias is deprecated");
        let mut list = args.series_list(0)?;
        list.name = args.text(1)?;
        Ok(Value::SeriesList(list))
    })
}

// =============================================================================
// Windowed Transforms
// =============================================================================

fn window_slots(window: i64, resolution: i64) -> usize {
    ((window as f64 / resolution as f64 + 0.5) as i64).max(1) as usize
}

pub(crate) fn check_length(list: &SeriesList, expected: usize, name: &str) -> Result<()> {
    match list.series.iter().find(|s| s.values.len() != expected) {
        Some(s) => Err(QueryError::assertion(format!(
            "{} expected {} values but received {}",
            name,
            expected,
            s.values.len()
        ))),
        None => Ok(()),
    }
}

/// `transform.timeshift(expr, duration)`
///
/// Evaluates `expr` over the caller's window moved by `duration`; a
/// negative duration shows past data at the current slots.
struct Timeshift;

#[async_trait]
impl FunctionBody for Timeshift {
    async fn compute(&self, ctx: &EvaluationContext, args: &[Expression], _groups: &Groups) -> Result<Value> {
        let shift = evaluate_to_duration(&args[1], ctx).await?;
        let shifted = ctx.with_timerange(ctx.timerange.shift(shift)?)?;
        let mut value = args[0].evaluate(&shifted).await?;
        if let Value::SeriesList(list) = &mut value {
            list.timerange = ctx.timerange;
        }
        Ok(value)
    }

    fn first_argument_range(&self, args: &[Expression], range: Timerange) -> Timerange {
        match literal_duration(args, 1) {
            Some(shift) => range.shift(shift).unwrap_or(range),
            None => range,
        }
    }
}

#[derive(Clone, Copy)]
enum Smoother {
    Moving,
    Exponential,
}

/// `transform.moving_average` and `transform.exponential_moving_average`
struct Smooth {
    name: &'static str,
    kind: Smoother,
}

#[async_trait]
impl FunctionBody for Smooth {
    async fn compute(&self, ctx: &EvaluationContext, args: &[Expression], _groups: &Groups) -> Result<Value> {
        let window = evaluate_to_duration(&args[1], ctx).await?;
        if window <= 0 {
            return Err(QueryError::invalid_argument(format!(
                "{} expects a positive window but got {}",
                self.name,
                args[1].query_string()
            )));
        }
        let range = ctx.timerange;
        let slots = window_slots(window, range.resolution());
        let extended =
            ctx.with_timerange(range.extend_before((slots as i64 - 1).saturating_mul(range.resolution()))?)?;
        let list = evaluate_to_series_list(&args[0], &extended).await?;
        check_length(&list, extended.timerange.slots(), self.name)?;

        let extra = extended.timerange.slots() - range.slots();
        let mut list = map_series(list, |s| {
            Ok(match self.kind {
                Smoother::Moving => moving_average(&s.values, extra + 1),
                Smoother::Exponential => {
                    exponential_moving_average(&s.values, window as f64 / range.resolution() as f64, extra)
                },
            })
        })?;
        list.timerange = range;
        Ok(Value::SeriesList(list))
    }

    fn first_argument_range(&self, args: &[Expression], range: Timerange) -> Timerange {
        match literal_duration(args, 1) {
            Some(window) if window > 0 => {
                let slots = window_slots(window, range.resolution());
                range
                    .extend_before((slots as i64 - 1).saturating_mul(range.resolution()))
                    .unwrap_or(range)
            },
            _ => range,
        }
    }
}

#[derive(Clone, Copy)]
enum Difference {
    Derivative,
    Rate,
}

/// `transform.derivative` and `transform.rate`: one extra leading slot
struct Differentiate {
    name: &'static str,
    kind: Difference,
}

#[async_trait]
impl FunctionBody for Differentiate {
    async fn compute(&self, ctx: &EvaluationContext, args: &[Expression], _groups: &Groups) -> Result<Value> {
        let range = ctx.timerange;
        let extended = ctx.with_timerange(range.extend_before(range.resolution())?)?;
        let list = evaluate_to_series_list(&args[0], &extended).await?;
        check_length(&list, range.slots() + 1, self.name)?;

        let seconds = resolution_seconds(&range);
        let mut list = map_series(list, |s| {
            Ok(match self.kind {
                Difference::Derivative => derivative(&s.values, seconds),
                Difference::Rate => rate(&s.values, seconds, &s.tagset, &ctx.notes),
            })
        })?;
        list.timerange = range;
        Ok(Value::SeriesList(list))
    }

    fn first_argument_range(&self, _args: &[Expression], range: Timerange) -> Timerange {
        range.extend_before(range.resolution()).unwrap_or(range)
    }
}

/// `transform.*` functions
pub fn functions() -> Vec<MetricFunction> {
    vec![
        simple("transform.integral", 0, |values, args| {
            Ok(integral(values, resolution_seconds(&args.timerange())))
        }),
        simple("transform.cumulative", 0, |values, _| Ok(cumulative(values))),
        simple("transform.nan_fill", 1, |values, args| Ok(nan_fill(values, args.scalar(1)?))),
        simple("transform.abs", 0, |values, _| Ok(values.iter().map(|v| v.abs()).collect())),
        simple("transform.log", 0, |values, _| Ok(values.iter().map(|v| v.log10()).collect())),
        simple("transform.nan_keep_last", 0, |values, _| Ok(nan_keep_last(values))),
        simple("transform.bound", 2, |values, args| {
            bound(values, args.scalar(1)?, args.scalar(2)?)
        }),
        simple("transform.lower_bound", 1, |values, args| {
            Ok(lower_bound(values, args.scalar(1)?))
        }),
        simple("transform.upper_bound", 1, |values, args| {
            Ok(upper_bound(values, args.scalar(1)?))
        }),
        alias(),
        MetricFunction::new(
            "transform.derivative",
            1,
            Some(1),
            Differentiate {
                name: "transform.derivative",
                kind: Difference::Derivative,
            },
        ),
        MetricFunction::new(
            "transform.rate",
            1,
            Some(1),
            Differentiate {
                name: "transform.rate",
                kind: Difference::Rate,
            },
        ),
        MetricFunction::new(
            "transform.moving_average",
            2,
            Some(2),
            Smooth {
                name: "transform.moving_average",
                kind: Smoother::Moving,
            },
        ),
        MetricFunction::new(
            "transform.exponential_moving_average",
            2,
            Some(2),
            Smooth {
                name: "transform.exponential_moving_average",
                kind: Smoother::Exponential,
            },
        ),
        MetricFunction::new("transform.timeshift", 2, Some(2), Timeshift),
    ]
}
