//! `forecast.*`: seasonal models, anomaly scores and drop-out
//!
//! # Function shapes
//!
//! ```text
//! forecast.rolling_multiplicative_holt_winters(series, period, level, trend, season [, extra])
//! forecast.rolling_seasonal(series, period, season [, extra])
//! forecast.linear(series [, extra])
//! forecast.anomaly_rolling_*(...)                 same arguments as the model
//! forecast.train_*_holt_winters(series, period, start, end)
//! forecast.drop(series, duration)
//! ```
//!
//! Rolling models may train on `extra` time before the caller's window; the
//! extra slots are evaluated and then dropped. Trained models fit a fixed
//! window `[now + start, now + end]` and extrapolate over the caller's
//! window.

pub mod anomaly;
pub mod model;
pub mod rolling;

use super::transform::{check_length, map_series};
use super::{
    evaluate_to_duration, evaluate_to_scalar, evaluate_to_series_list, literal_duration,
    EvaluationContext, FunctionBody, Groups, MetricFunction, Value,
};
use crate::error::{QueryError, Result};
use crate::query::ast::Expression;
use crate::types::{SeriesList, Timerange};
use async_trait::async_trait;
use model::{GeneralizedHoltWinters, Model, MultiplicativeHoltWinters};
use std::collections::HashMap;

// =============================================================================
// Rolling Models
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rolling {
    MultiplicativeHoltWinters,
    Seasonal,
    Linear,
}

impl Rolling {
    fn name(self) -> &'static str {
        match self {
            Rolling::MultiplicativeHoltWinters => "forecast.rolling_multiplicative_holt_winters",
            Rolling::Seasonal => "forecast.rolling_seasonal",
            Rolling::Linear => "forecast.linear",
        }
    }

    /// Position of the optional extra training duration
    fn extra_index(self) -> usize {
        match self {
            Rolling::MultiplicativeHoltWinters => 5,
            Rolling::Seasonal => 3,
            Rolling::Linear => 1,
        }
    }

    fn extended_range(self, args: &[Expression], range: Timerange) -> Timerange {
        match literal_duration(args, self.extra_index()) {
            Some(extra) if extra > 0 => range.extend_before(extra).unwrap_or(range),
            _ => range,
        }
    }

    /// Run the model; returns the estimates and the period in slots
    async fn forecast(self, ctx: &EvaluationContext, args: &[Expression]) -> Result<(SeriesList, usize)> {
        let range = ctx.timerange;
        let period = match self {
            Rolling::Linear => 1,
            _ => {
                let period = evaluate_to_duration(&args[1], ctx).await?;
                let samples = period / range.resolution();
                if samples <= 0 {
                    return Err(QueryError::invalid_argument(format!(
                        "{} expects the period parameter to mean at least one slot",
                        self.name()
                    )));
                }
                samples as usize
            },
        };
        let rates = match self {
            Rolling::MultiplicativeHoltWinters => vec![
                evaluate_to_scalar(&args[2], ctx).await?,
                evaluate_to_scalar(&args[3], ctx).await?,
                evaluate_to_scalar(&args[4], ctx).await?,
            ],
            Rolling::Seasonal => vec![evaluate_to_scalar(&args[2], ctx).await?],
            Rolling::Linear => Vec::new(),
        };
        let extra = match args.get(self.extra_index()) {
            Some(expr) => evaluate_to_duration(expr, ctx).await?,
            None => 0,
        };
        if extra < 0 {
            return Err(QueryError::invalid_argument(format!(
                "Extra training time must be non-negative, but got {}ms",
                extra
            )));
        }

        let extended = ctx.with_timerange(range.extend_before(extra)?)?;
        let list = evaluate_to_series_list(&args[0], &extended).await?;
        check_length(&list, extended.timerange.slots(), self.name())?;

        let estimates = map_series(list, |s| {
            Ok(match self {
                Rolling::MultiplicativeHoltWinters => {
                    rolling::rolling_multiplicative_holt_winters(&s.values, period, rates[0], rates[1], rates[2])
                },
                Rolling::Seasonal => rolling::rolling_seasonal(&s.values, period, rates[0]),
                Rolling::Linear => rolling::linear(&s.values),
            })
        })?;
        let leading = extended.timerange.slots() - range.slots();
        Ok((estimates.drop_leading(leading, range), period))
    }
}

#[async_trait]
impl FunctionBody for Rolling {
    async fn compute(&self, ctx: &EvaluationContext, args: &[Expression], _groups: &Groups) -> Result<Value> {
        let (list, _) = self.forecast(ctx, args).await?;
        Ok(Value::SeriesList(list))
    }

    fn first_argument_range(&self, args: &[Expression], range: Timerange) -> Timerange {
        self.extended_range(args, range)
    }
}

fn rolling(model: Rolling, min_arguments: usize) -> MetricFunction {
    MetricFunction::new(model.name(), min_arguments, Some(model.extra_index() + 1), model)
}

// =============================================================================
// Anomaly Scores
// =============================================================================

/// Standardized residuals of a rolling model against the original series
struct Anomaly {
    name: &'static str,
    model: Rolling,
}

#[async_trait]
impl FunctionBody for Anomaly {
    async fn compute(&self, ctx: &EvaluationContext, args: &[Expression], _groups: &Groups) -> Result<Value> {
        let (original, prediction) = futures::try_join!(
            evaluate_to_series_list(&args[0], ctx),
            self.model.forecast(ctx, args),
        )?;
        let (prediction, period) = prediction;

        let lookup: HashMap<String, &[f64]> = original
            .series
            .iter()
            .map(|s| (s.tagset.serialize(), s.values.as_slice()))
            .collect();
        let name = self.name;
        let list = map_series(prediction, |s| {
            let correct = lookup.get(&s.tagset.serialize()).ok_or_else(|| {
                QueryError::assertion(format!("{} found no original series for {}", name, s.tagset))
            })?;
            anomaly::periodic_standard_deviations(correct, &s.values, period)
        })?;
        Ok(Value::SeriesList(list))
    }

    fn first_argument_range(&self, args: &[Expression], range: Timerange) -> Timerange {
        self.model.extended_range(args, range)
    }
}

fn anomaly(name: &'static str, model: Rolling, min_arguments: usize) -> MetricFunction {
    MetricFunction::new(name, min_arguments, Some(model.extra_index() + 1), Anomaly { name, model })
}

// =============================================================================
// Trained Models
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Trainer {
    Generalized,
    Multiplicative,
}

/// Fit a model on `[now + start, now + end]` and extrapolate it
struct Train {
    name: &'static str,
    trainer: Trainer,
}

fn training_range(range: Timerange, start: i64, end: i64) -> Result<Timerange> {
    match (range.end().checked_add(start), range.end().checked_add(end)) {
        (Some(start), Some(end)) => Timerange::snapped(start, end, range.resolution()),
        _ => Err(QueryError::invalid_argument(format!(
            "training window [{}ms, {}ms] from {} overflows",
            start,
            end,
            range.end()
        ))),
    }
}

#[async_trait]
impl FunctionBody for Train {
    async fn compute(&self, ctx: &EvaluationContext, args: &[Expression], _groups: &Groups) -> Result<Value> {
        let range = ctx.timerange;
        let period = evaluate_to_duration(&args[1], ctx).await? / range.resolution();
        if period <= 0 {
            return Err(QueryError::invalid_argument(format!(
                "{} expected the period to exceed the resolution",
                self.name
            )));
        }
        let start = evaluate_to_duration(&args[2], ctx).await?;
        let end = evaluate_to_duration(&args[3], ctx).await?;
        if end < start {
            return Err(QueryError::invalid_argument(format!(
                "{} expected the end time to come after the start time",
                self.name
            )));
        }

        let training = ctx.with_timerange(training_range(range, start, end)?)?;
        let list = evaluate_to_series_list(&args[0], &training).await?;
        check_length(&list, training.timerange.slots(), self.name)?;

        let offset = range.start().saturating_sub(training.timerange.start()) / range.resolution();
        let mut list = map_series(list, |s| {
            let model: Box<dyn Model> = match self.trainer {
                Trainer::Generalized => Box::new(GeneralizedHoltWinters::train(&s.values, period as usize)?),
                Trainer::Multiplicative => Box::new(MultiplicativeHoltWinters::train(&s.values, period as usize)?),
            };
            Ok(model.estimate_range(offset, range.slots()))
        })?;
        list.timerange = range;
        Ok(Value::SeriesList(list))
    }

    fn first_argument_range(&self, args: &[Expression], range: Timerange) -> Timerange {
        match (literal_duration(args, 2), literal_duration(args, 3)) {
            (Some(start), Some(end)) if start <= end => training_range(range, start, end).unwrap_or(range),
            _ => range,
        }
    }
}

fn train(name: &'static str, trainer: Trainer) -> MetricFunction {
    MetricFunction::new(name, 4, Some(4), Train { name, trainer })
}

// =============================================================================
// Drop
// =============================================================================

/// Replace the trailing `duration` of every series with NaN
pub fn drop_recent(list: SeriesList, duration: i64) -> Result<SeriesList> {
    let range = list.timerange;
    let last = range.slots() as i64 - duration / range.resolution();
    map_series(list, |s| {
        Ok(s.values
            .iter()
            .enumerate()
            .map(|(j, v)| if (j as i64) < last { *v } else { f64::NAN })
            .collect())
    })
}

/// `forecast.*` functions
pub fn functions() -> Vec<MetricFunction> {
    vec![
        rolling(Rolling::MultiplicativeHoltWinters, 5),
        rolling(Rolling::Seasonal, 3),
        rolling(Rolling::Linear, 1),
        anomaly(
            "forecast.anomaly_rolling_multiplicative_holt_winters",
            Rolling::MultiplicativeHoltWinters,
            5,
        ),
        anomaly("forecast.anomaly_rolling_seasonal", Rolling::Seasonal, 3),
        train("forecast.train_generalized_holt_winters", Trainer::Generalized),
        train("forecast.train_multiplicative_holt_winters", Trainer::Multiplicative),
        MetricFunction::eager("forecast.drop", 2, Some(2), |_ctx, args, _groups| {
            let duration = args.duration(1)?;
            let list = args.series_list(0)?;
            Ok(Value::SeriesList(drop_recent(list, duration)?))
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::aggregate::fixtures::series;

    #[test]
    fn test_drop_recent() {
        let range = Timerange::new(0, 400, 100).unwrap();
        let list = SeriesList::new(vec![series(&[1.0, 2.0, 3.0, 4.0, 5.0], &[("host", "a")])], range);
        let dropped = drop_recent(list, 200).unwrap();
        let values = &dropped.series[0].values;
        assert_eq!(&values[..3], &[1.0, 2.0, 3.0]);
        assert!(values[3].is_nan() && values[4].is_nan());
    }

    #[test]
    fn test_rolling_extends_by_literal_training() {
        let range = Timerange::new(1000, 2000, 100).unwrap();
        let args = vec![
            Expression::Scalar(1.0),
            Expression::Duration {
                literal: "300ms".to_string(),
                millis: 300,
            },
        ];
        assert_eq!(Rolling::Linear.extended_range(&args, range).start(), 700);
        assert_eq!(Rolling::Seasonal.extended_range(&args, range), range);
    }

    #[test]
    fn test_training_range() {
        let range = Timerange::new(1000, 2000, 100).unwrap();
        let training = training_range(range, -1050, -500).unwrap();
        assert_eq!(training.start(), 900);
        assert_eq!(training.end(), 1500);
    }

    #[test]
    fn test_registered_names() {
        let names: Vec<String> = functions().into_iter().map(|f| f.name).collect();
        assert!(names.contains(&"forecast.anomaly_rolling_seasonal".to_string()));
        assert!(names.contains(&"forecast.drop".to_string()));
        assert_eq!(names.len(), 8);
    }
}
