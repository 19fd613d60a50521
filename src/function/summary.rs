//! `summarize.*`: reduce each series to one tagged scalar

use super::aggregate::{self, Aggregator};
use super::{MetricFunction, ScalarSet, TaggedScalar, Value};
use crate::types::{SeriesList, Timerange};

/// Last non-NaN value, or NaN when there is none
pub fn last_not_nan(values: &[f64]) -> f64 {
    values
        .iter()
        .rev()
        .copied()
        .find(|v| !v.is_nan())
        .unwrap_or(f64::NAN)
}

/// Summarize the trailing `duration` of each series
///
/// The summarized slice starts at slot `slots - 1 - duration / resolution`,
/// clamped to the first slot.
pub fn summarize(list: &SeriesList, range: &Timerange, duration: i64, summarizer: Aggregator) -> ScalarSet {
    let back = (duration / range.resolution()).max(0) as usize;
    let start = range.slots().saturating_sub(1).saturating_sub(back);
    list.series
        .iter()
        .map(|s| {
            let slice = s.values.get(start..).unwrap_or(&[]);
            TaggedScalar::new(s.tagset.clone(), summarizer(slice))
        })
        .collect()
}

fn recent(name: &str, summarizer: Aggregator) -> MetricFunction {
    MetricFunction::eager(name, 1, Some(2), move |_ctx, args, _groups| {
        let range = args.timerange();
        let duration = args.optional_duration(1)?.unwrap_or_else(|| range.duration());
        let list = args.series_list(0)?;
        Ok(Value::ScalarSet(summarize(&list, &range, duration, summarizer)))
    })
}

fn current() -> MetricFunction {
    MetricFunction::eager("summarize.current", 1, Some(1), |_ctx, args, _groups| {
        let list = args.series_list(0)?;
        let set = list
            .series
            .iter()
            .map(|s| TaggedScalar::new(s.tagset.clone(), s.values.last().copied().unwrap_or(f64::NAN)))
            .collect();
        Ok(Value::ScalarSet(set))
    })
}

/// `summarize.*` functions
pub fn functions() -> Vec<MetricFunction> {
    vec![
        current(),
        recent("summarize.mean", aggregate::mean),
        recent("summarize.min", aggregate::min),
        recent("summarize.max", aggregate::max),
        recent("summarize.last_not_nan", last_not_nan),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::aggregate::fixtures::series;

    #[test]
    fn test_summarize_trailing_window() {
        let nan = f64::NAN;
        let range = Timerange::new(0, 400, 100).unwrap();
        let list = SeriesList::new(
            vec![
                series(&[10.0, 1.0, 2.0, 3.0, nan], &[("host", "a")]),
                series(&[nan, nan, nan, nan, nan], &[("host", "b")]),
            ],
            range,
        );
        // 200ms back from the last slot covers slots 2..=4
        let means = summarize(&list, &range, 200, aggregate::mean);
        assert_eq!(means[0].value, 2.5);
        assert!(means[1].value.is_nan());

        let whole = summarize(&list, &range, range.duration(), aggregate::max);
        assert_eq!(whole[0].value, 10.0);

        // Windows longer than the range clamp to the first slot
        let clamped = summarize(&list, &range, 10_000, aggregate::min);
        assert_eq!(clamped[0].value, 1.0);
        assert_eq!(clamped[0].tagset.get("host"), Some("a"));
    }

    #[test]
    fn test_last_not_nan() {
        assert_eq!(last_not_nan(&[1.0, 2.0, f64::NAN]), 2.0);
        assert!(last_not_nan(&[f64::NAN]).is_nan());
        assert!(last_not_nan(&[]).is_nan());
    }
}
