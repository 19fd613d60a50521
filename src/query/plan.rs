//! Resolution negotiation
//!
//! Functions such as `transform.moving_average` or `transform.timeshift`
//! evaluate their series argument over a window other than the caller's.
//! The backend must pick a resolution that can serve every window that will
//! actually be fetched, not just the window the user asked for:
//!
//! ```text
//!   user range      |----------------|
//!   ma(5m) fetch  |-+----------------|        extended backwards
//!   shift(1h)          |----------------|     moved forwards
//!   fetch span    |---------------------|     union of the above
//! ```
//!
//! [`fetch_span`] computes that union for a set of expressions and
//! [`negotiate_resolution`] feeds it back to
//! [`TimeseriesStorage::choose_resolution`] until the answer is stable.

use super::ast::Expression;
use crate::engine::traits::TimeseriesStorage;
use crate::error::FetchError;
use crate::function::Registry;
use crate::types::Timerange;
use tracing::debug;

/// Upper bound on negotiation rounds
const MAX_ROUNDS: usize = 8;

/// Union of the windows over which metrics in `exprs` will be fetched when
/// the expressions are evaluated at `range`
///
/// Returns `None` when no expression references a metric.
pub fn fetch_span(exprs: &[Expression], range: Timerange, registry: &Registry) -> Option<Timerange> {
    exprs
        .iter()
        .filter_map(|expr| expression_span(expr, range, registry))
        .reduce(union)
}

fn expression_span(expr: &Expression, range: Timerange, registry: &Registry) -> Option<Timerange> {
    match expr {
        Expression::Metric { .. } => Some(range),
        Expression::Annotation { expr, .. } => expression_span(expr, range, registry),
        Expression::Function { name, args, .. } => {
            let first = match (registry.get(name), args.first()) {
                (Some(function), Some(first)) => {
                    expression_span(first, function.first_argument_range(args, range), registry)
                },
                (None, Some(first)) => expression_span(first, range, registry),
                (_, None) => None,
            };
            args.iter()
                .skip(1)
                .filter_map(|arg| expression_span(arg, range, registry))
                .chain(first)
                .reduce(union)
        },
        Expression::Scalar(_) | Expression::Duration { .. } | Expression::String(_) => None,
    }
}

fn union(a: Timerange, b: Timerange) -> Timerange {
    let start = a.start().min(b.start());
    let end = a.end().max(b.end());
    Timerange::snapped(start, end, a.resolution()).unwrap_or(a)
}

/// Ask `storage` for a resolution that serves everything `exprs` will fetch
///
/// Starts from the backend's answer for the user range, then widens the
/// request to the fetch span at that resolution. Stops when the span
/// matches the user range or the backend no longer asks for a coarser
/// resolution.
pub async fn negotiate_resolution(
    storage: &dyn TimeseriesStorage,
    user_range: &Timerange,
    smallest_resolution: i64,
    exprs: &[Expression],
    registry: &Registry,
) -> Result<i64, FetchError> {
    let mut resolution = storage.choose_resolution(user_range, smallest_resolution).await?;

    for _ in 0..MAX_ROUNDS {
        let Ok(range) = user_range.with_resolution(resolution) else {
            break;
        };
        let Some(span) = fetch_span(exprs, range, registry) else {
            break;
        };
        if span == range {
            break;
        }
        let floor = smallest_resolution.max(resolution);
        let widened = storage.choose_resolution(&span, floor).await?;
        if widened <= resolution {
            break;
        }
        debug!(from = resolution, to = widened, "fetch span requires a coarser resolution");
        resolution = widened;
    }
    Ok(resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryStorage;
    use crate::function::Groups;
    use crate::query::Predicate;

    const NOW: i64 = 1_433_203_200_000;
    const DAY: i64 = 86_400_000;

    fn foo() -> Expression {
        Expression::metric("foo", Predicate::True)
    }

    fn call(name: &str, args: Vec<Expression>) -> Expression {
        Expression::function(name, args, Groups::default())
    }

    fn minutes(n: i64) -> Expression {
        Expression::Duration {
            literal: format!("{}m", n),
            millis: n * 60_000,
        }
    }

    fn registry() -> Registry {
        Registry::with_builtins().unwrap()
    }

    #[test]
    fn test_span_of_plain_metric() {
        let range = Timerange::new(NOW - DAY, NOW, 30_000).unwrap();
        assert_eq!(fetch_span(&[foo()], range, &registry()), Some(range));
        assert_eq!(fetch_span(&[Expression::Scalar(1.0)], range, &registry()), None);
    }

    #[test]
    fn test_span_unions_shifted_windows() {
        let range = Timerange::new(NOW - DAY, NOW, 30_000).unwrap();
        let shifted = call("transform.timeshift", vec![foo(), minutes(-60)]);
        let span = fetch_span(&[foo(), shifted], range, &registry()).unwrap();
        assert_eq!(span.start(), NOW - DAY - 3_600_000);
        assert_eq!(span.end(), NOW);
    }

    #[tokio::test]
    async fn test_moving_average_needs_coarser_resolution() {
        let storage = MemoryStorage::new().with_now(NOW).with_age_rule(DAY, 300_000);
        let range = Timerange::new(NOW - DAY, NOW, 30_000).unwrap();
        let registry = registry();

        let plain = negotiate_resolution(&storage, &range, 1, &[foo()], &registry).await.unwrap();
        assert_eq!(plain, 30_000);

        let smoothed = call("transform.moving_average", vec![foo(), minutes(5)]);
        let chosen = negotiate_resolution(&storage, &range, 1, &[smoothed.clone()], &registry)
            .await
            .unwrap();
        assert_eq!(chosen, 300_000);

        let shifted = call("transform.timeshift", vec![smoothed, minutes(5)]);
        let chosen = negotiate_resolution(&storage, &range, 1, &[shifted], &registry).await.unwrap();
        assert_eq!(chosen, 30_000);
    }
}
