//! Natural tag join and the arithmetic operators
//!
//! `a + b` pairs every series of `a` with every series of `b` whose tagset
//! agrees on the keys both have. Each pair produces one series tagged with
//! the union of the two tagsets. Series with no partner produce nothing.

use super::{Arguments, EvaluationContext, Groups, MetricFunction, Value};
use crate::error::{QueryError, Result};
use crate::types::{SeriesList, TagSet, Timeseries};

/// One joined row: the merged tagset and the index of each side's series
#[derive(Debug, Clone, PartialEq)]
pub struct JoinRow {
    /// Union of the member tagsets
    pub tagset: TagSet,
    /// Index of the member in each joined list
    pub members: Vec<usize>,
}

/// Join any number of series lists on their shared tags
pub fn join(lists: &[&SeriesList]) -> Vec<JoinRow> {
    let mut rows = vec![JoinRow {
        tagset: TagSet::new(),
        members: Vec::new(),
    }];
    for list in lists {
        let mut next = Vec::new();
        for row in &rows {
            for (index, series) in list.series.iter().enumerate() {
                if let Some(tagset) = row.tagset.merge(&series.tagset) {
                    let mut members = row.members.clone();
                    members.push(index);
                    next.push(JoinRow { tagset, members });
                }
            }
        }
        rows = next;
    }
    rows
}

/// Apply `op` slot-wise across the natural join of two lists
pub fn join_with(left: &SeriesList, right: &SeriesList, op: fn(f64, f64) -> f64) -> SeriesList {
    let series = join(&[left, right])
        .into_iter()
        .map(|row| {
            let a = &left.series[row.members[0]].values;
            let b = &right.series[row.members[1]].values;
            let values = a.iter().zip(b).map(|(x, y)| op(*x, *y)).collect();
            Timeseries::new(values, row.tagset)
        })
        .collect();
    SeriesList::new(series, left.timerange)
}

// =============================================================================
// Operators
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operator {
    fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Subtract => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
        }
    }

    fn apply(self) -> fn(f64, f64) -> f64 {
        match self {
            Operator::Add => |x, y| x + y,
            Operator::Subtract => |x, y| x - y,
            Operator::Multiply => |x, y| x * y,
            Operator::Divide => |x, y| x / y,
        }
    }

    /// Durations combine with unit rules; `None` means fall back to series
    fn durations(self, left: &Value, right: &Value) -> Option<Result<Value>> {
        let op = self.apply();
        match (self, left, right) {
            (Operator::Add | Operator::Subtract, Value::Duration { millis: a, .. }, Value::Duration { millis: b, .. }) => {
                Some(Ok(Value::duration_millis(op(*a as f64, *b as f64) as i64)))
            },
            (Operator::Multiply, Value::Duration { millis: d, .. }, Value::Scalar(s))
            | (Operator::Multiply, Value::Scalar(s), Value::Duration { millis: d, .. }) => {
                Some(Ok(Value::duration_millis((*d as f64 * s) as i64)))
            },
            (Operator::Divide, Value::Duration { millis: a, .. }, Value::Duration { millis: b, .. }) => {
                Some(Ok(Value::Scalar(*a as f64 / *b as f64)))
            },
            (Operator::Divide, Value::Duration { millis: d, .. }, Value::Scalar(s)) => {
                if *s == 0.0 {
                    Some(Err(QueryError::invalid_argument("cannot divide a duration by zero")))
                } else {
                    Some(Ok(Value::duration_millis((*d as f64 / s) as i64)))
                }
            },
            (_, Value::Duration { .. }, _) | (_, _, Value::Duration { .. }) => Some(Err(
                QueryError::invalid_argument(format!(
                    "operator {} cannot combine a {} with a {}",
                    self.symbol(),
                    left.type_name(),
                    right.type_name()
                )),
            )),
            _ => None,
        }
    }
}

fn operator_function(operator: Operator) -> MetricFunction {
    MetricFunction::eager(
        operator.symbol(),
        2,
        Some(2),
        move |_ctx: &EvaluationContext, args: &mut Arguments<'_>, _groups: &Groups| {
            evaluate_operator(operator, args)
        },
    )
}

fn evaluate_operator(operator: Operator, args: &mut Arguments<'_>) -> Result<Value> {
    let left = args.value(0)?;
    let right = args.value(1)?;
    if let (Ok(x), Ok(y)) = (left.to_scalar(), right.to_scalar()) {
        return Ok(Value::Scalar(operator.apply()(x, y)));
    }
    if let Some(result) = operator.durations(left, right) {
        return result;
    }
    let left = args.series_list(0)?;
    let right = args.series_list(1)?;
    Ok(Value::SeriesList(join_with(&left, &right, operator.apply())))
}

/// The `+ - * /` operators
pub fn functions() -> Vec<MetricFunction> {
    [
        Operator::Add,
        Operator::Subtract,
        Operator::Multiply,
        Operator::Divide,
    ]
    .into_iter()
    .map(operator_function)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::aggregate::fixtures::series;
    use crate::types::Timerange;

    fn range() -> Timerange {
        Timerange::new(0, 100, 100).unwrap()
    }

    #[test]
    fn test_natural_join_tagsets() {
        let a = SeriesList::new(
            vec![
                series(&[1.0, 1.0], &[("dc", "west"), ("host", "h1")]),
                series(&[2.0, 2.0], &[("dc", "east"), ("host", "h2")]),
            ],
            range(),
        );
        let b = SeriesList::new(
            vec![
                series(&[10.0, 10.0], &[("dc", "west")]),
                series(&[20.0, 20.0], &[("dc", "east")]),
            ],
            range(),
        );
        let result = join_with(&a, &b, |x, y| x + y);
        assert_eq!(result.series.len(), 2);
        assert_eq!(result.series[0].tagset, TagSet::from_pairs(&[("dc", "west"), ("host", "h1")]));
        assert_eq!(result.series[0].values, vec![11.0, 11.0]);
        assert_eq!(result.series[1].tagset, TagSet::from_pairs(&[("dc", "east"), ("host", "h2")]));
        assert_eq!(result.series[1].values, vec![22.0, 22.0]);
    }

    #[test]
    fn test_unpartnered_series_drop_out() {
        let a = SeriesList::new(vec![series(&[1.0, 1.0], &[("dc", "north")])], range());
        let b = SeriesList::new(vec![series(&[1.0, 1.0], &[("dc", "south")])], range());
        assert!(join_with(&a, &b, |x, y| x + y).series.is_empty());
    }

    #[test]
    fn test_disjoint_keys_form_cross_product() {
        let a = SeriesList::new(
            vec![series(&[1.0], &[("host", "a")]), series(&[2.0], &[("host", "b")])],
            Timerange::new(0, 0, 100).unwrap(),
        );
        let b = SeriesList::new(
            vec![series(&[10.0], &[("dc", "x")]), series(&[20.0], &[("dc", "y")])],
            Timerange::new(0, 0, 100).unwrap(),
        );
        let rows = join(&[&a, &b]);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[3].members, vec![1, 1]);
        assert_eq!(rows[3].tagset.serialize(), "dc=y,host=b");
    }

    #[test]
    fn test_duration_unit_rules() {
        let five = Value::duration_millis(300_000);
        let one = Value::duration_millis(60_000);
        assert_eq!(
            Operator::Add.durations(&five, &one).unwrap().unwrap(),
            Value::duration_millis(360_000)
        );
        assert_eq!(
            Operator::Divide.durations(&five, &one).unwrap().unwrap(),
            Value::Scalar(5.0)
        );
        assert_eq!(
            Operator::Multiply.durations(&Value::Scalar(2.0), &one).unwrap().unwrap(),
            Value::duration_millis(120_000)
        );
        assert!(Operator::Add.durations(&five, &Value::Scalar(1.0)).unwrap().is_err());
        assert!(Operator::Add.durations(&Value::Scalar(1.0), &Value::Scalar(2.0)).is_none());
    }
}
