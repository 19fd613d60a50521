//! `tag.drop` and `tag.set`

use super::{MetricFunction, Value};
use crate::types::{SeriesList, Timeseries};

/// Remove `tag` from every series
pub fn drop_tag(list: SeriesList, tag: &str) -> SeriesList {
    retag(list, |s| s.tagset.without(tag))
}

/// Set `tag` to `value` on every series, replacing any existing value
pub fn set_tag(list: SeriesList, tag: &str, value: &str) -> SeriesList {
    retag(list, |s| s.tagset.with(tag, value))
}

fn retag(list: SeriesList, f: impl Fn(&Timeseries) -> crate::types::TagSet) -> SeriesList {
    let series = list
        .series
        .iter()
        .map(|s| Timeseries::new(s.values.clone(), f(s)))
        .collect();
    SeriesList {
        series,
        timerange: list.timerange,
        name: list.name,
        query: list.query,
    }
}

/// `tag.*` functions
pub fn functions() -> Vec<MetricFunction> {
    vec![
        MetricFunction::eager("tag.drop", 2, Some(2), |_ctx, args, _groups| {
            let tag = args.text(1)?;
            let list = args.series_list(0)?;
            Ok(Value::SeriesList(drop_tag(list, &tag)))
        }),
        MetricFunction::eager("tag.set", 3, Some(3), |_ctx, args, _groups| {
            let tag = args.text(1)?;
            let value = args.text(2)?;
            let list = args.series_list(0)?;
            Ok(Value::SeriesList(set_tag(list, &tag, &value)))
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::aggregate::fixtures::series;
    use crate::types::{TagSet, Timerange};

    fn list() -> SeriesList {
        SeriesList::new(
            vec![
                series(&[1.0], &[("dc", "west"), ("host", "a")]),
                series(&[2.0], &[("host", "b")]),
            ],
            Timerange::new(0, 0, 100).unwrap(),
        )
    }

    #[test]
    fn test_drop_tag() {
        let result = drop_tag(list(), "dc");
        assert_eq!(result.series[0].tagset, TagSet::from_pairs(&[("host", "a")]));
        assert_eq!(result.series[1].tagset, TagSet::from_pairs(&[("host", "b")]));
        assert_eq!(result.series[0].values, vec![1.0]);
    }

    #[test]
    fn test_set_tag_overwrites() {
        let result = set_tag(list(), "dc", "east");
        assert_eq!(result.series[0].tagset.get("dc"), Some("east"));
        assert_eq!(result.series[1].tagset.get("dc"), Some("east"));
    }
}
