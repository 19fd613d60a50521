//! Typed values flowing between expression nodes
//!
//! Every expression evaluates to a [`Value`]. Functions ask for the shape
//! they need through the explicit coercions below; a failed coercion is a
//! [`ConversionFailure`] that the caller decorates with the offending query
//! text before surfacing it as [`QueryError::TypeMismatch`].

use crate::error::QueryError;
use crate::types::{SeriesList, TagSet, Timerange, Timeseries};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

// =============================================================================
// Scalar Sets
// =============================================================================

/// One scalar labelled with the tagset of the series it summarizes
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedScalar {
    /// Tags of the summarized series
    pub tagset: TagSet,
    /// Summary value (NaN when undefined)
    pub value: f64,
}

impl TaggedScalar {
    /// Label a scalar
    pub fn new(tagset: TagSet, value: f64) -> Self {
        Self { tagset, value }
    }
}

impl Serialize for TaggedScalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("TaggedScalar", 2)?;
        state.serialize_field("tagset", &self.tagset)?;
        if self.value.is_finite() {
            state.serialize_field("value", &self.value)?;
        } else {
            state.serialize_field("value", &None::<f64>)?;
        }
        state.end()
    }
}

/// Tag-indexed scalars, e.g. the output of `summarize.*`
pub type ScalarSet = Vec<TaggedScalar>;

// =============================================================================
// Value
// =============================================================================

/// Coercion failure before the query context is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionFailure {
    /// Type the value had
    pub from: &'static str,
    /// Type that was requested
    pub to: &'static str,
}

impl ConversionFailure {
    /// Attach the query text of the value that failed to convert
    pub fn with_context(self, context: &str) -> QueryError {
        QueryError::TypeMismatch {
            from: self.from.to_string(),
            to: self.to.to_string(),
            context: context.to_string(),
        }
    }
}

/// Result of evaluating an expression
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Series sharing a timerange
    SeriesList(SeriesList),
    /// Tag-indexed scalars
    ScalarSet(ScalarSet),
    /// A plain number
    Scalar(f64),
    /// A time span
    Duration {
        /// Source text, kept for rendering
        literal: String,
        /// Length in milliseconds
        millis: i64,
    },
    /// A string literal
    String(String),
}

impl Value {
    /// Duration whose literal is its millisecond count
    pub fn duration_millis(millis: i64) -> Self {
        Value::Duration {
            literal: format!("{}ms", millis),
            millis,
        }
    }

    /// Name used in conversion errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::SeriesList(_) => "SeriesList",
            Value::ScalarSet(_) => "scalar set",
            Value::Scalar(_) => "scalar",
            Value::Duration { .. } => "duration",
            Value::String(_) => "string",
        }
    }

    fn fail(&self, to: &'static str) -> ConversionFailure {
        ConversionFailure {
            from: self.type_name(),
            to,
        }
    }

    /// Coerce to a series list sampled on `timerange`
    ///
    /// Scalars broadcast to one constant series with an empty tagset; scalar
    /// sets broadcast each entry to a constant series with its tagset.
    pub fn into_series_list(self, timerange: Timerange) -> Result<SeriesList, ConversionFailure> {
        match self {
            Value::SeriesList(list) => Ok(list),
            Value::Scalar(value) => Ok(SeriesList::new(
                vec![Timeseries::new(vec![value; timerange.slots()], TagSet::new())],
                timerange,
            )),
            Value::ScalarSet(set) => Ok(SeriesList::new(
                set.into_iter()
                    .map(|s| Timeseries::new(vec![s.value; timerange.slots()], s.tagset))
                    .collect(),
                timerange,
            )),
            other => Err(other.fail("SeriesList")),
        }
    }

    /// Coerce to a scalar set
    pub fn into_scalar_set(self) -> Result<ScalarSet, ConversionFailure> {
        match self {
            Value::ScalarSet(set) => Ok(set),
            Value::Scalar(value) => Ok(vec![TaggedScalar::new(TagSet::new(), value)]),
            other => Err(other.fail("scalar set")),
        }
    }

    /// Coerce to a scalar
    ///
    /// A scalar set with exactly one untagged entry counts as a scalar.
    pub fn to_scalar(&self) -> Result<f64, ConversionFailure> {
        match self {
            Value::Scalar(value) => Ok(*value),
            Value::ScalarSet(set) if set.len() == 1 && set[0].tagset.is_empty() => Ok(set[0].value),
            other => Err(other.fail("scalar")),
        }
    }

    /// Coerce to a duration in milliseconds
    pub fn to_duration(&self) -> Result<i64, ConversionFailure> {
        match self {
            Value::Duration { millis, .. } => Ok(*millis),
            other => Err(other.fail("duration")),
        }
    }

    /// Coerce to a string
    pub fn to_text(&self) -> Result<String, ConversionFailure> {
        match self {
            Value::String(text) => Ok(text.clone()),
            other => Err(other.fail("string")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range() -> Timerange {
        Timerange::new(0, 300, 100).unwrap()
    }

    #[test]
    fn test_scalar_broadcasts_to_series() {
        let list = Value::Scalar(2.5).into_series_list(range()).unwrap();
        assert_eq!(list.series.len(), 1);
        assert_eq!(list.series[0].values, vec![2.5; 4]);
        assert!(list.series[0].tagset.is_empty());
    }

    #[test]
    fn test_scalar_set_broadcasts_per_tagset() {
        let set = vec![
            TaggedScalar::new(TagSet::from_pairs(&[("host", "a")]), 1.0),
            TaggedScalar::new(TagSet::from_pairs(&[("host", "b")]), 2.0),
        ];
        let list = Value::ScalarSet(set).into_series_list(range()).unwrap();
        assert_eq!(list.series[1].values, vec![2.0; 4]);
        assert_eq!(list.series[1].tagset.get("host"), Some("b"));
    }

    #[test]
    fn test_conversion_failure_message() {
        let err = Value::String("x".into())
            .to_duration()
            .unwrap_err()
            .with_context("'x'");
        assert_eq!(err.to_string(), "cannot convert 'x' (type string) to type duration");
        let err = Value::Scalar(1.0)
            .into_series_list(range())
            .map(|_| ())
            .and_then(|_| Value::Scalar(1.0).to_text().map(|_| ()));
        assert!(err.is_err());
    }

    #[test]
    fn test_untagged_singleton_set_is_scalar() {
        let single = Value::ScalarSet(vec![TaggedScalar::new(TagSet::new(), 4.0)]);
        assert_eq!(single.to_scalar(), Ok(4.0));
        let tagged = Value::ScalarSet(vec![TaggedScalar::new(
            TagSet::from_pairs(&[("host", "a")]),
            4.0,
        )]);
        assert_eq!(
            tagged.to_scalar(),
            Err(ConversionFailure {
                from: "scalar set",
                to: "scalar"
            })
        );
    }

    #[test]
    fn test_tagged_scalar_serializes_nan_as_null() {
        let json = serde_json::to_string(&TaggedScalar::new(TagSet::new(), f64::NAN)).unwrap();
        assert_eq!(json, r#"{"tagset":{},"value":null}"#);
    }
}
