//! Error types for the query engine
//!
//! Every failure a user can trigger is a [`QueryError`] variant whose
//! Display string is the message returned over HTTP. Backend failures carry
//! a [`FetchError`] so the offending series can be named in the message.

use crate::types::TaggedMetric;
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, QueryError>;

// =============================================================================
// Syntax Errors
// =============================================================================

/// A positioned parser diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    /// 1-based line of the offending input
    pub line: usize,
    /// 1-based column (characters since the last newline)
    pub column: usize,
    /// User-facing description
    pub message: String,
}

impl SyntaxError {
    /// Create a positioned syntax error
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}: {}", self.line, self.column, self.message)
    }
}

impl std::error::Error for SyntaxError {}

/// A batch of syntax errors reported together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxErrors(pub Vec<SyntaxError>);

impl fmt::Display for SyntaxErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", lines.join("\n"))
    }
}

impl std::error::Error for SyntaxErrors {}

// =============================================================================
// Fetch Errors
// =============================================================================

/// Classification of a backend failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Deadline exceeded or the request was cancelled
    Timeout,
    /// Transport or decode failure
    Io,
    /// The series name cannot be encoded for the backend
    InvalidSeries,
    /// The backend refused because of its own limits
    LimitReached,
    /// The backend does not support a requested parameter
    Unsupported,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::Io => "IO error",
            FetchErrorKind::InvalidSeries => "invalid series",
            FetchErrorKind::LimitReached => "limit reached",
            FetchErrorKind::Unsupported => "unsupported operation",
        };
        f.write_str(text)
    }
}

/// Failure reported by a storage or metadata backend
#[derive(Debug, Clone, PartialEq)]
pub struct FetchError {
    /// What went wrong
    pub kind: FetchErrorKind,
    /// The series being fetched, when known
    pub metric: Option<TaggedMetric>,
    /// Backend-provided detail
    pub message: String,
}

impl FetchError {
    /// Create a fetch error without series context
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            metric: None,
            message: message.into(),
        }
    }

    /// Attach the series that failed
    pub fn with_metric(mut self, metric: TaggedMetric) -> Self {
        self.metric = Some(metric);
        self
    }

    /// Timeout or cancellation
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Timeout, message)
    }

    /// Transport failure
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Io, message)
    }

    /// Unsupported parameter
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Unsupported, message)
    }

    /// True when this error came from a deadline or cancellation
    pub fn is_timeout(&self) -> bool {
        self.kind == FetchErrorKind::Timeout
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.metric {
            Some(metric) => write!(f, "[{}] {} - {}", metric, self.kind, self.message),
            None => write!(f, "{} - {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for FetchError {}

// =============================================================================
// Query Errors
// =============================================================================

/// Main error type for parsing, planning and evaluating queries
#[derive(Error, Debug)]
pub enum QueryError {
    /// One or more parser diagnostics
    #[error("{0}")]
    Syntax(#[from] SyntaxErrors),

    /// Backend failure while fetching series or metadata
    #[error("{0}")]
    Fetch(#[from] FetchError),

    /// The per-request fetch quota would be exceeded
    #[error("performing fetch of {additional} additional series brings the total to {total}, which exceeds the specified limit {limit}")]
    FetchLimitExceeded {
        /// Counter value after the rejected reservation
        total: usize,
        /// Configured limit
        limit: usize,
        /// Series requested by the rejected step
        additional: usize,
    },

    /// The chosen resolution yields too many slots
    #[error("Requested number of data points exceeds the configured limit (actual={slots} limit={limit})")]
    SlotLimitExceeded {
        /// Slot count of the chosen timerange
        slots: usize,
        /// Configured slot limit
        limit: usize,
    },

    /// Evaluation did not finish before the deadline
    #[error("Timeout while executing the query.")]
    Timeout,

    /// A timerange could not be constructed
    #[error("invalid timerange [{start}, {end}] at resolution {resolution}ms: {reason}")]
    InvalidTimerange {
        /// Requested start in epoch milliseconds
        start: i64,
        /// Requested end in epoch milliseconds
        end: i64,
        /// Requested resolution in milliseconds
        resolution: i64,
        /// What was wrong with it
        reason: String,
    },

    /// Lower bound above upper bound in a bounding transform
    #[error("the lower bound ({lower:.6}) should be no more than the upper bound ({upper:.6}) in the parameters to transform.bound( ..., {lower:.6}, {upper:.6})")]
    InvalidBound {
        /// Requested lower bound
        lower: f64,
        /// Requested upper bound
        upper: f64,
    },

    /// A value could not be coerced to the type a function requires
    #[error("cannot convert {context} (type {from}) to type {to}")]
    TypeMismatch {
        /// Type the value had
        from: String,
        /// Type that was required
        to: String,
        /// Query text of the offending argument
        context: String,
    },

    /// Wrong number of arguments to a function
    #[error("{0}")]
    ArgumentLength(ArgumentLengthError),

    /// Unknown function name
    #[error("no such function {name}")]
    NotFound {
        /// Name that was looked up
        name: String,
    },

    /// A group-by clause was given to a function that does not accept one
    #[error("function {name} doesn't allow a group-by clause")]
    GroupByNotAllowed {
        /// Function name
        name: String,
    },

    /// A function argument was well-typed but out of range
    #[error("{0}")]
    InvalidArgument(String),

    /// Invalid regex in a query or filter
    #[error("Cannot parse the regex: {0}")]
    InvalidRegex(String),

    /// Invalid `where` constraint supplied over HTTP
    #[error("{0}")]
    InvalidConstraint(String),

    /// Internal invariant violated
    #[error("{0}")]
    Assertion(String),
}

impl QueryError {
    /// Build an out-of-range argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        QueryError::InvalidArgument(message.into())
    }

    /// Build an assertion error
    pub fn assertion(message: impl Into<String>) -> Self {
        QueryError::Assertion(message.into())
    }

    /// HTTP status code this error should surface as
    pub fn http_status(&self) -> u16 {
        match self {
            QueryError::Assertion(_) => 500,
            _ => 400,
        }
    }

    /// True for deadline and cancellation failures
    pub fn is_timeout(&self) -> bool {
        match self {
            QueryError::Timeout => true,
            QueryError::Fetch(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// Details of an argument-count mismatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentLengthError {
    /// Function name
    pub name: String,
    /// Minimum accepted arguments
    pub expected_min: usize,
    /// Maximum accepted arguments (`None` = unlimited)
    pub expected_max: Option<usize>,
    /// Arguments actually supplied
    pub actual: usize,
}

impl fmt::Display for ArgumentLengthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.expected_max {
            Some(max) if max == self.expected_min => write!(
                f,
                "Function `{}` expected {} arguments but received {}.",
                self.name, self.expected_min, self.actual
            ),
            None => write!(
                f,
                "Function `{}` expected at least {} arguments but received {}.",
                self.name, self.expected_min, self.actual
            ),
            Some(max) => write!(
                f,
                "Function `{}` expected between {} and {} arguments but received {}.",
                self.name, self.expected_min, max, self.actual
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MetricKey, TagSet};

    #[test]
    fn test_syntax_errors_join_lines() {
        let errors = SyntaxErrors(vec![
            SyntaxError::new(1, 16, "first"),
            SyntaxError::new(2, 3, "second"),
        ]);
        assert_eq!(
            errors.to_string(),
            "line 1, column 16: first\nline 2, column 3: second"
        );
    }

    #[test]
    fn test_fetch_limit_message() {
        let err = QueryError::FetchLimitExceeded {
            total: 18,
            limit: 13,
            additional: 6,
        };
        let msg = err.to_string();
        assert!(msg.contains("18"));
        assert!(msg.contains("13"));
        assert!(msg.contains("6 additional"));
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn test_fetch_error_names_series() {
        let metric = TaggedMetric::new(
            MetricKey::from("cpu"),
            TagSet::from_pairs(&[("host", "a")]),
        );
        let err = FetchError::io("connection reset").with_metric(metric);
        assert_eq!(err.to_string(), "[cpu host=a] IO error - connection reset");
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_bound_message() {
        let err = QueryError::InvalidBound {
            lower: 5.0,
            upper: 1.0,
        };
        assert_eq!(
            err.to_string(),
            "the lower bound (5.000000) should be no more than the upper bound (1.000000) in the parameters to transform.bound( ..., 5.000000, 1.000000)"
        );
    }

    #[test]
    fn test_argument_length_messages() {
        let exact = ArgumentLengthError {
            name: "f".into(),
            expected_min: 2,
            expected_max: Some(2),
            actual: 1,
        };
        assert_eq!(exact.to_string(), "Function `f` expected 2 arguments but received 1.");
        let open = ArgumentLengthError {
            name: "f".into(),
            expected_min: 1,
            expected_max: None,
            actual: 0,
        };
        assert!(open.to_string().contains("at least 1"));
    }

    #[test]
    fn test_timeout_classification() {
        assert!(QueryError::Timeout.is_timeout());
        assert!(QueryError::Fetch(FetchError::timeout("cancelled")).is_timeout());
        assert!(!QueryError::NotFound { name: "x".into() }.is_timeout());
        assert_eq!(QueryError::assertion("empty group").http_status(), 500);
    }
}
