//! Functions callable from the query language
//!
//! A [`MetricFunction`] pairs a name and an arity with a [`FunctionBody`].
//! Most built-ins are *eager*: all arguments are evaluated in the caller's
//! context and handed over as [`Arguments`]. Functions that need data from
//! outside the caller's window (timeshift, moving windows, forecasts)
//! implement [`FunctionBody`] directly and evaluate their series argument
//! in an adjusted context.
//!
//! # Built-in families
//!
//! - `+ - * /` natural-join operators ([`join`])
//! - `aggregate.*` with `group by` / `collapse by` ([`aggregate`])
//! - `transform.*` slot-wise transforms and windowed smoothers ([`transform`])
//! - `filter.*` ranking and threshold filters ([`filter`])
//! - `summarize.*` series to scalar sets ([`summary`])
//! - `tag.*` tag rewriting ([`tag`])
//! - `forecast.*` Holt-Winters, seasonal and linear models ([`forecast`])

pub mod aggregate;
pub mod context;
pub mod filter;
pub mod forecast;
pub mod join;
pub mod registry;
pub mod summary;
pub mod tag;
pub mod transform;
pub mod value;

pub use context::{EvaluationContext, EvaluationNotes};
pub use registry::{Registry, RegistryError};
pub use value::{ConversionFailure, ScalarSet, TaggedScalar, Value};

use crate::error::{ArgumentLengthError, QueryError, Result};
use crate::query::ast::Expression;
use crate::types::{SeriesList, Timerange};
use async_trait::async_trait;
use futures::future::try_join_all;
use std::sync::Arc;

// =============================================================================
// Groups
// =============================================================================

/// A `group by` or `collapse by` clause attached to a call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Groups {
    /// Tag keys named in the clause
    pub list: Vec<String>,
    /// `collapse by` removes the keys instead of keeping them
    pub collapses: bool,
}

impl Groups {
    /// True when no clause was given
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

// =============================================================================
// Function Bodies
// =============================================================================

/// Computation behind a registered function
#[async_trait]
pub trait FunctionBody: Send + Sync {
    /// Evaluate the call
    async fn compute(
        &self,
        ctx: &EvaluationContext,
        args: &[Expression],
        groups: &Groups,
    ) -> Result<Value>;

    /// Window the first argument is evaluated over when the caller
    /// evaluates at `range`
    ///
    /// Used by the planner to negotiate a resolution that covers data
    /// fetched outside the caller's window. Only literal arguments are
    /// inspected; anything else is assumed not to move the window.
    fn first_argument_range(&self, _args: &[Expression], range: Timerange) -> Timerange {
        range
    }
}

type EagerFn = dyn Fn(&EvaluationContext, &mut Arguments<'_>, &Groups) -> Result<Value> + Send + Sync;

struct Eager(Box<EagerFn>);

#[async_trait]
impl FunctionBody for Eager {
    async fn compute(
        &self,
        ctx: &EvaluationContext,
        args: &[Expression],
        groups: &Groups,
    ) -> Result<Value> {
        let values = evaluate_all(ctx, args).await?;
        let mut arguments = Arguments::new(args, values, ctx.timerange);
        (self.0)(ctx, &mut arguments, groups)
    }
}

/// A named, arity-checked function
pub struct MetricFunction {
    /// Name used in queries
    pub name: String,
    /// Minimum argument count
    pub min_arguments: usize,
    /// Maximum argument count (`None` = unlimited)
    pub max_arguments: Option<usize>,
    /// Whether a `group by` / `collapse by` clause is accepted
    pub allows_group_by: bool,
    body: Arc<dyn FunctionBody>,
}

impl std::fmt::Debug for MetricFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricFunction")
            .field("name", &self.name)
            .field("min_arguments", &self.min_arguments)
            .field("max_arguments", &self.max_arguments)
            .field("allows_group_by", &self.allows_group_by)
            .finish()
    }
}

impl MetricFunction {
    /// Function with a custom body
    pub fn new(
        name: impl Into<String>,
        min_arguments: usize,
        max_arguments: Option<usize>,
        body: impl FunctionBody + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            min_arguments,
            max_arguments,
            allows_group_by: false,
            body: Arc::new(body),
        }
    }

    /// Function whose arguments are all evaluated in the caller's context
    pub fn eager<F>(
        name: impl Into<String>,
        min_arguments: usize,
        max_arguments: Option<usize>,
        compute: F,
    ) -> Self
    where
        F: Fn(&EvaluationContext, &mut Arguments<'_>, &Groups) -> Result<Value> + Send + Sync + 'static,
    {
        Self::new(name, min_arguments, max_arguments, Eager(Box::new(compute)))
    }

    /// Accept a `group by` / `collapse by` clause
    pub fn with_group_by(mut self) -> Self {
        self.allows_group_by = true;
        self
    }

    /// Check the call shape, then compute
    pub async fn run(
        &self,
        ctx: &EvaluationContext,
        args: &[Expression],
        groups: &Groups,
    ) -> Result<Value> {
        if !self.allows_group_by && !groups.is_empty() {
            return Err(QueryError::GroupByNotAllowed {
                name: self.name.clone(),
            });
        }
        let too_few = args.len() < self.min_arguments;
        let too_many = self.max_arguments.is_some_and(|max| args.len() > max);
        if too_few || too_many {
            return Err(QueryError::ArgumentLength(ArgumentLengthError {
                name: self.name.clone(),
                expected_min: self.min_arguments,
                expected_max: self.max_arguments,
                actual: args.len(),
            }));
        }
        self.body.compute(ctx, args, groups).await
    }

    /// See [`FunctionBody::first_argument_range`]
    pub fn first_argument_range(&self, args: &[Expression], range: Timerange) -> Timerange {
        self.body.first_argument_range(args, range)
    }
}

// =============================================================================
// Argument Helpers
// =============================================================================

/// Evaluate every expression concurrently in the same context
pub async fn evaluate_all(ctx: &EvaluationContext, exprs: &[Expression]) -> Result<Vec<Value>> {
    try_join_all(exprs.iter().map(|expr| expr.evaluate(ctx))).await
}

/// Evaluate and coerce to a series list on the context's timerange
pub async fn evaluate_to_series_list(expr: &Expression, ctx: &EvaluationContext) -> Result<SeriesList> {
    expr.evaluate(ctx)
        .await?
        .into_series_list(ctx.timerange)
        .map_err(|e| e.with_context(&expr.query_string()))
}

/// Evaluate and coerce to a scalar
pub async fn evaluate_to_scalar(expr: &Expression, ctx: &EvaluationContext) -> Result<f64> {
    expr.evaluate(ctx)
        .await?
        .to_scalar()
        .map_err(|e| e.with_context(&expr.query_string()))
}

/// Evaluate and coerce to a duration in milliseconds
pub async fn evaluate_to_duration(expr: &Expression, ctx: &EvaluationContext) -> Result<i64> {
    expr.evaluate(ctx)
        .await?
        .to_duration()
        .map_err(|e| e.with_context(&expr.query_string()))
}

/// Evaluated arguments of an eager call, coerced on demand
pub struct Arguments<'a> {
    exprs: &'a [Expression],
    values: Vec<Option<Value>>,
    timerange: Timerange,
}

impl<'a> Arguments<'a> {
    /// Wrap evaluated values together with their source expressions
    pub fn new(exprs: &'a [Expression], values: Vec<Value>, timerange: Timerange) -> Self {
        Self {
            exprs,
            values: values.into_iter().map(Some).collect(),
            timerange,
        }
    }

    /// Number of arguments supplied
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the call had no arguments
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Timerange of the calling context
    pub fn timerange(&self) -> Timerange {
        self.timerange
    }

    fn context(&self, index: usize) -> String {
        self.exprs
            .get(index)
            .map(Expression::query_string)
            .unwrap_or_default()
    }

    /// Borrow an argument without coercing it
    pub fn value(&self, index: usize) -> Result<&Value> {
        self.values
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| QueryError::assertion(format!("argument {} is not available", index)))
    }

    /// Move an argument out as a series list
    pub fn series_list(&mut self, index: usize) -> Result<SeriesList> {
        let value = self
            .values
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| QueryError::assertion(format!("argument {} is not available", index)))?;
        let context = self.context(index);
        value
            .into_series_list(self.timerange)
            .map_err(|e| e.with_context(&context))
    }

    /// Argument as a scalar
    pub fn scalar(&self, index: usize) -> Result<f64> {
        self.value(index)?
            .to_scalar()
            .map_err(|e| e.with_context(&self.context(index)))
    }

    /// Argument as a duration in milliseconds
    pub fn duration(&self, index: usize) -> Result<i64> {
        self.value(index)?
            .to_duration()
            .map_err(|e| e.with_context(&self.context(index)))
    }

    /// Optional trailing duration
    pub fn optional_duration(&self, index: usize) -> Result<Option<i64>> {
        if index < self.values.len() {
            self.duration(index).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Argument as a string
    pub fn text(&self, index: usize) -> Result<String> {
        self.value(index)?
            .to_text()
            .map_err(|e| e.with_context(&self.context(index)))
    }
}

/// Literal duration of an argument expression, if it is one
pub(crate) fn literal_duration(args: &[Expression], index: usize) -> Option<i64> {
    match args.get(index) {
        Some(Expression::Duration { millis, .. }) => Some(*millis),
        _ => None,
    }
}
