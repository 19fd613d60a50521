//! Expression tree
//!
//! An [`Expression`] is what a `select` evaluates. Operators and pipes are
//! parsed into ordinary function calls (`a + b` is `+(a, b)`, `x | f(y)` is
//! `f(x, y)`), so the tree only has six node kinds.
//!
//! Every node renders back to query syntax with
//! [`query_string`](Expression::query_string), and has a display
//! [`name`](Expression::name) that annotations and aliases can override.
//!
//! # Example
//!
//! ```rust
//! use mqe::query::ast::Expression;
//! use mqe::query::Predicate;
//! use mqe::function::Groups;
//!
//! let expr = Expression::function(
//!     "aggregate.sum",
//!     vec![Expression::metric("cpu.user", Predicate::equals("dc", "west"))],
//!     Groups { list: vec!["host".into()], collapses: false },
//! );
//! assert_eq!(expr.query_string(), r#"aggregate.sum(cpu.user[dc = "west"] group by host)"#);
//! ```

use super::escape_identifier;
use super::evaluate;
use super::predicate::Predicate;
use crate::error::Result;
use crate::function::{EvaluationContext, Groups, Value};
use futures::future::BoxFuture;

// =============================================================================
// Expression
// =============================================================================

/// A node of a parsed `select` expression
#[derive(Debug, Clone)]
pub enum Expression {
    /// Reference to a stored metric, optionally filtered
    Metric {
        /// Metric name
        name: String,
        /// Filter on the metric's tagsets (`True` when absent)
        predicate: Predicate,
    },
    /// Function or operator call
    Function {
        /// Registered function name (`+`, `aggregate.sum`, ...)
        name: String,
        /// Argument expressions in call order
        args: Vec<Expression>,
        /// Trailing `group by` / `collapse by` clause
        groups: Groups,
    },
    /// Numeric literal
    Scalar(f64),
    /// Duration literal
    Duration {
        /// Source text (`5m`, `-1h`)
        literal: String,
        /// Length in milliseconds
        millis: i64,
    },
    /// String literal
    String(String),
    /// `expr {text}`: evaluates `expr`, displayed as `text`
    Annotation {
        /// Annotated expression
        expr: Box<Expression>,
        /// Display text
        text: String,
    },
}

impl Expression {
    /// Metric reference
    pub fn metric(name: impl Into<String>, predicate: Predicate) -> Self {
        Expression::Metric {
            name: name.into(),
            predicate,
        }
    }

    /// Function call
    pub fn function(name: impl Into<String>, args: Vec<Expression>, groups: Groups) -> Self {
        Expression::Function {
            name: name.into(),
            args,
            groups,
        }
    }

    /// Binary operator call
    pub fn operator(op: &str, left: Expression, right: Expression) -> Self {
        Self::function(op, vec![left, right], Groups::default())
    }

    /// Evaluate in `ctx`
    ///
    /// Boxed so that functions can evaluate their arguments recursively.
    pub fn evaluate<'a>(&'a self, ctx: &'a EvaluationContext) -> BoxFuture<'a, Result<Value>> {
        Box::pin(evaluate::evaluate(self, ctx))
    }

    /// Render back to query syntax
    pub fn query_string(&self) -> String {
        match self {
            Expression::Metric { name, predicate } if predicate.is_true() => escape_identifier(name),
            Expression::Metric { name, predicate } => {
                format!("{}[{}]", escape_identifier(name), predicate.query())
            },
            Expression::Function { name, args, groups } => {
                let rendered: Vec<String> = args.iter().map(Expression::query_string).collect();
                format_call(name, &rendered, groups)
            },
            Expression::Scalar(value) => value.to_string(),
            Expression::Duration { literal, .. } => literal.clone(),
            Expression::String(text) => format!("{:?}", text),
            Expression::Annotation { expr, text } => format!("{} {{{}}}", expr.query_string(), text),
        }
    }

    /// Display name of the expression's result
    pub fn name(&self) -> String {
        match self {
            Expression::Annotation { text, .. } => text.clone(),
            Expression::Function { name, args, groups } => {
                if name == "transform.alias" && args.len() == 2 {
                    if let Expression::String(alias) = &args[1] {
                        return alias.clone();
                    }
                }
                let rendered: Vec<String> = args.iter().map(Expression::name).collect();
                format_call(name, &rendered, groups)
            },
            _ => self.query_string(),
        }
    }
}

fn format_call(name: &str, args: &[String], groups: &Groups) -> String {
    if matches!(name, "+" | "-" | "*" | "/") && args.len() == 2 {
        return format!("({} {} {})", args[0], name, args[1]);
    }
    let mut group_clause = String::new();
    if !groups.is_empty() {
        let keyword = if groups.collapses { "collapse by" } else { "group by" };
        let keys: Vec<String> = groups.list.iter().map(|k| escape_identifier(k)).collect();
        group_clause = format!(" {} {}", keyword, keys.join(", "));
    }
    format!("{}({}{})", name, args.join(", "), group_clause)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn duration(literal: &str, millis: i64) -> Expression {
        Expression::Duration {
            literal: literal.to_string(),
            millis,
        }
    }

    #[test]
    fn test_operator_rendering() {
        let expr = Expression::operator(
            "*",
            Expression::operator("+", Expression::metric("a", Predicate::True), Expression::Scalar(2.0)),
            Expression::Scalar(0.5),
        );
        assert_eq!(expr.query_string(), "((a + 2) * 0.5)");
    }

    #[test]
    fn test_function_rendering() {
        let expr = Expression::function(
            "transform.moving_average",
            vec![Expression::metric("from", Predicate::True), duration("5m", 300_000)],
            Groups::default(),
        );
        assert_eq!(expr.query_string(), "transform.moving_average(`from`, 5m)");

        let collapsed = Expression::function(
            "aggregate.max",
            vec![Expression::metric("m", Predicate::True)],
            Groups {
                list: vec!["dc".into(), "odd-key".into()],
                collapses: true,
            },
        );
        assert_eq!(collapsed.query_string(), "aggregate.max(m collapse by dc, `odd-key`)");
    }

    #[test]
    fn test_names() {
        let annotated = Expression::Annotation {
            expr: Box::new(Expression::metric("m", Predicate::True)),
            text: "my series".to_string(),
        };
        assert_eq!(annotated.query_string(), "m {my series}");
        assert_eq!(annotated.name(), "my series");

        let alias = Expression::function(
            "transform.alias",
            vec![Expression::metric("m", Predicate::True), Expression::String("renamed".into())],
            Groups::default(),
        );
        assert_eq!(alias.name(), "renamed");
        assert_eq!(alias.query_string(), r#"transform.alias(m, "renamed")"#);

        // Names of nested calls use the names of their arguments
        let outer = Expression::function("transform.abs", vec![annotated], Groups::default());
        assert_eq!(outer.name(), "transform.abs(my series)");
        assert_eq!(outer.query_string(), "transform.abs(m {my series})");
    }
}
