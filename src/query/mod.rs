//! Query language front end and command execution
//!
//! This module turns query text into results:
//! - **Parse**: [`parser`] produces a [`command::Command`] or a batch of
//!   positioned syntax errors
//! - **Plan**: [`plan`] computes the widened fetch span of an expression so
//!   the storage backend can pick a resolution that covers it
//! - **Evaluate**: [`evaluate`] walks the expression tree, fetching leaf
//!   metrics in parallel and applying registered functions
//! - **Shape**: [`command`] assembles the per-expression results and the
//!   metadata returned to the caller
//!
//! # Architecture
//!
//! ```text
//! Query String
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Parse     │  recursive descent → Command
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Plan      │  resolution negotiation, slot limit
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Evaluate   │  metadata → predicate → parallel fetch → functions
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Shape     │  series / scalars + description + notes
//! └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use mqe::query::parser::parse;
//!
//! let command = parse("select cpu.usage[host = 'web-1'] | transform.abs from -1h to now").unwrap();
//! assert_eq!(command.name(), "select");
//! ```

pub mod ast;
pub mod command;
pub mod constraint;
pub mod evaluate;
pub mod natural_sort;
pub mod parser;
pub mod plan;
pub mod predicate;

pub use ast::Expression;
pub use command::{Command, CommandResult, ExecutionContext, QueryResult};
pub use predicate::Predicate;

/// Render an identifier so it parses back to the same name
///
/// Plain dotted identifiers (`cpu.usage`, `host`) are returned unchanged;
/// anything else is wrapped in backticks with inner backticks and
/// backslashes escaped.
pub fn escape_identifier(name: &str) -> String {
    if is_plain_identifier(name) {
        return name.to_string();
    }
    let mut out = String::with_capacity(name.len() + 2);
    out.push('`');
    for c in name.chars() {
        if c == '`' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('`');
    out
}

fn is_plain_identifier(name: &str) -> bool {
    if name.is_empty() || parser::lexer::is_keyword(name) {
        return false;
    }
    name.split('.').all(|segment| {
        let mut chars = segment.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            },
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_plain_identifiers() {
        assert_eq!(escape_identifier("cpu.usage"), "cpu.usage");
        assert_eq!(escape_identifier("_host2"), "_host2");
    }

    #[test]
    fn test_escape_quoted_identifiers() {
        assert_eq!(escape_identifier("odd-key"), "`odd-key`");
        assert_eq!(escape_identifier("1abc"), "`1abc`");
        assert_eq!(escape_identifier("a..b"), "`a..b`");
        assert_eq!(escape_identifier("from"), "`from`");
        assert_eq!(escape_identifier("x`y"), "`x\\`y`");
    }
}
