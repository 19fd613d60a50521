//! Query Parser Module
//!
//! Turns query text into a [`Command`]. Parsing happens in three layers:
//! - [`lexer`]: nom scanners producing positioned tokens (keywords are
//!   case-insensitive, identifiers may be dotted or backtick-quoted)
//! - [`grammar`]: recursive descent over the tokens
//! - [`property`]: the `from`/`to`/`resolution`/`sample by` values
//!
//! # Supported Statements
//!
//! ```sql
//! select cpu.user[host match '^web'] | aggregate.max group by dc
//!     from -1h to now resolution '1m'
//! describe all match '^cpu'
//! describe cpu.user where dc = 'west'
//! describe metrics where host = 'web-1'
//! ```
//!
//! # Example
//!
//! ```rust
//! use mqe::query::parser::parse_at;
//!
//! let err = parse_at("select foo from", 0).unwrap_err();
//! assert_eq!(
//!     err.to_string(),
//!     "line 1, column 16: expected value to follow key 'from' in property clause of select statement"
//! );
//! ```

pub mod grammar;
pub mod lexer;
pub mod property;

use super::command::Command;
use crate::error::Result;
use chrono::Utc;
use grammar::Grammar;

/// Parse a query, resolving relative times against the current clock
pub fn parse(query: &str) -> Result<Command> {
    parse_at(query, Utc::now().timestamp_millis())
}

/// Parse a query with `now` (epoch milliseconds) as the reference time
///
/// All diagnostics are returned together as [`QueryError::Syntax`].
///
/// [`QueryError::Syntax`]: crate::error::QueryError::Syntax
pub fn parse_at(query: &str, now: i64) -> Result<Command> {
    Ok(Grammar::new(query, now).parse()?)
}
