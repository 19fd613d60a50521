//! Parser Diagnostics
//!
//! Syntax errors must quote the user's text and point at the exact line and
//! column where parsing stopped. Each case below is a query a user could
//! plausibly type and the single message it must produce.

use mqe::query::parser::parse;
use mqe::QueryError;

fn syntax_messages(query: &str) -> Vec<String> {
    match parse(query) {
        Ok(command) => panic!("expected {:?} to fail, parsed {:?}", query, command.name()),
        Err(QueryError::Syntax(errors)) => errors.0.iter().map(|e| e.to_string()).collect(),
        Err(other) => panic!("expected a syntax error for {:?}, got {:?}", query, other),
    }
}

fn assert_single_error(query: &str, expected: &str) {
    let messages = syntax_messages(query);
    assert_eq!(messages, vec![expected.to_string()], "query: {:?}", query);
}

// =============================================================================
// Property Clause
// =============================================================================

#[test]
fn test_missing_from_value() {
    assert_single_error(
        "select foo from",
        "line 1, column 16: expected value to follow key 'from' in property clause of select statement",
    );
}

#[test]
fn test_where_after_property_clause() {
    assert_single_error(
        "select foo\nfrom -30m to now\nwhere app = 'mqe'",
        r#"line 3, column 6: encountered "where" after property clause; "where" blocks must go BEFORE 'from' and 'to' specifiers in property clause of select statement"#,
    );
}

#[test]
fn test_unknown_word_as_property_value() {
    assert_single_error(
        "select foo\nfrom -30m to mow",
        "line 2, column 13: expected value to follow key 'to' in property clause of select statement",
    );
    assert_single_error(
        "select foo + bar[blah='22']\nwhere tag != 'value' and qux = 'qux'\nfrom -30m to mow",
        "line 3, column 13: expected value to follow key 'to' in property clause of select statement",
    );
}

// =============================================================================
// Expressions
// =============================================================================

#[test]
fn test_unclosed_predicate_bracket() {
    assert_single_error(
        "select foo + bar[\nwhere tag != 'value' and qux = 'qux'\nfrom -30m to mow",
        r#"line 1, column 18: expected predicate to follow "[" after metric"#,
    );
}

#[test]
fn test_garbage_after_expression() {
    assert_single_error(
        "select crazy#2dinvalid.metric + bar\nwhere tag != 'value' and qux = 'qux'\nfrom -30m to now",
        r##"line 1, column 13: expected key (one of 'from', 'to', 'resolution', or 'sample by') or end of input but got "#2dinvalid.metric + bar\nwhere tag != 'value' and qux = 'qux'\nfrom -30m to now" following a completed expression"##,
    );
}

#[test]
fn test_misspelled_select() {
    assert_single_error(
        "serlect foo from -30m to now",
        r#"line 1, column 9: expected key (one of 'from', 'to', 'resolution', or 'sample by') or end of input but got "foo from -30m to now" following a completed expression"#,
    );
}

#[test]
fn test_trailing_comma() {
    assert_single_error(
        "select foo, bar,\nfrom -30m to now",
        r#"line 1, column 17: expected expression to follow ",""#,
    );
}

// =============================================================================
// Predicates
// =============================================================================

#[test]
fn test_dangling_and() {
    assert_single_error(
        "select foo, bar[host = 'x' and]\nfrom -30m to now",
        r#"line 1, column 31: expected predicate to follow "and" operator"#,
    );
    assert_single_error(
        "select foo, bar[host = 'x' and '2']\nfrom -30m to now",
        r#"line 1, column 31: expected predicate to follow "and" operator"#,
    );
}

// =============================================================================
// Describe
// =============================================================================

#[test]
fn test_describe_all_rejects_where() {
    assert_single_error(
        "describe all where host = 'foo'",
        r#"line 1, column 14: expected end of input after 'describe all' and optional match clause but got "where host = 'foo'""#,
    );
}

// =============================================================================
// Rendering
// =============================================================================

#[test]
fn test_error_string_is_the_message() {
    let err = parse("select foo from").unwrap_err();
    assert_eq!(err.http_status(), 400);
    assert_eq!(
        err.to_string(),
        "line 1, column 16: expected value to follow key 'from' in property clause of select statement"
    );
}

#[test]
fn test_valid_queries_parse() {
    for query in [
        "select foo from -30m to now",
        "select foo + bar[blah = '22'] where tag != 'value' and qux = 'qux' from -30m to now",
        "describe all",
        "describe all match '^cpu'",
        "describe foo where host = 'a'",
        "describe metrics where host = 'a'",
    ] {
        assert!(parse(query).is_ok(), "query failed to parse: {:?}", query);
    }
}
