//! Recursive-descent grammar over the token stream
//!
//! ```text
//! select    = ["select"] exprlist ["where" pred] property*
//! property  = ("from" | "to" | "resolution" | "sample" "by") value
//! describe  = "describe" ( "all" ["match" string]
//!                        | "metrics" "where" tag "=" string
//!                        | metric ["where" pred] )
//! exprlist  = expr ("," expr)*
//! expr      = sum pipe*
//! sum       = product (pipe* ("+" | "-") product)*
//! product   = atom (pipe* ("*" | "/") atom)*
//! atom      = (call | metric | "(" expr ")" | duration | number | string) [annotation]
//! pipe      = "|" name ["(" [exprlist] [groups] ")"] [annotation]
//! call      = name "(" exprlist [groups] ")"
//! metric    = name ["[" pred "]"]
//! groups    = ("group" | "collapse") "by" tag ("," tag)*
//! pred      = and ["or" pred]
//! and       = not ["and" and]
//! not       = "not" not | "(" pred ")" | tag ("=" | "!=" | "match") string
//!           | tag "in" "(" string ("," string)* ")"
//! ```
//!
//! Pipes in front of an operator bind to the running sum or product
//! (`a * b | f + c` is `f(a * b) + c`); pipes that no operator follows are
//! given back and bind to the whole expression.
//!
//! Grammar errors stop parsing at the first one. "expected X to follow Y"
//! errors point just past `Y`; errors quoting the rest of the input point at
//! its first token. Problems with well-formed input (bad dates, regexes,
//! duplicate keys) are collected and reported together once the whole
//! query has been read.

use super::lexer::{line_column, tokenize, Keyword, Symbol, Token, TokenKind};
use super::property::{parse_duration, PropertyClause};
use crate::error::{SyntaxError, SyntaxErrors};
use crate::function::Groups;
use crate::query::ast::Expression;
use crate::query::command::{
    Command, DescribeAllCommand, DescribeCommand, DescribeMetricsCommand, SelectCommand, SelectContext,
};
use crate::query::predicate::Predicate;
use regex::Regex;

type Step<T> = std::result::Result<T, SyntaxError>;

const PROPERTY_CONTEXT: &str = "in property clause of select statement";

/// Unsigned-or-negated numeric token text
enum Numeric {
    Number(String),
    Duration(String),
}

/// Parser state for one query
pub(crate) struct Grammar<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    index: usize,
    now: i64,
    problems: Vec<SyntaxError>,
}

impl<'a> Grammar<'a> {
    /// Prepare to parse `input`, resolving relative times against `now`
    pub fn new(input: &'a str, now: i64) -> Self {
        Self {
            input,
            tokens: tokenize(input),
            index: 0,
            now,
            problems: Vec::new(),
        }
    }

    /// Parse a complete command
    pub fn parse(mut self) -> Result<Command, SyntaxErrors> {
        let command = self.command().map_err(|e| SyntaxErrors(vec![e]))?;
        if !self.problems.is_empty() {
            return Err(SyntaxErrors(self.problems));
        }
        Ok(command)
    }

    // =========================================================================
    // Token access
    // =========================================================================

    fn current(&self) -> &Token {
        &self.tokens[self.index]
    }

    /// Kind of the next token; a lexical error surfaces here
    fn peek(&self) -> Step<&TokenKind> {
        let token = self.current();
        match &token.kind {
            TokenKind::Error(message) => Err(self.error_at(token.start, message.clone())),
            kind => Ok(kind),
        }
    }

    fn bump(&mut self) -> Token {
        let token = self.current().clone();
        if token.kind != TokenKind::End {
            self.index += 1;
        }
        token
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> Step<bool> {
        let found = *self.peek()? == TokenKind::Keyword(keyword);
        if found {
            self.bump();
        }
        Ok(found)
    }

    fn eat_symbol(&mut self, symbol: Symbol) -> Step<bool> {
        let found = *self.peek()? == TokenKind::Symbol(symbol);
        if found {
            self.bump();
        }
        Ok(found)
    }

    fn identifier(&mut self) -> Step<Option<String>> {
        let name = match self.peek()? {
            TokenKind::Identifier(name) => name.clone(),
            _ => return Ok(None),
        };
        self.bump();
        Ok(Some(name))
    }

    fn string(&mut self) -> Step<Option<String>> {
        let text = match self.peek()? {
            TokenKind::String(text) => text.clone(),
            _ => return Ok(None),
        };
        self.bump();
        Ok(Some(text))
    }

    /// A number or duration, with a `-` glued on when it touches the literal
    fn numeric(&mut self) -> Step<Option<Numeric>> {
        let (sign, at) = match self.peek()? {
            TokenKind::Symbol(Symbol::Minus) => {
                let minus = self.current();
                let next = &self.tokens[self.index + 1];
                if next.start != minus.end {
                    return Ok(None);
                }
                ("-", self.index + 1)
            },
            _ => ("", self.index),
        };
        let literal = match &self.tokens[at].kind {
            TokenKind::Number(text) => Numeric::Number(format!("{}{}", sign, text)),
            TokenKind::Duration(text) => Numeric::Duration(format!("{}{}", sign, text)),
            _ => return Ok(None),
        };
        self.index = at + 1;
        Ok(Some(literal))
    }

    fn at_end(&self) -> Step<bool> {
        Ok(*self.peek()? == TokenKind::End)
    }

    fn remaining(&self) -> &'a str {
        let input = self.input;
        &input[self.current().start..]
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    fn error_at(&self, offset: usize, message: impl Into<String>) -> SyntaxError {
        let (line, column) = line_column(self.input, offset);
        SyntaxError::new(line, column, message)
    }

    /// Error positioned just past the last consumed token
    fn expected(&self, message: impl Into<String>) -> SyntaxError {
        let offset = match self.index {
            0 => 0,
            i => self.tokens[i - 1].end,
        };
        self.error_at(offset, message)
    }

    /// Error positioned at the next token
    fn unexpected(&self, message: impl Into<String>) -> SyntaxError {
        self.error_at(self.current().start, message)
    }

    /// Record a problem and keep parsing
    fn flag(&mut self, offset: usize, message: impl Into<String>) {
        let problem = self.error_at(offset, message);
        self.problems.push(problem);
    }

    fn checkpoint(&self) -> (usize, usize) {
        (self.index, self.problems.len())
    }

    fn rollback(&mut self, (index, problems): (usize, usize)) {
        self.index = index;
        self.problems.truncate(problems);
    }

    fn compile_regex(&mut self, pattern: &str, offset: usize) -> Option<Regex> {
        match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                self.flag(offset, format!("Cannot parse the regex: {}", e));
                None
            },
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn command(&mut self) -> Step<Command> {
        if self.eat_keyword(Keyword::Describe)? {
            return self.describe();
        }
        self.select()
    }

    fn end_of_input(&self) -> Step<()> {
        if self.at_end()? {
            return Ok(());
        }
        Err(self.unexpected(format!("expected end of input but got {:?}", self.remaining())))
    }

    fn select(&mut self) -> Step<Command> {
        let keyword = self.eat_keyword(Keyword::Select)?;
        let expressions = match self.expression_list()? {
            Some(expressions) => expressions,
            None if keyword => return Err(self.expected(r#"expected expression to follow keyword "select""#)),
            None => {
                return Err(self.unexpected(format!(
                    r#"expected "select" or "describe" statement but got {:?}"#,
                    self.remaining()
                )))
            },
        };
        let predicate = self.where_clause()?.unwrap_or_default();
        let context = self.property_clause()?;
        Ok(Command::Select(SelectCommand {
            expressions,
            predicate,
            context,
        }))
    }

    fn where_clause(&mut self) -> Step<Option<Predicate>> {
        if !self.eat_keyword(Keyword::Where)? {
            return Ok(None);
        }
        let predicate = self
            .predicate()?
            .ok_or_else(|| self.expected(r#"expected predicate to follow "where" keyword"#))?;
        Ok(Some(predicate))
    }

    fn property_clause(&mut self) -> Step<SelectContext> {
        let mut clause = PropertyClause::default();
        loop {
            let key = match self.peek()? {
                TokenKind::Keyword(Keyword::From) => "from",
                TokenKind::Keyword(Keyword::To) => "to",
                TokenKind::Keyword(Keyword::Resolution) => "resolution",
                TokenKind::Keyword(Keyword::Sample) => "sample",
                TokenKind::Keyword(Keyword::Where) => {
                    self.bump();
                    return Err(self.expected(format!(
                        "encountered \"where\" after property clause; \"where\" blocks must go BEFORE 'from' and 'to' specifiers {}",
                        PROPERTY_CONTEXT
                    )));
                },
                TokenKind::End => break,
                _ => {
                    return Err(self.unexpected(format!(
                        "expected key (one of 'from', 'to', 'resolution', or 'sample by') or end of input but got {:?} following a completed expression",
                        self.remaining()
                    )))
                },
            };
            let key_token = self.bump();
            let input = self.input;
            let written = &input[key_token.start..key_token.end];
            if key == "sample" && !self.eat_keyword(Keyword::By)? {
                return Err(self.expected(format!(
                    r#"expected keyword "by" to follow keyword "sample" {}"#,
                    PROPERTY_CONTEXT
                )));
            }

            let offset = self.current().start;
            let Some(value) = self.property_value()? else {
                return Err(self.expected(format!(
                    "expected value to follow key '{}' {}",
                    written, PROPERTY_CONTEXT
                )));
            };
            for problem in clause.assign(key, &value, self.now) {
                self.flag(offset, problem);
            }
        }

        match clause.finish(self.now) {
            Ok(context) => Ok(context),
            Err(problems) => {
                for problem in problems {
                    self.flag(self.input.len(), problem);
                }
                Ok(SelectContext::default())
            },
        }
    }

    fn property_value(&mut self) -> Step<Option<String>> {
        match self.peek()? {
            TokenKind::String(text) => {
                let text = text.clone();
                self.bump();
                Ok(Some(text))
            },
            TokenKind::Identifier(word) if word.eq_ignore_ascii_case("now") => {
                self.bump();
                Ok(Some("now".to_string()))
            },
            _ => Ok(self.numeric()?.map(|literal| match literal {
                Numeric::Number(text) | Numeric::Duration(text) => text,
            })),
        }
    }

    fn describe(&mut self) -> Step<Command> {
        if self.eat_keyword(Keyword::All)? {
            let mut matcher = None;
            if self.eat_keyword(Keyword::Match)? {
                let offset = self.current().start;
                let pattern = self
                    .string()?
                    .ok_or_else(|| self.expected(r#"expected string literal to follow keyword "match""#))?;
                matcher = self.compile_regex(&pattern, offset);
            }
            if !self.at_end()? {
                return Err(self.unexpected(format!(
                    "expected end of input after 'describe all' and optional match clause but got {:?}",
                    self.remaining()
                )));
            }
            return Ok(Command::DescribeAll(DescribeAllCommand { matcher }));
        }

        if self.eat_keyword(Keyword::Metrics)? {
            const COMMAND: &str = r#"in "describe metrics" command"#;
            if !self.eat_keyword(Keyword::Where)? {
                return Err(self.expected(format!(r#"expected "where" to follow keyword "metrics" {}"#, COMMAND)));
            }
            let tag = self
                .identifier()?
                .ok_or_else(|| self.expected(format!(r#"expected tag key to follow keyword "where" {}"#, COMMAND)))?;
            if !self.eat_symbol(Symbol::Equals)? {
                return Err(self.expected(format!(r#"expected "=" to follow keyword "where" {}"#, COMMAND)));
            }
            let value = self
                .string()?
                .ok_or_else(|| self.expected(format!(r#"expected string literal to follow "=" {}"#, COMMAND)))?;
            self.end_of_input()?;
            return Ok(Command::DescribeMetrics(DescribeMetricsCommand { tag, value }));
        }

        let metric = self
            .identifier()?
            .ok_or_else(|| self.expected(r#"expected metric name to follow "describe" in "describe" command"#))?;
        let predicate = self.where_clause()?.unwrap_or_default();
        self.end_of_input()?;
        Ok(Command::Describe(DescribeCommand { metric, predicate }))
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn expression_list(&mut self) -> Step<Option<Vec<Expression>>> {
        let Some(first) = self.expression()? else {
            return Ok(None);
        };
        let mut list = vec![first];
        while self.eat_symbol(Symbol::Comma)? {
            let next = self
                .expression()?
                .ok_or_else(|| self.expected(r#"expected expression to follow ",""#))?;
            list.push(next);
        }
        Ok(Some(list))
    }

    fn expression(&mut self) -> Step<Option<Expression>> {
        let Some(sum) = self.sum()? else {
            return Ok(None);
        };
        self.pipes(sum).map(Some)
    }

    fn sum(&mut self) -> Step<Option<Expression>> {
        let Some(mut left) = self.product()? else {
            return Ok(None);
        };
        loop {
            let checkpoint = self.checkpoint();
            let piped = self.pipes(left.clone())?;
            let operator = if self.eat_symbol(Symbol::Plus)? {
                "+"
            } else if self.eat_symbol(Symbol::Minus)? {
                "-"
            } else {
                self.rollback(checkpoint);
                return Ok(Some(left));
            };
            let right = self
                .product()?
                .ok_or_else(|| self.expected(r#"expected expression to follow operator "+" or "-""#))?;
            left = Expression::operator(operator, piped, right);
        }
    }

    fn product(&mut self) -> Step<Option<Expression>> {
        let Some(mut left) = self.atom()? else {
            return Ok(None);
        };
        loop {
            let checkpoint = self.checkpoint();
            let piped = self.pipes(left.clone())?;
            let operator = if self.eat_symbol(Symbol::Star)? {
                "*"
            } else if self.eat_symbol(Symbol::Slash)? {
                "/"
            } else {
                self.rollback(checkpoint);
                return Ok(Some(left));
            };
            let right = self
                .atom()?
                .ok_or_else(|| self.expected(r#"expected expression to follow operator "*" or "/""#))?;
            left = Expression::operator(operator, piped, right);
        }
    }

    fn pipes(&mut self, mut target: Expression) -> Step<Expression> {
        while self.eat_symbol(Symbol::Pipe)? {
            let name = self
                .identifier()?
                .ok_or_else(|| self.expected(r#"expected function name to follow pipe "|""#))?;
            let mut args = vec![target];
            let mut groups = Groups::default();
            if self.eat_symbol(Symbol::OpenParen)? {
                if let Some(rest) = self.expression_list()? {
                    args.extend(rest);
                }
                groups = self.groups()?;
                if !self.eat_symbol(Symbol::CloseParen)? {
                    return Err(self.expected(r#"expected ")" to close "(" opened in pipe function call"#));
                }
            }
            target = self.annotate(Expression::function(name, args, groups))?;
        }
        Ok(target)
    }

    fn annotate(&mut self, expr: Expression) -> Step<Expression> {
        let text = match self.peek()? {
            TokenKind::Annotation(text) => text.clone(),
            _ => return Ok(expr),
        };
        self.bump();
        Ok(Expression::Annotation {
            expr: Box::new(expr),
            text,
        })
    }

    fn atom(&mut self) -> Step<Option<Expression>> {
        let Some(raw) = self.atom_raw()? else {
            return Ok(None);
        };
        self.annotate(raw).map(Some)
    }

    fn atom_raw(&mut self) -> Step<Option<Expression>> {
        let offset = self.current().start;

        if let Some(name) = self.identifier()? {
            if self.eat_symbol(Symbol::OpenParen)? {
                let args = self
                    .expression_list()?
                    .ok_or_else(|| self.expected(r#"expected expression list to follow "(" in function call"#))?;
                let groups = self.groups()?;
                if !self.eat_symbol(Symbol::CloseParen)? {
                    return Err(self.expected(r#"expected ")" to close "(" opened by function call"#));
                }
                return Ok(Some(Expression::function(name, args, groups)));
            }
            let mut predicate = Predicate::True;
            if self.eat_symbol(Symbol::OpenBracket)? {
                predicate = self
                    .predicate()?
                    .ok_or_else(|| self.expected(r#"expected predicate to follow "[" after metric"#))?;
                if !self.eat_symbol(Symbol::CloseBracket)? {
                    return Err(self.expected(r#"expected "]" to close "[" opened to apply predicate"#));
                }
            }
            return Ok(Some(Expression::metric(name, predicate)));
        }

        if self.eat_symbol(Symbol::OpenParen)? {
            let inner = self
                .expression()?
                .ok_or_else(|| self.expected(r#"expected expression to follow "(""#))?;
            if !self.eat_symbol(Symbol::CloseParen)? {
                return Err(self.expected(r#"expected ")" to close "(""#));
            }
            return Ok(Some(inner));
        }

        match self.numeric()? {
            Some(Numeric::Duration(literal)) => {
                let millis = parse_duration(&literal).unwrap_or_else(|e| {
                    self.flag(offset, format!("'{}' is not a valid duration: {}", literal, e));
                    0
                });
                return Ok(Some(Expression::Duration { literal, millis }));
            },
            Some(Numeric::Number(literal)) => {
                let value = match literal.parse::<f64>() {
                    Ok(value) if value.is_finite() => value,
                    _ => {
                        self.flag(offset, format!("Cannot parse the number: {}", literal));
                        f64::NAN
                    },
                };
                return Ok(Some(Expression::Scalar(value)));
            },
            None => {},
        }

        Ok(self.string()?.map(Expression::String))
    }

    fn groups(&mut self) -> Step<Groups> {
        let (collapses, word) = if self.eat_keyword(Keyword::Group)? {
            (false, "group")
        } else if self.eat_keyword(Keyword::Collapse)? {
            (true, "collapse")
        } else {
            return Ok(Groups::default());
        };
        if !self.eat_keyword(Keyword::By)? {
            return Err(self.expected(format!(
                r#"expected keyword "by" to follow keyword "{0}" in "{0} by" clause"#,
                word
            )));
        }
        let first = self.identifier()?.ok_or_else(|| {
            self.expected(format!(
                r#"expected tag key identifier to follow "{0} by" keywords in "{0} by" clause"#,
                word
            ))
        })?;
        let mut list = vec![first];
        while self.eat_symbol(Symbol::Comma)? {
            let key = self.identifier()?.ok_or_else(|| {
                self.expected(format!(r#"expected tag key identifier to follow "," in "{} by" clause"#, word))
            })?;
            list.push(key);
        }
        Ok(Groups { list, collapses })
    }

    // =========================================================================
    // Predicates
    // =========================================================================

    fn predicate(&mut self) -> Step<Option<Predicate>> {
        let Some(left) = self.predicate_and()? else {
            return Ok(None);
        };
        if !self.eat_keyword(Keyword::Or)? {
            return Ok(Some(left));
        }
        let right = self
            .predicate()?
            .ok_or_else(|| self.expected(r#"expected predicate to follow "or" operator"#))?;
        Ok(Some(Predicate::Or(vec![left, right])))
    }

    fn predicate_and(&mut self) -> Step<Option<Predicate>> {
        let Some(left) = self.predicate_not()? else {
            return Ok(None);
        };
        if !self.eat_keyword(Keyword::And)? {
            return Ok(Some(left));
        }
        let right = self
            .predicate_and()?
            .ok_or_else(|| self.expected(r#"expected predicate to follow "and" operator"#))?;
        Ok(Some(Predicate::And(vec![left, right])))
    }

    fn predicate_not(&mut self) -> Step<Option<Predicate>> {
        if self.eat_keyword(Keyword::Not)? {
            let inner = self
                .predicate_not()?
                .ok_or_else(|| self.expected(r#"expected predicate to follow "not" operator"#))?;
            return Ok(Some(Predicate::negate(inner)));
        }
        if self.eat_symbol(Symbol::OpenParen)? {
            let inner = self
                .predicate()?
                .ok_or_else(|| self.expected(r#"expected predicate to follow "(""#))?;
            if !self.eat_symbol(Symbol::CloseParen)? {
                return Err(self.expected(r#"expected ")" to close "(" opened in predicate"#));
            }
            return Ok(Some(inner));
        }
        self.tag_matcher()
    }

    fn tag_matcher(&mut self) -> Step<Option<Predicate>> {
        let Some(tag) = self.identifier()? else {
            return Ok(None);
        };

        if self.eat_symbol(Symbol::Equals)? {
            let value = self
                .string()?
                .ok_or_else(|| self.expected(r#"expected string literal to follow "=""#))?;
            return Ok(Some(Predicate::equals(tag, value)));
        }
        if self.eat_symbol(Symbol::NotEquals)? {
            let value = self
                .string()?
                .ok_or_else(|| self.expected(r#"expected string literal to follow "!=""#))?;
            return Ok(Some(Predicate::negate(Predicate::equals(tag, value))));
        }
        if self.eat_keyword(Keyword::Match)? {
            let offset = self.current().start;
            let pattern = self
                .string()?
                .ok_or_else(|| self.expected(r#"expected regex string literal to follow "match""#))?;
            return Ok(Some(match self.compile_regex(&pattern, offset) {
                Some(regex) => Predicate::RegexMatch { tag, regex },
                None => Predicate::False,
            }));
        }
        if self.eat_keyword(Keyword::In)? {
            let values = self
                .literal_list()?
                .ok_or_else(|| self.expected(r#"expected string literal list to follow "in" keyword"#))?;
            return Ok(Some(Predicate::ListMatch { tag, values }));
        }
        Err(self.expected(r#"expected "=", "!=", "match", or "in" to follow tag key in predicate"#))
    }

    fn literal_list(&mut self) -> Step<Option<Vec<String>>> {
        if !self.eat_symbol(Symbol::OpenParen)? {
            return Ok(None);
        }
        let first = self
            .string()?
            .ok_or_else(|| self.expected(r#"expected string literal to follow "(" in literal list"#))?;
        let mut values = vec![first];
        while self.eat_symbol(Symbol::Comma)? {
            let value = self
                .string()?
                .ok_or_else(|| self.expected(r#"expected string literal to follow "," in literal list"#))?;
            values.push(value);
        }
        if !self.eat_symbol(Symbol::CloseParen)? {
            return Err(self.expected(r#"expected ")" to close "(" for literal list"#));
        }
        Ok(Some(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SampleMethod, TagSet};

    const NOW: i64 = 1_433_203_200_000;

    fn parse(query: &str) -> Result<Command, SyntaxErrors> {
        Grammar::new(query, NOW).parse()
    }

    fn select(query: &str) -> SelectCommand {
        match parse(query) {
            Ok(Command::Select(select)) => select,
            other => panic!("expected select from {:?}, got {:?}", query, other),
        }
    }

    fn rendered(query: &str) -> Vec<String> {
        select(query).expressions.iter().map(Expression::query_string).collect()
    }

    fn messages(query: &str) -> Vec<String> {
        match parse(query) {
            Err(errors) => errors.0.into_iter().map(|e| e.to_string()).collect(),
            Ok(command) => panic!("expected errors from {:?}, got {:?}", query, command),
        }
    }

    #[test]
    fn test_select_keyword_is_optional() {
        assert_eq!(rendered("cpu from -1h to now"), vec!["cpu"]);
        assert_eq!(rendered("SELECT cpu, mem FROM -1h TO now"), vec!["cpu", "mem"]);
    }

    #[test]
    fn test_operator_precedence() {
        assert_eq!(rendered("select a + b * c from 0 to 0"), vec!["(a + (b * c))"]);
        assert_eq!(rendered("select (a + b) * c from 0 to 0"), vec!["((a + b) * c)"]);
        assert_eq!(rendered("select a - b - c from 0 to 0"), vec!["((a - b) - c)"]);
        assert_eq!(rendered("select a / -2 from 0 to 0"), vec!["(a / -2)"]);
    }

    #[test]
    fn test_pipes_become_calls() {
        assert_eq!(
            rendered("select cpu | transform.moving_average(5m) | aggregate.sum(group by dc) from 0 to 0"),
            vec!["aggregate.sum(transform.moving_average(cpu, 5m) group by dc)"]
        );
        assert_eq!(rendered("select a * b | transform.abs + c from 0 to 0"), vec!["(transform.abs((a * b)) + c)"]);
        assert_eq!(rendered("select a + b | transform.abs from 0 to 0"), vec!["transform.abs((a + b))"]);
    }

    #[test]
    fn test_function_call_with_collapse() {
        let command = select("select aggregate.max(cpu collapse by host, dc) from 0 to 0");
        match &command.expressions[0] {
            Expression::Function { name, args, groups } => {
                assert_eq!(name, "aggregate.max");
                assert_eq!(args.len(), 1);
                assert_eq!(groups.list, vec!["host", "dc"]);
                assert!(groups.collapses);
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_annotations_rename() {
        let command = select("select cpu {busy} | transform.abs {absolute} from 0 to 0");
        assert_eq!(command.expressions[0].name(), "absolute");
        match &command.expressions[0] {
            Expression::Annotation { expr, .. } => match expr.as_ref() {
                Expression::Function { args, .. } => assert_eq!(args[0].name(), "busy"),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_predicates() {
        let command = select(
            "select cpu[host match '^web' and not dc in ('east', 'north')] where app = 'mqe' or app != 'x' from 0 to 0",
        );
        let tags = |host: &str, dc: &str| TagSet::from_pairs(&[("host", host), ("dc", dc)]);
        match &command.expressions[0] {
            Expression::Metric { predicate, .. } => {
                assert!(predicate.apply(&tags("web-1", "west")));
                assert!(!predicate.apply(&tags("web-1", "east")));
                assert!(!predicate.apply(&tags("db-1", "west")));
            },
            other => panic!("unexpected {:?}", other),
        }
        assert!(command.predicate.apply(&TagSet::from_pairs(&[("app", "mqe")])));
        assert!(command.predicate.apply(&TagSet::from_pairs(&[("app", "y")])));
        assert!(!command.predicate.apply(&TagSet::from_pairs(&[("app", "x")])));
    }

    #[test]
    fn test_literals() {
        let command = select("select 1.5e3, 30s, 'text', \"quoted\" from 0 to 0");
        assert!(matches!(command.expressions[0], Expression::Scalar(v) if v == 1500.0));
        assert!(matches!(&command.expressions[1], Expression::Duration { millis: 30_000, .. }));
        assert!(matches!(&command.expressions[2], Expression::String(s) if s == "text"));
        assert!(matches!(&command.expressions[3], Expression::String(s) if s == "quoted"));
    }

    #[test]
    fn test_property_clause() {
        let command = select("select cpu from -1h to -30m resolution '5m' sample by 'max'");
        assert_eq!(command.context.start, NOW - 3_600_000);
        assert_eq!(command.context.end, NOW - 1_800_000);
        assert_eq!(command.context.resolution, 300_000);
        assert_eq!(command.context.sample_method, SampleMethod::Max);

        let command = select("select cpu from 1433116800000");
        assert_eq!(command.context.start, 1_433_116_800_000);
        assert_eq!(command.context.end, NOW);
        assert_eq!(command.context.resolution, 30_000);
        assert_eq!(command.context.sample_method, SampleMethod::Mean);
    }

    #[test]
    fn test_describe_forms() {
        match parse("describe all match '^cpu'").unwrap() {
            Command::DescribeAll(cmd) => assert!(cmd.matcher.unwrap().is_match("cpu.user")),
            other => panic!("unexpected {:?}", other),
        }
        match parse("describe all").unwrap() {
            Command::DescribeAll(cmd) => assert!(cmd.matcher.is_none()),
            other => panic!("unexpected {:?}", other),
        }
        match parse("describe metrics where host = 'web-1'").unwrap() {
            Command::DescribeMetrics(cmd) => {
                assert_eq!(cmd.tag, "host");
                assert_eq!(cmd.value, "web-1");
            },
            other => panic!("unexpected {:?}", other),
        }
        match parse("describe `odd metric` where dc = 'west'").unwrap() {
            Command::Describe(cmd) => {
                assert_eq!(cmd.metric, "odd metric");
                assert!(cmd.predicate.apply(&TagSet::from_pairs(&[("dc", "west")])));
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_semantic_errors_accumulate() {
        let errors = messages("select cpu from -1h from -2h sample by 'median'");
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0], "line 1, column 26: Key from has already been assigned");
        assert!(errors[1].starts_with("line 1, column 40: Expected sampling method"));
    }

    #[test]
    fn test_bad_regex_and_duration() {
        let errors = messages("select cpu[host match '('] + 5q from 0 to 0");
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("line 1, column 23: Cannot parse the regex: "));
        assert!(errors[1].starts_with("line 1, column 30: '5q' is not a valid duration"));
    }

    #[test]
    fn test_missing_from() {
        assert_eq!(
            messages("select cpu to now"),
            vec!["line 1, column 18: Field from is never assigned in property clause"]
        );
        assert_eq!(
            messages("select cpu"),
            vec!["line 1, column 11: Field from is never assigned in property clause"]
        );
    }

    #[test]
    fn test_grammar_errors() {
        assert_eq!(
            messages("select"),
            vec![r#"line 1, column 7: expected expression to follow keyword "select""#]
        );
        assert_eq!(
            messages("select cpu | from 0 to 0"),
            vec![r#"line 1, column 13: expected function name to follow pipe "|""#]
        );
        assert_eq!(
            messages("select f(a group by) from 0 to 0"),
            vec![r#"line 1, column 20: expected tag key identifier to follow "group by" keywords in "group by" clause"#]
        );
        assert_eq!(
            messages("select cpu[host = 'a' from 0 to 0"),
            vec![r#"line 1, column 22: expected "]" to close "[" opened to apply predicate"#]
        );
        assert_eq!(
            messages("select cpu[host] from 0 to 0"),
            vec![r#"line 1, column 16: expected "=", "!=", "match", or "in" to follow tag key in predicate"#]
        );
        assert_eq!(
            messages("select 'abc from 0"),
            vec![r#"line 1, column 19: expected "'" to close string"#]
        );
    }
}
