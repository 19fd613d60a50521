//! Tokenizer for the query language
//!
//! Produces a flat token list with byte offsets into the source. Whitespace
//! and comments (`-- to end of line`, `/* ... */`) are skipped.
//!
//! Lexing never fails outright:
//! - characters that start no token become [`TokenKind::Unknown`] so the
//!   grammar can quote the remaining input in its diagnostic
//! - malformed literals (unclosed strings, `1e`, `cpu.`) become a
//!   [`TokenKind::Error`] positioned where scanning stopped, followed by the
//!   end marker; the grammar reports it when it reaches that token
//!
//! A leading `-` is always its own token. The grammar glues it to an
//! adjacent number or duration where a literal is expected.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while, take_while1},
    character::complete::{char, digit1, multispace1, not_line_ending},
    combinator::{recognize, value},
    multi::many0,
    sequence::{pair, preceded},
    IResult, Parser,
};

// =============================================================================
// Tokens
// =============================================================================

/// Reserved words; never valid as bare identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    /// `all`
    All,
    /// `and`
    And,
    /// `as`
    As,
    /// `by`
    By,
    /// `collapse`
    Collapse,
    /// `describe`
    Describe,
    /// `from`
    From,
    /// `group`
    Group,
    /// `in`
    In,
    /// `match`
    Match,
    /// `metrics`
    Metrics,
    /// `not`
    Not,
    /// `or`
    Or,
    /// `resolution`
    Resolution,
    /// `sample`
    Sample,
    /// `select`
    Select,
    /// `to`
    To,
    /// `where`
    Where,
}

const KEYWORDS: [(&str, Keyword); 18] = [
    ("all", Keyword::All),
    ("and", Keyword::And),
    ("as", Keyword::As),
    ("by", Keyword::By),
    ("collapse", Keyword::Collapse),
    ("describe", Keyword::Describe),
    ("from", Keyword::From),
    ("group", Keyword::Group),
    ("in", Keyword::In),
    ("match", Keyword::Match),
    ("metrics", Keyword::Metrics),
    ("not", Keyword::Not),
    ("or", Keyword::Or),
    ("resolution", Keyword::Resolution),
    ("sample", Keyword::Sample),
    ("select", Keyword::Select),
    ("to", Keyword::To),
    ("where", Keyword::Where),
];

impl Keyword {
    /// Case-insensitive lookup
    pub fn lookup(word: &str) -> Option<Self> {
        KEYWORDS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(word))
            .map(|(_, keyword)| *keyword)
    }
}

/// True if `word` is reserved (in any letter case)
pub fn is_keyword(word: &str) -> bool {
    Keyword::lookup(word).is_some()
}

/// Punctuation and operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    /// `,`
    Comma,
    /// `(`
    OpenParen,
    /// `)`
    CloseParen,
    /// `[`
    OpenBracket,
    /// `]`
    CloseBracket,
    /// `|`
    Pipe,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `=`
    Equals,
    /// `!=`
    NotEquals,
}

/// What a token is
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Reserved word
    Keyword(Keyword),
    /// Identifier, dotted or backtick-quoted, with escapes removed
    Identifier(String),
    /// Unsigned number as written
    Number(String),
    /// Unsigned number immediately followed by letters (`5m`, `30s`)
    Duration(String),
    /// Quoted string with escapes removed
    String(String),
    /// Raw text between `{` and `}`
    Annotation(String),
    /// Punctuation
    Symbol(Symbol),
    /// A character that starts no token
    Unknown,
    /// Malformed literal; lexing stopped here
    Error(String),
    /// End of input
    End,
}

/// A token and its byte span in the source
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Kind and payload
    pub kind: TokenKind,
    /// Offset of the first byte
    pub start: usize,
    /// Offset one past the last byte
    pub end: usize,
}

/// 1-based line and column of a byte offset
///
/// Columns count characters since the last newline.
pub fn line_column(input: &str, offset: usize) -> (usize, usize) {
    let before = &input[..offset.min(input.len())];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    (line, before[line_start..].chars().count() + 1)
}

// =============================================================================
// Scanning
// =============================================================================

/// A malformed literal, `offset` bytes into the token
struct LexError {
    offset: usize,
    message: String,
}

impl LexError {
    fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

type Scan<'a> = Option<Result<(&'a str, TokenKind), LexError>>;

/// Split `input` into tokens, always ending with [`TokenKind::End`]
pub fn tokenize(input: &str) -> Vec<Token> {
    let offset = |rest: &str| input.len() - rest.len();
    let mut tokens = Vec::new();
    let mut rest = skip_trivia(input);

    while !rest.is_empty() {
        let start = offset(rest);
        match scan(rest) {
            Ok((next, kind)) => {
                tokens.push(Token {
                    kind,
                    start,
                    end: offset(next),
                });
                rest = skip_trivia(next);
            },
            Err(error) => {
                tokens.push(Token {
                    kind: TokenKind::Error(error.message),
                    start: start + error.offset,
                    end: start + error.offset,
                });
                break;
            },
        }
    }

    tokens.push(Token {
        kind: TokenKind::End,
        start: input.len(),
        end: input.len(),
    });
    tokens
}

fn skip_trivia(input: &str) -> &str {
    let line_comment = recognize(pair(tag("--"), not_line_ending));
    let block_comment = recognize((tag("/*"), take_until("*/"), tag("*/")));
    let trivia: IResult<&str, Vec<&str>> = many0(alt((multispace1, line_comment, block_comment))).parse(input);
    match trivia {
        Ok((rest, _)) => rest,
        Err(_) => input,
    }
}

fn scan(input: &str) -> Result<(&str, TokenKind), LexError> {
    let scanners: [fn(&str) -> Scan<'_>; 5] = [identifier, quoted_identifier, number, string, annotation];
    for scanner in scanners {
        if let Some(result) = scanner(input) {
            return result;
        }
    }
    if let Ok((rest, symbol)) = symbol(input) {
        return Ok((rest, TokenKind::Symbol(symbol)));
    }
    let width = input.chars().next().map_or(0, char::len_utf8);
    Ok((&input[width..], TokenKind::Unknown))
}

fn symbol(input: &str) -> IResult<&str, Symbol> {
    alt((
        value(Symbol::NotEquals, tag("!=")),
        value(Symbol::Comma, char(',')),
        value(Symbol::OpenParen, char('(')),
        value(Symbol::CloseParen, char(')')),
        value(Symbol::OpenBracket, char('[')),
        value(Symbol::CloseBracket, char(']')),
        value(Symbol::Pipe, char('|')),
        value(Symbol::Plus, char('+')),
        value(Symbol::Minus, char('-')),
        value(Symbol::Star, char('*')),
        value(Symbol::Slash, char('/')),
        value(Symbol::Equals, char('=')),
    ))
    .parse(input)
}

fn segment(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))
    .parse(input)
}

/// `seg(.seg)*`, or a keyword when the first segment is reserved
fn identifier(input: &str) -> Scan<'_> {
    let (mut rest, first) = segment(input).ok()?;
    if let Some(keyword) = Keyword::lookup(first) {
        return Some(Ok((rest, TokenKind::Keyword(keyword))));
    }
    while let Some(after_dot) = rest.strip_prefix('.') {
        match segment(after_dot) {
            Ok((next, _)) => rest = next,
            Err(_) => {
                let offset = input.len() - after_dot.len();
                return Some(Err(LexError::new(offset, r#"expected identifier segment to follow ".""#)));
            },
        }
    }
    let name = &input[..input.len() - rest.len()];
    Some(Ok((rest, TokenKind::Identifier(name.to_string()))))
}

/// Characters between quotes, stopping at `close` or at a character that
/// cannot appear unescaped
///
/// Returns the unescaped text and the remaining input starting at the
/// stopping character.
fn quoted_body(input: &str, close: char) -> (String, &str) {
    let mut text = String::new();
    let mut chars = input.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            c if c == close => return (text, &input[i..]),
            '\\' => match chars.peek() {
                Some(&(_, escaped @ ('\\' | '`' | '\'' | '"'))) => {
                    text.push(escaped);
                    chars.next();
                },
                _ => return (text, &input[i..]),
            },
            '`' => return (text, &input[i..]),
            c => text.push(c),
        }
    }
    (text, "")
}

fn quoted_identifier(input: &str) -> Scan<'_> {
    let body = input.strip_prefix('`')?;
    let (name, rest) = quoted_body(body, '`');
    match rest.strip_prefix('`') {
        Some(rest) => Some(Ok((rest, TokenKind::Identifier(name)))),
        None => Some(Err(LexError::new(
            input.len() - rest.len(),
            r#"expected "`" to end identifier"#,
        ))),
    }
}

fn string(input: &str) -> Scan<'_> {
    let quote = input.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let (text, rest) = quoted_body(&input[1..], quote);
    if let Some(rest) = rest.strip_prefix(quote) {
        return Some(Ok((rest, TokenKind::String(text))));
    }
    let offset = input.len() - rest.len();
    let message = if rest.starts_with('\\') {
        r#"expected "\", "'", "`", or '"' to follow "\" in string literal"#.to_string()
    } else if quote == '\'' {
        r#"expected "'" to close string"#.to_string()
    } else {
        r#"expected '"' to close string"#.to_string()
    };
    Some(Err(LexError::new(offset, message)))
}

fn annotation(input: &str) -> Scan<'_> {
    let body = input.strip_prefix('{')?;
    match body.find('}') {
        Some(close) => Some(Ok((&body[close + 1..], TokenKind::Annotation(body[..close].to_string())))),
        None => Some(Err(LexError::new(input.len(), r#"expected "}" to close "{" opened for annotation"#))),
    }
}

/// `digits [.digits] [e[+-]digits]`, optionally followed by unit letters
fn number(input: &str) -> Scan<'_> {
    let (mut rest, _) = digit1::<_, nom::error::Error<&str>>(input).ok()?;
    if let Ok((next, _)) = preceded(char::<_, nom::error::Error<&str>>('.'), digit1).parse(rest) {
        rest = next;
    }
    if let Some(exponent) = rest.strip_prefix(['e', 'E']) {
        let unsigned = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
        match digit1::<_, nom::error::Error<&str>>(unsigned) {
            Ok((next, _)) => rest = next,
            Err(_) => {
                return Some(Err(LexError::new(input.len() - unsigned.len(), "expected exponent")));
            },
        }
    }
    let literal = &input[..input.len() - rest.len()];

    let letters = rest.chars().take_while(char::is_ascii_alphabetic).count();
    let after = &rest[letters..];
    let continues = after.starts_with(|c: char| c.is_ascii_digit() || c == '_');
    if letters > 0 && !continues {
        let duration = &input[..input.len() - after.len()];
        return Some(Ok((after, TokenKind::Duration(duration.to_string()))));
    }
    Some(Ok((rest, TokenKind::Number(literal.to_string()))))
}
