//! Values of the `select` property clause
//!
//! ```text
//! select cpu from -2h to now resolution 1m sample by 'max'
//!                 ^^^    ^^^            ^^            ^^^
//! ```
//!
//! - **from / to**: `now`, an epoch-millisecond integer, a duration relative
//!   to now (`-30m`), or a calendar date (`2015-06-01 12:00 UTC`,
//!   `Jun 1 2015`, ANSI C, Unix date, Ruby date, RFC 822)
//! - **resolution**: integer milliseconds or a duration
//! - **sample by**: `max`, `min` or `mean`
//!
//! Dates without a zone are UTC. Zone abbreviations from the table below
//! apply their offset; other all-caps abbreviations are read as UTC.

use crate::query::command::SelectContext;
use crate::types::SampleMethod;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::collections::HashSet;

/// Shape accepted for duration literals, quoted in diagnostics
pub const DURATION_FORM: &str = "^([+-]?[0-9]+)([smhdwMy]|ms|hr|mo|yr)$";

/// Resolution used when the clause names none
pub const DEFAULT_RESOLUTION_MS: i64 = 30_000;

const SECOND: i64 = 1000;
const MINUTE: i64 = 60 * SECOND;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

// =============================================================================
// Durations
// =============================================================================

/// Parse `[+-]digits unit` into milliseconds
///
/// Units: `ms`, `s`, `m`, `h`/`hr`, `d`, `w`, `M`/`mo` (30 days) and
/// `y`/`yr` (365 days). Units are case-sensitive: `m` is minutes, `M`
/// months.
pub fn parse_duration(text: &str) -> Result<i64, String> {
    let invalid = || format!("expected duration to be of the form `{}`", DURATION_FORM);
    let sign = usize::from(text.starts_with(['+', '-']));
    let digits = text[sign..].chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return Err(invalid());
    }
    let (count, unit) = text.split_at(sign + digits);
    let scale = match unit {
        "ms" => 1,
        "s" => SECOND,
        "m" => MINUTE,
        "h" | "hr" => HOUR,
        "d" => DAY,
        "w" => 7 * DAY,
        "M" | "mo" => 30 * DAY,
        "y" | "yr" => 365 * DAY,
        _ => return Err(invalid()),
    };
    let count: i64 = count.parse().map_err(|e: std::num::ParseIntError| e.to_string())?;
    count
        .checked_mul(scale)
        .ok_or_else(|| format!("duration {} is out of range", text))
}

// =============================================================================
// Dates
// =============================================================================

const DAY_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%b %d %Y", "%d %b %Y"];
const MONTH_FORMATS: [&str; 3] = ["%Y-%m", "%Y/%m", "%b %Y"];
/// ANSI C / Unix date and RFC 822 once the zone is removed
const CLOCK_FORMATS: [&str; 2] = ["%a %b %d %H:%M:%S %Y", "%d %b %y %H:%M"];
/// Ruby date and RFC 822 with a numeric zone
const OFFSET_FORMATS: [&str; 2] = ["%a %b %d %H:%M:%S %z %Y", "%d %b %y %H:%M %z"];

const ZONES: [(&str, i64); 12] = [
    ("UTC", 0),
    ("GMT", 0),
    ("Z", 0),
    ("EST", -5),
    ("EDT", -4),
    ("CST", -6),
    ("CDT", -5),
    ("MST", -7),
    ("MDT", -6),
    ("PST", -8),
    ("PDT", -7),
    ("BST", 1),
];

fn is_zone_abbreviation(word: &str) -> bool {
    (1..=5).contains(&word.len()) && word.chars().all(|c| c.is_ascii_uppercase())
}

/// Remove a zone abbreviation, returning the normalized text and the
/// zone's offset east of UTC in milliseconds
fn split_zone(text: &str) -> (String, i64) {
    let mut offset = 0;
    let mut words = Vec::new();
    for word in text.split_whitespace() {
        if is_zone_abbreviation(word) {
            offset = ZONES
                .iter()
                .find(|(name, _)| *name == word)
                .map_or(0, |(_, hours)| hours * HOUR);
        } else {
            words.push(word);
        }
    }
    (words.join(" "), offset)
}

fn parse_calendar(text: &str) -> Option<i64> {
    for format in OFFSET_FORMATS {
        if let Ok(time) = DateTime::parse_from_str(text, format) {
            return Some(time.timestamp_millis());
        }
    }

    let (text, offset) = split_zone(text);
    let local = |time: NaiveDateTime| time.and_utc().timestamp_millis() - offset;

    for format in DAY_FORMATS {
        let candidates = [
            (format!("{} %H:%M:%S", format), text.clone()),
            (format!("{} %H:%M", format), text.clone()),
            (format!("{} %H:%M", format), format!("{}:00", text)),
        ];
        for (format, text) in &candidates {
            if let Ok(time) = NaiveDateTime::parse_from_str(text, format) {
                return Some(local(time));
            }
        }
        if let Ok(date) = NaiveDate::parse_from_str(&text, format) {
            return date.and_hms_opt(0, 0, 0).map(local);
        }
    }
    for format in MONTH_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&format!("{} 1", text), &format!("{} %d", format)) {
            return date.and_hms_opt(0, 0, 0).map(local);
        }
    }
    for format in CLOCK_FORMATS {
        if let Ok(time) = NaiveDateTime::parse_from_str(&text, format) {
            return Some(local(time));
        }
    }
    None
}

/// Resolve a `from`/`to` value to epoch milliseconds
pub fn parse_date(text: &str, now: i64) -> Result<i64, String> {
    if text.eq_ignore_ascii_case("now") {
        return Ok(now);
    }
    if let Ok(epoch) = text.parse::<i64>() {
        return Ok(epoch);
    }
    if let Ok(relative) = parse_duration(text) {
        return now
            .checked_add(relative)
            .ok_or_else(|| format!("relative time {} is out of range", text));
    }
    parse_calendar(text.trim())
        .ok_or_else(|| format!("Expected formatted date or relative time but got '{}'", text))
}

/// Resolve a `resolution` value to milliseconds
pub fn parse_resolution(text: &str) -> Result<i64, String> {
    let resolution = match text.parse::<i64>() {
        Ok(millis) => millis,
        Err(_) => parse_duration(text).map_err(|e| format!("Expected number but parse failed; {}", e))?,
    };
    if resolution <= 0 {
        return Err(format!("Expected a positive resolution but got {}", text));
    }
    Ok(resolution)
}

/// Resolve a `sample by` value
pub fn parse_sample_method(text: &str) -> Result<SampleMethod, String> {
    match text {
        "max" => Ok(SampleMethod::Max),
        "min" => Ok(SampleMethod::Min),
        "mean" => Ok(SampleMethod::Mean),
        _ => Err(format!("Expected sampling method 'max', 'min', or 'mean' but got {}", text)),
    }
}

// =============================================================================
// Clause accumulator
// =============================================================================

/// Key/value pairs of one property clause, validated as they arrive
#[derive(Debug, Default)]
pub(crate) struct PropertyClause {
    start: Option<i64>,
    end: Option<i64>,
    resolution: Option<i64>,
    sample_method: Option<SampleMethod>,
    assigned: HashSet<String>,
}

impl PropertyClause {
    /// Record `key = value`; `key` is one of `from`, `to`, `resolution`,
    /// `sample`
    ///
    /// Returns every problem found; the key is still marked as assigned.
    pub fn assign(&mut self, key: &str, value: &str, now: i64) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.assigned.insert(key.to_string()) {
            problems.push(format!("Key {} has already been assigned", key));
        }
        let outcome = match key {
            "from" => parse_date(value, now).map(|t| self.start = Some(t)),
            "to" => parse_date(value, now).map(|t| self.end = Some(t)),
            "resolution" => parse_resolution(value).map(|r| self.resolution = Some(r)),
            "sample" => parse_sample_method(value).map(|m| self.sample_method = Some(m)),
            _ => Err(format!("Unknown property key {}", key)),
        };
        if let Err(problem) = outcome {
            problems.push(problem);
        }
        problems
    }

    /// Fill defaults and check the mandatory fields
    ///
    /// A missing `to` means now; `from` must be given.
    pub fn finish(self, now: i64) -> Result<SelectContext, Vec<String>> {
        let start = match (self.start, self.assigned.contains("from")) {
            (Some(start), _) => start,
            // An unparsable value was already reported
            (None, true) => return Err(Vec::new()),
            (None, false) => return Err(vec!["Field from is never assigned in property clause".to_string()]),
        };
        let end = match (self.end, self.assigned.contains("to")) {
            (Some(end), _) => end,
            (None, true) => return Err(Vec::new()),
            (None, false) => now,
        };
        if start > end {
            return Err(vec![format!(
                "Expected 'from' ({}) to be no later than 'to' ({}) in property clause",
                start, end
            )]);
        }
        Ok(SelectContext {
            start,
            end,
            resolution: self.resolution.unwrap_or(DEFAULT_RESOLUTION_MS),
            sample_method: self.sample_method.unwrap_or_default(),
        })
    }
}
