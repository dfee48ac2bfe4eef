//! Atomic parsing helpers shared by the listing and property parsers.
//!
//! The virtualization CLI writes UTF-16 text that shows up as NUL padded
//! bytes once decoded as UTF-8, so every line goes through `clean_line`
//! before any column is looked at.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Parse error with context for diagnostics.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{source_cmd}: {reason} (input: {raw:?})")]
pub struct ParseError {
    /// Command whose output failed to parse
    pub source_cmd: String,
    /// Line number where error occurred (1-indexed), if applicable
    pub line_num: Option<usize>,
    /// Raw input that failed to parse
    pub raw: String,
    /// Why parsing failed
    pub reason: ParseErrorReason,
}

/// Specific reason for parse failure.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorReason {
    #[error("empty output")]
    EmptyOutput,
    #[error("negative value")]
    NegativeValue,
    #[error("no digits found")]
    EmptyNumber,
    #[error("invalid number")]
    InvalidNumber,
    #[error("value out of range")]
    Overflow,
    #[error("malformed row")]
    MalformedRow,
    #[error("missing property {0}")]
    MissingProperty(String),
}

impl ParseError {
    pub fn new(source_cmd: &str, reason: ParseErrorReason, raw: &str) -> Self {
        Self {
            source_cmd: source_cmd.to_string(),
            line_num: None,
            raw: raw.to_string(),
            reason,
        }
    }

    pub fn with_line(mut self, line_num: usize) -> Self {
        self.line_num = Some(line_num);
        self
    }
}

/// Strip NULs, BOMs and other control characters from one line.
/// Ordinary spaces and tabs are kept.
pub fn clean_line(line: &str) -> String {
    line.chars()
        .filter(|c| *c == ' ' || *c == '\t' || !(c.is_control() || *c == '\u{feff}'))
        .collect()
}

/// Clean a line and drop every whitespace character, collapsing the
/// column layout of a listing row into one token stream.
pub fn squash_line(line: &str) -> String {
    clean_line(line)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// Parse a non-negative integer. Surrounding whitespace is ignored.
pub fn parse_u64(s: &str) -> Result<u64, ParseErrorReason> {
    let s = s.trim();
    if s.starts_with('-') {
        return Err(ParseErrorReason::NegativeValue);
    }
    if s.is_empty() {
        return Err(ParseErrorReason::EmptyNumber);
    }
    if !s.chars().all(|c| c.is_ascii_digit()) {
        return Err(ParseErrorReason::InvalidNumber);
    }
    s.parse().map_err(|_| ParseErrorReason::Overflow)
}

/// Parse a non-negative decimal number of seconds such as `12345.67`.
/// Fractions are truncated to whole milliseconds.
pub fn parse_seconds_millis(s: &str) -> Result<u64, ParseErrorReason> {
    let s = s.trim();
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    let secs = parse_u64(whole)?;
    if !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(ParseErrorReason::InvalidNumber);
    }
    let millis = frac
        .chars()
        .chain(std::iter::repeat('0'))
        .take(3)
        .fold(0u64, |acc, c| acc * 10 + c.to_digit(10).unwrap_or(0) as u64);
    secs.checked_mul(1000)
        .and_then(|ms| ms.checked_add(millis))
        .ok_or(ParseErrorReason::Overflow)
}

/// First line of output that is non-empty after cleaning
pub fn first_meaningful_line(output: &str) -> Option<String> {
    output
        .lines()
        .map(clean_line)
        .map(|l| l.trim().to_string())
        .find(|l| !l.is_empty())
}
