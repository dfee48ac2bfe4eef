//! Parsers for the distribution listings (`--list --verbose`, `--list --quiet`).
//!
//! Verbose listing layout:
//! ```text
//!   NAME            STATE           VERSION
//! * Ubuntu          Running         2
//!   PKTWinNode      Stopped         2
//! ```
//! The leading `*` marks the default distribution.

use serde::{Deserialize, Serialize};

use super::atoms::{clean_line, ParseError, ParseErrorReason};
use crate::status::RunState;

const SOURCE: &str = "wsl --list --verbose";

/// State column of one listing row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListedState {
    Running,
    Stopped,
    /// Transitional states such as `Installing` or `Converting`
    Other(String),
}

impl ListedState {
    fn classify(column: &str) -> Self {
        let lower = column.to_ascii_lowercase();
        if lower.contains("running") {
            ListedState::Running
        } else if lower.contains("stopped") {
            ListedState::Stopped
        } else {
            ListedState::Other(column.to_string())
        }
    }

    /// A registered entry that is not running counts as stopped.
    pub fn run_state(&self) -> RunState {
        match self {
            ListedState::Running => RunState::Running,
            ListedState::Stopped | ListedState::Other(_) => RunState::Stopped,
        }
    }
}

/// One row of the verbose listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedDistribution {
    pub name: String,
    pub is_default: bool,
    pub state: ListedState,
    /// Subsystem generation (1 or 2), when the column is present
    pub version: Option<u8>,
}

impl ListedDistribution {
    /// Version label as shown in the status panel, e.g. `WSL 2`
    pub fn version_label(&self) -> String {
        self.version.map(|v| format!("WSL {}", v)).unwrap_or_default()
    }
}

fn is_header(line: &str) -> bool {
    line.split_whitespace()
        .next()
        .map(|first| first.eq_ignore_ascii_case("NAME"))
        .unwrap_or(false)
}

/// Rows of a verbose listing plus the lines that could not be split
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerboseListing {
    pub rows: Vec<ListedDistribution>,
    pub malformed: Vec<ParseError>,
}

impl VerboseListing {
    /// Find a distribution row by name, ignoring case
    pub fn find(&self, name: &str) -> Option<&ListedDistribution> {
        find_distribution(&self.rows, name)
    }

    /// Whether a malformed line names the distribution
    pub fn malformed_mentions(&self, name: &str) -> bool {
        self.malformed.iter().any(|e| first_name_token(&e.raw).eq_ignore_ascii_case(name))
    }
}

fn first_name_token(raw: &str) -> String {
    let line = clean_line(raw);
    line.trim()
        .trim_start_matches('*')
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Parse the verbose listing row by row.
///
/// Empty output yields an empty listing. A row without a state column is
/// kept in `malformed` and does not affect the other rows.
pub fn parse_verbose_listing(output: &str) -> VerboseListing {
    let mut listing = VerboseListing::default();

    for (idx, raw) in output.lines().enumerate() {
        let line = clean_line(raw);
        let trimmed = line.trim();
        if trimmed.is_empty() || is_header(trimmed) {
            continue;
        }

        let (is_default, rest) = match trimmed.strip_prefix('*') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, trimmed),
        };

        let tokens: Vec<&str> = rest.split_whitespace().collect();
        if tokens.len() < 2 {
            listing.malformed.push(
                ParseError::new(SOURCE, ParseErrorReason::MalformedRow, raw).with_line(idx + 1),
            );
            continue;
        }

        let (version, state_tokens) = match tokens.last().and_then(|t| t.parse::<u8>().ok()) {
            Some(v) if tokens.len() >= 3 => (Some(v), &tokens[1..tokens.len() - 1]),
            _ => (None, &tokens[1..]),
        };

        listing.rows.push(ListedDistribution {
            name: tokens[0].to_string(),
            is_default,
            state: ListedState::classify(&state_tokens.join(" ")),
            version,
        });
    }

    listing
}

/// Find a distribution by name, ignoring case
pub fn find_distribution<'a>(
    rows: &'a [ListedDistribution],
    name: &str,
) -> Option<&'a ListedDistribution> {
    rows.iter().find(|r| r.name.eq_ignore_ascii_case(name))
}

/// Parse the quiet listing: one name per line
pub fn parse_quiet_listing(output: &str) -> Vec<String> {
    output
        .lines()
        .map(clean_line)
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

/// Case-insensitive membership test over a quiet listing
pub fn quiet_listing_contains(output: &str, name: &str) -> bool {
    parse_quiet_listing(output)
        .iter()
        .any(|n| n.eq_ignore_ascii_case(name))
}
