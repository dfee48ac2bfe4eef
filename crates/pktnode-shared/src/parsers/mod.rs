//! Parsers for the text produced by the virtualization CLI and the guest.
//!
//! One parser per command format, each returning a typed result or a
//! `ParseError` with the offending input attached. Callers decide how a
//! parse failure degrades; the parsers never guess.
//!
//! # Supported formats
//!
//! - `wsl --list --verbose` / `--quiet`: distribution rows → `ListedDistribution`
//! - `systemctl show` / `is-enabled` / `is-active`: unit state → `UnitProperties`
//! - `/proc/uptime`, `UserspaceTimestampMonotonic`, `ps -o etimes=`: uptime sources

pub mod atoms;
pub mod systemctl;
pub mod uptime;
pub mod wsl_list;

pub use atoms::{clean_line, squash_line, ParseError, ParseErrorReason};
pub use systemctl::{
    parse_is_active, parse_is_enabled, parse_properties, parse_system_state,
    parse_unit_properties, unit_file_listed, UnitProperties, UNIT_PROPERTIES,
};
pub use uptime::{init_uptime, parse_elapsed_seconds, parse_monotonic_usec, parse_proc_uptime};
pub use wsl_list::{
    find_distribution, parse_quiet_listing, parse_verbose_listing, quiet_listing_contains,
    ListedDistribution, ListedState, VerboseListing,
};
