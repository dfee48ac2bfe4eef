//! Uptime sources read from inside the guest.
//!
//! Distribution uptime prefers the init-system arithmetic
//! (`/proc/uptime` minus the userspace start offset) and falls back to the
//! elapsed time of process 1. Service uptime is computed in the guest with
//! `date` and arrives here as a plain number of seconds.

use std::time::Duration;

use super::atoms::{first_meaningful_line, parse_seconds_millis, parse_u64, ParseError, ParseErrorReason};

/// First field of `/proc/uptime`, in milliseconds
pub fn parse_proc_uptime(output: &str) -> Result<u64, ParseError> {
    let line = first_meaningful_line(output)
        .ok_or_else(|| ParseError::new("/proc/uptime", ParseErrorReason::EmptyOutput, output))?;
    let field = line.split_whitespace().next().unwrap_or_default();
    parse_seconds_millis(field).map_err(|reason| ParseError::new("/proc/uptime", reason, output))
}

/// `UserspaceTimestampMonotonic` in microseconds. Accepts either the
/// `key=value` form or a bare number.
pub fn parse_monotonic_usec(output: &str) -> Result<u64, ParseError> {
    let line = first_meaningful_line(output).ok_or_else(|| {
        ParseError::new("UserspaceTimestampMonotonic", ParseErrorReason::EmptyOutput, output)
    })?;
    let value = line.split_once('=').map(|(_, v)| v).unwrap_or(&line);
    parse_u64(value)
        .map_err(|reason| ParseError::new("UserspaceTimestampMonotonic", reason, output))
}

/// Elapsed seconds of a process (`ps -o etimes=`) or a guest-side
/// subtraction. A negative result is rejected.
pub fn parse_elapsed_seconds(output: &str) -> Result<u64, ParseError> {
    let line = first_meaningful_line(output)
        .ok_or_else(|| ParseError::new("elapsed", ParseErrorReason::EmptyOutput, output))?;
    parse_u64(&line).map_err(|reason| ParseError::new("elapsed", reason, output))
}

/// Time since userspace started: kernel uptime minus the userspace offset.
/// `None` unless the difference is strictly positive.
pub fn init_uptime(proc_uptime_ms: u64, userspace_usec: u64) -> Option<Duration> {
    let userspace_ms = userspace_usec / 1000;
    proc_uptime_ms
        .checked_sub(userspace_ms)
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proc_uptime() {
        assert_eq!(parse_proc_uptime("3600.25 7000.00\n").unwrap(), 3_600_250);
        assert_eq!(parse_proc_uptime("3600.25\n").unwrap(), 3_600_250);
        assert!(parse_proc_uptime("").is_err());
    }

    #[test]
    fn test_monotonic_forms() {
        assert_eq!(
            parse_monotonic_usec("UserspaceTimestampMonotonic=1500000\n").unwrap(),
            1_500_000
        );
        assert_eq!(parse_monotonic_usec("2500000").unwrap(), 2_500_000);
        assert!(parse_monotonic_usec("UserspaceTimestampMonotonic=\n").is_err());
    }

    #[test]
    fn test_init_uptime_positive_only() {
        assert_eq!(
            init_uptime(3_600_000, 1_500_000),
            Some(Duration::from_millis(3_598_500))
        );
        assert_eq!(init_uptime(1_000, 1_000_000), None);
        assert_eq!(init_uptime(1_000, 2_000_000), None);
    }

    #[test]
    fn test_elapsed_seconds() {
        assert_eq!(parse_elapsed_seconds("  4521\n").unwrap(), 4521);
        let err = parse_elapsed_seconds("-12\n").unwrap_err();
        assert_eq!(err.reason, ParseErrorReason::NegativeValue);
        assert!(parse_elapsed_seconds("\n").is_err());
    }
}
