//! Parsers for systemctl output read from inside the guest.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::atoms::{clean_line, first_meaningful_line, parse_u64, ParseError, ParseErrorReason};

const SOURCE: &str = "systemctl show";

/// Properties requested from `systemctl show`
pub const UNIT_PROPERTIES: &str =
    "ActiveState,SubState,MainPID,MemoryCurrent,ActiveEnterTimestamp";

/// Subset of unit properties the service monitor reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitProperties {
    pub active_state: String,
    pub sub_state: String,
    /// `None` when systemd reports 0 (no main process)
    pub main_pid: Option<u32>,
    /// `None` when accounting is off (`[not set]` or the u64::MAX sentinel)
    pub memory_current: Option<u64>,
    /// Raw timestamp string, `None` when empty or `n/a`
    pub active_enter_timestamp: Option<String>,
}

/// Split `key=value` lines into a map. Lines without `=` are ignored.
pub fn parse_properties(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .map(clean_line)
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Parse `systemctl show <unit> --property=...` output.
///
/// `ActiveState` is required; the other properties degrade to empty/`None`.
pub fn parse_unit_properties(output: &str) -> Result<UnitProperties, ParseError> {
    let props = parse_properties(output);

    let active_state = props
        .get("ActiveState")
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| {
            ParseError::new(
                SOURCE,
                ParseErrorReason::MissingProperty("ActiveState".to_string()),
                output,
            )
        })?;

    let main_pid = props
        .get("MainPID")
        .and_then(|v| parse_u64(v).ok())
        .filter(|pid| *pid > 0)
        .and_then(|pid| u32::try_from(pid).ok());

    let memory_current = props
        .get("MemoryCurrent")
        .and_then(|v| parse_u64(v).ok())
        .filter(|bytes| *bytes != u64::MAX);

    let active_enter_timestamp = props
        .get("ActiveEnterTimestamp")
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("n/a"))
        .cloned();

    Ok(UnitProperties {
        active_state,
        sub_state: props.get("SubState").cloned().unwrap_or_default(),
        main_pid,
        memory_current,
        active_enter_timestamp,
    })
}

/// `systemctl is-enabled` prints `enabled` for an enabled unit
pub fn parse_is_enabled(output: &str) -> bool {
    first_meaningful_line(output).as_deref() == Some("enabled")
}

/// `systemctl is-active` prints `active` for a running unit
pub fn parse_is_active(output: &str) -> bool {
    first_meaningful_line(output).as_deref() == Some("active")
}

/// System state from `systemctl is-system-running`, e.g. `running` or
/// `degraded`. `None` when nothing was printed.
pub fn parse_system_state(output: &str) -> Option<String> {
    first_meaningful_line(output)
}

/// Whether `systemctl list-unit-files <unit>` lists the unit
pub fn unit_file_listed(output: &str, unit: &str) -> bool {
    output.lines().map(clean_line).any(|line| {
        line.split_whitespace()
            .next()
            .map(|first| first == unit)
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOW: &str = "ActiveState=active\nSubState=running\nMainPID=812\n\
                        MemoryCurrent=10485760\n\
                        ActiveEnterTimestamp=Mon 2026-10-19 08:00:00 UTC\n";

    #[test]
    fn test_parse_unit_properties() {
        let props = parse_unit_properties(SHOW).unwrap();
        assert_eq!(props.active_state, "active");
        assert_eq!(props.sub_state, "running");
        assert_eq!(props.main_pid, Some(812));
        assert_eq!(props.memory_current, Some(10 * 1024 * 1024));
        assert_eq!(
            props.active_enter_timestamp.as_deref(),
            Some("Mon 2026-10-19 08:00:00 UTC")
        );
    }

    #[test]
    fn test_inactive_unit_sentinels() {
        let out = "ActiveState=inactive\nSubState=dead\nMainPID=0\n\
                   MemoryCurrent=[not set]\nActiveEnterTimestamp=n/a\n";
        let props = parse_unit_properties(out).unwrap();
        assert_eq!(props.main_pid, None);
        assert_eq!(props.memory_current, None);
        assert_eq!(props.active_enter_timestamp, None);

        let out = "ActiveState=failed\nMemoryCurrent=18446744073709551615\n";
        let props = parse_unit_properties(out).unwrap();
        assert_eq!(props.memory_current, None);
        assert_eq!(props.sub_state, "");
    }

    #[test]
    fn test_missing_active_state() {
        let err = parse_unit_properties("SubState=dead\n").unwrap_err();
        assert_eq!(
            err.reason,
            ParseErrorReason::MissingProperty("ActiveState".to_string())
        );
    }

    #[test]
    fn test_value_with_equals_sign() {
        let props = parse_properties("ExecStart=/bin/sh -c a=b\n");
        assert_eq!(props.get("ExecStart").unwrap(), "/bin/sh -c a=b");
    }

    #[test]
    fn test_simple_answers() {
        assert!(parse_is_enabled("enabled\n"));
        assert!(!parse_is_enabled("disabled\n"));
        assert!(parse_is_active("active\n"));
        assert!(!parse_is_active("inactive\n"));
        assert_eq!(parse_system_state("degraded\n").as_deref(), Some("degraded"));
        assert_eq!(parse_system_state(""), None);
    }

    #[test]
    fn test_unit_file_listed() {
        let out = "UNIT FILE        STATE   VENDOR PRESET\n\
                   cjdns-sh.service enabled enabled\n\n1 unit files listed.\n";
        assert!(unit_file_listed(out, "cjdns-sh.service"));
        assert!(!unit_file_listed("0 unit files listed.\n", "cjdns-sh.service"));
    }
}
