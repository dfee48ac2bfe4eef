//! Status records for the distribution and the node service.
//!
//! Both records are value objects: the prober builds a fresh one on every
//! call and nothing holds on to them between polls.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::format::{format_bytes, format_uptime};

/// Run state of a distribution as seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    NotInstalled,
    Stopped,
    Running,
    Unknown,
}

impl Default for RunState {
    fn default() -> Self {
        RunState::Unknown
    }
}

impl RunState {
    /// Installed and not currently running
    pub fn is_stopped_or_absent(&self) -> bool {
        matches!(self, RunState::Stopped | RunState::NotInstalled)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::NotInstalled => write!(f, "NOT_INSTALLED"),
            RunState::Stopped => write!(f, "STOPPED"),
            RunState::Running => write!(f, "RUNNING"),
            RunState::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Snapshot of one distribution, recomputed on every probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionRecord {
    pub name: String,
    pub installed: bool,
    pub run_state: RunState,
    /// e.g. "WSL 2"; empty when the listing carried no version column
    pub version: String,
    pub uptime: Option<Duration>,
}

impl DistributionRecord {
    /// Safe default when the probe itself failed
    pub fn unknown(name: &str) -> Self {
        Self {
            name: name.to_string(),
            installed: false,
            run_state: RunState::Unknown,
            version: String::new(),
            uptime: None,
        }
    }

    pub fn not_installed(name: &str) -> Self {
        Self {
            run_state: RunState::NotInstalled,
            ..Self::unknown(name)
        }
    }

    pub fn is_running(&self) -> bool {
        self.run_state == RunState::Running
    }

    pub fn uptime_text(&self) -> String {
        self.uptime
            .map(|d| format_uptime(d.as_secs()))
            .unwrap_or_default()
    }
}

/// How far the service probe got before it had to stop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceAvailability {
    /// Distribution is not running; the guest was not queried
    DistributionNotRunning,
    /// The guest init system did not answer
    InitUnavailable,
    /// Unit file is not registered
    NotInstalled,
    /// Unit is registered and its properties were read
    Installed,
    /// A guest command could not be launched or timed out
    Unknown,
}

/// Status of the node service unit inside the guest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub availability: ServiceAvailability,
    pub installed: bool,
    pub active: bool,
    pub enabled: bool,
    pub state: String,
    pub sub_state: String,
    pub pid: Option<u32>,
    pub memory_bytes: Option<u64>,
    pub uptime: Option<Duration>,
}

impl ServiceRecord {
    /// Record for a probe that stopped before reaching the unit
    pub fn unavailable(availability: ServiceAvailability) -> Self {
        Self {
            installed: false,
            availability,
            active: false,
            enabled: false,
            state: String::new(),
            sub_state: String::new(),
            pid: None,
            memory_bytes: None,
            uptime: None,
        }
    }

    /// Record for a registered unit. `active` is derived from `state`.
    pub fn installed(
        state: &str,
        sub_state: &str,
        pid: Option<u32>,
        memory_bytes: Option<u64>,
        enabled: bool,
    ) -> Self {
        Self {
            availability: ServiceAvailability::Installed,
            installed: true,
            active: state == "active",
            enabled,
            state: state.to_string(),
            sub_state: sub_state.to_string(),
            pid,
            memory_bytes,
            uptime: None,
        }
    }

    /// Attach the uptime; ignored unless the unit is active
    pub fn with_uptime(mut self, uptime: Option<Duration>) -> Self {
        self.uptime = if self.active { uptime } else { None };
        self
    }

    /// Human summary, derived only from the other fields.
    /// Precedence: Active > Inactive > Failed > raw state.
    pub fn status_text(&self) -> String {
        match self.availability {
            ServiceAvailability::DistributionNotRunning => {
                "WSL distribution not running".to_string()
            }
            ServiceAvailability::InitUnavailable => "Systemd not available".to_string(),
            ServiceAvailability::NotInstalled => "Service not installed".to_string(),
            ServiceAvailability::Unknown => "Service status unknown".to_string(),
            ServiceAvailability::Installed => {
                if self.active {
                    "Active (running)".to_string()
                } else if self.state.eq_ignore_ascii_case("inactive") {
                    "Inactive (stopped)".to_string()
                } else if self.state.eq_ignore_ascii_case("failed") {
                    "Failed".to_string()
                } else {
                    format!("State: {}", self.state)
                }
            }
        }
    }

    pub fn memory_text(&self) -> String {
        self.memory_bytes.map(format_bytes).unwrap_or_default()
    }

    pub fn uptime_text(&self) -> String {
        self.uptime
            .map(|d| format_uptime(d.as_secs()))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_is_default_state() {
        assert_eq!(RunState::default(), RunState::Unknown);
        let record = DistributionRecord::unknown("PKTWinNode");
        assert!(!record.installed);
        assert_eq!(record.run_state, RunState::Unknown);
    }

    #[test]
    fn test_active_derived_from_state() {
        let record = ServiceRecord::installed("active", "running", Some(42), None, true);
        assert!(record.active);
        assert_eq!(record.status_text(), "Active (running)");

        let record = ServiceRecord::installed("activating", "start", None, None, true);
        assert!(!record.active);
        assert_eq!(record.status_text(), "State: activating");
    }

    #[test]
    fn test_status_text_precedence() {
        let inactive = ServiceRecord::installed("inactive", "dead", None, None, false);
        assert_eq!(inactive.status_text(), "Inactive (stopped)");

        let failed = ServiceRecord::installed("failed", "failed", None, None, true);
        assert_eq!(failed.status_text(), "Failed");

        let stopped = ServiceRecord::unavailable(ServiceAvailability::DistributionNotRunning);
        assert_eq!(stopped.status_text(), "WSL distribution not running");
        assert!(!stopped.installed);
    }

    #[test]
    fn test_uptime_only_kept_when_active() {
        let inactive = ServiceRecord::installed("inactive", "dead", None, None, false)
            .with_uptime(Some(Duration::from_secs(90)));
        assert!(inactive.uptime.is_none());

        let active = ServiceRecord::installed("active", "running", None, Some(3 * 1024 * 1024), true)
            .with_uptime(Some(Duration::from_secs(90)));
        assert_eq!(active.uptime_text(), "1 minute");
        assert_eq!(active.memory_text(), "3 MB");
    }

    #[test]
    fn test_run_state_display() {
        assert_eq!(RunState::Running.to_string(), "RUNNING");
        assert_eq!(RunState::NotInstalled.to_string(), "NOT_INSTALLED");
        assert!(RunState::Stopped.is_stopped_or_absent());
        assert!(!RunState::Unknown.is_stopped_or_absent());
    }
}
