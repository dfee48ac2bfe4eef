//! Maintenance schedule persisted with the user settings.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Two independent maintenance policies: guest package updates and guest restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceSchedule {
    #[serde(default)]
    pub package_updates_enabled: bool,

    #[serde(default = "default_package_interval")]
    pub package_interval_days: u32,

    #[serde(default)]
    pub last_package_update: Option<DateTime<Utc>>,

    #[serde(default)]
    pub restart_enabled: bool,

    #[serde(default = "default_restart_interval")]
    pub restart_interval_days: u32,

    #[serde(default)]
    pub last_restart: Option<DateTime<Utc>>,
}

fn default_package_interval() -> u32 {
    7
}

fn default_restart_interval() -> u32 {
    30
}

impl Default for MaintenanceSchedule {
    fn default() -> Self {
        Self {
            package_updates_enabled: false,
            package_interval_days: default_package_interval(),
            last_package_update: None,
            restart_enabled: false,
            restart_interval_days: default_restart_interval(),
            last_restart: None,
        }
    }
}

/// A policy is due when enabled and either never ran or at least
/// `interval_days` have elapsed since it last ran. Intervals below one day
/// are treated as one day.
pub fn is_due(
    enabled: bool,
    last_run: Option<DateTime<Utc>>,
    interval_days: u32,
    now: DateTime<Utc>,
) -> bool {
    if !enabled {
        return false;
    }
    match last_run {
        None => true,
        Some(last) => now - last >= Duration::days(interval_days.max(1) as i64),
    }
}

impl MaintenanceSchedule {
    pub fn package_update_due(&self, now: DateTime<Utc>) -> bool {
        is_due(
            self.package_updates_enabled,
            self.last_package_update,
            self.package_interval_days,
            now,
        )
    }

    pub fn restart_due(&self, now: DateTime<Utc>) -> bool {
        is_due(
            self.restart_enabled,
            self.last_restart,
            self.restart_interval_days,
            now,
        )
    }
}
