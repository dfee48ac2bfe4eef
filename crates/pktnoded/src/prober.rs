//! Distribution Status Prober.
//!
//! Every probe recomputes a `DistributionRecord` from scratch. Failures
//! never escape: a listing that cannot be run yields `Unknown`, a listing
//! that exits non-zero or omits the name yields `NotInstalled`, and a broken
//! uptime read yields no uptime.

use pktnode_shared::parsers::{
    init_uptime, parse_elapsed_seconds, parse_monotonic_usec, parse_proc_uptime,
    parse_verbose_listing,
};
use pktnode_shared::{DistributionRecord, RunState};
use std::time::Duration;
use tracing::{debug, warn};

use crate::wsl::Wsl;

const USERSPACE_MONOTONIC_CMD: &str =
    "systemctl show --property=UserspaceTimestampMonotonic";
const PROC_UPTIME_CMD: &str = "cat /proc/uptime | awk '{print $1}'";
const PID1_ELAPSED_CMD: &str = "ps -p 1 -o etimes= | tr -d ' '";

#[derive(Clone)]
pub struct StatusProber {
    wsl: Wsl,
}

impl StatusProber {
    pub fn new(wsl: Wsl) -> Self {
        Self { wsl }
    }

    pub async fn probe(&self, name: &str) -> DistributionRecord {
        let output = match self.wsl.list_verbose().await {
            Ok(output) => output,
            Err(e) => {
                warn!("Status listing failed: {}", e);
                return DistributionRecord::unknown(name);
            }
        };

        if !output.success() {
            debug!("Listing exited {}; treating {} as not installed", output.exit_code, name);
            return DistributionRecord::not_installed(name);
        }

        let listing = parse_verbose_listing(&output.stdout);
        for e in &listing.malformed {
            warn!("Skipping unparseable listing row: {}", e);
        }
        let (run_state, version) = match listing.find(name) {
            Some(row) => (row.state.run_state(), row.version_label()),
            // Registered but the row has no usable columns
            None if listing.malformed_mentions(name) => (RunState::Stopped, String::new()),
            None => return DistributionRecord::not_installed(name),
        };

        let uptime = if run_state == RunState::Running {
            self.uptime(name).await
        } else {
            None
        };

        DistributionRecord {
            name: name.to_string(),
            installed: true,
            run_state,
            version,
            uptime,
        }
    }

    /// Guest uptime: init-system arithmetic first, then process 1 age
    pub async fn uptime(&self, name: &str) -> Option<Duration> {
        if let Some(uptime) = self.init_system_uptime(name).await {
            return Some(uptime);
        }
        let out = self.wsl.exec(name, PID1_ELAPSED_CMD).await.ok()?;
        if !out.success() {
            return None;
        }
        parse_elapsed_seconds(&out.stdout)
            .map(Duration::from_secs)
            .map_err(|e| debug!("pid 1 elapsed unavailable: {}", e))
            .ok()
    }

    async fn init_system_uptime(&self, name: &str) -> Option<Duration> {
        let monotonic = self.wsl.exec(name, USERSPACE_MONOTONIC_CMD).await.ok()?;
        if !monotonic.success() {
            return None;
        }
        let userspace_usec = parse_monotonic_usec(&monotonic.stdout).ok()?;

        let proc_uptime = self.wsl.exec(name, PROC_UPTIME_CMD).await.ok()?;
        if !proc_uptime.success() {
            return None;
        }
        let uptime_ms = parse_proc_uptime(&proc_uptime.stdout).ok()?;

        init_uptime(uptime_ms, userspace_usec)
    }
}
