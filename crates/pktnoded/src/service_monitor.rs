//! Guest Service Status Monitor and service control for the node unit.
//!
//! The probe short-circuits in order: the distribution must be Running,
//! systemd must answer, the unit file must be registered. Only then are the
//! unit properties read. Uptime is computed inside the guest so host/guest
//! clock skew never enters the result.

use pktnode_shared::parsers::{
    parse_elapsed_seconds, parse_is_active, parse_is_enabled, parse_system_state,
    parse_unit_properties, unit_file_listed, UNIT_PROPERTIES,
};
use pktnode_shared::{DistributionRecord, NodeError, ServiceAvailability, ServiceRecord};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::lifecycle::LifecycleTimings;
use crate::prober::StatusProber;
use crate::wsl::{shell_quote, Wsl};

/// Service control verb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

impl ServiceAction {
    fn verb(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
        }
    }
}

#[derive(Clone)]
pub struct ServiceMonitor {
    wsl: Wsl,
    prober: StatusProber,
    unit: String,
    service_settle: Duration,
    restart_settle: Duration,
}

impl ServiceMonitor {
    pub fn new(wsl: Wsl, unit: &str, timings: &LifecycleTimings) -> Self {
        Self {
            prober: StatusProber::new(wsl.clone()),
            wsl,
            unit: unit.to_string(),
            service_settle: timings.service_settle,
            restart_settle: timings.service_restart_settle,
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub async fn probe(&self, name: &str) -> ServiceRecord {
        let record = self.prober.probe(name).await;
        self.probe_observed(&record).await
    }

    /// Probe against an already observed distribution record
    pub async fn probe_observed(&self, record: &DistributionRecord) -> ServiceRecord {
        if !record.is_running() {
            return ServiceRecord::unavailable(ServiceAvailability::DistributionNotRunning);
        }
        let name = record.name.as_str();

        match self.wsl.exec(name, "systemctl is-system-running || true").await {
            Ok(out) if out.success() && parse_system_state(&out.stdout).is_some() => {}
            Ok(_) => return ServiceRecord::unavailable(ServiceAvailability::InitUnavailable),
            Err(e) => {
                warn!("Init system query failed: {}", e);
                return ServiceRecord::unavailable(ServiceAvailability::Unknown);
            }
        }

        let list_cmd = format!("systemctl list-unit-files {}", self.unit);
        match self.wsl.exec(name, &list_cmd).await {
            Ok(out) if unit_file_listed(&out.stdout, &self.unit) => {}
            Ok(_) => return ServiceRecord::unavailable(ServiceAvailability::NotInstalled),
            Err(e) => {
                warn!("Unit file query failed: {}", e);
                return ServiceRecord::unavailable(ServiceAvailability::Unknown);
            }
        }

        let show_cmd = format!(
            "systemctl show {} --no-pager --property={}",
            self.unit, UNIT_PROPERTIES
        );
        let props = match self.wsl.exec(name, &show_cmd).await {
            Ok(out) if out.success() => match parse_unit_properties(&out.stdout) {
                Ok(props) => props,
                Err(e) => {
                    warn!("Unparseable unit properties: {}", e);
                    return ServiceRecord::unavailable(ServiceAvailability::Unknown);
                }
            },
            Ok(out) => {
                warn!("systemctl show exited {}", out.exit_code);
                return ServiceRecord::unavailable(ServiceAvailability::Unknown);
            }
            Err(e) => {
                warn!("systemctl show failed: {}", e);
                return ServiceRecord::unavailable(ServiceAvailability::Unknown);
            }
        };

        let enabled_cmd = format!("systemctl is-enabled {} || true", self.unit);
        let enabled = match self.wsl.exec(name, &enabled_cmd).await {
            Ok(out) => parse_is_enabled(&out.stdout),
            Err(_) => false,
        };

        let service = ServiceRecord::installed(
            &props.active_state,
            &props.sub_state,
            props.main_pid,
            props.memory_current,
            enabled,
        );

        let uptime = match (&props.active_enter_timestamp, service.active) {
            (Some(ts), true) => self.elapsed_since(name, ts).await,
            _ => None,
        };
        service.with_uptime(uptime)
    }

    /// Seconds since `timestamp`, computed with the guest's clock
    async fn elapsed_since(&self, name: &str, timestamp: &str) -> Option<Duration> {
        let cmd = format!(
            "echo $(( $(date +%s) - $(date -d {} +%s) ))",
            shell_quote(timestamp)
        );
        let out = self.wsl.exec(name, &cmd).await.ok()?;
        if !out.success() {
            return None;
        }
        parse_elapsed_seconds(&out.stdout)
            .map(Duration::from_secs)
            .map_err(|e| debug!("Service uptime unavailable: {}", e))
            .ok()
    }

    /// Start, stop or restart the node unit. Requires the distribution to
    /// be Running. A restart is confirmed with `is-active` after settling.
    pub async fn control(&self, name: &str, action: ServiceAction) -> Result<bool, NodeError> {
        let record = self.prober.probe(name).await;
        if !record.installed {
            return Err(NodeError::NotInstalled(name.to_string()));
        }
        if !record.is_running() {
            return Err(NodeError::NotRunning(name.to_string()));
        }

        info!("Service {} {}", action.verb(), self.unit);
        let cmd = format!("systemctl {} {}", action.verb(), self.unit);
        let issued = match self.wsl.exec_root(name, &cmd).await {
            Ok(out) => out.success(),
            Err(e) => {
                warn!("systemctl {} failed: {}", action.verb(), e);
                false
            }
        };
        if !issued {
            return Ok(false);
        }

        match action {
            ServiceAction::Start | ServiceAction::Stop => {
                sleep(self.service_settle).await;
                Ok(true)
            }
            ServiceAction::Restart => {
                sleep(self.restart_settle).await;
                let check = format!("systemctl is-active {}", self.unit);
                Ok(matches!(
                    self.wsl.exec(name, &check).await,
                    Ok(out) if parse_is_active(&out.stdout)
                ))
            }
        }
    }

    pub async fn start_service(&self, name: &str) -> Result<bool, NodeError> {
        self.control(name, ServiceAction::Start).await
    }

    pub async fn stop_service(&self, name: &str) -> Result<bool, NodeError> {
        self.control(name, ServiceAction::Stop).await
    }

    pub async fn restart_service(&self, name: &str) -> Result<bool, NodeError> {
        self.control(name, ServiceAction::Restart).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::executor::{ScriptedExecutor, ScriptedResponse};
    use pktnode_shared::NODE_SERVICE_UNIT;
    use std::sync::Arc;

    const RUNNING: &str = "NAME STATE VERSION\n* PKTWinNode Running 2\n";

    fn monitor(exec: &ScriptedExecutor) -> ServiceMonitor {
        let wsl = Wsl::new(Arc::new(exec.clone()), &Config::default());
        ServiceMonitor::new(wsl, NODE_SERVICE_UNIT, &LifecycleTimings::immediate())
    }

    fn running_guest() -> ScriptedExecutor {
        ScriptedExecutor::new()
            .on("--list --verbose", ScriptedResponse::ok(RUNNING))
            .on("is-system-running", ScriptedResponse::ok("running\n"))
            .on(
                "list-unit-files",
                ScriptedResponse::ok("UNIT FILE STATE\ncjdns-sh.service enabled\n"),
            )
    }

    #[tokio::test]
    async fn test_not_running_makes_no_guest_call() {
        let exec = ScriptedExecutor::new().on(
            "--list --verbose",
            ScriptedResponse::ok("NAME STATE VERSION\nPKTWinNode Stopped 2\n"),
        );
        let record = monitor(&exec).probe("PKTWinNode").await;
        assert_eq!(record.availability, ServiceAvailability::DistributionNotRunning);
        assert!(!record.installed);
        assert_eq!(exec.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_systemd_unavailable() {
        let exec = ScriptedExecutor::new()
            .on("--list --verbose", ScriptedResponse::ok(RUNNING))
            .on("is-system-running", ScriptedResponse::ok(""));
        let record = monitor(&exec).probe("PKTWinNode").await;
        assert_eq!(record.status_text(), "Systemd not available");
        assert_eq!(exec.count_matching("list-unit-files"), 0);
    }

    #[tokio::test]
    async fn test_unit_not_installed() {
        let exec = ScriptedExecutor::new()
            .on("--list --verbose", ScriptedResponse::ok(RUNNING))
            .on("is-system-running", ScriptedResponse::ok("degraded\n"))
            .on("list-unit-files", ScriptedResponse::ok("0 unit files listed.\n"));
        let record = monitor(&exec).probe("PKTWinNode").await;
        assert_eq!(record.status_text(), "Service not installed");
        assert_eq!(exec.count_matching("systemctl show"), 0);
    }

    #[tokio::test]
    async fn test_active_unit_with_uptime() {
        let exec = running_guest()
            .on(
                "systemctl show",
                ScriptedResponse::ok(
                    "ActiveState=active\nSubState=running\nMainPID=812\nMemoryCurrent=5242880\n\
                     ActiveEnterTimestamp=Mon 2026-10-19 08:00:00 UTC\n",
                ),
            )
            .on("is-enabled", ScriptedResponse::ok("enabled\n"))
            .on("date -d", ScriptedResponse::ok("3720\n"));
        let record = monitor(&exec).probe("PKTWinNode").await;
        assert!(record.installed && record.active && record.enabled);
        assert_eq!(record.pid, Some(812));
        assert_eq!(record.memory_text(), "5 MB");
        assert_eq!(record.uptime, Some(Duration::from_secs(3720)));
        assert!(exec
            .calls()
            .iter()
            .any(|c| c.contains("date -d 'Mon 2026-10-19 08:00:00 UTC' +%s")));
    }

    #[tokio::test]
    async fn test_inactive_unit_skips_uptime() {
        let exec = running_guest().on(
            "systemctl show",
            ScriptedResponse::ok("ActiveState=inactive\nSubState=dead\nMainPID=0\nActiveEnterTimestamp=n/a\n"),
        );
        let record = monitor(&exec).probe("PKTWinNode").await;
        assert_eq!(record.status_text(), "Inactive (stopped)");
        assert!(!record.enabled);
        assert_eq!(exec.count_matching("date -d"), 0);
    }

    #[tokio::test]
    async fn test_control_requires_running() {
        let exec = ScriptedExecutor::new().on(
            "--list --verbose",
            ScriptedResponse::ok("NAME STATE VERSION\nPKTWinNode Stopped 2\n"),
        );
        let err = monitor(&exec).start_service("PKTWinNode").await.unwrap_err();
        assert!(matches!(err, NodeError::NotRunning(_)));
        assert_eq!(exec.count_matching("systemctl"), 0);
    }

    #[tokio::test]
    async fn test_restart_confirms_active() {
        let exec = ScriptedExecutor::new()
            .on("--list --verbose", ScriptedResponse::ok(RUNNING))
            .on("is-active", ScriptedResponse::ok("active\n"));
        assert!(monitor(&exec).restart_service("PKTWinNode").await.unwrap());
        assert_eq!(exec.count_matching("-u root -e sh -c systemctl restart cjdns-sh.service"), 1);

        let exec = ScriptedExecutor::new()
            .on("--list --verbose", ScriptedResponse::ok(RUNNING))
            .on("is-active", ScriptedResponse::ok("failed\n"));
        assert!(!monitor(&exec).restart_service("PKTWinNode").await.unwrap());
    }
}
