//! Lifecycle Controller - start, stop, reboot, delete and the maintenance
//! operations that act on a whole distribution.
//!
//! States: `NotInstalled -> Stopped <-> Running`, with `Unknown` reachable
//! from anywhere when a probe fails. Commands report `bool`; a violated
//! precondition is a `NodeError` raised before any command runs.

use pktnode_shared::parsers::{parse_quiet_listing, quiet_listing_contains};
use pktnode_shared::{DistributionRecord, NodeConfiguration, NodeError, RunState};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::{Config, LifecycleConfig};
use crate::network::NetworkConfigurator;
use crate::prober::StatusProber;
use crate::retry::{Attempt, RetryPolicy};
use crate::wsl::Wsl;

const CONNECTIVITY_CMD: &str =
    "ping -c 1 -W 2 8.8.8.8 > /dev/null 2>&1 && echo 'success' || echo 'failed'";
const APT_UPDATE_CMD: &str = "apt update";
const APT_UPGRADE_CMD: &str = "DEBIAN_FRONTEND=noninteractive apt upgrade -y";

/// Settle delays used by lifecycle, service and deployment operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleTimings {
    pub start_settle: Duration,
    pub stop_initial_wait: Duration,
    pub stop_retry: RetryPolicy,
    pub stop_retry_settle: Duration,
    pub reboot_wait: Duration,
    pub delete_wait: Duration,
    pub service_settle: Duration,
    pub service_restart_settle: Duration,
    pub network_apply_settle: Duration,
    pub network_shutdown_wait: Duration,
    pub user_setup_restart_wait: Duration,
    pub installer_restart_wait: Duration,
}

impl LifecycleTimings {
    /// All waits zeroed, same retry count. For tests.
    pub fn immediate() -> Self {
        Self {
            start_settle: Duration::ZERO,
            stop_initial_wait: Duration::ZERO,
            stop_retry: RetryPolicy::new(3, Duration::ZERO),
            stop_retry_settle: Duration::ZERO,
            reboot_wait: Duration::ZERO,
            delete_wait: Duration::ZERO,
            service_settle: Duration::ZERO,
            service_restart_settle: Duration::ZERO,
            network_apply_settle: Duration::ZERO,
            network_shutdown_wait: Duration::ZERO,
            user_setup_restart_wait: Duration::ZERO,
            installer_restart_wait: Duration::ZERO,
        }
    }
}

impl From<&LifecycleConfig> for LifecycleTimings {
    fn from(c: &LifecycleConfig) -> Self {
        let ms = Duration::from_millis;
        Self {
            start_settle: ms(c.start_settle_ms),
            stop_initial_wait: ms(c.stop_initial_wait_ms),
            stop_retry: RetryPolicy::new(c.stop_attempts, ms(c.stop_base_interval_ms)),
            stop_retry_settle: ms(c.stop_retry_settle_ms),
            reboot_wait: ms(c.reboot_wait_ms),
            delete_wait: ms(c.delete_wait_ms),
            service_settle: ms(c.service_settle_ms),
            service_restart_settle: ms(c.service_restart_settle_ms),
            network_apply_settle: ms(c.network_apply_settle_ms),
            network_shutdown_wait: ms(c.network_shutdown_wait_ms),
            user_setup_restart_wait: ms(c.user_setup_restart_wait_ms),
            installer_restart_wait: ms(c.installer_restart_wait_ms),
        }
    }
}

#[derive(Clone)]
pub struct LifecycleController {
    wsl: Wsl,
    prober: StatusProber,
    network: NetworkConfigurator,
    timings: LifecycleTimings,
    package_timeout: Duration,
}

impl LifecycleController {
    pub fn new(wsl: Wsl, config: &Config, timings: LifecycleTimings) -> Self {
        Self {
            prober: StatusProber::new(wsl.clone()),
            network: NetworkConfigurator::new(wsl.clone(), config),
            wsl,
            timings,
            package_timeout: config.timeouts.package(),
        }
    }

    pub fn prober(&self) -> &StatusProber {
        &self.prober
    }

    pub fn timings(&self) -> &LifecycleTimings {
        &self.timings
    }

    /// Launch the guest and wait the settle delay. Boot cannot be confirmed
    /// from the host, so only a launch failure returns false.
    pub async fn start(&self, name: &str) -> bool {
        if let Err(e) = self.wsl.launch(name).await {
            error!("Failed to start {}: {}", name, e);
            return false;
        }
        sleep(self.timings.start_settle).await;
        true
    }

    async fn terminate_ok(&self, name: &str) -> bool {
        match self.wsl.terminate(name).await {
            Ok(out) if out.success() => true,
            Ok(out) => {
                warn!("Terminate {} exited {}", name, out.exit_code);
                false
            }
            Err(e) => {
                warn!("Terminate {} failed: {}", name, e);
                false
            }
        }
    }

    /// Terminate and confirm by polling with backoff, re-terminating between
    /// polls while still Running. At most `stop_retry.attempts` terminates
    /// are issued in total.
    pub async fn stop(&self, name: &str) -> bool {
        if !self.terminate_ok(name).await {
            return false;
        }
        sleep(self.timings.stop_initial_wait).await;

        let prober = &self.prober;
        let settled = self
            .timings
            .stop_retry
            .run(
                move |attempt| async move {
                    let state = prober.probe(name).await.run_state;
                    info!("Stop check {} for {}: {}", attempt + 1, name, state);
                    match state {
                        RunState::Running => Attempt::Retry,
                        _ => Attempt::Done(state),
                    }
                },
                move |_| async move {
                    self.terminate_ok(name).await;
                    sleep(self.timings.stop_retry_settle).await;
                },
            )
            .await;

        let final_state = match settled {
            Some(RunState::Stopped) | Some(RunState::NotInstalled) => return true,
            // Unknown state means the subsystem stopped answering for it
            Some(RunState::Unknown) => return true,
            _ => self.prober.probe(name).await.run_state,
        };

        let stopped = final_state.is_stopped_or_absent();
        if !stopped {
            warn!("{} still {} after stop retries", name, final_state);
        }
        stopped
    }

    /// Terminate, wait, start. Requires the distribution to be installed.
    pub async fn reboot(&self, name: &str) -> Result<bool, NodeError> {
        let record = self.prober.probe(name).await;
        if !record.installed {
            return Err(NodeError::NotInstalled(name.to_string()));
        }
        if !self.terminate_ok(name).await {
            return Ok(false);
        }
        sleep(self.timings.reboot_wait).await;
        Ok(self.start(name).await)
    }

    /// Terminate and unregister. Fails when the name is not registered.
    pub async fn delete(&self, name: &str) -> Result<bool, NodeError> {
        let listing = match self.wsl.list_quiet().await {
            Ok(out) if out.success() => out.stdout,
            Ok(_) | Err(_) => String::new(),
        };
        if !quiet_listing_contains(&listing, name) {
            return Err(NodeError::NotInstalled(name.to_string()));
        }

        // A stopped distribution rejects terminate; that is fine here
        let _ = self.wsl.terminate(name).await;
        sleep(self.timings.delete_wait).await;

        match self.wsl.unregister(name).await {
            Ok(out) if out.success() => {
                info!("Deleted distribution {}", name);
                Ok(true)
            }
            Ok(out) => {
                error!("Unregister {} exited {}", name, out.exit_code);
                Ok(false)
            }
            Err(e) => {
                error!("Unregister {} failed: {}", name, e);
                Ok(false)
            }
        }
    }

    /// `--version` succeeds on current releases; older inbox builds only
    /// understand `--list`.
    pub async fn is_wsl_installed(&self) -> bool {
        if matches!(self.wsl.version().await, Ok(out) if out.success()) {
            return true;
        }
        matches!(self.wsl.list().await, Ok(out) if out.success())
    }

    pub async fn installed_distributions(&self) -> Vec<String> {
        match self.wsl.list_quiet().await {
            Ok(out) if out.success() => parse_quiet_listing(&out.stdout),
            _ => Vec::new(),
        }
    }

    async fn require_running(&self, name: &str) -> Result<(), NodeError> {
        let record = self.prober.probe(name).await;
        if !record.installed {
            return Err(NodeError::NotInstalled(name.to_string()));
        }
        if !record.is_running() {
            return Err(NodeError::NotRunning(name.to_string()));
        }
        Ok(())
    }

    /// Package-index refresh and upgrade as root
    pub async fn update_packages(&self, name: &str) -> Result<bool, NodeError> {
        self.require_running(name).await?;
        info!("Updating packages in {}", name);
        for cmd in [APT_UPDATE_CMD, APT_UPGRADE_CMD] {
            let spec = self.wsl.guest_spec(name, true, cmd, self.package_timeout);
            match self.wsl.run(&spec).await {
                Ok(out) if out.success() => {}
                Ok(out) => {
                    warn!("'{}' exited {}", cmd, out.exit_code);
                    return Ok(false);
                }
                Err(e) => {
                    warn!("'{}' failed: {}", cmd, e);
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// One ping from inside the guest
    pub async fn check_connectivity(&self, name: &str) -> Result<bool, NodeError> {
        self.require_running(name).await?;
        let reachable = match self.wsl.exec(name, CONNECTIVITY_CMD).await {
            Ok(out) => out.stdout.trim() == "success",
            Err(e) => {
                warn!("Connectivity check failed: {}", e);
                false
            }
        };
        Ok(reachable)
    }

    /// Apply a new network configuration to a stopped distribution
    pub async fn reconfigure_network(
        &self,
        name: &str,
        config: &NodeConfiguration,
    ) -> Result<bool, NodeError> {
        let record = self.prober.probe(name).await;
        self.reconfigure_network_observed(&record, config).await
    }

    /// Same as `reconfigure_network` against an already observed record.
    /// A Running record is rejected before any command is issued.
    pub async fn reconfigure_network_observed(
        &self,
        record: &DistributionRecord,
        config: &NodeConfiguration,
    ) -> Result<bool, NodeError> {
        if record.run_state == RunState::Running {
            return Err(NodeError::MustBeStopped(record.name.clone()));
        }
        if !record.installed {
            return Err(NodeError::NotInstalled(record.name.clone()));
        }

        let address = config.require_static_ip()?;
        info!("Reconfiguring network of {} to {}", record.name, address);
        if !self.network.apply(&record.name, config).await {
            return Ok(false);
        }
        sleep(self.timings.network_apply_settle).await;
        // Applying the file booted the guest; stop it so the next start is clean
        Ok(self.stop(&record.name).await)
    }

    /// Stop every distribution and the utility VM
    pub async fn shutdown_all(&self) -> bool {
        matches!(self.wsl.shutdown().await, Ok(out) if out.success())
    }
}
