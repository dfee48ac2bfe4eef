//! Configuration management for pktnoded.
//!
//! Loads settings from `$PKTNODE_CONFIG` or `<config dir>/pktnode/config.toml`,
//! or uses defaults. These are operator knobs (programs, timeouts, delays,
//! URLs); user-facing node settings live in `settings.rs`.

use anyhow::{Context, Result};
use pktnode_shared::{APP_NAME, TARGET_DISTRIBUTION};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "PKTNODE_CONFIG";

/// Config file name inside the application config directory
pub const CONFIG_FILE: &str = "config.toml";

/// Target distribution and the host programs used to drive it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionConfig {
    #[serde(default = "default_name")]
    pub name: String,

    /// Import directory; defaults to `<local data dir>/WSL/<name>`
    #[serde(default)]
    pub install_dir: Option<PathBuf>,

    #[serde(default = "default_wsl_program")]
    pub wsl_program: String,

    #[serde(default = "default_powershell_program")]
    pub powershell_program: String,
}

fn default_name() -> String {
    TARGET_DISTRIBUTION.to_string()
}

fn default_wsl_program() -> String {
    "wsl".to_string()
}

fn default_powershell_program() -> String {
    "powershell.exe".to_string()
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            install_dir: None,
            wsl_program: default_wsl_program(),
            powershell_program: default_powershell_program(),
        }
    }
}

impl DistributionConfig {
    pub fn install_dir(&self) -> PathBuf {
        self.install_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("WSL")
                .join(&self.name)
        })
    }
}

/// Per-call ceilings for external commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Listing, status and short host queries
    #[serde(default = "default_status_secs")]
    pub status_secs: u64,

    /// Ordinary guest commands
    #[serde(default = "default_guest_command_secs")]
    pub guest_command_secs: u64,

    /// apt update / upgrade / install
    #[serde(default = "default_package_secs")]
    pub package_secs: u64,

    #[serde(default = "default_import_secs")]
    pub import_secs: u64,

    #[serde(default = "default_download_secs")]
    pub download_secs: u64,

    /// Node software bootstrap installer
    #[serde(default = "default_installer_secs")]
    pub installer_secs: u64,
}

fn default_status_secs() -> u64 {
    15
}

fn default_guest_command_secs() -> u64 {
    120
}

fn default_package_secs() -> u64 {
    1800
}

fn default_import_secs() -> u64 {
    900
}

fn default_download_secs() -> u64 {
    900 // 15 minutes for a ~400 MB image
}

fn default_installer_secs() -> u64 {
    1800
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            status_secs: default_status_secs(),
            guest_command_secs: default_guest_command_secs(),
            package_secs: default_package_secs(),
            import_secs: default_import_secs(),
            download_secs: default_download_secs(),
            installer_secs: default_installer_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn status(&self) -> Duration {
        Duration::from_secs(self.status_secs)
    }

    pub fn guest_command(&self) -> Duration {
        Duration::from_secs(self.guest_command_secs)
    }

    pub fn package(&self) -> Duration {
        Duration::from_secs(self.package_secs)
    }

    pub fn import(&self) -> Duration {
        Duration::from_secs(self.import_secs)
    }

    pub fn download(&self) -> Duration {
        Duration::from_secs(self.download_secs)
    }

    pub fn installer(&self) -> Duration {
        Duration::from_secs(self.installer_secs)
    }
}

/// Settle delays and stop retry policy, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_start_settle")]
    pub start_settle_ms: u64,

    #[serde(default = "default_stop_initial_wait")]
    pub stop_initial_wait_ms: u64,

    /// Poll n waits n × this before checking again
    #[serde(default = "default_stop_base_interval")]
    pub stop_base_interval_ms: u64,

    #[serde(default = "default_stop_retry_settle")]
    pub stop_retry_settle_ms: u64,

    #[serde(default = "default_stop_attempts")]
    pub stop_attempts: u32,

    #[serde(default = "default_reboot_wait")]
    pub reboot_wait_ms: u64,

    #[serde(default = "default_delete_wait")]
    pub delete_wait_ms: u64,

    #[serde(default = "default_service_settle")]
    pub service_settle_ms: u64,

    #[serde(default = "default_service_restart_settle")]
    pub service_restart_settle_ms: u64,

    /// Pause between applying a network file and stopping the guest
    #[serde(default = "default_network_apply_settle")]
    pub network_apply_settle_ms: u64,

    #[serde(default = "default_network_shutdown_wait")]
    pub network_shutdown_wait_ms: u64,

    /// Wait after the terminate that applies user and boot settings
    #[serde(default = "default_user_setup_restart_wait")]
    pub user_setup_restart_wait_ms: u64,

    /// Wait after the terminate that follows the node software install
    #[serde(default = "default_installer_restart_wait")]
    pub installer_restart_wait_ms: u64,
}

fn default_start_settle() -> u64 {
    1500
}

fn default_stop_initial_wait() -> u64 {
    2000
}

fn default_stop_base_interval() -> u64 {
    1000
}

fn default_stop_retry_settle() -> u64 {
    1500
}

fn default_stop_attempts() -> u32 {
    3
}

fn default_reboot_wait() -> u64 {
    2000
}

fn default_delete_wait() -> u64 {
    1000
}

fn default_service_settle() -> u64 {
    1000
}

fn default_service_restart_settle() -> u64 {
    2000
}

fn default_network_apply_settle() -> u64 {
    500
}

fn default_network_shutdown_wait() -> u64 {
    2000
}

fn default_user_setup_restart_wait() -> u64 {
    1000
}

fn default_installer_restart_wait() -> u64 {
    2000
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            start_settle_ms: default_start_settle(),
            stop_initial_wait_ms: default_stop_initial_wait(),
            stop_base_interval_ms: default_stop_base_interval(),
            stop_retry_settle_ms: default_stop_retry_settle(),
            stop_attempts: default_stop_attempts(),
            reboot_wait_ms: default_reboot_wait(),
            delete_wait_ms: default_delete_wait(),
            service_settle_ms: default_service_settle(),
            service_restart_settle_ms: default_service_restart_settle(),
            network_apply_settle_ms: default_network_apply_settle(),
            network_shutdown_wait_ms: default_network_shutdown_wait(),
            user_setup_restart_wait_ms: default_user_setup_restart_wait(),
            installer_restart_wait_ms: default_installer_restart_wait(),
        }
    }
}

/// Image and installer sources for a deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    #[serde(default = "default_image_url")]
    pub image_url: String,

    /// Lowercase hex SHA-256 of the image; verification is skipped when unset
    #[serde(default)]
    pub image_sha256: Option<String>,

    #[serde(default = "default_installer_url")]
    pub installer_url: String,

    #[serde(default = "default_baseline_packages")]
    pub baseline_packages: Vec<String>,
}

fn default_image_url() -> String {
    "https://releases.ubuntu.com/noble/ubuntu-24.04.3-wsl-amd64.wsl".to_string()
}

fn default_installer_url() -> String {
    "https://pkt.cash/special/cjdns/cjdns.sh".to_string()
}

fn default_baseline_packages() -> Vec<String> {
    vec!["jq".to_string(), "curl".to_string(), "netplan.io".to_string()]
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            image_url: default_image_url(),
            image_sha256: None,
            installer_url: default_installer_url(),
            baseline_packages: default_baseline_packages(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maintenance tick interval in seconds
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Status poll interval of the supervisor, in seconds
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
}

fn default_tick_secs() -> u64 {
    3600
}

fn default_poll_secs() -> u64 {
    3
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            poll_secs: default_poll_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Host virtual switch the guest bridges through
    #[serde(default = "default_switch_name")]
    pub switch_name: String,

    #[serde(default = "default_netplan_path")]
    pub netplan_path: String,

    /// Interface used when discovery inside the guest finds nothing
    #[serde(default = "default_fallback_interface")]
    pub fallback_interface: String,

    /// Host `.wslconfig`; defaults to the one in the user's home
    #[serde(default)]
    pub wslconfig_path: Option<PathBuf>,
}

fn default_switch_name() -> String {
    "WSLBridge".to_string()
}

fn default_netplan_path() -> String {
    "/etc/netplan/01-static-ip.yaml".to_string()
}

fn default_fallback_interface() -> String {
    "eth0".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            switch_name: default_switch_name(),
            netplan_path: default_netplan_path(),
            fallback_interface: default_fallback_interface(),
            wslconfig_path: None,
        }
    }
}

impl NetworkConfig {
    pub fn wslconfig_path(&self) -> PathBuf {
        self.wslconfig_path
            .clone()
            .unwrap_or_else(crate::host::default_wslconfig_path)
    }
}

/// Full daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub distribution: DistributionConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub deploy: DeployConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub network: NetworkConfig,
}

impl Config {
    /// Resolved config file path
    pub fn path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_NAME)
            .join(CONFIG_FILE)
    }

    /// Load config from file, or return defaults
    pub fn load() -> Self {
        let path = Self::path();
        Self::load_from_path(&path).unwrap_or_else(|e| {
            warn!("Config not loaded from {}, using defaults: {:#}", path.display(), e);
            Config::default()
        })
    }

    /// Load config from specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save default config to path (for init)
    pub fn save_default(path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(&Config::default())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        info!("Saved default config to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.distribution.name, "PKTWinNode");
        assert_eq!(config.lifecycle.stop_attempts, 3);
        assert_eq!(config.timeouts.download(), Duration::from_secs(900));
        assert_eq!(config.network.switch_name, "WSLBridge");
        assert_eq!(config.deploy.baseline_packages, vec!["jq", "curl", "netplan.io"]);
        assert!(config.deploy.image_sha256.is_none());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[distribution]
name = "NodeTest"
install_dir = "D:\\WSL\\NodeTest"

[lifecycle]
stop_attempts = 5
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.distribution.name, "NodeTest");
        assert_eq!(config.distribution.install_dir(), PathBuf::from("D:\\WSL\\NodeTest"));
        assert_eq!(config.lifecycle.stop_attempts, 5);
        // Defaults for missing fields
        assert_eq!(config.lifecycle.start_settle_ms, 1500);
        assert_eq!(config.scheduler.tick_secs, 3600);
    }

    #[test]
    fn test_install_dir_default_ends_with_name() {
        let config = Config::default();
        let dir = config.distribution.install_dir();
        assert!(dir.ends_with("WSL/PKTWinNode") || dir.ends_with("WSL\\PKTWinNode"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        Config::save_default(&path).unwrap();
        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.deploy.image_url, Config::default().deploy.image_url);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[lifecycle\nbroken").unwrap();
        assert!(Config::load_from_path(&path).is_err());
    }
}
