//! Host environment checks and the shared host networking resources.
//!
//! The virtual switch and `.wslconfig` are shared by every distribution on
//! the host. Both writers treat "already configured" as success and never
//! touch unrelated content.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::executor::{CommandOutput, CommandSpec, SharedExecutor};

const HYPERV_CHECK_CMD: &str = "Get-Command Get-VMSwitch -ErrorAction SilentlyContinue";

const PHYSICAL_ADAPTER_CMD: &str = "Get-NetAdapter | Where-Object {$_.Status -eq 'Up' -and $_.Virtual -eq $false} | Select-Object -First 1 -ExpandProperty Name";

const RESTART_PENDING_SCRIPT: &str = r#"
$pending = $false
if (Test-Path 'HKLM:\SOFTWARE\Microsoft\Windows\CurrentVersion\WindowsUpdate\Auto Update\RebootRequired') { $pending = $true }
if (Test-Path 'HKLM:\SOFTWARE\Microsoft\Windows\CurrentVersion\Component Based Servicing\RebootPending') { $pending = $true }
$pfro = Get-ItemProperty 'HKLM:\SYSTEM\CurrentControlSet\Control\Session Manager' -Name 'PendingFileRenameOperations' -ErrorAction SilentlyContinue
if ($pfro -and $pfro.PendingFileRenameOperations) { $pending = $true }
$active = (Get-ItemProperty 'HKLM:\SYSTEM\CurrentControlSet\Control\ComputerName\ActiveComputerName' -ErrorAction SilentlyContinue).ComputerName
$next = (Get-ItemProperty 'HKLM:\SYSTEM\CurrentControlSet\Control\ComputerName\ComputerName' -ErrorAction SilentlyContinue).ComputerName
if ($active -ne $next) { $pending = $true }
Write-Output $pending
"#;

/// Hyper-V ships only with these editions; a host with the management
/// service already registered counts as capable too
const HYPERV_EDITION_SCRIPT: &str = r#"
$capable = $false
$edition = (Get-WindowsEdition -Online -ErrorAction SilentlyContinue).Edition
if ($edition -match 'Professional|Enterprise|Education|Server') { $capable = $true }
if (Get-Service -Name 'vmms' -ErrorAction SilentlyContinue) { $capable = $true }
Write-Output $capable
"#;

const DISM_PROGRAM: &str = "dism.exe";
const HYPERV_FEATURE_ARGS: [&str; 6] = [
    "/Online",
    "/Enable-Feature",
    "/FeatureName:Microsoft-Hyper-V",
    "/All",
    "/NoRestart",
    "/Quiet",
];

/// DISM exit codes that leave the feature enabled: done, done with a
/// restart required, already present
const DISM_ACCEPTED_EXIT_CODES: [i32; 3] = [0, 3010, 50];

/// Outcome of enabling the Hyper-V feature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HyperVEnableResult {
    AlreadyEnabled,
    /// Enabled; takes effect after the host restarts
    Success,
    Failed,
}

impl HyperVEnableResult {
    pub fn restart_needed(self) -> bool {
        self == HyperVEnableResult::Success
    }
}

/// Marker that shows bridged networking is already configured
const BRIDGED_MARKER: &str = "networkingMode=bridged";

/// `.wslconfig` block routing the utility VM through the named switch
pub fn wslconfig_block(switch_name: &str) -> String {
    format!(
        "[wsl2]\nnetworkingMode=bridged\nvmSwitch={}\ndhcp=false\n",
        switch_name
    )
}

/// New `.wslconfig` content, or `None` when bridged mode is already set.
/// Existing content is preserved and the block appended after a blank line.
pub fn plan_wslconfig(existing: Option<&str>, switch_name: &str) -> Option<String> {
    match existing {
        Some(content) if content.contains(BRIDGED_MARKER) => None,
        Some(content) => Some(format!("{}\n{}", content, wslconfig_block(switch_name))),
        None => Some(wslconfig_block(switch_name)),
    }
}

/// Default `.wslconfig` location in the user's profile
pub fn default_wslconfig_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".wslconfig")
}

fn powershell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[derive(Clone)]
pub struct HostEnvironment {
    exec: SharedExecutor,
    powershell_program: String,
    wsl_program: String,
    timeout: Duration,
    install_timeout: Duration,
}

impl HostEnvironment {
    pub fn new(exec: SharedExecutor, config: &Config) -> Self {
        Self {
            exec,
            powershell_program: config.distribution.powershell_program.clone(),
            wsl_program: config.distribution.wsl_program.clone(),
            timeout: config.timeouts.status(),
            install_timeout: config.timeouts.installer(),
        }
    }

    fn powershell(&self, script: &str) -> CommandSpec {
        CommandSpec::new(&self.powershell_program, self.timeout).args([
            "-NoProfile",
            "-NonInteractive",
            "-Command",
            script,
        ])
    }

    async fn query(&self, script: &str) -> Option<CommandOutput> {
        match self.exec.run(&self.powershell(script)).await {
            Ok(out) => Some(out),
            Err(e) => {
                warn!("PowerShell query failed: {}", e);
                None
            }
        }
    }

    pub async fn is_hyperv_available(&self) -> bool {
        self.query(HYPERV_CHECK_CMD)
            .await
            .map(|out| out.stdout.contains("Get-VMSwitch"))
            .unwrap_or(false)
    }

    /// Enable the Hyper-V feature through an elevated DISM run. Editions
    /// without Hyper-V fail before anything is elevated.
    pub async fn enable_hyperv(&self) -> HyperVEnableResult {
        if self.is_hyperv_available().await {
            info!("Hyper-V already enabled");
            return HyperVEnableResult::AlreadyEnabled;
        }

        let capable = self
            .query(HYPERV_EDITION_SCRIPT)
            .await
            .map(|out| out.stdout.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if !capable {
            warn!("This Windows edition does not offer Hyper-V");
            return HyperVEnableResult::Failed;
        }

        let spec = CommandSpec::new(DISM_PROGRAM, self.install_timeout)
            .args(HYPERV_FEATURE_ARGS)
            .elevated();
        match self.exec.run(&spec).await {
            Ok(out) if DISM_ACCEPTED_EXIT_CODES.contains(&out.exit_code) => {
                info!("Hyper-V enabled (dism exit {}); restart required", out.exit_code);
                HyperVEnableResult::Success
            }
            Ok(out) => {
                warn!("Enabling Hyper-V failed with dism exit {}", out.exit_code);
                HyperVEnableResult::Failed
            }
            Err(e) => {
                warn!("Enabling Hyper-V failed: {}", e);
                HyperVEnableResult::Failed
            }
        }
    }

    /// Install the subsystem without a distribution, enabling Hyper-V
    /// first when it is missing. A failed Hyper-V step skips the install.
    pub async fn install_wsl(&self) -> bool {
        if self.enable_hyperv().await == HyperVEnableResult::Failed {
            return false;
        }

        let spec = CommandSpec::new(&self.wsl_program, self.install_timeout)
            .args(["--install", "--no-distribution"])
            .elevated();
        match self.exec.run(&spec).await {
            Ok(out) if out.success() => {
                info!("WSL installed");
                true
            }
            Ok(out) => {
                warn!("WSL installation exited {}", out.exit_code);
                false
            }
            Err(e) => {
                warn!("WSL installation failed: {}", e);
                false
            }
        }
    }

    /// Pending Windows Update, servicing, file rename or computer rename
    pub async fn is_restart_pending(&self) -> bool {
        self.query(RESTART_PENDING_SCRIPT)
            .await
            .map(|out| out.stdout.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub async fn switch_exists(&self, switch_name: &str) -> bool {
        let script = format!(
            "Get-VMSwitch -Name {} -ErrorAction SilentlyContinue",
            powershell_quote(switch_name)
        );
        self.query(&script)
            .await
            .map(|out| out.stdout.contains(switch_name))
            .unwrap_or(false)
    }

    /// Create the virtual switch unless it exists. Bridges the first
    /// physical adapter that is up, else creates an internal switch.
    pub async fn ensure_virtual_switch(&self, switch_name: &str) -> bool {
        if self.switch_exists(switch_name).await {
            info!("Virtual switch {} already exists", switch_name);
            return true;
        }

        let adapter = self
            .query(PHYSICAL_ADAPTER_CMD)
            .await
            .map(|out| out.stdout.trim().to_string())
            .unwrap_or_default();

        let script = if adapter.is_empty() {
            info!("No physical adapter up, creating internal switch {}", switch_name);
            format!(
                "New-VMSwitch -Name {} -SwitchType Internal -ErrorAction Stop",
                powershell_quote(switch_name)
            )
        } else {
            info!("Creating switch {} bridged to {}", switch_name, adapter);
            format!(
                "New-VMSwitch -Name {} -NetAdapterName {} -AllowManagementOS $true -ErrorAction Stop",
                powershell_quote(switch_name),
                powershell_quote(&adapter)
            )
        };

        match self.exec.run(&self.powershell(&script).elevated()).await {
            Ok(out) if out.success() => true,
            Ok(out) => {
                warn!("Switch creation exited {}", out.exit_code);
                false
            }
            Err(e) => {
                warn!("Switch creation failed: {}", e);
                false
            }
        }
    }
}

/// Make sure `.wslconfig` at `path` selects bridged networking through
/// `switch_name`. Returns true when the file was changed.
pub async fn ensure_wslconfig(path: &Path, switch_name: &str) -> Result<bool> {
    let existing = match tokio::fs::read_to_string(path).await {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };

    match plan_wslconfig(existing.as_deref(), switch_name) {
        Some(content) => {
            tokio::fs::write(path, content)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Enabled bridged networking in {}", path.display());
            Ok(true)
        }
        None => Ok(false),
    }
}
