//! Network Configurator - static addressing inside the guest.
//!
//! Renders the netplan file, writes and applies it, points resolv.conf at
//! the systemd-resolved stub and keeps `/etc/wsl.conf` from regenerating
//! resolv.conf on boot. The caller guarantees the distribution is not
//! Running; this module does not re-check.

use pktnode_shared::{NodeConfiguration, StaticAddress};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::wsl::{shell_quote, Wsl};

const INTERFACE_CMD: &str = "ip -o link show | awk -F': ' '{print $2}' | grep -v lo | head -n1";
const STUB_RESOLVER_CMD: &str =
    "rm -f /etc/resolv.conf && ln -sf /run/systemd/resolve/stub-resolv.conf /etc/resolv.conf";
const WSL_CONF_PATH: &str = "/etc/wsl.conf";

// ============================================================================
// Netplan rendering
// ============================================================================

#[derive(Serialize)]
struct Netplan {
    network: NetplanNetwork,
}

#[derive(Serialize)]
struct NetplanNetwork {
    version: u8,
    renderer: &'static str,
    ethernets: BTreeMap<String, NetplanEthernet>,
}

#[derive(Serialize)]
struct NetplanEthernet {
    addresses: Vec<String>,
    routes: Vec<NetplanRoute>,
    nameservers: NetplanNameservers,
    dhcp4: bool,
}

#[derive(Serialize)]
struct NetplanRoute {
    to: &'static str,
    via: String,
}

#[derive(Serialize)]
struct NetplanNameservers {
    addresses: Vec<String>,
}

/// Render the netplan document binding `interface` to `address`, a default
/// route via the gateway and the DNS servers.
pub fn render_netplan(
    interface: &str,
    address: &StaticAddress,
    config: &NodeConfiguration,
) -> Result<String, serde_yaml::Error> {
    let ethernet = NetplanEthernet {
        addresses: vec![address.to_string()],
        routes: vec![NetplanRoute {
            to: "default",
            via: config.gateway.to_string(),
        }],
        nameservers: NetplanNameservers {
            addresses: config.dns_servers.iter().map(|d| d.to_string()).collect(),
        },
        dhcp4: false,
    };
    let doc = Netplan {
        network: NetplanNetwork {
            version: 2,
            renderer: "networkd",
            ethernets: BTreeMap::from([(interface.to_string(), ethernet)]),
        },
    };
    serde_yaml::to_string(&doc)
}

/// Interface name from `ip -o link` output, without the `@peer` suffix
pub fn parse_interface(output: &str) -> Option<String> {
    let first = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let name = first.split('@').next().unwrap_or(first).trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

// ============================================================================
// wsl.conf resolver edit
// ============================================================================

/// Edit needed to stop resolv.conf regeneration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvConfEdit {
    /// No `[network]` section: append one with the key
    AppendBlock,
    /// Section exists without the key: insert the key after the header
    InsertKey,
    NoOp,
}

/// Decide the edit by scanning the ini sections of `/etc/wsl.conf`
pub fn plan_resolv_conf_edit(wsl_conf: &str) -> ResolvConfEdit {
    let mut in_network = false;
    let mut seen_network = false;
    for line in wsl_conf.lines().map(str::trim) {
        if line.starts_with('[') && line.ends_with(']') {
            in_network = line.eq_ignore_ascii_case("[network]");
            seen_network |= in_network;
            continue;
        }
        if in_network {
            let key = line.split('=').next().unwrap_or_default().trim();
            if key == "generateResolvConf" {
                return ResolvConfEdit::NoOp;
            }
        }
    }
    if seen_network {
        ResolvConfEdit::InsertKey
    } else {
        ResolvConfEdit::AppendBlock
    }
}

/// Guest shell command implementing the edit, if any
pub fn resolv_conf_edit_command(edit: ResolvConfEdit) -> Option<String> {
    match edit {
        ResolvConfEdit::AppendBlock => Some(format!(
            "printf '\\n[network]\\ngenerateResolvConf = false\\n' >> {}",
            WSL_CONF_PATH
        )),
        ResolvConfEdit::InsertKey => Some(format!(
            "sed -i '/^\\[network\\]/a generateResolvConf = false' {}",
            WSL_CONF_PATH
        )),
        ResolvConfEdit::NoOp => None,
    }
}

// ============================================================================
// Configurator
// ============================================================================

#[derive(Clone)]
pub struct NetworkConfigurator {
    wsl: Wsl,
    netplan_path: String,
    fallback_interface: String,
    guest_timeout: Duration,
}

impl NetworkConfigurator {
    pub fn new(wsl: Wsl, config: &Config) -> Self {
        Self {
            wsl,
            netplan_path: config.network.netplan_path.clone(),
            fallback_interface: config.network.fallback_interface.clone(),
            guest_timeout: config.timeouts.guest_command(),
        }
    }

    /// First non-loopback interface in the guest, or the fallback
    pub async fn discover_interface(&self, name: &str) -> String {
        let discovered = match self.wsl.exec_root(name, INTERFACE_CMD).await {
            Ok(out) if out.success() => parse_interface(&out.stdout),
            Ok(_) => None,
            Err(e) => {
                debug!("Interface discovery failed: {}", e);
                None
            }
        };
        discovered.unwrap_or_else(|| {
            info!("No interface discovered, using {}", self.fallback_interface);
            self.fallback_interface.clone()
        })
    }

    async fn run_root(&self, name: &str, cmd: &str, what: &str) -> Option<bool> {
        let spec = self.wsl.guest_spec(name, true, cmd, self.guest_timeout);
        match self.wsl.run(&spec).await {
            Ok(out) => {
                if !out.success() {
                    warn!("{} exited {}: {}", what, out.exit_code, out.stderr.trim());
                }
                Some(out.success())
            }
            Err(e) => {
                warn!("{} failed: {}", what, e);
                None
            }
        }
    }

    /// Apply the static configuration. Returns false when no address is set,
    /// when the netplan file could not be written or when a guest command
    /// could not run at all.
    /// `netplan apply` may legitimately fail before the guest reboots with
    /// systemd, so its exit code is logged and not fatal.
    pub async fn apply(&self, name: &str, config: &NodeConfiguration) -> bool {
        let Some(address) = config.static_ip else {
            warn!("No static address configured for {}", name);
            return false;
        };
        let interface = self.discover_interface(name).await;

        let netplan = match render_netplan(&interface, &address, config) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Failed to render netplan: {}", e);
                return false;
            }
        };

        let write_cmd = format!(
            "printf '%s' {} > {path} && chmod 600 {path}",
            shell_quote(&netplan),
            path = self.netplan_path
        );
        if self.run_root(name, &write_cmd, "Writing netplan").await != Some(true) {
            return false;
        }
        info!("Wrote {} for {} on {}", self.netplan_path, address, interface);

        if self.run_root(name, "netplan apply", "netplan apply").await.is_none() {
            return false;
        }
        if self.run_root(name, STUB_RESOLVER_CMD, "Resolver link").await.is_none() {
            return false;
        }

        let current = match self.wsl.exec_root(name, &format!("cat {}", WSL_CONF_PATH)).await {
            Ok(out) => out.stdout,
            Err(e) => {
                warn!("Reading {} failed: {}", WSL_CONF_PATH, e);
                return false;
            }
        };
        let edit = plan_resolv_conf_edit(&current);
        debug!("wsl.conf resolver edit: {:?}", edit);
        if let Some(cmd) = resolv_conf_edit_command(edit) {
            if self.run_root(name, &cmd, "wsl.conf edit").await != Some(true) {
                return false;
            }
        }
        true
    }
}
