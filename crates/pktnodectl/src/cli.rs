//! CLI - Command-line argument parsing
//!
//! Keeps argument parsing separate from execution, which lives in
//! `commands.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// PKT WinNode control CLI
#[derive(Parser, Debug)]
#[command(name = "pktnodectl")]
#[command(about = "PKT WinNode - manage the node distribution", long_about = None)]
#[command(version = pktnode_shared::VERSION)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Config file (overrides $PKTNODE_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Settings file (overrides $PKTNODE_SETTINGS)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Log more: -v info, -vv debug
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Show distribution and node service status
    Status {
        /// Output JSON only
        #[arg(long)]
        json: bool,
    },

    /// Start the distribution
    Start,

    /// Stop the distribution, retrying until it reports stopped
    Stop,

    /// Terminate and start the distribution
    Reboot,

    /// Unregister the distribution and discard its disk
    Delete {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },

    /// Download, import and configure a new node distribution
    Deploy,

    /// Apply the saved network settings to a stopped distribution
    Reconfigure,

    /// Run apt update and upgrade inside the guest
    UpdatePackages,

    /// Ping out from inside the guest
    Connectivity,

    /// Node service status and control
    Service {
        #[command(subcommand)]
        action: ServiceCommands,
    },

    /// Inspect the saved settings
    Settings {
        #[command(subcommand)]
        action: SettingsCommands,
    },

    /// Report host prerequisites
    Host,

    /// Enable the Hyper-V feature (elevated)
    EnableHyperv,

    /// Install WSL without a distribution, enabling Hyper-V first (elevated)
    InstallWsl,

    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCommands {
    Status,
    Start,
    Stop,
    Restart,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsCommands {
    /// Print settings with the password masked
    Show,
    /// Validate the network and identity fields
    Validate,
}

impl Cli {
    /// Log filter for the verbosity flag; `RUST_LOG` still wins
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}
