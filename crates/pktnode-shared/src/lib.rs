//! Shared types and utilities for the PKT WinNode components.
//!
//! Holds the value records the orchestrator recomputes on every probe, the
//! progress events emitted by the deployment pipeline, network input
//! validation and the parsers for the text formats produced by the
//! virtualization CLI and the guest init system.

pub mod error;
pub mod format;
pub mod network;
pub mod parsers;
pub mod progress;
pub mod schedule;
pub mod status;

pub use error::NodeError;
pub use network::{NodeConfiguration, StaticAddress, ValidationError};
pub use progress::{DeployStage, DeploymentProgress, DeploymentReport};
pub use schedule::MaintenanceSchedule;
pub use status::{DistributionRecord, RunState, ServiceAvailability, ServiceRecord};

/// Crate version, shared by the daemon and the control CLI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Short git hash captured at build time
pub const GIT_SHA: &str = env!("PKTNODE_GIT_SHA");

/// UTC build date captured at build time
pub const BUILD_DATE: &str = env!("PKTNODE_BUILD_DATE");

/// Name of the distribution the node lives in
pub const TARGET_DISTRIBUTION: &str = "PKTWinNode";

/// systemd unit installed by the node networking daemon's bootstrap script
pub const NODE_SERVICE_UNIT: &str = "cjdns-sh.service";

/// Application name used for config and settings directories
pub const APP_NAME: &str = "pktnode";

/// Human readable version line, e.g. `1.4.0 (abc1234, 2026-10-19)`
pub fn version_line() -> String {
    format!("{} ({}, {})", VERSION, GIT_SHA, BUILD_DATE)
}
