//! PKT WinNode orchestration core.
//!
//! Drives the virtualization CLI and the guest init system through one
//! `CommandExecutor` seam: status probing, the lifecycle state machine, the
//! deployment pipeline, static networking and scheduled maintenance.

pub mod config;
pub mod deploy;
pub mod executor;
pub mod host;
pub mod lifecycle;
pub mod network;
pub mod prober;
pub mod retry;
pub mod scheduler;
pub mod service_monitor;
pub mod settings;
pub mod wsl;

pub use config::Config;
pub use deploy::{DeploymentPipeline, HttpImageFetcher, ImageFetcher};
pub use executor::{CommandExecutor, ScriptedExecutor, ScriptedResponse, SharedExecutor, SystemExecutor};
pub use lifecycle::{LifecycleController, LifecycleTimings};
pub use prober::StatusProber;
pub use service_monitor::ServiceMonitor;
pub use settings::{FileSettingsStore, Settings, SettingsStore};
pub use wsl::Wsl;
