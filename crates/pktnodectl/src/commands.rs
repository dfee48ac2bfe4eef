//! Command handlers for pktnodectl.
//!
//! `App` wires the orchestration core to one executor and one settings
//! store so every handler can be exercised against a scripted executor.

use anyhow::{bail, Context, Result};
use pktnode_shared::{DeploymentReport, NodeError, NODE_SERVICE_UNIT};
use pktnoded::deploy::{DeploymentPipeline, HttpImageFetcher, ImageFetcher};
use pktnoded::host::{HostEnvironment, HyperVEnableResult};
use pktnoded::service_monitor::ServiceAction;
use pktnoded::settings::{load_or_init, Settings, SettingsStore};
use pktnoded::{Config, LifecycleController, LifecycleTimings, ServiceMonitor, SharedExecutor, Wsl};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::cli::{Commands, ServiceCommands, SettingsCommands};
use crate::output::{self, print_kv, StatusReport};

pub struct App {
    config: Config,
    config_path: PathBuf,
    store: Arc<dyn SettingsStore>,
    wsl: Wsl,
    timings: LifecycleTimings,
    lifecycle: LifecycleController,
    monitor: ServiceMonitor,
    host: HostEnvironment,
}

impl App {
    pub fn new(
        config: Config,
        exec: SharedExecutor,
        store: Arc<dyn SettingsStore>,
        timings: LifecycleTimings,
    ) -> Self {
        let wsl = Wsl::new(exec.clone(), &config);
        Self {
            lifecycle: LifecycleController::new(wsl.clone(), &config, timings.clone()),
            monitor: ServiceMonitor::new(wsl.clone(), NODE_SERVICE_UNIT, &timings),
            host: HostEnvironment::new(exec, &config),
            wsl,
            timings,
            store,
            config,
            config_path: Config::path(),
        }
    }

    /// Where `init-config` writes; defaults to the resolved config path
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = path;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.distribution.name
    }

    fn settings(&self) -> Settings {
        load_or_init(self.store.as_ref())
    }

    pub async fn status_report(&self) -> StatusReport {
        let distribution = self.lifecycle.prober().probe(self.name()).await;
        let service = self.monitor.probe_observed(&distribution).await;
        StatusReport { distribution, service }
    }

    /// Run one command
    pub async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Status { json } => self.status(json).await,
            Commands::Start => self.start().await,
            Commands::Stop => self.stop().await,
            Commands::Reboot => {
                let done = self.lifecycle.reboot(self.name()).await?;
                report(done, "reboot")
            }
            Commands::Delete { yes } => self.delete(yes).await,
            Commands::Deploy => {
                let fetcher = Arc::new(HttpImageFetcher::new(self.config.timeouts.download()));
                let result = self.deploy(fetcher).await?;
                if result.success {
                    Ok(())
                } else {
                    bail!("deployment failed: {}", result.last_message)
                }
            }
            Commands::Reconfigure => self.reconfigure().await,
            Commands::UpdatePackages => {
                let done = self.lifecycle.update_packages(self.name()).await?;
                report(done, "package update")
            }
            Commands::Connectivity => {
                if self.lifecycle.check_connectivity(self.name()).await? {
                    output::ok("Guest can reach the internet");
                    Ok(())
                } else {
                    output::fail("Guest has no connectivity");
                    bail!("connectivity check failed")
                }
            }
            Commands::Service { action } => self.service(action).await,
            Commands::Settings { action } => self.settings_command(action),
            Commands::Host => {
                self.host_report().await;
                Ok(())
            }
            Commands::EnableHyperv => self.enable_hyperv().await,
            Commands::InstallWsl => {
                let done = self.host.install_wsl().await;
                if done && self.host.is_restart_pending().await {
                    println!("Restart Windows before deploying the node");
                }
                report(done, "WSL installation")
            }
            Commands::InitConfig { force } => init_config(&self.config_path, force),
        }
    }

    async fn status(&self, json: bool) -> Result<()> {
        let report = self.status_report().await;
        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            output::print_status(&report);
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let record = self.lifecycle.prober().probe(self.name()).await;
        if !record.installed {
            return Err(NodeError::NotInstalled(self.name().to_string()).into());
        }
        if record.is_running() {
            output::ok(&format!("{} is already running", self.name()));
            return Ok(());
        }
        report(self.lifecycle.start(self.name()).await, "start")
    }

    async fn stop(&self) -> Result<()> {
        let record = self.lifecycle.prober().probe(self.name()).await;
        if !record.installed {
            return Err(NodeError::NotInstalled(self.name().to_string()).into());
        }
        if !record.is_running() {
            output::ok(&format!("{} is not running", self.name()));
            return Ok(());
        }
        report(self.lifecycle.stop(self.name()).await, "stop")
    }

    async fn delete(&self, confirmed: bool) -> Result<()> {
        if !confirmed {
            bail!("refusing to delete {} without --yes", self.name());
        }
        let done = self.lifecycle.delete(self.name()).await?;
        report(done, "delete")
    }

    /// Validate settings, then run the pipeline while drawing its progress
    pub async fn deploy(&self, fetcher: Arc<dyn ImageFetcher>) -> Result<DeploymentReport> {
        let settings = self.settings();
        let node = settings.node_configuration().map_err(NodeError::from)?;
        node.require_static_ip().map_err(NodeError::from)?;

        let record = self.lifecycle.prober().probe(self.name()).await;
        if record.installed {
            bail!("{} is already installed; delete it first", self.name());
        }

        let pipeline = DeploymentPipeline::new(self.wsl.clone(), fetcher, &self.config, self.timings.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        let renderer = tokio::spawn(output::render_progress(rx));
        let result = pipeline.run(&node, tx).await;
        // The sender was moved into the pipeline and dropped with it
        let _ = renderer.await;

        info!("Deployment finished: {:?}", result);
        if result.left_partial_guest() {
            println!(
                "{} was imported but not fully configured; run `pktnodectl delete --yes` before retrying",
                self.name()
            );
        }
        Ok(result)
    }

    async fn reconfigure(&self) -> Result<()> {
        let node = self.settings().node_configuration().map_err(NodeError::from)?;
        let done = self.lifecycle.reconfigure_network(self.name(), &node).await?;
        report(done, "network reconfiguration")
    }

    async fn service(&self, action: ServiceCommands) -> Result<()> {
        let action = match action {
            ServiceCommands::Status => {
                let record = self.monitor.probe(self.name()).await;
                print_kv(self.monitor.unit(), &record.status_text());
                return Ok(());
            }
            ServiceCommands::Start => ServiceAction::Start,
            ServiceCommands::Stop => ServiceAction::Stop,
            ServiceCommands::Restart => ServiceAction::Restart,
        };
        let done = self.monitor.control(self.name(), action).await?;
        report(done, &format!("service {:?}", action).to_lowercase())
    }

    fn settings_command(&self, action: SettingsCommands) -> Result<()> {
        let settings = self.settings();
        match action {
            SettingsCommands::Show => {
                let masked = Settings {
                    password: "***".to_string(),
                    ..settings
                };
                print!("{}", toml::to_string_pretty(&masked).context("rendering settings")?);
                Ok(())
            }
            SettingsCommands::Validate => {
                let node = settings.node_configuration().map_err(NodeError::from)?;
                print_kv("user", &node.username);
                match node.static_ip {
                    Some(address) => print_kv("address", &address.to_string()),
                    None => print_kv("address", "(not set)"),
                }
                print_kv("gateway", &node.gateway.to_string());
                print_kv("dns", &node.dns_list());
                print_kv("peer id", node.peer_id.as_deref().unwrap_or("(none)"));
                output::ok("Settings are valid");
                Ok(())
            }
        }
    }

    async fn enable_hyperv(&self) -> Result<()> {
        match self.host.enable_hyperv().await {
            HyperVEnableResult::AlreadyEnabled => {
                output::ok("Hyper-V is already enabled");
                Ok(())
            }
            result @ HyperVEnableResult::Success => {
                output::ok("Hyper-V enabled");
                if result.restart_needed() {
                    println!("Restart Windows to finish enabling Hyper-V");
                }
                Ok(())
            }
            HyperVEnableResult::Failed => {
                output::fail("Could not enable Hyper-V");
                bail!("enable it under 'Turn Windows features on or off' and restart")
            }
        }
    }

    async fn host_report(&self) {
        let wsl_installed = self.lifecycle.is_wsl_installed().await;
        print_kv("wsl", &output::yes_no(wsl_installed));
        print_kv("hyper-v", &output::yes_no(self.host.is_hyperv_available().await));
        print_kv(
            "switch",
            &output::yes_no(self.host.switch_exists(&self.config.network.switch_name).await),
        );
        print_kv("reboot pending", &output::yes_no(self.host.is_restart_pending().await));
        if wsl_installed {
            let names = self.lifecycle.installed_distributions().await;
            print_kv("distributions", &names.join(", "));
        }
    }
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists; pass --force to overwrite", path.display());
    }
    Config::save_default(path)?;
    output::ok(&format!("Wrote {}", path.display()));
    Ok(())
}

fn report(done: bool, what: &str) -> Result<()> {
    if done {
        output::ok(&format!("{} complete", what));
        Ok(())
    } else {
        output::fail(&format!("{} failed", what));
        bail!("{} failed", what)
    }
}

/// Process exit code for an error: typed failures map through `NodeError`
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<NodeError>().map(NodeError::exit_code).unwrap_or(1)
}
