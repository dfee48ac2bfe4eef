//! PKT WinNode supervisor daemon
//!
//! Optionally starts the node distribution, runs the maintenance scheduler,
//! polls status and logs transitions, and stops the distribution on exit
//! when configured to.

use anyhow::Result;
use pktnode_shared::{version_line, DistributionRecord, RunState, NODE_SERVICE_UNIT};
use pktnoded::scheduler::{maintenance_ticker, Scheduler};
use pktnoded::settings::{self, FileSettingsStore, SettingsStore};
use pktnoded::{Config, LifecycleController, LifecycleTimings, ServiceMonitor, SharedExecutor, SystemExecutor, Wsl};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("pktnoded {} starting", version_line());

    let config = Config::load();
    let store: Arc<dyn SettingsStore> = Arc::new(FileSettingsStore::default_location());
    let settings = settings::load_or_init(store.as_ref());
    let name = config.distribution.name.clone();

    let exec: SharedExecutor = Arc::new(SystemExecutor::new(config.distribution.powershell_program.clone()));
    let wsl = Wsl::new(exec, &config);
    let timings = LifecycleTimings::from(&config.lifecycle);
    let lifecycle = Arc::new(LifecycleController::new(wsl.clone(), &config, timings.clone()));
    let monitor = ServiceMonitor::new(wsl, NODE_SERVICE_UNIT, &timings);

    if !lifecycle.is_wsl_installed().await {
        warn!("WSL does not answer on this host; status will read Unknown");
    }

    if settings.auto_start {
        let record = lifecycle.prober().probe(&name).await;
        if record.run_state == RunState::Stopped {
            info!("Auto-starting {}", name);
            if !lifecycle.start(&name).await {
                warn!("Auto-start of {} failed", name);
            }
        }
    }

    let scheduler = Scheduler::new(
        lifecycle.clone(),
        store.clone(),
        &name,
        Duration::from_secs(config.scheduler.tick_secs.max(1)),
    )
    .spawn();

    let poller = spawn_status_poll(
        lifecycle.clone(),
        monitor,
        name.clone(),
        Duration::from_secs(config.scheduler.poll_secs.max(1)),
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    scheduler.abort();
    poller.abort();

    // The flag may have been changed while we were running
    let auto_stop = store
        .load()
        .map(|s| s.auto_stop_on_exit)
        .unwrap_or(settings.auto_stop_on_exit);
    if auto_stop {
        info!("Stopping {} before exit", name);
        if !lifecycle.stop(&name).await {
            warn!("{} did not stop cleanly", name);
        }
    }

    Ok(())
}

/// Poll status on a fixed period and log only when something changes
fn spawn_status_poll(
    lifecycle: Arc<LifecycleController>,
    monitor: ServiceMonitor,
    name: String,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = maintenance_ticker(period);
        let mut last_state: Option<RunState> = None;
        let mut last_service: Option<String> = None;

        loop {
            ticker.tick().await;
            let record: DistributionRecord = lifecycle.prober().probe(&name).await;
            if last_state != Some(record.run_state) {
                info!("{} is {}", name, record.run_state);
                last_state = Some(record.run_state);
            }

            let service = monitor.probe_observed(&record).await.status_text();
            if last_service.as_deref() != Some(service.as_str()) {
                info!("{}: {}", monitor.unit(), service);
                last_service = Some(service);
            }
        }
    })
}
