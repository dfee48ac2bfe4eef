//! PKT WinNode Control - CLI for the node distribution
//!
//! Runs the orchestration core in-process against the real host tools.

use clap::Parser;
use pktnoded::settings::{FileSettingsStore, SettingsStore};
use pktnoded::{Config, LifecycleTimings, SharedExecutor, SystemExecutor};
use pktnodectl::commands::exit_code;
use pktnodectl::{App, Cli, Commands};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level())),
        )
        .with_writer(std::io::stderr)
        .init();

    let init = matches!(cli.command, Commands::InitConfig { .. });
    let config = match &cli.config {
        _ if init => Config::default(),
        Some(path) => match Config::load_from_path(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("error: {:#}", e);
                std::process::exit(7);
            }
        },
        None => Config::load(),
    };

    let store: Arc<dyn SettingsStore> = match &cli.settings {
        Some(path) => Arc::new(FileSettingsStore::new(path)),
        None => Arc::new(FileSettingsStore::default_location()),
    };

    let exec: SharedExecutor = Arc::new(SystemExecutor::new(config.distribution.powershell_program.clone()));
    let timings = LifecycleTimings::from(&config.lifecycle);
    let mut app = App::new(config, exec, store, timings);
    if let Some(path) = cli.config {
        app = app.with_config_path(path);
    }

    if let Err(e) = app.run(cli.command).await {
        eprintln!("error: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}
