//! End-to-end orchestrator scenarios against a scripted host.
//!
//! Each test wires the real components to a `ScriptedExecutor` and checks
//! the observable contract: records, booleans, progress events and the
//! exact commands that reached the host.

use pktnode_shared::{DeployStage, DeploymentProgress, NodeConfiguration, NodeError, RunState};
use pktnoded::deploy::{DeploymentPipeline, StaticImageFetcher};
use pktnoded::retry::RetryPolicy;
use pktnoded::{Config, LifecycleController, LifecycleTimings, ScriptedExecutor, ScriptedResponse, Wsl};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const NAME: &str = "PKTWinNode";
const RUNNING: &str = "  NAME                   STATE           VERSION\n* PKTWinNode             Running         2\n  Ubuntu                 Stopped         2\n";
const STOPPED: &str = "  NAME                   STATE           VERSION\n* PKTWinNode             Stopped         2\n";

fn controller(exec: &ScriptedExecutor, timings: LifecycleTimings) -> LifecycleController {
    let config = Config::default();
    LifecycleController::new(Wsl::new(Arc::new(exec.clone()), &config), &config, timings)
}

fn node(peer_id: &str) -> NodeConfiguration {
    NodeConfiguration::builder()
        .username("pktwinnode")
        .password("Pw!12345abcdEFGH")
        .peer_id(peer_id)
        .cjdns_port("55000")
        .static_ip("192.168.1.100/24")
        .gateway("192.168.1.1")
        .dns_servers("8.8.8.8, 1.1.1.1")
        .build()
        .unwrap()
}

// ============================================================================
// Probing
// ============================================================================

#[tokio::test]
async fn absent_name_is_not_installed_regardless_of_exit_code() {
    for response in [
        ScriptedResponse::ok("  NAME      STATE      VERSION\n* Ubuntu    Running    2\n"),
        ScriptedResponse::exit_with(1, "Windows Subsystem for Linux has no installed distributions.\n"),
        ScriptedResponse::exit(-1),
    ] {
        let exec = ScriptedExecutor::new().on("--list --verbose", response);
        let record = controller(&exec, LifecycleTimings::immediate())
            .prober()
            .probe(NAME)
            .await;
        assert!(!record.installed);
        assert_eq!(record.run_state, RunState::NotInstalled);
    }
}

#[tokio::test]
async fn listing_keywords_map_to_run_states() {
    let cases = [
        (RUNNING, RunState::Running),
        (STOPPED, RunState::Stopped),
        ("NAME STATE VERSION\nPKTWinNode Installing 2\n", RunState::Stopped),
    ];
    for (listing, expected) in cases {
        let exec = ScriptedExecutor::new().on("--list --verbose", ScriptedResponse::ok(listing));
        let record = controller(&exec, LifecycleTimings::immediate())
            .prober()
            .probe(NAME)
            .await;
        assert!(record.installed);
        assert_eq!(record.run_state, expected, "listing: {listing}");
    }
}

#[tokio::test]
async fn launch_failure_degrades_to_unknown() {
    let exec = ScriptedExecutor::new().on("--list --verbose", ScriptedResponse::LaunchFailure);
    let record = controller(&exec, LifecycleTimings::immediate())
        .prober()
        .probe(NAME)
        .await;
    assert_eq!(record.run_state, RunState::Unknown);
}

// ============================================================================
// Stop retry bound
// ============================================================================

#[tokio::test(start_paused = true)]
async fn stop_bounded_by_terminates_and_backoff() {
    let exec = ScriptedExecutor::new().on("--list --verbose", ScriptedResponse::ok(RUNNING));
    let policy = RetryPolicy::new(3, Duration::from_millis(1000));
    let timings = LifecycleTimings {
        stop_retry: policy,
        ..LifecycleTimings::immediate()
    };

    let started = tokio::time::Instant::now();
    let stopped = controller(&exec, timings).stop(NAME).await;
    let waited = started.elapsed();

    assert!(!stopped);
    assert_eq!(exec.count_matching("--terminate"), 3);
    assert!(waited <= policy.total_backoff(), "waited {:?}", waited);
}

#[tokio::test]
async fn stop_succeeds_once_listing_reports_stopped() {
    let exec = ScriptedExecutor::new().on_sequence(
        "--list --verbose",
        vec![
            ScriptedResponse::ok(RUNNING),
            ScriptedResponse::ok(RUNNING),
            ScriptedResponse::ok(STOPPED),
        ],
    );
    assert!(controller(&exec, LifecycleTimings::immediate()).stop(NAME).await);
    assert_eq!(exec.count_matching("--terminate"), 3);
}

// ============================================================================
// Preconditions
// ============================================================================

#[tokio::test]
async fn reconfigure_running_record_makes_no_calls() {
    let exec = ScriptedExecutor::new();
    let lifecycle = controller(&exec, LifecycleTimings::immediate());
    let mut record = pktnode_shared::DistributionRecord::unknown(NAME);
    record.installed = true;
    record.run_state = RunState::Running;

    let err = lifecycle
        .reconfigure_network_observed(&record, &node("PUB_PKT_1"))
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::MustBeStopped(_)));
    assert!(exec.calls().is_empty());
}

#[tokio::test]
async fn reconfigure_stopped_applies_then_stops() {
    let exec = ScriptedExecutor::new()
        .on_sequence(
            "--list --verbose",
            vec![ScriptedResponse::ok(STOPPED), ScriptedResponse::ok(STOPPED)],
        )
        .on("ip -o link", ScriptedResponse::ok("eth0@if12\n"));
    let done = controller(&exec, LifecycleTimings::immediate())
        .reconfigure_network(NAME, &node(""))
        .await
        .unwrap();
    assert!(done);

    let calls = exec.calls();
    let netplan = calls.iter().position(|c| c.contains("01-static-ip.yaml")).unwrap();
    let terminate = calls.iter().position(|c| c.contains("--terminate")).unwrap();
    assert!(netplan < terminate);
    assert!(calls[netplan].contains("eth0:"));
    assert!(calls[netplan].contains("192.168.1.100/24"));
}

// ============================================================================
// Deployment
// ============================================================================

async fn deploy(exec: &ScriptedExecutor, node: &NodeConfiguration) -> (bool, Vec<DeploymentProgress>, Option<DeployStage>) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.distribution.install_dir = Some(dir.path().join("install"));
    config.network.wslconfig_path = Some(dir.path().join(".wslconfig"));
    let wsl = Wsl::new(Arc::new(exec.clone()), &config);
    let pipeline = DeploymentPipeline::new(
        wsl,
        Arc::new(StaticImageFetcher::new(vec![0u8; 10_000], 10)),
        &config,
        LifecycleTimings::immediate(),
    )
    .with_temp_dir(dir.path().to_path_buf());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let report = pipeline.run(node, tx).await;
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (report.success, events, report.failed_stage)
}

#[tokio::test]
async fn deploy_with_peer_id_reaches_100() {
    let exec = ScriptedExecutor::new();
    let (success, events, failed) = deploy(&exec, &node("PUB_PKT_5551234")).await;
    assert!(success);
    assert!(failed.is_none());

    let last = events.last().unwrap();
    assert_eq!(last.percent, 100);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));

    // Stage order as seen by the host
    let calls = exec.calls();
    let first = |needle: &str| calls.iter().position(|c| c.contains(needle)).unwrap();
    assert!(first("--import") < first("chpasswd"));
    assert!(first("chpasswd") < first("01-static-ip.yaml"));
    assert!(first("01-static-ip.yaml") < first("apt update"));
    assert!(first("apt update") < first("CJDNS_PEERID"));
}

#[tokio::test]
async fn deploy_without_peer_id_still_reaches_100() {
    let exec = ScriptedExecutor::new();
    let (success, events, _) = deploy(&exec, &node("")).await;
    assert!(success);
    assert_eq!(events.last().unwrap().percent, 100);
    assert!(events.iter().any(|e| e.message.contains("no Peer ID")));
    assert_eq!(exec.count_matching("CJDNS_PEERID"), 0);
}

#[tokio::test]
async fn deploy_network_failure_stops_pipeline() {
    let exec = ScriptedExecutor::new().on("01-static-ip.yaml", ScriptedResponse::exit(1));
    let (success, events, failed) = deploy(&exec, &node("PUB_PKT_1")).await;
    assert!(!success);
    assert_eq!(failed, Some(DeployStage::Network));
    assert_eq!(events.last().unwrap().message, "Failed to configure static IP address");
    assert_eq!(exec.count_matching("apt"), 0);
}

// ============================================================================
// Scheduled maintenance
// ============================================================================

#[tokio::test]
async fn scheduled_package_update_persists_timestamp() {
    use chrono::TimeZone;
    use pktnoded::scheduler::Scheduler;
    use pktnoded::settings::{MemorySettingsStore, Settings};

    let exec = ScriptedExecutor::new()
        .on("--list --verbose", ScriptedResponse::ok(RUNNING))
        .on("apt upgrade", ScriptedResponse::exit(100));
    let lifecycle = Arc::new(controller(&exec, LifecycleTimings::immediate()));

    let mut settings = Settings::default();
    settings.maintenance.package_updates_enabled = true;
    settings.maintenance.restart_enabled = true;
    let store = Arc::new(MemorySettingsStore::new(settings));
    let scheduler = Scheduler::new(lifecycle, store.clone(), NAME, Duration::from_secs(3600));

    let now = chrono::Utc.with_ymd_and_hms(2026, 10, 19, 3, 0, 0).unwrap();
    let outcome = scheduler.tick(now).await;

    // Upgrade failed, restart went through
    assert_eq!(outcome.package_update, Some(false));
    assert_eq!(outcome.restart, Some(true));
    let saved = store.current().unwrap();
    assert_eq!(saved.maintenance.last_package_update, None);
    assert_eq!(saved.maintenance.last_restart, Some(now));
    assert_eq!(exec.count_matching("apt update"), 1);
    assert_eq!(exec.count_matching("--terminate"), 1);
}
