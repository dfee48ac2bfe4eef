//! Deployment Pipeline - download, import and configure a fresh node guest.
//!
//! Six strictly sequential stages. Each reports progress over an unbounded
//! channel; the first failure ends the run with a percent-0 event and no
//! later stage runs. Earlier stages are never rolled back: the returned
//! `DeploymentReport` names the stage that failed so the caller can decide
//! whether a partial guest was left behind.

use async_trait::async_trait;
use pktnode_shared::{DeployStage, DeploymentProgress, DeploymentReport, NodeConfiguration};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{Config, DeployConfig, TimeoutConfig};
use crate::executor::CommandOutput;
use crate::host::{ensure_wslconfig, HostEnvironment};
use crate::lifecycle::LifecycleTimings;
use crate::network::NetworkConfigurator;
use crate::wsl::{shell_quote, Wsl};

const MB: f64 = 1024.0 * 1024.0;

// ============================================================================
// Image fetching
// ============================================================================

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("{0}")]
    Http(String),

    #[error("download timed out")]
    Timeout,

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Http(e.to_string())
        }
    }
}

/// Byte progress callback: `(received, total)`, total 0 when unknown
pub type FetchProgress<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

/// Source of the base guest image
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Download `url` into `dest`, returning the number of bytes written
    async fn fetch(&self, url: &str, dest: &Path, progress: FetchProgress<'_>) -> Result<u64, FetchError>;
}

/// Streams the image over HTTPS with a whole-transfer timeout
pub struct HttpImageFetcher {
    timeout: Duration,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str, dest: &Path, progress: FetchProgress<'_>) -> Result<u64, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pktnoded/", env!("CARGO_PKG_VERSION")))
            .timeout(self.timeout)
            .build()?;

        let mut response = client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Http(format!("{} - {}", url, response.status())));
        }

        let total = response.content_length().unwrap_or(0);
        let mut file = tokio::fs::File::create(dest).await?;
        let mut received = 0u64;

        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            progress(received, total);
        }
        file.flush().await?;

        debug!("Fetched {} bytes from {}", received, url);
        Ok(received)
    }
}

/// Lowercase hex SHA-256 of a file
pub async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)?;
        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(std::io::Error::other)?
}

// ============================================================================
// Progress reporting
// ============================================================================

/// Sends progress events and keeps them non-decreasing
struct Reporter {
    tx: mpsc::UnboundedSender<DeploymentProgress>,
    last: AtomicU8,
}

impl Reporter {
    fn new(tx: mpsc::UnboundedSender<DeploymentProgress>) -> Self {
        Self {
            tx,
            last: AtomicU8::new(0),
        }
    }

    fn send(&self, event: DeploymentProgress) {
        info!("{}", event.format_line());
        // A dropped receiver only means nobody is watching
        let _ = self.tx.send(event);
    }

    fn emit(&self, message: impl Into<String>, percent: u8) {
        let percent = percent.max(self.last.load(Ordering::SeqCst));
        self.last.store(percent, Ordering::SeqCst);
        self.send(DeploymentProgress::new(message, percent));
    }

    /// Emit only when the percent strictly increases
    fn advance(&self, message: impl FnOnce() -> String, percent: u8) {
        let previous = self.last.fetch_max(percent, Ordering::SeqCst);
        if percent > previous {
            self.send(DeploymentProgress::new(message(), percent));
        }
    }

    fn failure(&self, message: &str) {
        self.send(DeploymentProgress::failure(message));
    }

    fn success(&self, message: &str) {
        self.send(DeploymentProgress::success(message));
    }
}

/// Why a stage aborted the run
#[derive(Debug)]
struct StageFailure {
    stage: DeployStage,
    message: String,
}

impl StageFailure {
    fn new(stage: DeployStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

type StageResult = Result<(), StageFailure>;

fn output_detail(out: &CommandOutput) -> String {
    let stderr = out.stderr.trim();
    if stderr.is_empty() {
        out.stdout.trim().to_string()
    } else {
        stderr.to_string()
    }
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct DeploymentPipeline {
    wsl: Wsl,
    host: HostEnvironment,
    network: NetworkConfigurator,
    fetcher: Arc<dyn ImageFetcher>,
    deploy: DeployConfig,
    timeouts: TimeoutConfig,
    timings: LifecycleTimings,
    name: String,
    install_dir: PathBuf,
    switch_name: String,
    wslconfig_path: PathBuf,
    temp_dir: PathBuf,
}

impl DeploymentPipeline {
    pub fn new(wsl: Wsl, fetcher: Arc<dyn ImageFetcher>, config: &Config, timings: LifecycleTimings) -> Self {
        Self {
            host: HostEnvironment::new(wsl.executor().clone(), config),
            network: NetworkConfigurator::new(wsl.clone(), config),
            wsl,
            fetcher,
            deploy: config.deploy.clone(),
            timeouts: config.timeouts.clone(),
            timings,
            name: config.distribution.name.clone(),
            install_dir: config.distribution.install_dir(),
            switch_name: config.network.switch_name.clone(),
            wslconfig_path: config.network.wslconfig_path(),
            temp_dir: std::env::temp_dir(),
        }
    }

    /// Download the image into `dir` instead of the system temp dir
    pub fn with_temp_dir(mut self, dir: PathBuf) -> Self {
        self.temp_dir = dir;
        self
    }

    pub fn distribution(&self) -> &str {
        &self.name
    }

    /// Run every stage. Progress events go to `progress`; the last one is
    /// always terminal (percent 100 on success, 0 on failure).
    pub async fn run(
        &self,
        node: &NodeConfiguration,
        progress: mpsc::UnboundedSender<DeploymentProgress>,
    ) -> DeploymentReport {
        let reporter = Reporter::new(progress);
        info!("Deploying {} as user {}", self.name, node.username);

        // Removed on drop, whichever way the stages end
        let image = match tempfile::Builder::new()
            .prefix("ubuntu-24.04-")
            .suffix(".wsl")
            .tempfile_in(&self.temp_dir)
        {
            Ok(file) => file.into_temp_path(),
            Err(e) => {
                let message = format!("Deployment failed: {}", e);
                reporter.failure(&message);
                return DeploymentReport::failed(DeployStage::Download, message);
            }
        };

        let outcome = self.run_stages(node, &reporter, &image).await;

        if let Err(e) = image.close() {
            debug!("Temporary image not removed: {}", e);
        }

        match outcome {
            Ok(()) => {
                let message = "Deployment completed successfully!";
                reporter.success(message);
                DeploymentReport::succeeded(message)
            }
            Err(failure) => {
                warn!("Deployment aborted at {}: {}", failure.stage, failure.message);
                reporter.failure(&failure.message);
                DeploymentReport::failed(failure.stage, failure.message)
            }
        }
    }

    async fn run_stages(&self, node: &NodeConfiguration, reporter: &Reporter, image: &Path) -> StageResult {
        self.download(reporter, image).await?;
        self.import(reporter, image).await?;
        self.configure_user(reporter, node).await?;
        self.configure_network(reporter, node).await?;
        self.install_packages(reporter).await?;
        self.install_node_software(reporter, node).await
    }

    // ------------------------------------------------------------------------
    // Stage 1: download
    // ------------------------------------------------------------------------

    async fn download(&self, reporter: &Reporter, image: &Path) -> StageResult {
        let stage = DeployStage::Download;
        reporter.emit("Downloading Ubuntu 24.04 WSL image...", stage.start_percent());

        let on_bytes = |done: u64, total: u64| {
            if total == 0 {
                return;
            }
            reporter.advance(
                || {
                    format!(
                        "Downloading Ubuntu 24.04... ({:.1} MB / {:.1} MB)",
                        done as f64 / MB,
                        total as f64 / MB
                    )
                },
                DeploymentProgress::download_percent(done, total),
            );
        };

        match self.fetcher.fetch(&self.deploy.image_url, image, &on_bytes).await {
            Ok(bytes) => info!("Downloaded {} bytes", bytes),
            Err(FetchError::Timeout) => return Err(StageFailure::new(stage, "Download timed out")),
            Err(e) => return Err(StageFailure::new(stage, format!("Download failed: {}", e))),
        }

        if let Some(expected) = &self.deploy.image_sha256 {
            let actual = sha256_file(image)
                .await
                .map_err(|e| StageFailure::new(stage, format!("Download failed: {}", e)))?;
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                return Err(StageFailure::new(
                    stage,
                    format!("Download failed: checksum mismatch (expected {}, got {})", expected, actual),
                ));
            }
            debug!("Image checksum verified");
        }

        reporter.emit("Download complete", 45);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Stage 2: import
    // ------------------------------------------------------------------------

    async fn import(&self, reporter: &Reporter, image: &Path) -> StageResult {
        let stage = DeployStage::Import;
        reporter.emit(format!("Creating {} distribution...", self.name), stage.start_percent());

        tokio::fs::create_dir_all(&self.install_dir).await.map_err(|e| {
            StageFailure::new(
                stage,
                format!("Failed to create {}: {}", self.install_dir.display(), e),
            )
        })?;

        match self.wsl.import(&self.name, &self.install_dir, image).await {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(StageFailure::new(
                stage,
                format!("Failed to import distribution: {}", output_detail(&out)),
            )),
            Err(e) => Err(StageFailure::new(stage, format!("Failed to import distribution: {}", e))),
        }
    }

    // ------------------------------------------------------------------------
    // Stage 3: user account
    // ------------------------------------------------------------------------

    async fn root_step(&self, stage: DeployStage, cmd: &str, secret: Option<&str>, what: &str) -> StageResult {
        let mut spec = self.wsl.guest_spec(&self.name, true, cmd, self.timeouts.guest_command());
        if let Some(secret) = secret {
            spec = spec.secret(secret);
        }
        match self.wsl.run(&spec).await {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(StageFailure::new(
                stage,
                format!("Failed to {} (exit {}): {}", what, out.exit_code, output_detail(&out)),
            )),
            Err(e) => Err(StageFailure::new(stage, format!("Failed to {}: {}", what, e))),
        }
    }

    async fn configure_user(&self, reporter: &Reporter, node: &NodeConfiguration) -> StageResult {
        let stage = DeployStage::UserSetup;
        reporter.emit("Configuring user account...", stage.start_percent());

        let user = node.username.as_str();
        let sudoers = format!("/etc/sudoers.d/{}", user);

        self.root_step(
            stage,
            &format!("id -u {u} >/dev/null 2>&1 || useradd -m -s /bin/bash {u}", u = user),
            None,
            "create user",
        )
        .await?;

        let credentials = format!("{}:{}", user, node.password);
        self.root_step(
            stage,
            &format!("echo {} | chpasswd", shell_quote(&credentials)),
            Some(&node.password),
            "set password",
        )
        .await?;

        self.root_step(stage, &format!("usermod -aG sudo {}", user), None, "grant sudo")
            .await?;

        self.root_step(
            stage,
            &format!(
                "echo {} > {path} && chmod 0440 {path}",
                shell_quote(&format!("{} ALL=(ALL) NOPASSWD:ALL", user)),
                path = sudoers
            ),
            None,
            "write sudoers entry",
        )
        .await?;

        self.root_step(
            stage,
            &format!(
                "printf '[user]\\ndefault={}\\n\\n[boot]\\nsystemd=true\\n' > /etc/wsl.conf",
                user
            ),
            None,
            "write /etc/wsl.conf",
        )
        .await?;

        // The boot settings only apply after a restart
        match self.wsl.terminate(&self.name).await {
            Ok(out) if out.success() => {}
            Ok(out) => warn!("Terminate after user setup exited {}", out.exit_code),
            Err(e) => {
                return Err(StageFailure::new(
                    stage,
                    format!("Failed to restart distribution: {}", e),
                ))
            }
        }
        sleep(self.timings.user_setup_restart_wait).await;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Stage 4: static networking
    // ------------------------------------------------------------------------

    async fn configure_network(&self, reporter: &Reporter, node: &NodeConfiguration) -> StageResult {
        let stage = DeployStage::Network;
        if node.static_ip.is_none() {
            return Err(StageFailure::new(
                stage,
                "Static IP address is required for deployment",
            ));
        }
        reporter.emit("Configuring static IP address...", stage.start_percent());
        let failed = || StageFailure::new(stage, "Failed to configure static IP address");

        // A missing switch surfaces later as no connectivity, not here
        if !self.host.ensure_virtual_switch(&self.switch_name).await {
            warn!("Virtual switch {} unavailable", self.switch_name);
        }

        if let Err(e) = ensure_wslconfig(&self.wslconfig_path, &self.switch_name).await {
            warn!("Host networking file not updated: {:#}", e);
            return Err(failed());
        }

        if !self.network.apply(&self.name, node).await {
            return Err(failed());
        }

        if let Err(e) = self.wsl.shutdown().await {
            warn!("Shutdown after network setup failed: {}", e);
            return Err(failed());
        }
        sleep(self.timings.network_shutdown_wait).await;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Stage 5: packages
    // ------------------------------------------------------------------------

    async fn package_step(&self, cmd: &str, what: &str) -> StageResult {
        let spec = self.wsl.guest_spec(&self.name, true, cmd, self.timeouts.package());
        match self.wsl.run(&spec).await {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(StageFailure::new(
                DeployStage::Packages,
                format!("Failed to {} (exit {})", what, out.exit_code),
            )),
            Err(e) => Err(StageFailure::new(
                DeployStage::Packages,
                format!("Failed to {}: {}", what, e),
            )),
        }
    }

    async fn install_packages(&self, reporter: &Reporter) -> StageResult {
        reporter.emit("Running post-deployment setup...", 75);

        reporter.emit("Updating package lists...", DeployStage::Packages.start_percent());
        self.package_step("apt update", "update package lists").await?;

        reporter.emit("Upgrading packages...", 80);
        self.package_step("DEBIAN_FRONTEND=noninteractive apt upgrade -y", "upgrade packages")
            .await?;

        reporter.emit("Installing required packages...", 85);
        let install = format!(
            "DEBIAN_FRONTEND=noninteractive apt install -y {}",
            self.deploy.baseline_packages.join(" ")
        );
        self.package_step(&install, "install required packages").await
    }

    // ------------------------------------------------------------------------
    // Stage 6: node networking daemon
    // ------------------------------------------------------------------------

    /// Bootstrap installer invocation for the given peer id and port
    pub fn installer_command(&self, peer_id: &str, port: Option<u16>) -> String {
        let mut env = format!("CJDNS_PEERID={}", shell_quote(peer_id));
        if let Some(port) = port {
            env.push_str(&format!(" CJDNS_PORT={}", port));
        }
        format!(
            "curl -s {} | env {} CJDNS_TUN=false sh",
            shell_quote(&self.deploy.installer_url),
            env
        )
    }

    async fn install_node_software(&self, reporter: &Reporter, node: &NodeConfiguration) -> StageResult {
        let stage = DeployStage::NodeSoftware;
        let Some(peer_id) = node.peer_id.as_deref() else {
            reporter.emit("Skipping CJDNS installation (no Peer ID)", 95);
            return Ok(());
        };

        reporter.emit("Installing and configuring CJDNS...", stage.start_percent());
        let cmd = self.installer_command(peer_id, node.cjdns_port);
        let spec = self.wsl.guest_spec(&self.name, true, &cmd, self.timeouts.installer());
        match self.wsl.run(&spec).await {
            Ok(out) if out.success() => {}
            Ok(out) => {
                return Err(StageFailure::new(
                    stage,
                    format!("CJDNS installation failed (exit {}): {}", out.exit_code, output_detail(&out)),
                ))
            }
            Err(e) => return Err(StageFailure::new(stage, format!("CJDNS installation failed: {}", e))),
        }
        reporter.emit("CJDNS installation complete", 95);

        reporter.emit("Restarting WSL to apply changes...", 97);
        if let Err(e) = self.wsl.terminate(&self.name).await {
            warn!("Terminate after install failed: {}", e);
        }
        sleep(self.timings.installer_restart_wait).await;

        reporter.emit("Finalizing deployment...", 99);
        Ok(())
    }
}

// ============================================================================
// Test fetcher
// ============================================================================

/// Writes a fixed payload in chunks instead of downloading
#[derive(Clone, Default)]
pub struct StaticImageFetcher {
    payload: Vec<u8>,
    chunks: usize,
    fail: Option<String>,
    timeout: bool,
}

impl StaticImageFetcher {
    pub fn new(payload: impl Into<Vec<u8>>, chunks: usize) -> Self {
        Self {
            payload: payload.into(),
            chunks: chunks.max(1),
            ..Default::default()
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn timing_out() -> Self {
        Self {
            timeout: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl ImageFetcher for StaticImageFetcher {
    async fn fetch(&self, _url: &str, dest: &Path, progress: FetchProgress<'_>) -> Result<u64, FetchError> {
        if self.timeout {
            return Err(FetchError::Timeout);
        }
        if let Some(message) = &self.fail {
            return Err(FetchError::Http(message.clone()));
        }

        let total = self.payload.len() as u64;
        let size = self.payload.len().div_ceil(self.chunks.max(1)).max(1);
        let mut file = tokio::fs::File::create(dest).await?;
        let mut done = 0u64;
        for chunk in self.payload.chunks(size) {
            file.write_all(chunk).await?;
            done += chunk.len() as u64;
            progress(done, total);
        }
        file.flush().await?;
        Ok(done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ScriptedExecutor, ScriptedResponse};

    struct Fixture {
        exec: ScriptedExecutor,
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new(exec: ScriptedExecutor) -> Self {
            Self {
                exec,
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn pipeline(&self, fetcher: StaticImageFetcher, sha256: Option<String>) -> DeploymentPipeline {
            let mut config = Config::default();
            config.distribution.install_dir = Some(self.dir.path().join("install"));
            config.deploy.image_sha256 = sha256;
            config.network.wslconfig_path = Some(self.dir.path().join(".wslconfig"));
            let wsl = Wsl::new(Arc::new(self.exec.clone()), &config);
            DeploymentPipeline::new(wsl, Arc::new(fetcher), &config, LifecycleTimings::immediate())
                .with_temp_dir(self.dir.path().to_path_buf())
        }

        fn leftover_images(&self) -> usize {
            std::fs::read_dir(self.dir.path())
                .unwrap()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().ends_with(".wsl"))
                .count()
        }
    }

    fn node(peer_id: &str, static_ip: &str) -> NodeConfiguration {
        NodeConfiguration::builder()
            .username("pktwinnode")
            .password("S3cret!pass")
            .peer_id(peer_id)
            .cjdns_port("55000")
            .static_ip(static_ip)
            .gateway("192.168.1.1")
            .dns_servers("8.8.8.8, 1.1.1.1")
            .build()
            .unwrap()
    }

    async fn run(pipeline: &DeploymentPipeline, node: &NodeConfiguration) -> (DeploymentReport, Vec<DeploymentProgress>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let report = pipeline.run(node, tx).await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (report, events)
    }

    fn assert_monotonic(events: &[DeploymentProgress]) {
        let body = &events[..events.len() - 1];
        assert!(body.windows(2).all(|w| w[0].percent <= w[1].percent), "{:?}", events);
    }

    #[tokio::test]
    async fn test_full_deploy_with_peer_id() {
        let fx = Fixture::new(ScriptedExecutor::new());
        let pipeline = fx.pipeline(StaticImageFetcher::new(vec![7u8; 4096], 8), None);
        let (report, events) = run(&pipeline, &node("PUB_PKT_1234", "192.168.1.100")).await;

        assert!(report.success, "{:?}", report);
        assert_eq!(events.last().unwrap().percent, 100);
        assert_eq!(events.last().unwrap().message, "Deployment completed successfully!");
        assert_monotonic(&events);
        assert!(events.iter().any(|e| e.message == "CJDNS installation complete"));
        assert!(events.iter().any(|e| e.message.starts_with("Downloading Ubuntu 24.04... (")));
        assert_eq!(fx.exec.count_matching("CJDNS_PEERID='PUB_PKT_1234' CJDNS_PORT=55000 CJDNS_TUN=false"), 1);
        assert_eq!(fx.leftover_images(), 0);
    }

    #[tokio::test]
    async fn test_deploy_without_peer_id_skips_installer() {
        let fx = Fixture::new(ScriptedExecutor::new());
        let mut cfg = node("", "192.168.1.100/24");
        cfg.peer_id = None;
        let pipeline = fx.pipeline(StaticImageFetcher::new(b"image".to_vec(), 1), None);
        let (report, events) = run(&pipeline, &cfg).await;

        assert!(report.success);
        assert!(events
            .iter()
            .any(|e| e.message == "Skipping CJDNS installation (no Peer ID)" && e.percent == 95));
        assert_eq!(fx.exec.count_matching("CJDNS_PEERID"), 0);
    }

    #[tokio::test]
    async fn test_password_never_in_call_log() {
        let fx = Fixture::new(ScriptedExecutor::new());
        let pipeline = fx.pipeline(StaticImageFetcher::new(b"image".to_vec(), 1), None);
        run(&pipeline, &node("", "192.168.1.100")).await;
        assert_eq!(fx.exec.count_matching("chpasswd"), 1);
        assert_eq!(fx.exec.count_matching("S3cret!pass"), 0);

        let fx = Fixture::new(ScriptedExecutor::new());
        let mut cfg = node("", "192.168.1.100");
        cfg.password = "it's-Secret9".to_string();
        let pipeline = fx.pipeline(StaticImageFetcher::new(b"image".to_vec(), 1), None);
        run(&pipeline, &cfg).await;
        assert_eq!(fx.exec.count_matching("chpasswd"), 1);
        assert_eq!(fx.exec.count_matching("Secret9"), 0);
    }

    #[tokio::test]
    async fn test_missing_static_ip_fails_after_user_setup() {
        let fx = Fixture::new(ScriptedExecutor::new());
        let mut cfg = node("PUB_PKT_1", "192.168.1.100");
        cfg.static_ip = None;
        let pipeline = fx.pipeline(StaticImageFetcher::new(b"image".to_vec(), 1), None);
        let (report, events) = run(&pipeline, &cfg).await;

        assert!(!report.success);
        assert_eq!(report.failed_stage, Some(DeployStage::Network));
        assert!(report.left_partial_guest());
        let last = events.last().unwrap();
        assert_eq!(last.percent, 0);
        assert_eq!(last.message, "Static IP address is required for deployment");
        assert_eq!(fx.exec.count_matching("chpasswd"), 1);
        assert_eq!(fx.exec.count_matching("netplan"), 0);
        assert_eq!(fx.exec.count_matching("apt"), 0);
    }

    #[tokio::test]
    async fn test_download_failures() {
        let fx = Fixture::new(ScriptedExecutor::new());
        let pipeline = fx.pipeline(StaticImageFetcher::timing_out(), None);
        let (report, events) = run(&pipeline, &node("", "192.168.1.100")).await;
        assert_eq!(report.failed_stage, Some(DeployStage::Download));
        assert_eq!(events.last().unwrap().message, "Download timed out");
        assert!(fx.exec.calls().is_empty());

        let pipeline = fx.pipeline(StaticImageFetcher::failing("503 Service Unavailable"), None);
        let (report, _) = run(&pipeline, &node("", "192.168.1.100")).await;
        assert_eq!(report.last_message, "Download failed: 503 Service Unavailable");
        assert!(!report.left_partial_guest());
        assert_eq!(fx.leftover_images(), 0);
    }

    #[tokio::test]
    async fn test_checksum_verification() {
        let payload = b"ubuntu image bytes".to_vec();
        let good = hex::encode(Sha256::digest(&payload));

        let fx = Fixture::new(ScriptedExecutor::new());
        let pipeline = fx.pipeline(StaticImageFetcher::new(payload.clone(), 2), Some(good.to_uppercase()));
        let (report, _) = run(&pipeline, &node("", "192.168.1.100")).await;
        assert!(report.success);

        let fx = Fixture::new(ScriptedExecutor::new());
        let pipeline = fx.pipeline(StaticImageFetcher::new(payload, 2), Some("00".repeat(32)));
        let (report, _) = run(&pipeline, &node("", "192.168.1.100")).await;
        assert_eq!(report.failed_stage, Some(DeployStage::Download));
        assert!(report.last_message.contains("checksum mismatch"));
        assert_eq!(fx.exec.count_matching("--import"), 0);
    }

    #[tokio::test]
    async fn test_import_failure_reports_stderr() {
        let exec = ScriptedExecutor::new().on(
            "--import",
            ScriptedResponse::failed(1, "A distribution with the supplied name already exists."),
        );
        let fx = Fixture::new(exec);
        let pipeline = fx.pipeline(StaticImageFetcher::new(b"image".to_vec(), 1), None);
        let (report, _) = run(&pipeline, &node("", "192.168.1.100")).await;
        assert_eq!(report.failed_stage, Some(DeployStage::Import));
        assert_eq!(
            report.last_message,
            "Failed to import distribution: A distribution with the supplied name already exists."
        );
        assert_eq!(fx.exec.count_matching("useradd"), 0);
        assert_eq!(fx.leftover_images(), 0);
    }

    #[tokio::test]
    async fn test_package_failure_aborts_before_installer() {
        let exec = ScriptedExecutor::new().on("apt update", ScriptedResponse::exit(100));
        let fx = Fixture::new(exec);
        let pipeline = fx.pipeline(StaticImageFetcher::new(b"image".to_vec(), 1), None);
        let (report, _) = run(&pipeline, &node("PUB_PKT_9", "192.168.1.100")).await;
        assert_eq!(report.failed_stage, Some(DeployStage::Packages));
        assert_eq!(fx.exec.count_matching("apt upgrade"), 0);
        assert_eq!(fx.exec.count_matching("CJDNS_PEERID"), 0);
    }

    #[tokio::test]
    async fn test_network_stage_writes_wslconfig() {
        let fx = Fixture::new(ScriptedExecutor::new());
        let pipeline = fx.pipeline(StaticImageFetcher::new(b"image".to_vec(), 1), None);
        run(&pipeline, &node("", "192.168.1.100")).await;
        let content = std::fs::read_to_string(fx.dir.path().join(".wslconfig")).unwrap();
        assert!(content.contains("vmSwitch=WSLBridge"));
        assert_eq!(fx.exec.count_matching("wsl --shutdown"), 1);
    }

    #[test]
    fn test_installer_command() {
        let fx = Fixture::new(ScriptedExecutor::new());
        let pipeline = fx.pipeline(StaticImageFetcher::default(), None);
        assert_eq!(
            pipeline.installer_command("PUB_PKT_42", None),
            "curl -s 'https://pkt.cash/special/cjdns/cjdns.sh' | env CJDNS_PEERID='PUB_PKT_42' CJDNS_TUN=false sh"
        );
    }
}
