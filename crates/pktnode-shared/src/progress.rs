//! Progress events for the deployment pipeline.
//!
//! Events form an ordered sequence that never decreases in percent, with two
//! terminal forms: `percent == 100` for success and `percent == 0` with a
//! failure message.

use serde::{Deserialize, Serialize};

/// Stage of the deployment pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStage {
    Download,
    Import,
    UserSetup,
    Network,
    Packages,
    NodeSoftware,
}

impl DeployStage {
    /// All stages in execution order
    pub const ALL: [DeployStage; 6] = [
        DeployStage::Download,
        DeployStage::Import,
        DeployStage::UserSetup,
        DeployStage::Network,
        DeployStage::Packages,
        DeployStage::NodeSoftware,
    ];

    /// Percent reported when the stage starts
    pub fn start_percent(&self) -> u8 {
        match self {
            Self::Download => 10,
            Self::Import => 50,
            Self::UserSetup => 60,
            Self::Network => 70,
            Self::Packages => 76,
            Self::NodeSoftware => 90,
        }
    }
}

impl std::fmt::Display for DeployStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Download => write!(f, "download"),
            Self::Import => write!(f, "import"),
            Self::UserSetup => write!(f, "user_setup"),
            Self::Network => write!(f, "network"),
            Self::Packages => write!(f, "packages"),
            Self::NodeSoftware => write!(f, "node_software"),
        }
    }
}

/// Download band: stage 1 reports between these two percents
pub const DOWNLOAD_BAND: (u8, u8) = (10, 45);

/// One progress event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentProgress {
    pub message: String,
    /// 0..=100
    pub percent: u8,
}

impl DeploymentProgress {
    pub fn new(message: impl Into<String>, percent: u8) -> Self {
        Self {
            message: message.into(),
            percent: percent.min(100),
        }
    }

    /// Terminal failure event
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            percent: 0,
        }
    }

    /// Terminal success event
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            percent: 100,
        }
    }

    pub fn is_success(&self) -> bool {
        self.percent == 100
    }

    pub fn is_failure(&self) -> bool {
        self.percent == 0
    }

    pub fn is_terminal(&self) -> bool {
        self.is_success() || self.is_failure()
    }

    /// Scale `done / total` bytes into the download band.
    /// Returns the band start when the total is unknown.
    pub fn download_percent(done: u64, total: u64) -> u8 {
        let (start, end) = DOWNLOAD_BAND;
        if total == 0 {
            return start;
        }
        let span = (end - start) as u64;
        let scaled = done.min(total).saturating_mul(span) / total;
        start + scaled as u8
    }

    /// Format for log display
    pub fn format_line(&self) -> String {
        format!("[{:>3}%] {}", self.percent, self.message)
    }
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentReport {
    pub success: bool,
    /// Stage that aborted the pipeline. Stages before it completed and were
    /// not rolled back.
    pub failed_stage: Option<DeployStage>,
    /// Last progress message, which is the failure reason on failure
    pub last_message: String,
}

impl DeploymentReport {
    pub fn succeeded(last_message: impl Into<String>) -> Self {
        Self {
            success: true,
            failed_stage: None,
            last_message: last_message.into(),
        }
    }

    pub fn failed(stage: DeployStage, last_message: impl Into<String>) -> Self {
        Self {
            success: false,
            failed_stage: Some(stage),
            last_message: last_message.into(),
        }
    }

    /// True when the failure happened after the distribution was imported,
    /// leaving a partially configured guest behind.
    pub fn left_partial_guest(&self) -> bool {
        matches!(
            self.failed_stage,
            Some(DeployStage::UserSetup)
                | Some(DeployStage::Network)
                | Some(DeployStage::Packages)
                | Some(DeployStage::NodeSoftware)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_events() {
        assert!(DeploymentProgress::success("done").is_success());
        assert!(DeploymentProgress::failure("boom").is_failure());
        assert!(!DeploymentProgress::new("working", 50).is_terminal());
        assert_eq!(DeploymentProgress::new("clamped", 250).percent, 100);
    }

    #[test]
    fn test_download_percent_band() {
        assert_eq!(DeploymentProgress::download_percent(0, 100), 10);
        assert_eq!(DeploymentProgress::download_percent(50, 100), 27);
        assert_eq!(DeploymentProgress::download_percent(100, 100), 45);
        assert_eq!(DeploymentProgress::download_percent(500, 100), 45);
        assert_eq!(DeploymentProgress::download_percent(10, 0), 10);
    }

    #[test]
    fn test_stage_start_percents_increase() {
        let percents: Vec<u8> = DeployStage::ALL.iter().map(|s| s.start_percent()).collect();
        assert!(percents.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(DeployStage::NodeSoftware.to_string(), "node_software");
    }

    #[test]
    fn test_report_partial_guest() {
        assert!(!DeploymentReport::failed(DeployStage::Download, "x").left_partial_guest());
        assert!(!DeploymentReport::failed(DeployStage::Import, "x").left_partial_guest());
        assert!(DeploymentReport::failed(DeployStage::Network, "x").left_partial_guest());
        assert!(!DeploymentReport::succeeded("ok").left_partial_guest());
    }

    #[test]
    fn test_format_line() {
        let event = DeploymentProgress::new("Importing", 50);
        assert_eq!(event.format_line(), "[ 50%] Importing");
    }
}
