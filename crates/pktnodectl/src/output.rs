//! Output formatting for pktnodectl - key/value status blocks and the
//! deployment progress bar.

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use pktnode_shared::{DeploymentProgress, DistributionRecord, RunState, ServiceRecord};
use serde::Serialize;
use tokio::sync::mpsc;

/// Width of the key column
const KEY_WIDTH: usize = 14;

/// Everything `status` shows
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub distribution: DistributionRecord,
    pub service: ServiceRecord,
}

/// Key/value lines of a status report, uncoloured
pub fn status_lines(report: &StatusReport) -> Vec<(&'static str, String)> {
    let d = &report.distribution;
    let s = &report.service;
    let mut lines = vec![("distribution", d.name.clone()), ("state", d.run_state.to_string())];

    if !d.version.is_empty() {
        lines.push(("version", d.version.clone()));
    }
    if d.uptime.is_some() {
        lines.push(("uptime", d.uptime_text()));
    }

    lines.push(("service", s.status_text()));
    if s.installed {
        lines.push(("enabled", if s.enabled { "yes" } else { "no" }.to_string()));
    }
    if let Some(pid) = s.pid {
        lines.push(("pid", pid.to_string()));
    }
    if s.memory_bytes.is_some() {
        lines.push(("memory", s.memory_text()));
    }
    if s.uptime.is_some() {
        lines.push(("service uptime", s.uptime_text()));
    }
    lines
}

fn colored_state(state: RunState) -> String {
    let label = state.to_string();
    match state {
        RunState::Running => label.bright_green().to_string(),
        RunState::Stopped => label.yellow().to_string(),
        RunState::NotInstalled => label.dimmed().to_string(),
        RunState::Unknown => label.bright_red().to_string(),
    }
}

pub fn print_kv(key: &str, value: &str) {
    println!("{:width$} {}", key, value, width = KEY_WIDTH);
}

pub fn print_status(report: &StatusReport) {
    println!();
    for (key, value) in status_lines(report) {
        if key == "state" {
            print_kv(key, &colored_state(report.distribution.run_state));
        } else if key == "service" && report.service.active {
            print_kv(key, &value.bright_green().to_string());
        } else {
            print_kv(key, &value);
        }
    }
    println!();
}

pub fn ok(message: &str) {
    println!("{} {}", "[OK]".bright_green(), message);
}

pub fn fail(message: &str) {
    println!("{} {}", "[FAIL]".bright_red(), message);
}

/// Yes/no cell for the host report
pub fn yes_no(value: bool) -> String {
    if value {
        "yes".bright_green().to_string()
    } else {
        "no".yellow().to_string()
    }
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    let style = ProgressStyle::default_bar()
        .template("{bar:40.cyan/blue} {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    bar.set_style(style);
    bar
}

/// Draw progress events until the sender side closes
pub async fn render_progress(mut rx: mpsc::UnboundedReceiver<DeploymentProgress>) {
    let bar = progress_bar();
    while let Some(event) = rx.recv().await {
        if event.is_success() {
            bar.set_position(100);
            bar.finish_with_message(event.message.bright_green().to_string());
        } else if event.is_failure() {
            bar.abandon_with_message(event.message.bright_red().to_string());
        } else {
            bar.set_position(u64::from(event.percent));
            bar.set_message(event.message);
        }
    }
}
