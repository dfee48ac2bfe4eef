//! Human readable durations and sizes.

/// Format a duration in seconds the way the status panel shows it.
///
/// Only the two most significant units are kept: `"2 days, 3 hours"`,
/// `"1 hour, 5 minutes"`, `"42 seconds"`.
pub fn format_uptime(seconds: u64) -> String {
    if seconds < 60 {
        plural(seconds, "second")
    } else if seconds < 3600 {
        plural(seconds / 60, "minute")
    } else if seconds < 86_400 {
        let hours = seconds / 3600;
        let minutes = (seconds % 3600) / 60;
        if minutes > 0 {
            format!("{}, {}", plural(hours, "hour"), plural(minutes, "minute"))
        } else {
            plural(hours, "hour")
        }
    } else {
        let days = seconds / 86_400;
        let hours = (seconds % 86_400) / 3600;
        if hours > 0 {
            format!("{}, {}", plural(days, "day"), plural(hours, "hour"))
        } else {
            plural(days, "day")
        }
    }
}

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("{} {}", n, unit)
    } else {
        format!("{} {}s", n, unit)
    }
}

/// Format a byte count with base-1024 units and at most one decimal.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut order = 0;
    while value >= 1024.0 && order < UNITS.len() - 1 {
        order += 1;
        value /= 1024.0;
    }
    let rounded = (value * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{} {}", rounded as u64, UNITS[order])
    } else {
        format!("{:.1} {}", rounded, UNITS[order])
    }
}
