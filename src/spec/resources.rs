//! Resource requests and Slurm time formatting

use serde::{Deserialize, Serialize};

/// Resources requested for one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceRequest {
    /// Number of nodes
    pub nodes: u32,
    /// Total number of tasks
    pub ntasks: u32,
    /// CPUs per task
    pub cpus_per_task: u32,
    /// Partition/queue
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    /// Time limit (seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_limit_secs: Option<u64>,
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            nodes: 1,
            ntasks: 1,
            cpus_per_task: 1,
            partition: None,
            time_limit_secs: Some(3600), // 1 hour
        }
    }
}

impl ResourceRequest {
    /// Total CPUs requested across all tasks
    pub fn total_cpus(&self) -> u64 {
        self.ntasks as u64 * self.cpus_per_task as u64
    }
}

/// Format seconds as a Slurm time limit (`D-HH:MM:SS` or `HH:MM:SS`)
pub fn format_slurm_time(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{}-{:02}:{:02}:{:02}", days, hours, minutes, secs)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    }
}

/// Parse a Slurm duration (`D-HH:MM:SS`, `HH:MM:SS`, `MM:SS`, optional `.fff`)
///
/// Returns `None` for empty strings and sentinels like `UNLIMITED` or
/// `Partition_Limit`.
pub fn parse_slurm_time(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() || !s.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }

    let (days, time_str) = match s.split_once('-') {
        Some((d, rest)) => (d.parse::<u64>().ok()?, rest),
        None => (0, s),
    };

    let parts: Vec<&str> = time_str.split(':').collect();
    let (hours, minutes, seconds) = match parts.len() {
        3 => (
            parts[0].parse::<u64>().ok()?,
            parts[1].parse::<u64>().ok()?,
            parts[2].parse::<f64>().ok()?,
        ),
        2 if days > 0 => (parts[0].parse::<u64>().ok()?, parts[1].parse::<u64>().ok()?, 0.0),
        2 => (0, parts[0].parse::<u64>().ok()?, parts[1].parse::<f64>().ok()?),
        // A bare number after a day prefix is hours, otherwise minutes
        1 if days > 0 => (parts[0].parse::<u64>().ok()?, 0, 0.0),
        1 => (0, parts[0].parse::<u64>().ok()?, 0.0),
        _ => return None,
    };

    Some((days * 86400 + hours * 3600 + minutes * 60) as f64 + seconds)
}
