//! Profiling-data converter and its tabular output

use super::table::read_delimited;
use super::timeline::{TimelineSample, TimelineSeries};
use crate::error::{BenchwrapError, IoResultExt, Result};
use crate::monitor::JobId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const TIME_COLUMNS: [&str; 3] = ["elapsedtime", "elapsed", "time"];
const POWER_COLUMNS: [&str; 2] = ["power", "currpower"];

/// Converts a job's binary profile into a CSV table
#[async_trait]
pub trait ProfileConverter: Send + Sync {
    /// Write the energy series of `job_id` to `output`
    async fn convert(&self, job_id: &JobId, output: &Path) -> Result<()>;
}

/// Converter backed by Slurm's `sh5util`
#[derive(Debug, Clone)]
pub struct Sh5utilConverter {
    program: PathBuf,
    timeout: Duration,
}

impl Sh5utilConverter {
    /// Converter running `program`, killed after `timeout`
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ProfileConverter for Sh5utilConverter {
    async fn convert(&self, job_id: &JobId, output: &Path) -> Result<()> {
        let label = self.program.display().to_string();
        let child = Command::new(&self.program)
            .arg("-j")
            .arg(job_id.as_str())
            .args(["--extract", "--series=Energy", "--level=Node:TimeSeries", "-o"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let result = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| BenchwrapError::Telemetry(format!("{} timed out", label)))?
            .map_err(|e| BenchwrapError::Telemetry(format!("{}: {}", label, e)))?;

        if !result.status.success() {
            return Err(BenchwrapError::Telemetry(format!(
                "{} exited with {}: {}",
                label,
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Normalized converter output: header plus string cells
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
    skipped_rows: usize,
    source: Option<PathBuf>,
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

impl ProfileTable {
    /// Parse comma-separated converter output
    ///
    /// Quoted cells may contain commas. Rows whose width differs from the
    /// header are skipped and counted.
    pub fn parse(text: &str) -> Result<Self> {
        let table = read_delimited(text, b',')?;
        if table.header.is_empty() {
            return Err(BenchwrapError::Telemetry("profile table is empty".into()));
        }

        let columns = table.header;
        let mut skipped_rows = table.rejected;
        let mut rows = Vec::with_capacity(table.rows.len());
        for cells in table.rows {
            if cells.len() == columns.len() {
                rows.push(cells);
            } else {
                skipped_rows += 1;
            }
        }

        Ok(Self {
            columns,
            rows,
            skipped_rows,
            source: None,
        })
    }

    /// Read and parse a converter artifact
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_path(path)?;
        let mut table = Self::parse(&text)?;
        table.source = Some(path.to_path_buf());
        Ok(table)
    }

    /// Header cells
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows with the header's width
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Rows dropped as malformed
    pub fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }

    /// File the table was read from
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Column index, ignoring case, spaces and underscores
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let wanted = normalize(name);
        self.columns.iter().position(|c| normalize(c) == wanted)
    }

    /// Numeric view of one column; unparsable cells are `None`
    pub fn numeric(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row[idx].parse::<f64>().ok().filter(|v| v.is_finite()))
                .collect(),
        )
    }

    /// Power summed across nodes for each elapsed-time step
    pub fn power_series(&self) -> Option<TimelineSeries> {
        let time_idx = TIME_COLUMNS.iter().find_map(|c| self.column_index(c))?;
        let power_idx = POWER_COLUMNS.iter().find_map(|c| self.column_index(c))?;

        // Millisecond keys group identical timestamps from different nodes
        let mut by_time: BTreeMap<i64, (f64, f64)> = BTreeMap::new();
        for row in &self.rows {
            let (Ok(t), Ok(p)) = (row[time_idx].parse::<f64>(), row[power_idx].parse::<f64>())
            else {
                continue;
            };
            if !t.is_finite() || !p.is_finite() {
                continue;
            }
            let entry = by_time.entry((t * 1000.0).round() as i64).or_insert((t, 0.0));
            entry.1 += p;
        }

        if by_time.is_empty() {
            debug!("Profile table has no usable power rows");
            return None;
        }

        let samples = by_time
            .into_values()
            .map(|(timestamp, power)| TimelineSample {
                timestamp,
                power,
                counters: Vec::new(),
            })
            .collect();
        Some(TimelineSeries::from_samples(samples, self.source.clone()))
    }
}
