//! Per-job on-disk layout
//!
//! ```text
//! <job_root>/job_<id>/
//!     record.json      full run record
//!     metrics.json     derived metrics
//!     accounting.txt   raw sacct output
//!     timeline.raw     copy of a timeline found outside the job directory
//!     slurm-<id>.out   written by the scheduler
//! ```

use super::run::RunRecord;
use crate::error::{BenchwrapError, IoResultExt, Result};
use crate::monitor::JobId;
use crate::spec::job_dir;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Serialized run record
pub const RECORD_FILE: &str = "record.json";
/// Derived metrics, written once telemetry is collected
pub const METRICS_FILE: &str = "metrics.json";
/// Raw sacct output
pub const ACCOUNTING_FILE: &str = "accounting.txt";
/// Copy of the timeline artifact as found
pub const TIMELINE_COPY: &str = "timeline.raw";

/// Reads and writes run records under a job root
#[derive(Debug, Clone)]
pub struct RunStore {
    job_root: PathBuf,
}

impl RunStore {
    /// Store rooted at `job_root`
    pub fn new(job_root: impl Into<PathBuf>) -> Self {
        Self {
            job_root: job_root.into(),
        }
    }

    /// Directory holding every `job_<id>` directory
    pub fn job_root(&self) -> &Path {
        &self.job_root
    }

    /// Directory of one job
    pub fn job_dir(&self, job_id: &JobId) -> PathBuf {
        job_dir(&self.job_root, job_id)
    }

    /// Write the record and its artifacts; safe to call as the record grows
    pub fn persist(&self, record: &RunRecord) -> Result<PathBuf> {
        let handle = record
            .handle()
            .ok_or_else(|| BenchwrapError::Record("cannot persist a run without a job".into()))?;
        let dir = self.job_dir(handle.job_id());
        fs::create_dir_all(&dir).with_path(&dir)?;

        write_atomic(&dir.join(RECORD_FILE), &serde_json::to_string_pretty(record)?)?;

        if let Some(metrics) = record.metrics() {
            write_atomic(&dir.join(METRICS_FILE), &serde_json::to_string_pretty(metrics)?)?;
        }
        if let Some(raw) = record.accounting_raw() {
            write_atomic(&dir.join(ACCOUNTING_FILE), raw)?;
        }
        if let Some(source) = record.timeline().and_then(|t| t.source()) {
            if !source.starts_with(&dir) {
                let target = dir.join(TIMELINE_COPY);
                fs::copy(source, &target).with_path(&target)?;
            }
        }

        debug!("Persisted job {} to {:?}", handle.job_id(), dir);
        Ok(dir)
    }

    /// Load a persisted record
    pub fn load(&self, job_id: &JobId) -> Result<RunRecord> {
        let path = self.job_dir(job_id).join(RECORD_FILE);
        if !path.is_file() {
            return Err(BenchwrapError::NotFound(format!("job {}", job_id)));
        }
        let content = fs::read_to_string(&path).with_path(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Jobs with a persisted record, in id order
    pub fn list(&self) -> Result<Vec<JobId>> {
        if !self.job_root.is_dir() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.job_root).with_path(&self.job_root)? {
            let path = entry.with_path(&self.job_root)?.path();
            let id = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix("job_"));
            if let Some(id) = id {
                if path.join(RECORD_FILE).is_file() {
                    ids.push(JobId::new(id));
                }
            }
        }
        ids.sort_by(|a, b| natural_key(a).cmp(&natural_key(b)));
        Ok(ids)
    }
}

fn natural_key(id: &JobId) -> (usize, &str) {
    (id.as_str().len(), id.as_str())
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content).with_path(&tmp)?;
    fs::rename(&tmp, path).with_path(path)
}
