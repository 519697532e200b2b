//! Gathers accounting, profile and timeline data for a finished job

use super::accounting::AccountingRecord;
use super::profile::{ProfileConverter, ProfileTable};
use super::timeline::TimelineSeries;
use crate::error::{BenchwrapError, Result};
use crate::monitor::{JobHandle, JobId};
use crate::record::{DataSource, PartialDataWarning};
use crate::scheduler::SchedulerGateway;
use crate::spec::job_dir;
use globset::{Glob, GlobMatcher};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default timeline artifact pattern; `{job_id}` is substituted
pub const DEFAULT_TIMELINE_PATTERN: &str = "timeline_{job_id}*";

/// Everything collected for one job
#[derive(Debug, Default)]
pub struct TelemetryBundle {
    /// Parsed sacct accounting
    pub accounting: Option<AccountingRecord>,
    /// sacct output as returned
    pub accounting_raw: Option<String>,
    /// Converted energy profile
    pub profile: Option<ProfileTable>,
    /// Power and hardware-counter timeline
    pub timeline: Option<TimelineSeries>,
    /// One entry per source that was missing or unusable
    pub warnings: Vec<PartialDataWarning>,
}

impl TelemetryBundle {
    fn warn(&mut self, source: DataSource, message: String) {
        warn!("{:?}: {}", source, message);
        self.warnings.push(PartialDataWarning::new(source, message));
    }
}

/// Collects telemetry under a job root
pub struct TelemetryCollector {
    gateway: Arc<dyn SchedulerGateway>,
    converter: Arc<dyn ProfileConverter>,
    job_root: PathBuf,
    timeline_pattern: String,
}

impl TelemetryCollector {
    /// Collector using the default timeline pattern
    pub fn new(
        gateway: Arc<dyn SchedulerGateway>,
        converter: Arc<dyn ProfileConverter>,
        job_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            gateway,
            converter,
            job_root: job_root.into(),
            timeline_pattern: DEFAULT_TIMELINE_PATTERN.to_string(),
        }
    }

    /// Override the timeline artifact pattern
    pub fn with_timeline_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.timeline_pattern = pattern.into();
        self
    }

    /// Collect telemetry for a terminal job
    ///
    /// Source failures become warnings. Only a non-terminal handle or an
    /// invalid timeline pattern is an error.
    pub async fn collect(&self, handle: &JobHandle, energy_profiling: bool) -> Result<TelemetryBundle> {
        if !handle.state().is_terminal() {
            return Err(BenchwrapError::Telemetry(format!(
                "job {} is still {}",
                handle.job_id(),
                handle.state()
            )));
        }
        let matcher = self.timeline_matcher(handle.job_id())?;
        let job_id = handle.job_id();
        let dir = job_dir(&self.job_root, job_id);
        let mut bundle = TelemetryBundle::default();

        match self.gateway.accounting(job_id).await {
            Ok(Some(snapshot)) => {
                bundle.accounting = Some(AccountingRecord::from_snapshot(&snapshot));
                bundle.accounting_raw = Some(snapshot.raw);
            }
            Ok(None) => bundle.warn(
                DataSource::Accounting,
                format!("no accounting entry for job {}", job_id),
            ),
            Err(e) => bundle.warn(DataSource::Accounting, e.to_string()),
        }

        if energy_profiling {
            let output = dir.join(format!("profile_{}.csv", job_id));
            match self.converter.convert(job_id, &output).await {
                Ok(()) if output.is_file() => match ProfileTable::from_file(&output) {
                    Ok(table) => bundle.profile = Some(table),
                    Err(e) => bundle.warn(DataSource::Profile, e.to_string()),
                },
                Ok(()) => bundle.warn(
                    DataSource::Profile,
                    format!("converter produced no file at {:?}", output),
                ),
                Err(e) => bundle.warn(DataSource::Profile, e.to_string()),
            }
        }

        match find_artifact(&dir, &matcher) {
            Some(path) => match TimelineSeries::from_file(&path) {
                Ok(series) => {
                    if series.skipped_rows() > 0 {
                        bundle.warn(
                            DataSource::Timeline,
                            format!(
                                "skipped {} malformed rows in {:?}",
                                series.skipped_rows(),
                                path
                            ),
                        );
                    }
                    bundle.timeline = Some(series);
                }
                Err(e) => bundle.warn(DataSource::Timeline, e.to_string()),
            },
            None => {
                let fallback = bundle.profile.as_ref().and_then(ProfileTable::power_series);
                match fallback {
                    Some(series) => {
                        bundle.warn(
                            DataSource::Timeline,
                            "no timeline artifact; using profile power series".to_string(),
                        );
                        bundle.timeline = Some(series);
                    }
                    None => debug!("No timeline artifact for job {}", job_id),
                }
            }
        }

        Ok(bundle)
    }

    fn timeline_matcher(&self, job_id: &JobId) -> Result<GlobMatcher> {
        let pattern = self.timeline_pattern.replace("{job_id}", job_id.as_str());
        Glob::new(&pattern)
            .map(|glob| glob.compile_matcher())
            .map_err(|e| BenchwrapError::config(format!("timeline pattern {:?}: {}", pattern, e)))
    }
}

/// First regular file in `dir` whose name matches, by name order
fn find_artifact(dir: &Path, matcher: &GlobMatcher) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut matches: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.file_name().map_or(false, |name| matcher.is_match(name)))
        .collect();
    matches.sort();
    matches.into_iter().next()
}
