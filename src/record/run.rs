//! Run request and the append-only run record
//!
//! A `RunRecord` accumulates fields as it moves through the pipeline. Each
//! attach method succeeds exactly once; pipeline ordering decides who writes.

use crate::error::{BenchwrapError, Result};
use crate::metrics::DerivedMetrics;
use crate::monitor::JobHandle;
use crate::spec::SubmissionDescriptor;
use crate::telemetry::{AccountingRecord, ProfileTable, TelemetryBundle, TimelineSeries};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Parameters for one benchmark run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Benchmark name (exact or unique prefix)
    pub benchmark: String,
    /// Partition override
    pub partition: Option<String>,
    /// Node count override
    pub nodes: Option<u32>,
    /// Task count override
    pub ntasks: Option<u32>,
    /// CPUs-per-task override
    pub cpus_per_task: Option<u32>,
    /// Time limit override (seconds)
    pub time_limit_secs: Option<u64>,
    /// Request energy profiling
    pub energy_profiling: bool,
    /// Application-supplied throughput figure (work units per second)
    pub throughput: Option<f64>,
}

impl RunRequest {
    /// Request a run of `benchmark` with its default resources
    pub fn new(benchmark: impl Into<String>) -> Self {
        Self {
            benchmark: benchmark.into(),
            partition: None,
            nodes: None,
            ntasks: None,
            cpus_per_task: None,
            time_limit_secs: None,
            energy_profiling: true,
            throughput: None,
        }
    }

    /// Override the partition
    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    /// Override the node count
    pub fn with_nodes(mut self, nodes: u32) -> Self {
        self.nodes = Some(nodes);
        self
    }

    /// Override the task count
    pub fn with_ntasks(mut self, ntasks: u32) -> Self {
        self.ntasks = Some(ntasks);
        self
    }

    /// Override cpus per task
    pub fn with_cpus_per_task(mut self, cpus: u32) -> Self {
        self.cpus_per_task = Some(cpus);
        self
    }

    /// Override the time limit
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit_secs = Some(limit.as_secs());
        self
    }

    /// Toggle energy profiling
    pub fn with_energy_profiling(mut self, enabled: bool) -> Self {
        self.energy_profiling = enabled;
        self
    }

    /// Provide the application's throughput figure
    pub fn with_throughput(mut self, throughput: f64) -> Self {
        self.throughput = Some(throughput);
        self
    }
}

/// Which telemetry source a warning refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Scheduler accounting
    Accounting,
    /// Profiling-data converter
    Profile,
    /// Hardware-counter timeline
    Timeline,
    /// Run store
    Store,
}

/// Non-fatal degradation attached to a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialDataWarning {
    /// Affected source
    pub source: DataSource,
    /// What went missing or was skipped
    pub message: String,
}

impl PartialDataWarning {
    /// Create a warning
    pub fn new(source: DataSource, message: impl Into<String>) -> Self {
        Self {
            source,
            message: message.into(),
        }
    }
}

impl fmt::Display for PartialDataWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.source, self.message)
    }
}

/// Everything known about one run, accumulated stage by stage
#[derive(Debug, Serialize, Deserialize)]
pub struct RunRecord {
    request: RunRequest,
    created_at: DateTime<Utc>,
    descriptor: Option<SubmissionDescriptor>,
    handle: Option<JobHandle>,
    telemetry_collected: bool,
    accounting: Option<AccountingRecord>,
    #[serde(skip)]
    accounting_raw: Option<String>,
    profile: Option<ProfileTable>,
    timeline: Option<TimelineSeries>,
    metrics: Option<DerivedMetrics>,
    warnings: Vec<PartialDataWarning>,
}

impl RunRecord {
    /// Start a record for a request
    pub fn new(request: RunRequest) -> Self {
        Self {
            request,
            created_at: Utc::now(),
            descriptor: None,
            handle: None,
            telemetry_collected: false,
            accounting: None,
            accounting_raw: None,
            profile: None,
            timeline: None,
            metrics: None,
            warnings: Vec::new(),
        }
    }

    /// Original request
    pub fn request(&self) -> &RunRequest {
        &self.request
    }

    /// Creation timestamp
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Submission descriptor, once built
    pub fn descriptor(&self) -> Option<&SubmissionDescriptor> {
        self.descriptor.as_ref()
    }

    /// Job handle, once submitted
    pub fn handle(&self) -> Option<&JobHandle> {
        self.handle.as_ref()
    }

    /// Whether the telemetry stage already ran
    pub fn telemetry_collected(&self) -> bool {
        self.telemetry_collected
    }

    /// Accounting record, if the scheduler had one
    pub fn accounting(&self) -> Option<&AccountingRecord> {
        self.accounting.as_ref()
    }

    /// Raw accounting output, when collected in this process
    pub fn accounting_raw(&self) -> Option<&str> {
        self.accounting_raw.as_deref()
    }

    /// Converter output, if profiling produced one
    pub fn profile(&self) -> Option<&ProfileTable> {
        self.profile.as_ref()
    }

    /// Timeline series, if one was found
    pub fn timeline(&self) -> Option<&TimelineSeries> {
        self.timeline.as_ref()
    }

    /// Derived metrics, once computed
    pub fn metrics(&self) -> Option<&DerivedMetrics> {
        self.metrics.as_ref()
    }

    /// Warnings gathered so far
    pub fn warnings(&self) -> &[PartialDataWarning] {
        &self.warnings
    }

    /// Attach the submission descriptor
    pub fn attach_descriptor(&mut self, descriptor: SubmissionDescriptor) -> Result<()> {
        set_once(&mut self.descriptor, descriptor, "descriptor")
    }

    /// Attach the job handle returned by submission
    pub fn attach_handle(&mut self, handle: JobHandle) -> Result<()> {
        set_once(&mut self.handle, handle, "handle")
    }

    /// Attach everything the telemetry collector produced
    pub fn attach_telemetry(&mut self, bundle: TelemetryBundle) -> Result<()> {
        if self.telemetry_collected {
            return Err(BenchwrapError::RecordFieldAlreadySet("telemetry"));
        }
        self.telemetry_collected = true;
        self.accounting = bundle.accounting;
        self.accounting_raw = bundle.accounting_raw;
        self.profile = bundle.profile;
        self.timeline = bundle.timeline;
        self.warnings.extend(bundle.warnings);
        Ok(())
    }

    /// Attach derived metrics
    pub fn attach_metrics(&mut self, metrics: DerivedMetrics) -> Result<()> {
        set_once(&mut self.metrics, metrics, "metrics")
    }

    /// Append a warning
    pub fn warn(&mut self, warning: PartialDataWarning) {
        self.warnings.push(warning);
    }

    pub(crate) fn handle_mut(&mut self) -> Option<&mut JobHandle> {
        self.handle.as_mut()
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, field: &'static str) -> Result<()> {
    if slot.is_some() {
        return Err(BenchwrapError::RecordFieldAlreadySet(field));
    }
    *slot = Some(value);
    Ok(())
}
