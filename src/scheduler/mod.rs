//! Scheduler gateway
//!
//! A narrow async interface over the batch scheduler. The monitor and the
//! telemetry collector only ever talk to a `dyn SchedulerGateway`, so tests
//! can substitute a scripted fake.

mod sacct;
mod slurm;

#[cfg(test)]
pub(crate) mod fake;

pub use sacct::*;
pub use slurm::*;

use crate::error::Result;
use crate::monitor::{JobId, JobState};
use crate::spec::SubmissionDescriptor;
use async_trait::async_trait;

/// What the live queue says about a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueStatus {
    /// Listed with a known state
    Listed(JobState),
    /// Not in the queue; not proof of termination
    NotListed,
    /// Listed with a state string we do not map
    Unrecognized(String),
}

/// Scheduler operations used by the pipeline
#[async_trait]
pub trait SchedulerGateway: Send + Sync {
    /// Short scheduler name for logs
    fn name(&self) -> &str;

    /// Submit a job; returns once the scheduler has accepted and released it
    async fn submit(&self, descriptor: &SubmissionDescriptor) -> Result<JobId>;

    /// Query the live queue
    async fn status(&self, job_id: &JobId) -> Result<QueueStatus>;

    /// Request cancellation
    async fn cancel(&self, job_id: &JobId) -> Result<()>;

    /// Query accounting; `None` when the scheduler has no entry
    async fn accounting(&self, job_id: &JobId) -> Result<Option<AccountingSnapshot>>;
}
