//! Scripted in-memory scheduler for tests

use super::{AccountingSnapshot, QueueStatus, SchedulerGateway};
use crate::error::{BenchwrapError, Result};
use crate::monitor::{JobId, JobState};
use crate::spec::SubmissionDescriptor;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

/// One scripted answer to a status query
#[derive(Debug, Clone)]
pub(crate) enum FakeStatus {
    Listed(JobState),
    NotListed,
    Unreachable,
}

/// Answers status queries from a script, then repeats a fallback forever
pub(crate) struct FakeScheduler {
    next_id: AtomicU32,
    script: Mutex<VecDeque<FakeStatus>>,
    fallback: Mutex<FakeStatus>,
    accounting: Mutex<Option<String>>,
    accounting_fails: AtomicBool,
    cancel_confirms: AtomicBool,
    cancelled: AtomicBool,
    submit_error: Mutex<Option<String>>,
    pub submit_calls: AtomicU32,
    pub status_calls: AtomicU32,
    pub cancel_calls: AtomicU32,
    pub accounting_calls: AtomicU32,
}

impl FakeScheduler {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1000),
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(FakeStatus::Listed(JobState::Running)),
            accounting: Mutex::new(None),
            accounting_fails: AtomicBool::new(false),
            cancel_confirms: AtomicBool::new(true),
            cancelled: AtomicBool::new(false),
            submit_error: Mutex::new(None),
            submit_calls: AtomicU32::new(0),
            status_calls: AtomicU32::new(0),
            cancel_calls: AtomicU32::new(0),
            accounting_calls: AtomicU32::new(0),
        }
    }

    /// Answers returned in order by the first status queries
    pub fn with_statuses(self, statuses: Vec<FakeStatus>) -> Self {
        *self.script.lock().unwrap() = statuses.into();
        self
    }

    /// Answer once the script is exhausted
    pub fn then_always(self, status: FakeStatus) -> Self {
        *self.fallback.lock().unwrap() = status;
        self
    }

    /// Raw sacct output; `{id}` is replaced by the queried job id
    pub fn with_accounting(self, raw: &str) -> Self {
        *self.accounting.lock().unwrap() = Some(raw.to_string());
        self
    }

    pub fn with_failing_accounting(self) -> Self {
        self.accounting_fails.store(true, Ordering::SeqCst);
        self
    }

    /// Whether the queue reports CANCELLED after a cancel request
    pub fn with_cancel_confirms(self, confirms: bool) -> Self {
        self.cancel_confirms.store(confirms, Ordering::SeqCst);
        self
    }

    pub fn with_submit_error(self, message: &str) -> Self {
        *self.submit_error.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn calls(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchedulerGateway for FakeScheduler {
    fn name(&self) -> &str {
        "fake"
    }

    async fn submit(&self, descriptor: &SubmissionDescriptor) -> Result<JobId> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.submit_error.lock().unwrap().clone() {
            return Err(BenchwrapError::Submission(message));
        }
        let job_id = JobId::new(self.next_id.fetch_add(1, Ordering::SeqCst).to_string());
        std::fs::create_dir_all(descriptor.job_dir(&job_id))?;
        Ok(job_id)
    }

    async fn status(&self, _job_id: &JobId) -> Result<QueueStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.cancelled.load(Ordering::SeqCst) && self.cancel_confirms.load(Ordering::SeqCst) {
            return Ok(QueueStatus::Listed(JobState::Cancelled));
        }

        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().unwrap().clone());
        match next {
            FakeStatus::Listed(state) => Ok(QueueStatus::Listed(state)),
            FakeStatus::NotListed => Ok(QueueStatus::NotListed),
            FakeStatus::Unreachable => Err(BenchwrapError::query("squeue", "connection refused")),
        }
    }

    async fn cancel(&self, _job_id: &JobId) -> Result<()> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn accounting(&self, job_id: &JobId) -> Result<Option<AccountingSnapshot>> {
        self.accounting_calls.fetch_add(1, Ordering::SeqCst);
        if self.accounting_fails.load(Ordering::SeqCst) {
            return Err(BenchwrapError::query("sacct", "slurmdbd unreachable"));
        }
        let raw = self.accounting.lock().unwrap().clone();
        Ok(raw.and_then(|raw| {
            AccountingSnapshot::parse(job_id, &raw.replace("{id}", job_id.as_str()))
        }))
    }
}
