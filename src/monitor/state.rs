//! Job lifecycle state and the handle threaded through a run
//!
//! `JobHandle` is the single source of a job's identity after submission.
//! Only the monitor moves it between states; terminal states are final.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Scheduler-assigned job identifier (opaque)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Wrap a scheduler identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier as passed to scheduler commands
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Accepted by the scheduler, not yet observed by a poll
    Submitted,
    /// Waiting for resources
    Pending,
    /// Executing
    Running,
    /// Finished normally
    Completed,
    /// Finished with an error
    Failed,
    /// Cancelled by request or by the scheduler (preemption included)
    Cancelled,
    /// Hit a time limit, either the scheduler's or the local ceiling
    TimedOut,
}

impl JobState {
    /// Whether no further transition may leave this state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled | JobState::TimedOut
        )
    }

    /// Upper-case name used in logs and records
    pub fn name(&self) -> &'static str {
        match self {
            JobState::Submitted => "SUBMITTED",
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
            JobState::TimedOut => "TIMED_OUT",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a state transition happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    /// Reported by the live queue
    SchedulerReported,
    /// Recovered from accounting after the job left the queue
    AccountingReported,
    /// Local wall-time ceiling exceeded
    WallTimeCeiling,
    /// Cancellation requested by the caller and confirmed
    CancelRequested,
}

/// One recorded state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state
    pub from: JobState,
    /// New state
    pub to: JobState,
    /// When the change was observed
    pub at: DateTime<Utc>,
    /// What caused it
    pub cause: TransitionCause,
}

/// Handle for one submitted job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    job_id: JobId,
    submitted_at: DateTime<Utc>,
    state: JobState,
    last_observed_at: DateTime<Utc>,
    exit_code: Option<i32>,
    transitions: Vec<StateTransition>,
}

impl JobHandle {
    /// Create a handle in the `SUBMITTED` state
    pub fn submitted(job_id: JobId, submitted_at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            submitted_at,
            state: JobState::Submitted,
            last_observed_at: submitted_at,
            exit_code: None,
            transitions: Vec::new(),
        }
    }

    /// Scheduler job identifier
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Submission timestamp
    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    /// Current lifecycle state
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Timestamp of the last successful observation
    pub fn last_observed_at(&self) -> DateTime<Utc> {
        self.last_observed_at
    }

    /// Exit code, once known
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Recorded transitions, oldest first
    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    /// Wall time elapsed since submission at `now`
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.submitted_at).to_std().unwrap_or_default()
    }

    pub(crate) fn observe(&mut self, at: DateTime<Utc>) {
        self.last_observed_at = at;
    }

    /// Move to `to`; returns false when the handle is terminal or already there
    pub(crate) fn transition(
        &mut self,
        to: JobState,
        at: DateTime<Utc>,
        cause: TransitionCause,
    ) -> bool {
        self.observe(at);
        if self.state.is_terminal() || self.state == to {
            return false;
        }

        self.transitions.push(StateTransition {
            from: self.state,
            to,
            at,
            cause,
        });
        self.state = to;
        true
    }

    pub(crate) fn set_exit_code(&mut self, exit_code: Option<i32>) {
        if exit_code.is_some() {
            self.exit_code = exit_code;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> JobHandle {
        JobHandle::submitted(JobId::new("4242"), Utc::now())
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Submitted.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(JobState::TimedOut.is_terminal());
    }

    #[test]
    fn test_transitions_are_recorded() {
        let mut h = handle();
        let now = Utc::now();
        assert!(h.transition(JobState::Pending, now, TransitionCause::SchedulerReported));
        assert!(h.transition(JobState::Running, now, TransitionCause::SchedulerReported));
        assert!(!h.transition(JobState::Running, now, TransitionCause::SchedulerReported));

        assert_eq!(h.state(), JobState::Running);
        assert_eq!(h.transitions().len(), 2);
        assert_eq!(h.transitions()[0].from, JobState::Submitted);
    }

    #[test]
    fn test_terminal_state_is_final() {
        let mut h = handle();
        let now = Utc::now();
        assert!(h.transition(JobState::Completed, now, TransitionCause::SchedulerReported));
        assert!(!h.transition(JobState::Running, now, TransitionCause::SchedulerReported));
        assert!(!h.transition(JobState::Cancelled, now, TransitionCause::CancelRequested));
        assert_eq!(h.state(), JobState::Completed);
        assert_eq!(h.transitions().len(), 1);
    }

    #[test]
    fn test_state_serializes_upper_case() {
        let json = serde_json::to_string(&JobState::TimedOut).unwrap();
        assert_eq!(json, "\"TIMED_OUT\"");
        assert_eq!(JobState::TimedOut.to_string(), "TIMED_OUT");
    }
}
