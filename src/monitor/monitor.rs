//! Job monitor: drives a `JobHandle` to a terminal state
//!
//! Polls the gateway with exponential backoff, enforces the local wall-time
//! ceiling and gives up with `SchedulerUnavailable` once the scheduler has
//! been unreachable for too many consecutive polls.

use super::policy::{Backoff, MonitorPolicy};
use super::state::{JobHandle, JobState, TransitionCause};
use crate::error::{BenchwrapError, Result};
use crate::scheduler::{QueueStatus, SchedulerGateway};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Result of a single poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// State did not change
    Unchanged,
    /// State moved
    Transitioned { from: JobState, to: JobState },
    /// Handle was already terminal; nothing was queried
    AlreadyTerminal,
}

/// Receives monitor events (progress display, logging)
pub trait MonitorObserver: Send + Sync {
    /// Called after every completed poll
    fn on_poll(&self, _handle: &JobHandle) {}

    /// Called after every state change
    fn on_transition(&self, _handle: &JobHandle, _from: JobState, _to: JobState) {}
}

/// Requests cancellation of a tracked job
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Request cancellation; repeated calls are harmless
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Observes cancellation requests
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_, signal) = cancel_pair();
        signal
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Sender gone without cancelling
                futures::future::pending::<()>().await;
            }
        }
    }
}

/// Create a connected cancel handle and signal
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
}

/// Polls one job at a time through a scheduler gateway
#[derive(Clone)]
pub struct JobMonitor {
    gateway: Arc<dyn SchedulerGateway>,
    policy: MonitorPolicy,
    observer: Option<Arc<dyn MonitorObserver>>,
}

impl JobMonitor {
    /// Create a monitor
    pub fn new(gateway: Arc<dyn SchedulerGateway>, policy: MonitorPolicy) -> Self {
        Self {
            gateway,
            policy,
            observer: None,
        }
    }

    /// Attach an observer
    pub fn with_observer(mut self, observer: Arc<dyn MonitorObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Active policy
    pub fn policy(&self) -> &MonitorPolicy {
        &self.policy
    }

    /// Poll once; terminal handles are left alone without a query
    pub async fn poll_once(&self, handle: &mut JobHandle) -> Result<PollOutcome> {
        self.poll(handle, false).await
    }

    /// Request cancellation of a non-terminal job, then poll once
    pub async fn cancel(&self, handle: &mut JobHandle) -> Result<PollOutcome> {
        if handle.state().is_terminal() {
            return Ok(PollOutcome::AlreadyTerminal);
        }
        self.gateway.cancel(handle.job_id()).await?;
        info!("Cancellation requested for job {}", handle.job_id());
        self.poll(handle, true).await
    }

    /// Poll until the handle is terminal
    ///
    /// Cancellation through `cancel` is honoured between polls. Returns
    /// `SchedulerUnavailable` with the last known handle when the retry budget
    /// runs out.
    pub async fn track(&self, handle: &mut JobHandle, cancel: &mut CancelSignal) -> Result<()> {
        let mut backoff = Backoff::new();
        let mut failures = 0u32;
        let mut cancel_requested = false;
        let budget = self.policy.max_unreachable.max(1);

        loop {
            if handle.state().is_terminal() {
                return Ok(());
            }

            let mut polled = None;
            if !cancel_requested && cancel.is_cancelled() {
                match self.cancel(handle).await {
                    Ok(outcome) => {
                        cancel_requested = true;
                        backoff.reset();
                        polled = Some(Ok(outcome));
                    }
                    Err(e) => polled = Some(Err(e)),
                }
            }
            let polled = match polled {
                Some(result) => result,
                None => self.poll(handle, cancel_requested).await,
            };

            match polled {
                Ok(PollOutcome::Transitioned { .. }) => {
                    failures = 0;
                    backoff.reset();
                }
                Ok(_) => failures = 0,
                Err(e) if e.is_retryable() => {
                    failures += 1;
                    warn!(
                        "Poll of job {} failed ({}/{}): {}",
                        handle.job_id(),
                        failures,
                        budget,
                        e
                    );
                    if failures >= budget {
                        return Err(BenchwrapError::SchedulerUnavailable {
                            attempts: failures,
                            last_known: Box::new(handle.clone()),
                        });
                    }
                }
                Err(e) => return Err(e),
            }

            if handle.state().is_terminal() {
                return Ok(());
            }

            let mut delay = backoff.next_delay(&self.policy);
            if let Some(remaining) = self.remaining(handle, Utc::now()) {
                delay = delay.min(remaining);
            }
            debug!("Next poll of job {} in {:?}", handle.job_id(), delay);

            if cancel_requested || cancel.is_cancelled() {
                tokio::time::sleep(delay).await;
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => debug!("Cancel signal for job {}", handle.job_id()),
                }
            }
        }
    }

    async fn poll(&self, handle: &mut JobHandle, cancel_requested: bool) -> Result<PollOutcome> {
        if handle.state().is_terminal() {
            return Ok(PollOutcome::AlreadyTerminal);
        }

        let now = Utc::now();
        let remaining = self.remaining(handle, now);
        if remaining == Some(Duration::ZERO) {
            return Ok(self.force_timeout(handle, now).await);
        }

        let observed = match remaining {
            Some(limit) => match tokio::time::timeout(limit, self.observe(handle)).await {
                Ok(result) => result?,
                Err(_) => return Ok(self.force_timeout(handle, Utc::now()).await),
            },
            None => self.observe(handle).await?,
        };

        let now = Utc::now();
        let outcome = match observed {
            Some((to, mut cause, exit_code)) => {
                handle.set_exit_code(exit_code);
                if cancel_requested && to == JobState::Cancelled {
                    cause = TransitionCause::CancelRequested;
                }
                self.apply(handle, to, now, cause)
            }
            None => {
                handle.observe(now);
                PollOutcome::Unchanged
            }
        };

        if let Some(ref observer) = self.observer {
            observer.on_poll(handle);
        }
        Ok(outcome)
    }

    /// Ask the scheduler what state the job is in
    async fn observe(
        &self,
        handle: &JobHandle,
    ) -> Result<Option<(JobState, TransitionCause, Option<i32>)>> {
        let job_id = handle.job_id();
        match self.gateway.status(job_id).await? {
            QueueStatus::Listed(state) => Ok(Some((state, TransitionCause::SchedulerReported, None))),
            QueueStatus::Unrecognized(raw) => {
                warn!("Job {} reports unrecognized state {:?}", job_id, raw);
                Ok(None)
            }
            QueueStatus::NotListed => {
                let snapshot = self.gateway.accounting(job_id).await?;
                let terminal = snapshot.and_then(|snap| {
                    snap.reported_state()
                        .filter(JobState::is_terminal)
                        .map(|state| (state, TransitionCause::AccountingReported, snap.exit_code()))
                });
                if terminal.is_none() {
                    debug!("Job {} not in queue and no final accounting yet", job_id);
                }
                Ok(terminal)
            }
        }
    }

    fn apply(
        &self,
        handle: &mut JobHandle,
        to: JobState,
        at: DateTime<Utc>,
        cause: TransitionCause,
    ) -> PollOutcome {
        let from = handle.state();
        if !handle.transition(to, at, cause) {
            return PollOutcome::Unchanged;
        }

        info!("Job {}: {} -> {}", handle.job_id(), from, to);
        if let Some(ref observer) = self.observer {
            observer.on_transition(handle, from, to);
        }
        PollOutcome::Transitioned { from, to }
    }

    async fn force_timeout(&self, handle: &mut JobHandle, now: DateTime<Utc>) -> PollOutcome {
        warn!(
            "Job {} exceeded the wall-time ceiling after {:?}",
            handle.job_id(),
            handle.elapsed_at(now)
        );
        if self.policy.cancel_on_timeout {
            if let Err(e) = self.gateway.cancel(handle.job_id()).await {
                warn!("Best-effort cancel of job {} failed: {}", handle.job_id(), e);
            }
        }
        let outcome = self.apply(handle, JobState::TimedOut, now, TransitionCause::WallTimeCeiling);
        if let Some(ref observer) = self.observer {
            observer.on_poll(handle);
        }
        outcome
    }

    fn remaining(&self, handle: &JobHandle, now: DateTime<Utc>) -> Option<Duration> {
        self.policy
            .wall_time_ceiling
            .map(|ceiling| ceiling.saturating_sub(handle.elapsed_at(now)))
    }
}
