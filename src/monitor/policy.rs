//! Polling policy for the job monitor
//!
//! Exponential backoff between a minimum and maximum interval, with a
//! symmetric random jitter so many concurrent monitors do not poll in step.

use rand::Rng;
use std::time::Duration;

/// Monitor polling and timeout policy
#[derive(Debug, Clone)]
pub struct MonitorPolicy {
    /// First (and post-transition) poll interval
    pub min_interval: Duration,
    /// Upper bound on the poll interval before jitter
    pub max_interval: Duration,
    /// Growth factor applied after each unchanged or failed poll
    pub backoff_factor: f64,
    /// Jitter fraction (0.0-1.0) applied to each delay
    pub jitter: f64,
    /// Local wall-time ceiling measured from submission
    pub wall_time_ceiling: Option<Duration>,
    /// Consecutive unreachable polls tolerated before giving up
    pub max_unreachable: u32,
    /// Issue a scheduler cancellation when the ceiling forces TIMED_OUT
    pub cancel_on_timeout: bool,
}

impl Default for MonitorPolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(120),
            backoff_factor: 2.0,
            jitter: 0.2,
            wall_time_ceiling: Some(Duration::from_secs(24 * 3600)),
            max_unreachable: 10,
            cancel_on_timeout: true,
        }
    }
}

impl MonitorPolicy {
    /// Base delay (no jitter) for the given step, 0-based
    pub fn base_delay(&self, step: u32) -> Duration {
        let min = self.min_interval.as_secs_f64();
        let max = self.max_interval.as_secs_f64().max(min);
        let factor = if self.backoff_factor.is_finite() {
            self.backoff_factor.max(1.0)
        } else {
            1.0
        };
        let delay = (min * factor.powi(step.min(64) as i32)).min(max);
        saturating_secs(delay)
    }

    /// Jitter fraction actually applied; non-finite values disable jitter
    pub fn effective_jitter(&self) -> f64 {
        if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Delay for the given step with jitter applied
    pub fn jittered_delay(&self, step: u32) -> Duration {
        let base = self.base_delay(step).as_secs_f64();
        let jitter = self.effective_jitter();
        if jitter == 0.0 || base == 0.0 {
            return saturating_secs(base);
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        saturating_secs(base * factor)
    }
}

/// Backoff state for one monitored job
#[derive(Debug, Clone, Default)]
pub struct Backoff {
    step: u32,
}

impl Backoff {
    /// Start at the minimum interval
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay before the next poll; grows the following one
    pub fn next_delay(&mut self, policy: &MonitorPolicy) -> Duration {
        let delay = policy.jittered_delay(self.step);
        self.step = self.step.saturating_add(1);
        delay
    }

    /// Go back to the minimum interval
    pub fn reset(&mut self) {
        self.step = 0;
    }

    /// Current step (number of delays handed out since the last reset)
    pub fn step(&self) -> u32 {
        self.step
    }
}

fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}
