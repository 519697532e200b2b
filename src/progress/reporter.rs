//! Progress reporter implementation
//!
//! One indicatif spinner per tracked job, driven by monitor events:
//! - current lifecycle state, coloured by outcome
//! - poll count and time since the first poll
//! - finished with a check or cross once the job is terminal

use crate::monitor::{JobHandle, JobId, JobState, MonitorObserver};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Live view of the jobs being monitored
pub struct ProgressReporter {
    /// Multi-progress container
    multi: MultiProgress,
    /// Spinner per job
    spinners: Mutex<HashMap<JobId, JobSpinner>>,
    /// Start time
    start_time: Instant,
    /// Polls observed
    polls: AtomicU64,
    /// Transitions observed
    transitions: AtomicU64,
    /// Is progress enabled
    enabled: AtomicBool,
}

struct JobSpinner {
    bar: ProgressBar,
    polls: u64,
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {prefix:.bold} {msg} [{elapsed}]")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn styled_state(state: JobState) -> String {
    let name = state.name();
    match state {
        JobState::Completed => style(name).green().to_string(),
        JobState::Failed => style(name).red().to_string(),
        JobState::Cancelled | JobState::TimedOut => style(name).yellow().to_string(),
        JobState::Running => style(name).cyan().to_string(),
        JobState::Submitted | JobState::Pending => style(name).dim().to_string(),
    }
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            spinners: Mutex::new(HashMap::new()),
            start_time: Instant::now(),
            polls: AtomicU64::new(0),
            transitions: AtomicU64::new(0),
            enabled: AtomicBool::new(true),
        }
    }

    /// Create a disabled progress reporter (for quiet mode)
    pub fn disabled() -> Self {
        let reporter = Self::new();
        reporter.enabled.store(false, Ordering::SeqCst);
        reporter.multi.set_draw_target(ProgressDrawTarget::hidden());
        reporter
    }

    /// Check if progress is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Print a line above the spinners
    pub fn println(&self, message: &str) {
        if self.is_enabled() {
            let _ = self.multi.println(message);
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Get progress summary
    pub fn summary(&self) -> ProgressSummary {
        let spinners = self.spinners.lock().unwrap_or_else(|e| e.into_inner());
        ProgressSummary {
            jobs: spinners.len(),
            finished: spinners.values().filter(|s| s.bar.is_finished()).count(),
            polls: self.polls.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
        }
    }

    fn update<F>(&self, handle: &JobHandle, apply: F)
    where
        F: FnOnce(&mut JobSpinner),
    {
        let mut spinners = self.spinners.lock().unwrap_or_else(|e| e.into_inner());
        let spinner = spinners.entry(handle.job_id().clone()).or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new_spinner());
            bar.set_style(spinner_style());
            bar.set_prefix(format!("job {}", handle.job_id()));
            if self.is_enabled() {
                bar.enable_steady_tick(Duration::from_millis(120));
            }
            JobSpinner { bar, polls: 0 }
        });
        apply(spinner);
    }
}

impl MonitorObserver for ProgressReporter {
    fn on_poll(&self, handle: &JobHandle) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.update(handle, |spinner| {
            spinner.polls += 1;
            if spinner.bar.is_finished() {
                return;
            }
            let state = handle.state();
            let message = format!("{} ({} polls)", styled_state(state), spinner.polls);
            if state.is_terminal() {
                let mark = match state {
                    JobState::Completed => style("✓").green(),
                    _ => style("✗").red(),
                };
                spinner.bar.finish_with_message(format!("{} {}", mark, message));
            } else {
                spinner.bar.set_message(message);
            }
        });
    }

    fn on_transition(&self, handle: &JobHandle, from: JobState, to: JobState) {
        self.transitions.fetch_add(1, Ordering::Relaxed);
        let line = format!("job {}: {} -> {}", handle.job_id(), from, styled_state(to));
        self.update(handle, |spinner| spinner.bar.set_message(line));
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress summary
#[derive(Debug, Clone)]
pub struct ProgressSummary {
    /// Jobs seen
    pub jobs: usize,
    /// Jobs whose spinner has finished
    pub finished: usize,
    /// Total polls
    pub polls: u64,
    /// Total state changes
    pub transitions: u64,
    /// Elapsed time
    pub elapsed: Duration,
}

impl ProgressSummary {
    /// Print summary to console
    pub fn print(&self) {
        println!("Jobs:        {}/{} finished", self.finished, self.jobs);
        println!("Polls:       {}", self.polls);
        println!("Transitions: {}", self.transitions);
        println!("Elapsed:     {:.1?}", self.elapsed);
    }
}
