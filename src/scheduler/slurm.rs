//! Slurm implementation of the scheduler gateway
//!
//! Drives `sbatch`, `squeue`, `scancel`, `sacct` and `scontrol` as child
//! processes. Every invocation is bounded by `command_timeout`.

use super::sacct::{AccountingSnapshot, SACCT_FORMAT};
use super::{QueueStatus, SchedulerGateway};
use crate::error::{BenchwrapError, Result};
use crate::monitor::{JobId, JobState};
use crate::spec::SubmissionDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Paths of the Slurm executables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlurmCommands {
    /// Job submission
    pub sbatch: PathBuf,
    /// Queue state of live jobs
    pub squeue: PathBuf,
    /// Job cancellation
    pub scancel: PathBuf,
    /// Accounting of finished jobs
    pub sacct: PathBuf,
    /// Releases held submissions
    pub scontrol: PathBuf,
}

impl Default for SlurmCommands {
    fn default() -> Self {
        Self {
            sbatch: "sbatch".into(),
            squeue: "squeue".into(),
            scancel: "scancel".into(),
            sacct: "sacct".into(),
            scontrol: "scontrol".into(),
        }
    }
}

/// Map a Slurm state string to a lifecycle state
///
/// Accepts `squeue` and `sacct` spellings, including `CANCELLED by <uid>`
/// and the truncated `CANCELLED+`.
pub fn map_slurm_state(raw: &str) -> Option<JobState> {
    let token = raw.split_whitespace().next()?.trim_end_matches('+').to_uppercase();
    let state = match token.as_str() {
        "PENDING" | "CONFIGURING" | "REQUEUED" | "REQUEUE_FED" | "REQUEUE_HOLD"
        | "RESV_DEL_HOLD" | "SUSPENDED" => JobState::Pending,
        "RUNNING" | "COMPLETING" | "STAGE_OUT" | "SIGNALING" => JobState::Running,
        "COMPLETED" => JobState::Completed,
        "FAILED" | "NODE_FAIL" | "OUT_OF_MEMORY" | "BOOT_FAIL" => JobState::Failed,
        "CANCELLED" | "PREEMPTED" | "REVOKED" => JobState::Cancelled,
        "TIMEOUT" | "DEADLINE" => JobState::TimedOut,
        _ => return None,
    };
    Some(state)
}

struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// Gateway backed by the Slurm command-line tools
#[derive(Debug, Clone)]
pub struct SlurmGateway {
    commands: SlurmCommands,
    command_timeout: Duration,
}

impl SlurmGateway {
    /// Create a gateway
    pub fn new(commands: SlurmCommands, command_timeout: Duration) -> Self {
        Self {
            commands,
            command_timeout,
        }
    }

    async fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput> {
        let label = program.display().to_string();
        debug!("Running {} {}", label, args.join(" "));

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.command_timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(BenchwrapError::query(label, e.to_string())),
            Err(_) => {
                return Err(BenchwrapError::query(
                    label,
                    format!("timed out after {:?}", self.command_timeout),
                ))
            }
        };

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    async fn release(&self, job_id: &JobId) -> Result<()> {
        let args = vec!["release".to_string(), job_id.to_string()];
        let output = self.run(&self.commands.scontrol, &args).await?;
        if output.success {
            Ok(())
        } else {
            Err(BenchwrapError::query("scontrol release", output.stderr))
        }
    }

    async fn abandon(&self, job_id: &JobId, reason: String) -> BenchwrapError {
        warn!("Cancelling held job {}: {}", job_id, reason);
        if let Err(e) = self.cancel(job_id).await {
            warn!("Could not cancel held job {}: {}", job_id, e);
        }
        BenchwrapError::Submission(format!("job {}: {}", job_id, reason))
    }
}

/// Parse `--parsable` output: `<id>` or `<id>;<cluster>`
fn parse_job_id(stdout: &str) -> Option<JobId> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    let id = line.split(';').next()?.trim();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some(JobId::new(id))
}

#[async_trait]
impl SchedulerGateway for SlurmGateway {
    fn name(&self) -> &str {
        "slurm"
    }

    async fn submit(&self, descriptor: &SubmissionDescriptor) -> Result<JobId> {
        let args = descriptor.to_sbatch_args();
        let output = self
            .run(&self.commands.sbatch, &args)
            .await
            .map_err(|e| BenchwrapError::Submission(e.to_string()))?;

        if !output.success {
            return Err(BenchwrapError::Submission(output.stderr));
        }
        let job_id = parse_job_id(&output.stdout).ok_or_else(|| {
            BenchwrapError::Submission(format!("unexpected sbatch output: {:?}", output.stdout))
        })?;

        let job_dir = descriptor.job_dir(&job_id);
        if let Err(e) = tokio::fs::create_dir_all(&job_dir).await {
            return Err(self
                .abandon(&job_id, format!("cannot create {:?}: {}", job_dir, e))
                .await);
        }

        if descriptor.hold {
            if let Err(e) = self.release(&job_id).await {
                return Err(self.abandon(&job_id, format!("release failed: {}", e)).await);
            }
        }

        info!("Submitted {} as job {}", descriptor.benchmark, job_id);
        Ok(job_id)
    }

    async fn status(&self, job_id: &JobId) -> Result<QueueStatus> {
        let args = vec![
            "-h".to_string(),
            "-j".to_string(),
            job_id.to_string(),
            "-o".to_string(),
            "%T".to_string(),
        ];
        let output = self.run(&self.commands.squeue, &args).await?;

        if !output.success {
            // squeue rejects ids that already left the queue
            if output.stderr.contains("Invalid job id") {
                return Ok(QueueStatus::NotListed);
            }
            return Err(BenchwrapError::query("squeue", output.stderr));
        }

        match output.stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
            None => Ok(QueueStatus::NotListed),
            Some(raw) => Ok(match map_slurm_state(raw) {
                Some(state) => QueueStatus::Listed(state),
                None => QueueStatus::Unrecognized(raw.to_string()),
            }),
        }
    }

    async fn cancel(&self, job_id: &JobId) -> Result<()> {
        let output = self
            .run(&self.commands.scancel, &[job_id.to_string()])
            .await?;
        if output.success {
            Ok(())
        } else {
            Err(BenchwrapError::query("scancel", output.stderr))
        }
    }

    async fn accounting(&self, job_id: &JobId) -> Result<Option<AccountingSnapshot>> {
        let args = vec![
            "-j".to_string(),
            job_id.to_string(),
            "-P".to_string(),
            "-n".to_string(),
            format!("--format={}", SACCT_FORMAT),
        ];
        let output = self.run(&self.commands.sacct, &args).await?;
        if !output.success {
            return Err(BenchwrapError::query("sacct", output.stderr));
        }
        Ok(AccountingSnapshot::parse(job_id, &output.stdout))
    }
}
