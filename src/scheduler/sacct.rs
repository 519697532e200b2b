//! Parsing of `sacct -P -n` output

use super::slurm::map_slurm_state;
use crate::monitor::{JobId, JobState};
use serde::{Deserialize, Serialize};

/// Columns requested from sacct, in order
pub const SACCT_FORMAT: &str =
    "JobID,State,ExitCode,Elapsed,Timelimit,AveCPUFreq,ConsumedEnergy,ConsumedEnergyRaw";

const FIELD_COUNT: usize = 8;

/// One pipe-separated sacct row (allocation or step)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountingRow {
    /// `JobID`, with a `.step` suffix on step rows
    pub job_id: String,
    /// `State`, possibly with a suffix such as `CANCELLED by 1000`
    pub state: String,
    /// `ExitCode` as `code:signal`
    pub exit_code: String,
    /// `Elapsed` in Slurm duration format
    pub elapsed: String,
    /// `Timelimit`; may be `UNLIMITED` or `Partition_Limit`
    pub time_limit: String,
    /// `AveCPUFreq` with an optional K/M/G suffix
    pub ave_cpu_freq: String,
    /// `ConsumedEnergy`, possibly scaled with a K/M/G suffix
    pub consumed_energy: String,
    /// `ConsumedEnergyRaw` in joules
    pub consumed_energy_raw: String,
}

impl AccountingRow {
    fn parse(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split('|').map(str::trim).collect();
        if fields.len() < FIELD_COUNT {
            return None;
        }
        Some(Self {
            job_id: fields[0].to_string(),
            state: fields[1].to_string(),
            exit_code: fields[2].to_string(),
            elapsed: fields[3].to_string(),
            time_limit: fields[4].to_string(),
            ave_cpu_freq: fields[5].to_string(),
            consumed_energy: fields[6].to_string(),
            consumed_energy_raw: fields[7].to_string(),
        })
    }

    /// Step rows carry a `.` suffix (`123.batch`, `123.0`)
    pub fn is_step(&self) -> bool {
        self.job_id.contains('.')
    }
}

/// Raw accounting output for one job plus its parsed rows
#[derive(Debug, Clone, PartialEq)]
pub struct AccountingSnapshot {
    /// Job the snapshot was queried for
    pub job_id: JobId,
    /// Unmodified sacct output, kept for the run store
    pub raw: String,
    /// Parsed rows in sacct order
    pub rows: Vec<AccountingRow>,
}

impl AccountingSnapshot {
    /// Parse sacct output; `None` when no usable row exists
    pub fn parse(job_id: &JobId, raw: &str) -> Option<Self> {
        let rows: Vec<AccountingRow> = raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(AccountingRow::parse)
            .collect();

        if rows.is_empty() {
            return None;
        }

        Some(Self {
            job_id: job_id.clone(),
            raw: raw.to_string(),
            rows,
        })
    }

    /// The allocation row, or the first row when none matches the job id
    pub fn allocation_row(&self) -> &AccountingRow {
        self.rows
            .iter()
            .find(|row| row.job_id == self.job_id.as_str())
            .or_else(|| self.rows.iter().find(|row| !row.is_step()))
            .unwrap_or(&self.rows[0])
    }

    /// A field from the allocation row, falling back to the first step that has it
    pub fn field<F>(&self, select: F) -> Option<&str>
    where
        F: Fn(&AccountingRow) -> &str,
    {
        let primary = select(self.allocation_row());
        if !primary.is_empty() {
            return Some(primary);
        }
        self.rows
            .iter()
            .filter(|row| row.is_step())
            .map(|row| select(row))
            .find(|value| !value.is_empty())
    }

    /// The allocation row's value, or every non-empty step value when the
    /// allocation row has none
    ///
    /// Counters such as consumed energy are reported per step, so callers sum
    /// the step values instead of taking the first.
    pub fn field_or_steps<F>(&self, select: F) -> Vec<&str>
    where
        F: Fn(&AccountingRow) -> &str,
    {
        let primary = select(self.allocation_row());
        if !primary.is_empty() {
            return vec![primary];
        }
        self.rows
            .iter()
            .filter(|row| row.is_step())
            .map(|row| select(row))
            .filter(|value| !value.is_empty())
            .collect()
    }

    /// Final state as reported by accounting
    pub fn reported_state(&self) -> Option<JobState> {
        self.field(|row| &row.state).and_then(map_slurm_state)
    }

    /// Exit code: the first number of `code:signal`
    pub fn exit_code(&self) -> Option<i32> {
        self.field(|row| &row.exit_code)
            .and_then(|code| code.split(':').next())
            .and_then(|code| code.trim().parse().ok())
    }
}
