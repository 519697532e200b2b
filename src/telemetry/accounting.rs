//! Accounting record built from a sacct snapshot

use crate::monitor::JobState;
use crate::scheduler::{AccountingRow, AccountingSnapshot};
use crate::spec::parse_slurm_time;
use serde::{Deserialize, Serialize};

/// Scheduler accounting for one finished job
///
/// Empty fields and sentinels (`UNLIMITED`, `Unknown`) stay unset; a missing
/// value is never reported as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountingRecord {
    /// Elapsed wall time (seconds)
    pub elapsed_secs: Option<f64>,
    /// `ConsumedEnergyRaw`, joules
    pub energy_raw_joules: Option<f64>,
    /// `ConsumedEnergy`, unit-suffixed value converted to joules
    pub energy_normalized_joules: Option<f64>,
    /// Average CPU frequency (kHz)
    pub avg_cpu_freq_khz: Option<f64>,
    /// Exit code of the job script
    pub exit_code: Option<i32>,
    /// Job hit its time limit
    pub truncated: bool,
    /// Final state reported by accounting
    pub state: Option<JobState>,
    /// Time limit (seconds)
    pub time_limit_secs: Option<f64>,
}

impl AccountingRecord {
    /// Extract the record from a parsed sacct snapshot
    pub fn from_snapshot(snapshot: &AccountingSnapshot) -> Self {
        let elapsed_secs = snapshot.field(|r| &r.elapsed).and_then(parse_slurm_time);
        let time_limit_secs = snapshot.field(|r| &r.time_limit).and_then(parse_slurm_time);
        let state = snapshot.reported_state();

        let hit_limit = match (elapsed_secs, time_limit_secs) {
            (Some(elapsed), Some(limit)) => limit > 0.0 && elapsed >= limit,
            _ => false,
        };

        Self {
            elapsed_secs,
            energy_raw_joules: energy_total(snapshot, |r| &r.consumed_energy_raw),
            energy_normalized_joules: energy_total(snapshot, |r| &r.consumed_energy),
            avg_cpu_freq_khz: snapshot
                .field(|r| &r.ave_cpu_freq)
                .and_then(|v| parse_scaled(v, 1e3)),
            exit_code: snapshot.exit_code(),
            truncated: state == Some(JobState::TimedOut) || hit_limit,
            state,
            time_limit_secs,
        }
    }

    /// Consumed energy in joules, raw counter preferred
    pub fn consumed_energy_joules(&self) -> Option<f64> {
        self.energy_raw_joules.or(self.energy_normalized_joules)
    }
}

/// NO_VAL64 and above; sacct prints these when the counter never reported
const ENERGY_NO_VAL: f64 = (u64::MAX - 1) as f64;

/// Energy in joules; `0` (no energy plugin) and NO_VAL64 stay unset
fn parse_energy(value: &str) -> Option<f64> {
    parse_scaled(value, 1.0).filter(|joules| *joules > 0.0 && *joules < ENERGY_NO_VAL)
}

/// Allocation energy, or the sum over steps when only steps report it
fn energy_total<F>(snapshot: &AccountingSnapshot, select: F) -> Option<f64>
where
    F: Fn(&AccountingRow) -> &str,
{
    snapshot
        .field_or_steps(select)
        .into_iter()
        .filter_map(parse_energy)
        .fold(None, |total, joules| Some(total.unwrap_or(0.0) + joules))
}

/// Parse a number with an optional SI suffix (`K`, `M`, `G`, `T`) and unit
///
/// `unit_divisor` converts the suffixed base unit into the record's unit:
/// `1.0` for joules, `1e3` for hertz into kilohertz. Bare numbers are taken as
/// already in the record's unit, matching how sacct prints unsuffixed values.
fn parse_scaled(value: &str, unit_divisor: f64) -> Option<f64> {
    let value = value.trim();
    let value = value
        .strip_suffix("Hz")
        .or_else(|| value.strip_suffix('J'))
        .unwrap_or(value)
        .trim();

    let (number, multiplier) = match value.chars().last()? {
        'K' | 'k' => (&value[..value.len() - 1], Some(1e3)),
        'M' => (&value[..value.len() - 1], Some(1e6)),
        'G' => (&value[..value.len() - 1], Some(1e9)),
        'T' => (&value[..value.len() - 1], Some(1e12)),
        _ => (value, None),
    };

    let parsed: f64 = number.trim().parse().ok()?;
    if !parsed.is_finite() || parsed < 0.0 {
        return None;
    }
    Some(match multiplier {
        Some(multiplier) => parsed * (multiplier / unit_divisor),
        None => parsed,
    })
}
