//! Configuration settings for Benchwrap
//!
//! Defines the CLI arguments, the optional JSON config file and the
//! resolution of the storage root.

use crate::error::{BenchwrapError, IoResultExt, Result};
use crate::monitor::MonitorPolicy;
use crate::record::RunRequest;
use crate::registry::BenchmarkManifest;
use crate::scheduler::SlurmCommands;
use crate::spec::ResourceRequest;
use crate::telemetry::DEFAULT_TIMELINE_PATTERN;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Benchwrap - energy-aware benchmark runs on Slurm clusters
#[derive(Parser, Debug, Clone)]
#[command(name = "benchwrap")]
#[command(author = "Benchwrap Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Schedule energy-profiling benchmarks and derive efficiency metrics")]
#[command(long_about = r#"
Benchwrap submits benchmark jobs to Slurm, tracks them to completion and
derives energy-efficiency metrics from accounting, profiling and
hardware-counter data.

Examples:
  benchwrap list                                   # Registered benchmarks
  benchwrap add ./flops_matrix_mul.py              # Register a workload
  benchwrap run mem_bandwidth --partition scc-cpu  # Run and track
  benchwrap status 123456                          # Poll a job
  benchwrap show 123456                            # Stored record and metrics
"#)]
pub struct CliArgs {
    /// Storage root (catalog and job output)
    #[arg(long, env = "BENCHWRAP_ROOT", value_name = "PATH")]
    pub storage_root: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, env = "BENCHWRAP_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no progress spinners)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format for reports
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub output_format: OutputFormat,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List registered benchmarks
    #[command(name = "list")]
    List,

    /// Register a benchmark directory or a single .py workload
    #[command(name = "add")]
    Add {
        /// Directory containing job_start.sh, or a .py file
        source: PathBuf,
        /// Default resources
        #[command(flatten)]
        resources: ResourceArgs,
        /// Cores per node, enables the capacity check
        #[arg(long, value_name = "NUM")]
        cores_per_node: Option<u32>,
        /// Description
        #[arg(long)]
        description: Option<String>,
    },

    /// Run one or more benchmarks and track them to completion
    #[command(name = "run")]
    Run {
        /// Benchmark names (exact or unique prefix)
        #[arg(required = true)]
        benchmarks: Vec<String>,
        /// Resource overrides
        #[command(flatten)]
        resources: ResourceArgs,
        /// Do not request energy profiling
        #[arg(long)]
        no_energy: bool,
        /// Application throughput (work units per second) for perf-per-watt
        #[arg(long, value_name = "RATE")]
        throughput: Option<f64>,
        /// Submit only; do not wait for completion
        #[arg(long)]
        detach: bool,
    },

    /// Poll a submitted job
    #[command(name = "status")]
    Status {
        /// Job id
        job_id: String,
        /// Track to completion and collect telemetry
        #[arg(short, long)]
        wait: bool,
    },

    /// Cancel a submitted job
    #[command(name = "cancel")]
    Cancel {
        /// Job id
        job_id: String,
    },

    /// Show stored runs, or one run's record
    #[command(name = "show")]
    Show {
        /// Job id; lists all stored runs when omitted
        job_id: Option<String>,
    },
}

/// Resource flags shared by `add` and `run`
#[derive(Args, Debug, Clone, Default)]
pub struct ResourceArgs {
    /// Partition
    #[arg(short = 'p', long)]
    pub partition: Option<String>,
    /// Node count
    #[arg(short = 'N', long, value_name = "NUM")]
    pub nodes: Option<u32>,
    /// Task count
    #[arg(short = 'n', long, value_name = "NUM")]
    pub ntasks: Option<u32>,
    /// CPUs per task
    #[arg(short = 'c', long, value_name = "NUM")]
    pub cpus_per_task: Option<u32>,
    /// Time limit (e.g. 30m, 2h)
    #[arg(short = 't', long, value_parser = humantime::parse_duration, value_name = "DURATION")]
    pub time_limit: Option<Duration>,
}

impl ResourceArgs {
    /// Run request for `benchmark` with these overrides
    pub fn to_request(&self, benchmark: &str) -> RunRequest {
        let mut request = RunRequest::new(benchmark);
        request.partition = self.partition.clone();
        request.nodes = self.nodes;
        request.ntasks = self.ntasks;
        request.cpus_per_task = self.cpus_per_task;
        request.time_limit_secs = self.time_limit.map(|d| d.as_secs());
        request
    }

    /// Manifest with these values over the default resources
    pub fn to_manifest(
        &self,
        cores_per_node: Option<u32>,
        description: Option<String>,
    ) -> BenchmarkManifest {
        let defaults = ResourceRequest::default();
        BenchmarkManifest {
            resources: ResourceRequest {
                nodes: self.nodes.unwrap_or(defaults.nodes),
                ntasks: self.ntasks.unwrap_or(defaults.ntasks),
                cpus_per_task: self.cpus_per_task.unwrap_or(defaults.cpus_per_task),
                partition: self.partition.clone(),
                time_limit_secs: self
                    .time_limit
                    .map(|d| d.as_secs())
                    .or(defaults.time_limit_secs),
            },
            cores_per_node,
            description,
        }
    }
}

/// Output format for reports
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON format
    Json,
}

/// Durations written as humantime strings ("5s", "2h 30m")
mod human_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| humantime::parse_duration(&raw).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

/// Monitor section of the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// First poll interval
    #[serde(with = "human_duration")]
    pub min_interval: Duration,
    /// Backoff ceiling
    #[serde(with = "human_duration")]
    pub max_interval: Duration,
    /// Interval growth per unchanged poll
    pub backoff_factor: f64,
    /// Jitter fraction, clamped to 0.0-1.0 when applied
    pub jitter: f64,
    /// Local wall-time ceiling; absent means unbounded
    #[serde(with = "human_duration::option")]
    pub wall_time_ceiling: Option<Duration>,
    /// Consecutive failed polls before giving up
    pub max_unreachable: u32,
    /// Cancel the job when the ceiling is hit
    pub cancel_on_timeout: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        let policy = MonitorPolicy::default();
        Self {
            min_interval: policy.min_interval,
            max_interval: policy.max_interval,
            backoff_factor: policy.backoff_factor,
            jitter: policy.jitter,
            wall_time_ceiling: policy.wall_time_ceiling,
            max_unreachable: policy.max_unreachable,
            cancel_on_timeout: policy.cancel_on_timeout,
        }
    }
}

impl MonitorSettings {
    /// Validated monitor policy
    pub fn to_policy(&self) -> Result<MonitorPolicy> {
        if self.min_interval.is_zero() {
            return Err(BenchwrapError::config("monitor.min_interval must be positive"));
        }
        if self.max_interval < self.min_interval {
            return Err(BenchwrapError::config(
                "monitor.max_interval must not be below min_interval",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(BenchwrapError::config("monitor.jitter must be within 0..=1"));
        }
        if self.backoff_factor < 1.0 {
            return Err(BenchwrapError::config("monitor.backoff_factor must be >= 1"));
        }

        Ok(MonitorPolicy {
            min_interval: self.min_interval,
            max_interval: self.max_interval,
            backoff_factor: self.backoff_factor,
            jitter: self.jitter,
            wall_time_ceiling: self.wall_time_ceiling,
            max_unreachable: self.max_unreachable.max(1),
            cancel_on_timeout: self.cancel_on_timeout,
        })
    }
}

/// Contents of the JSON config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchwrapConfig {
    /// Storage root; the CLI flag wins
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_root: Option<PathBuf>,
    /// Slurm executables
    pub slurm: SlurmCommands,
    /// Profiling converter executable
    pub sh5util: PathBuf,
    /// Bound on every scheduler command
    #[serde(with = "human_duration")]
    pub command_timeout: Duration,
    /// Energy accounting sample interval (seconds)
    pub profile_frequency_secs: u32,
    /// Timeline artifact glob; `{job_id}` is substituted
    pub timeline_pattern: String,
    /// Polling policy
    pub monitor: MonitorSettings,
}

impl Default for BenchwrapConfig {
    fn default() -> Self {
        Self {
            storage_root: None,
            slurm: SlurmCommands::default(),
            sh5util: "sh5util".into(),
            command_timeout: Duration::from_secs(60),
            profile_frequency_secs: 1,
            timeline_pattern: DEFAULT_TIMELINE_PATTERN.to_string(),
            monitor: MonitorSettings::default(),
        }
    }
}

impl BenchwrapConfig {
    /// Load from `path`, or defaults, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).with_path(path)?;
        serde_json::from_str(&content)
            .map_err(|e| BenchwrapError::config(format!("{}: {}", path.display(), e)))
    }

    /// Override executables from `BENCHWRAP_<TOOL>` variables
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let overrides: [(&str, &mut PathBuf); 6] = [
            ("BENCHWRAP_SBATCH", &mut self.slurm.sbatch),
            ("BENCHWRAP_SQUEUE", &mut self.slurm.squeue),
            ("BENCHWRAP_SCANCEL", &mut self.slurm.scancel),
            ("BENCHWRAP_SACCT", &mut self.slurm.sacct),
            ("BENCHWRAP_SCONTROL", &mut self.slurm.scontrol),
            ("BENCHWRAP_SH5UTIL", &mut self.sh5util),
        ];
        for (key, slot) in overrides {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = PathBuf::from(value);
            }
        }
    }

    /// Storage root: CLI flag, then config file, then the XDG data directory
    pub fn resolve_storage_root(&self, cli: Option<&Path>) -> Result<PathBuf> {
        if let Some(root) = cli.map(Path::to_path_buf).or_else(|| self.storage_root.clone()) {
            return Ok(root);
        }
        default_storage_root(
            std::env::var("XDG_DATA_HOME").ok(),
            std::env::var("HOME").ok(),
        )
    }
}

/// `$XDG_DATA_HOME/benchwrap`, else `$HOME/.local/share/benchwrap`
pub fn default_storage_root(xdg_data_home: Option<String>, home: Option<String>) -> Result<PathBuf> {
    if let Some(xdg) = xdg_data_home.filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(xdg).join("benchwrap"));
    }
    match home.filter(|v| !v.is_empty()) {
        Some(home) => Ok(PathBuf::from(home).join(".local/share/benchwrap")),
        None => Err(BenchwrapError::config(
            "cannot determine a storage root: set --storage-root, XDG_DATA_HOME or HOME",
        )),
    }
}

/// Job output directory under a storage root
pub fn jobs_dir(storage_root: &Path) -> PathBuf {
    storage_root.join("jobs")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_storage_root() {
        assert_eq!(
            default_storage_root(Some("/xdg".into()), Some("/home/u".into())).unwrap(),
            PathBuf::from("/xdg/benchwrap")
        );
        assert_eq!(
            default_storage_root(Some(String::new()), Some("/home/u".into())).unwrap(),
            PathBuf::from("/home/u/.local/share/benchwrap")
        );
        assert!(default_storage_root(None, None).is_err());
    }

    #[test]
    fn test_cli_root_wins() {
        let config = BenchwrapConfig {
            storage_root: Some("/from/config".into()),
            ..Default::default()
        };
        assert_eq!(
            config.resolve_storage_root(Some(Path::new("/from/cli"))).unwrap(),
            PathBuf::from("/from/cli")
        );
        assert_eq!(
            config.resolve_storage_root(None).unwrap(),
            PathBuf::from("/from/config")
        );
    }

    #[test]
    fn test_config_file_with_humantime() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("benchwrap.json");
        fs::write(
            &path,
            r#"{
                "sh5util": "/opt/slurm/bin/sh5util",
                "command_timeout": "30s",
                "monitor": { "min_interval": "2s", "max_interval": "1m", "wall_time_ceiling": "12h" }
            }"#,
        )
        .unwrap();

        let config = BenchwrapConfig::from_file(&path).unwrap();
        assert_eq!(config.sh5util, PathBuf::from("/opt/slurm/bin/sh5util"));
        assert_eq!(config.command_timeout, Duration::from_secs(30));
        assert_eq!(config.slurm, SlurmCommands::default());

        let policy = config.monitor.to_policy().unwrap();
        assert_eq!(policy.min_interval, Duration::from_secs(2));
        assert_eq!(policy.max_interval, Duration::from_secs(60));
        assert_eq!(policy.wall_time_ceiling, Some(Duration::from_secs(12 * 3600)));
        assert_eq!(policy.max_unreachable, MonitorPolicy::default().max_unreachable);
    }

    #[test]
    fn test_bad_config_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.json");
        fs::write(&path, r#"{ "command_timeout": "soon" }"#).unwrap();
        assert!(matches!(BenchwrapConfig::from_file(&path), Err(BenchwrapError::Config(_))));
    }

    #[test]
    fn test_invalid_monitor_settings() {
        let settings = MonitorSettings {
            max_interval: Duration::from_millis(1),
            ..Default::default()
        };
        assert!(settings.to_policy().is_err());

        let settings = MonitorSettings {
            jitter: 1.5,
            ..Default::default()
        };
        assert!(settings.to_policy().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("BENCHWRAP_SQUEUE", "/tmp/fake-squeue"),
            ("BENCHWRAP_SH5UTIL", "/tmp/fake-sh5util"),
            ("BENCHWRAP_SACCT", " "),
        ]
        .into_iter()
        .collect();
        let mut config = BenchwrapConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.slurm.squeue, PathBuf::from("/tmp/fake-squeue"));
        assert_eq!(config.sh5util, PathBuf::from("/tmp/fake-sh5util"));
        assert_eq!(config.slurm.sacct, PathBuf::from("sacct"));
        assert_eq!(config.slurm.sbatch, PathBuf::from("sbatch"));
    }

    #[test]
    fn test_cli_parsing() {
        let args = CliArgs::try_parse_from([
            "benchwrap",
            "--storage-root",
            "/data",
            "run",
            "mem_bandwidth",
            "hpl",
            "--partition",
            "scc-cpu",
            "-N",
            "2",
            "--time-limit",
            "30m",
            "--no-energy",
        ])
        .unwrap();

        match args.command {
            Commands::Run {
                benchmarks,
                resources,
                no_energy,
                ..
            } => {
                assert_eq!(benchmarks, vec!["mem_bandwidth", "hpl"]);
                assert!(no_energy);
                let request = resources.to_request("hpl");
                assert_eq!(request.partition.as_deref(), Some("scc-cpu"));
                assert_eq!(request.nodes, Some(2));
                assert_eq!(request.time_limit_secs, Some(1800));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_manifest_from_add_flags() {
        let resources = ResourceArgs {
            ntasks: Some(8),
            ..Default::default()
        };
        let manifest = resources.to_manifest(Some(96), Some("triad".into()));
        assert_eq!(manifest.resources.ntasks, 8);
        assert_eq!(manifest.resources.nodes, 1);
        assert_eq!(manifest.resources.time_limit_secs, Some(3600));
        assert_eq!(manifest.cores_per_node, Some(96));
    }
}
