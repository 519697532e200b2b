//! Submission descriptor rendering
//!
//! Merges a benchmark's default resources with the caller's overrides and
//! produces the sbatch directives for one run. Nothing is submitted here.

use super::resources::{format_slurm_time, ResourceRequest};
use crate::error::{BenchwrapError, Result};
use crate::monitor::JobId;
use crate::record::RunRequest;
use crate::registry::BenchmarkDefinition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Everything the scheduler needs to run one benchmark job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionDescriptor {
    /// Benchmark name
    pub benchmark: String,
    /// Job name shown by the scheduler
    pub job_name: String,
    /// Launch script submitted to sbatch
    pub script: PathBuf,
    /// Working directory of the job (the benchmark template dir)
    pub working_dir: PathBuf,
    /// Resolved resources
    pub resources: ResourceRequest,
    /// Whether energy profiling directives are injected
    pub energy_profiling: bool,
    /// Energy accounting sample interval (seconds)
    pub profile_frequency_secs: u32,
    /// Root of the per-job directories
    pub job_root: PathBuf,
    /// Submit held, release once the job directory exists
    pub hold: bool,
    /// Extra environment exported to the job
    pub environment: BTreeMap<String, String>,
}

impl SubmissionDescriptor {
    /// Per-job directory for a submitted job
    pub fn job_dir(&self, job_id: &JobId) -> PathBuf {
        job_dir(&self.job_root, job_id)
    }

    /// sbatch arguments (without the program name), script last
    pub fn to_sbatch_args(&self) -> Vec<String> {
        let mut args = vec!["--parsable".to_string()];
        if self.hold {
            args.push("--hold".to_string());
        }
        args.extend(self.directives());
        args.push(self.script.display().to_string());
        args
    }

    /// `#SBATCH` block equivalent to the command-line directives
    pub fn render_script_header(&self) -> String {
        let mut script = String::from("#!/bin/bash\n");
        for directive in self.directives() {
            script.push_str(&format!("#SBATCH {}\n", directive));
        }
        script
    }

    fn directives(&self) -> Vec<String> {
        let pattern_dir = self.job_root.join("job_%j");
        let mut directives = vec![
            format!("--job-name={}", self.job_name),
            format!("--nodes={}", self.resources.nodes),
            format!("--ntasks={}", self.resources.ntasks),
            format!("--cpus-per-task={}", self.resources.cpus_per_task),
        ];

        if let Some(ref partition) = self.resources.partition {
            directives.push(format!("--partition={}", partition));
        }
        if let Some(limit) = self.resources.time_limit_secs {
            directives.push(format!("--time={}", format_slurm_time(limit)));
        }

        directives.push(format!("--chdir={}", self.working_dir.display()));
        directives.push(format!("--output={}", pattern_dir.join("slurm-%j.out").display()));
        directives.push(format!("--error={}", pattern_dir.join("slurm-%j.err").display()));

        if self.energy_profiling {
            directives.push("--profile=energy".to_string());
            directives.push(format!("--acctg-freq=energy={}", self.profile_frequency_secs));
        }

        if !self.environment.is_empty() {
            let exports: Vec<String> = self
                .environment
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            directives.push(format!("--export=ALL,{}", exports.join(",")));
        }

        directives
    }
}

/// Per-job directory under a job root
pub fn job_dir(job_root: &Path, job_id: &JobId) -> PathBuf {
    job_root.join(format!("job_{}", job_id))
}

/// Builds submission descriptors
#[derive(Debug, Clone)]
pub struct SpecBuilder {
    job_root: PathBuf,
    profile_frequency_secs: u32,
    hold: bool,
}

impl SpecBuilder {
    /// Create a builder writing job output under `job_root`
    pub fn new(job_root: impl Into<PathBuf>) -> Self {
        Self {
            job_root: job_root.into(),
            profile_frequency_secs: 1,
            hold: true,
        }
    }

    /// Set the energy sampling interval
    pub fn with_profile_frequency(mut self, secs: u32) -> Self {
        self.profile_frequency_secs = secs.max(1);
        self
    }

    /// Submit jobs held until their directory exists
    pub fn with_hold(mut self, hold: bool) -> Self {
        self.hold = hold;
        self
    }

    /// Resolve resources and render the descriptor
    pub fn build(
        &self,
        definition: &BenchmarkDefinition,
        request: &RunRequest,
    ) -> Result<SubmissionDescriptor> {
        let resources = merge_resources(&definition.resources, request);
        validate(definition, &resources)?;

        let mut environment = BTreeMap::new();
        environment.insert("BENCHWRAP_BENCHMARK".to_string(), definition.name.clone());
        environment.insert(
            "BENCHWRAP_JOB_ROOT".to_string(),
            self.job_root.display().to_string(),
        );
        check_exportable(&definition.name, &environment)?;

        Ok(SubmissionDescriptor {
            benchmark: definition.name.clone(),
            job_name: format!("benchwrap-{}", definition.name),
            script: definition.script(),
            working_dir: definition.template_dir.clone(),
            resources,
            energy_profiling: request.energy_profiling,
            profile_frequency_secs: self.profile_frequency_secs,
            job_root: self.job_root.clone(),
            hold: self.hold,
            environment,
        })
    }
}

fn merge_resources(defaults: &ResourceRequest, request: &RunRequest) -> ResourceRequest {
    ResourceRequest {
        nodes: request.nodes.unwrap_or(defaults.nodes),
        ntasks: request.ntasks.unwrap_or(defaults.ntasks),
        cpus_per_task: request.cpus_per_task.unwrap_or(defaults.cpus_per_task),
        partition: request
            .partition
            .clone()
            .or_else(|| defaults.partition.clone()),
        time_limit_secs: request.time_limit_secs.or(defaults.time_limit_secs),
    }
}

fn validate(definition: &BenchmarkDefinition, resources: &ResourceRequest) -> Result<()> {
    let invalid = |reason: String| BenchwrapError::invalid_resources(&definition.name, reason);

    if resources.nodes == 0 {
        return Err(invalid("node count must be at least 1".into()));
    }
    if resources.ntasks == 0 {
        return Err(invalid("task count must be at least 1".into()));
    }
    if resources.cpus_per_task == 0 {
        return Err(invalid("cpus-per-task must be at least 1".into()));
    }
    if let Some(ref partition) = resources.partition {
        if partition.trim().is_empty() {
            return Err(invalid("partition name is empty".into()));
        }
    }
    if resources.time_limit_secs == Some(0) {
        return Err(invalid("time limit must be positive".into()));
    }

    if let Some(cores) = definition.cores_per_node {
        let capacity = resources.nodes as u64 * cores as u64;
        if resources.total_cpus() > capacity {
            return Err(invalid(format!(
                "{} tasks x {} cpus exceed {} nodes x {} cores",
                resources.ntasks, resources.cpus_per_task, resources.nodes, cores
            )));
        }
    }

    Ok(())
}

/// `--export` splits on commas, so a value containing one would be cut short
fn check_exportable(benchmark: &str, environment: &BTreeMap<String, String>) -> Result<()> {
    match environment.iter().find(|(_, value)| value.contains(',')) {
        Some((key, value)) => Err(BenchwrapError::invalid_resources(
            benchmark,
            format!("{} cannot be exported, it contains a comma: {}", key, value),
        )),
        None => Ok(()),
    }
}
