//! Benchwrap CLI - Energy-Aware Benchmark Runner
//!
//! Submits registered benchmarks to Slurm and reports energy-efficiency
//! metrics for every finished job.

use anyhow::{bail, Context as _};
use benchwrap::config::{jobs_dir, BenchwrapConfig, CliArgs, Commands, OutputFormat, ResourceArgs};
use benchwrap::metrics::DerivedMetrics;
use benchwrap::monitor::{cancel_pair, JobId, JobState, MonitorObserver, PollOutcome};
use benchwrap::pipeline::Pipeline;
use benchwrap::progress::ProgressReporter;
use benchwrap::record::{RunRecord, RunRequest};
use benchwrap::registry::BenchmarkRegistry;
use benchwrap::scheduler::SlurmGateway;
use benchwrap::spec::{format_slurm_time, SpecBuilder};
use benchwrap::telemetry::Sh5utilConverter;
use clap::Parser;
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Upper bound on one sh5util conversion
const CONVERTER_TIMEOUT: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging(&args);

    if let Err(e) = run(args).await {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(args: &CliArgs) {
    let level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("benchwrap={}", level)));

    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Resolved settings shared by every subcommand
struct Context {
    config: BenchwrapConfig,
    storage_root: PathBuf,
    format: OutputFormat,
    quiet: bool,
}

impl Context {
    fn from_args(args: &CliArgs) -> anyhow::Result<Self> {
        let config = BenchwrapConfig::load(args.config.as_deref())?;
        let storage_root = config.resolve_storage_root(args.storage_root.as_deref())?;
        debug!("Storage root: {:?}", storage_root);
        Ok(Self {
            config,
            storage_root,
            format: args.output_format,
            quiet: args.quiet,
        })
    }

    fn registry(&self) -> anyhow::Result<BenchmarkRegistry> {
        BenchmarkRegistry::load(&self.storage_root)
            .with_context(|| format!("loading benchmarks under {:?}", self.storage_root))
    }

    fn pipeline(&self, observer: Option<Arc<dyn MonitorObserver>>) -> anyhow::Result<Pipeline> {
        let job_root = jobs_dir(&self.storage_root);
        let gateway = Arc::new(SlurmGateway::new(
            self.config.slurm.clone(),
            self.config.command_timeout,
        ));
        let converter = Arc::new(Sh5utilConverter::new(
            self.config.sh5util.clone(),
            CONVERTER_TIMEOUT,
        ));

        let mut pipeline = Pipeline::new(
            Arc::new(self.registry()?),
            gateway,
            converter,
            self.config.monitor.to_policy()?,
            &job_root,
        )
        .with_spec_builder(
            SpecBuilder::new(&job_root).with_profile_frequency(self.config.profile_frequency_secs),
        )
        .with_timeline_pattern(self.config.timeline_pattern.clone());

        if let Some(observer) = observer {
            pipeline = pipeline.with_observer(observer);
        }
        Ok(pipeline)
    }

    fn reporter(&self) -> Arc<ProgressReporter> {
        if self.quiet || self.format == OutputFormat::Json {
            Arc::new(ProgressReporter::disabled())
        } else {
            Arc::new(ProgressReporter::new())
        }
    }
}

async fn run(args: CliArgs) -> anyhow::Result<()> {
    let ctx = Context::from_args(&args)?;

    match args.command {
        Commands::List => cmd_list(&ctx),
        Commands::Add {
            source,
            resources,
            cores_per_node,
            description,
        } => cmd_add(&ctx, &source, &resources, cores_per_node, description),
        Commands::Run {
            benchmarks,
            resources,
            no_energy,
            throughput,
            detach,
        } => {
            let requests = benchmarks
                .iter()
                .map(|name| {
                    let mut request = resources.to_request(name).with_energy_profiling(!no_energy);
                    request.throughput = throughput;
                    request
                })
                .collect();
            cmd_run(&ctx, requests, detach).await
        }
        Commands::Status { job_id, wait } => cmd_status(&ctx, &job_id, wait).await,
        Commands::Cancel { job_id } => cmd_cancel(&ctx, &job_id).await,
        Commands::Show { job_id } => cmd_show(&ctx, job_id.as_deref()),
    }
}

fn cmd_list(ctx: &Context) -> anyhow::Result<()> {
    let definitions = ctx.registry()?.list();

    if ctx.format == OutputFormat::Json {
        let rows: Vec<_> = definitions
            .iter()
            .map(|def| {
                serde_json::json!({
                    "name": def.name,
                    "path": def.template_dir,
                    "resources": def.resources,
                    "cores_per_node": def.cores_per_node,
                    "description": def.description,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if definitions.is_empty() {
        println!("No benchmarks registered under {:?}", ctx.storage_root);
        return Ok(());
    }

    println!(
        "{:<24} {:>5} {:>6} {:>5} {:>10}  {:<12} {}",
        "NAME", "NODES", "TASKS", "CPUS", "TIME", "PARTITION", "DESCRIPTION"
    );
    for def in &definitions {
        let res = &def.resources;
        println!(
            "{:<24} {:>5} {:>6} {:>5} {:>10}  {:<12} {}",
            def.name,
            res.nodes,
            res.ntasks,
            res.cpus_per_task,
            res.time_limit_secs.map(format_slurm_time).unwrap_or_else(|| "-".into()),
            res.partition.as_deref().unwrap_or("-"),
            def.description.as_deref().unwrap_or(""),
        );
    }
    Ok(())
}

fn cmd_add(
    ctx: &Context,
    source: &Path,
    resources: &ResourceArgs,
    cores_per_node: Option<u32>,
    description: Option<String>,
) -> anyhow::Result<()> {
    let has_overrides = resources.partition.is_some()
        || resources.nodes.is_some()
        || resources.ntasks.is_some()
        || resources.cpus_per_task.is_some()
        || resources.time_limit.is_some()
        || cores_per_node.is_some()
        || description.is_some();
    let manifest = has_overrides.then(|| resources.to_manifest(cores_per_node, description));

    let def = ctx.registry()?.add(source, manifest)?;
    if !ctx.quiet {
        println!(
            "{} Registered {} at {:?}",
            style("✓").green(),
            style(&def.name).bold(),
            def.template_dir
        );
    }
    Ok(())
}

async fn cmd_run(ctx: &Context, requests: Vec<RunRequest>, detach: bool) -> anyhow::Result<()> {
    if detach {
        let pipeline = ctx.pipeline(None)?;
        for request in requests {
            let mut record = pipeline.prepare(request)?;
            pipeline.submit(&mut record).await?;
            if let Some(handle) = record.handle() {
                println!("{} {}", record.request().benchmark, handle.job_id());
            }
        }
        return Ok(());
    }

    let reporter = ctx.reporter();
    let observer: Arc<dyn MonitorObserver> = reporter.clone();
    let pipeline = ctx.pipeline(Some(observer))?;

    let (cancel, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling submitted jobs");
            cancel.cancel();
        }
    });

    let total = requests.len();
    let results = pipeline.run_all(requests, signal).await;

    let mut failed = 0;
    let mut records = Vec::new();
    for result in results {
        match result {
            Ok(record) => {
                let completed = record
                    .handle()
                    .map(|h| h.state() == JobState::Completed)
                    .unwrap_or(false);
                if !completed {
                    failed += 1;
                }
                records.push(record);
            }
            Err(e) => {
                failed += 1;
                eprintln!("{} {:#}", style("Run failed:").red(), e);
            }
        }
    }

    match ctx.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        OutputFormat::Text => {
            for record in &records {
                println!();
                print_record(record);
            }
            if !ctx.quiet && reporter.is_enabled() {
                println!();
                reporter.summary().print();
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} runs did not complete", failed, total);
    }
    Ok(())
}

async fn cmd_status(ctx: &Context, job_id: &str, wait: bool) -> anyhow::Result<()> {
    let reporter = ctx.reporter();
    let observer: Option<Arc<dyn MonitorObserver>> = if wait {
        Some(reporter as Arc<dyn MonitorObserver>)
    } else {
        None
    };
    let pipeline = ctx.pipeline(observer)?;
    let mut record = pipeline.load(&JobId::new(job_id))?;

    if wait {
        let (cancel, mut signal) = cancel_pair();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
        pipeline.track(&mut record, &mut signal).await?;
        if !record.telemetry_collected() {
            pipeline.finish(&mut record).await?;
        }
    } else {
        let outcome = pipeline.refresh(&mut record).await?;
        if let PollOutcome::Transitioned { from, to } = outcome {
            debug!("Job {}: {} -> {}", job_id, from, to);
        }
    }

    output_record(ctx, &record)
}

async fn cmd_cancel(ctx: &Context, job_id: &str) -> anyhow::Result<()> {
    let pipeline = ctx.pipeline(None)?;
    let mut record = pipeline.load(&JobId::new(job_id))?;

    match pipeline.cancel(&mut record).await? {
        PollOutcome::AlreadyTerminal => {
            let state = record.handle().map(|h| h.state().name()).unwrap_or("unknown");
            println!("Job {} already finished ({})", job_id, state);
        }
        _ => {
            let state = record.handle().map(|h| h.state()).unwrap_or(JobState::Submitted);
            if state == JobState::Cancelled {
                println!("{} Job {} cancelled", style("✓").green(), job_id);
            } else {
                println!(
                    "Cancellation requested for job {}; scheduler still reports {}",
                    job_id, state
                );
            }
        }
    }
    Ok(())
}

fn cmd_show(ctx: &Context, job_id: Option<&str>) -> anyhow::Result<()> {
    let pipeline = ctx.pipeline(None)?;

    let Some(job_id) = job_id else {
        let ids = pipeline.store().list()?;
        if ids.is_empty() {
            println!("No runs stored under {:?}", pipeline.store().job_root());
            return Ok(());
        }
        println!("{:<10} {:<24} {:<10} {}", "JOB", "BENCHMARK", "STATE", "SUBMITTED");
        for id in ids {
            match pipeline.load(&id) {
                Ok(record) => {
                    let (state, submitted) = record
                        .handle()
                        .map(|h| (h.state().name(), h.submitted_at().to_rfc3339()))
                        .unwrap_or(("-", String::new()));
                    println!(
                        "{:<10} {:<24} {:<10} {}",
                        id,
                        record.request().benchmark,
                        state,
                        submitted
                    );
                }
                Err(e) => warn!("Skipping job {}: {}", id, e),
            }
        }
        return Ok(());
    };

    let record = pipeline.load(&JobId::new(job_id))?;
    output_record(ctx, &record)
}

fn output_record(ctx: &Context, record: &RunRecord) -> anyhow::Result<()> {
    match ctx.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(record)?),
        OutputFormat::Text => print_record(record),
    }
    Ok(())
}

fn print_record(record: &RunRecord) {
    let request = record.request();
    println!("=== {} ===", style(&request.benchmark).bold());

    if let Some(handle) = record.handle() {
        println!("Job:          {}", handle.job_id());
        println!("State:        {}", handle.state());
        if let Some(code) = handle.exit_code() {
            println!("Exit code:    {}", code);
        }
        println!("Submitted:    {}", handle.submitted_at().to_rfc3339());
        if let Some(last) = handle.transitions().last() {
            println!("Last change:  {} ({:?})", last.at.to_rfc3339(), last.cause);
        }
    }

    if let Some(accounting) = record.accounting() {
        if accounting.truncated {
            println!("{}", style("Job hit its time limit; results are truncated").yellow());
        }
        if let Some(freq) = accounting.avg_cpu_freq_khz {
            println!("Avg CPU freq: {:.0} kHz", freq);
        }
    }

    if let Some(metrics) = record.metrics() {
        print_metrics(metrics);
    }

    for warning in record.warnings() {
        println!("{} {}", style("warning:").yellow(), warning);
    }
}

fn print_metrics(metrics: &DerivedMetrics) {
    fn line(label: &str, value: Option<f64>, unit: &str) {
        match value {
            Some(v) => println!("{:<14}{:.3} {}", label, v, unit),
            None => println!("{:<14}{}", label, style("n/a").dim()),
        }
    }

    println!();
    line("Time:", metrics.time_to_solution_s, "s");
    line("Energy:", metrics.energy_to_solution_j, "J");
    line("Avg power:", metrics.average_power_w, "W");
    line("Peak power:", metrics.peak_power_w, "W");
    line("EDP:", metrics.energy_delay_product, "J*s");
    line("Perf/W:", metrics.performance_per_watt, "units/J");
}
