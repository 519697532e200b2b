//! Orchestration of one or many benchmark runs
//!
//! Registry -> spec builder -> gateway -> monitor -> telemetry -> metrics ->
//! run store. Each stage appends to the run record and never rewrites what
//! an earlier stage produced.

use crate::error::{BenchwrapError, Result};
use crate::metrics;
use crate::monitor::{
    CancelSignal, JobHandle, JobId, JobMonitor, MonitorObserver, MonitorPolicy, PollOutcome,
};
use crate::record::{RunRecord, RunRequest, RunStore};
use crate::registry::BenchmarkRegistry;
use crate::scheduler::SchedulerGateway;
use crate::spec::SpecBuilder;
use crate::telemetry::{ProfileConverter, TelemetryCollector};
use chrono::Utc;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Runs benchmarks end to end
pub struct Pipeline {
    registry: Arc<BenchmarkRegistry>,
    builder: SpecBuilder,
    gateway: Arc<dyn SchedulerGateway>,
    monitor: JobMonitor,
    collector: TelemetryCollector,
    store: RunStore,
}

impl Pipeline {
    /// Assemble a pipeline writing job output under `job_root`
    pub fn new(
        registry: Arc<BenchmarkRegistry>,
        gateway: Arc<dyn SchedulerGateway>,
        converter: Arc<dyn ProfileConverter>,
        policy: MonitorPolicy,
        job_root: impl Into<PathBuf>,
    ) -> Self {
        let job_root = job_root.into();
        Self {
            registry,
            builder: SpecBuilder::new(&job_root),
            monitor: JobMonitor::new(Arc::clone(&gateway), policy),
            collector: TelemetryCollector::new(Arc::clone(&gateway), converter, &job_root),
            store: RunStore::new(&job_root),
            gateway,
        }
    }

    /// Replace the spec builder (profile frequency, hold)
    pub fn with_spec_builder(mut self, builder: SpecBuilder) -> Self {
        self.builder = builder;
        self
    }

    /// Report monitor events to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn MonitorObserver>) -> Self {
        self.monitor = self.monitor.with_observer(observer);
        self
    }

    /// Timeline artifact pattern (`{job_id}` is substituted)
    pub fn with_timeline_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.collector = self.collector.with_timeline_pattern(pattern);
        self
    }

    /// Where records are persisted
    pub fn store(&self) -> &RunStore {
        &self.store
    }

    /// Monitor shared by every run of this pipeline
    pub fn monitor(&self) -> &JobMonitor {
        &self.monitor
    }

    /// Resolve the benchmark and render its descriptor; nothing is submitted
    pub fn prepare(&self, request: RunRequest) -> Result<RunRecord> {
        let definition = self.registry.resolve(&request.benchmark)?;
        let descriptor = self.builder.build(&definition, &request)?;
        let mut record = RunRecord::new(request);
        record.attach_descriptor(descriptor)?;
        Ok(record)
    }

    /// Submit a prepared record
    pub async fn submit(&self, record: &mut RunRecord) -> Result<()> {
        let descriptor = record
            .descriptor()
            .ok_or_else(|| BenchwrapError::Record("run has no submission descriptor".into()))?;
        let job_id = self.gateway.submit(descriptor).await?;
        info!(
            "Job {} submitted to {} for {}",
            job_id,
            self.gateway.name(),
            descriptor.benchmark
        );

        record.attach_handle(JobHandle::submitted(job_id, Utc::now()))?;
        self.store.persist(record)?;
        Ok(())
    }

    /// Track a submitted record to a terminal state
    ///
    /// On `SchedulerUnavailable` the partial record is persisted before the
    /// error is returned.
    pub async fn track(&self, record: &mut RunRecord, cancel: &mut CancelSignal) -> Result<()> {
        let handle = record
            .handle_mut()
            .ok_or_else(|| BenchwrapError::Record("run has not been submitted".into()))?;
        let tracked = self.monitor.track(handle, cancel).await;

        if let Err(e) = self.store.persist(record) {
            warn!("Could not persist run record: {}", e);
        }
        if let Err(ref e) = tracked {
            error!("Tracking stopped: {}", e);
        }
        tracked
    }

    /// Collect telemetry, derive metrics and persist
    pub async fn finish(&self, record: &mut RunRecord) -> Result<()> {
        let handle = record
            .handle()
            .ok_or_else(|| BenchwrapError::Record("run has not been submitted".into()))?;
        let bundle = self
            .collector
            .collect(handle, record.request().energy_profiling)
            .await?;
        record.attach_telemetry(bundle)?;

        let derived = metrics::compute(
            record.accounting(),
            record.timeline(),
            record.request().throughput,
        );
        record.attach_metrics(derived)?;

        let dir = self.store.persist(record)?;
        info!(
            "Run of {} finished with {} warnings, stored in {:?}",
            record.request().benchmark,
            record.warnings().len(),
            dir
        );
        Ok(())
    }

    /// Load a previously submitted run
    pub fn load(&self, job_id: &JobId) -> Result<RunRecord> {
        self.store.load(job_id)
    }

    /// Poll the scheduler once for a stored run and persist the result
    pub async fn refresh(&self, record: &mut RunRecord) -> Result<PollOutcome> {
        let handle = record
            .handle_mut()
            .ok_or_else(|| BenchwrapError::Record("run has not been submitted".into()))?;
        let outcome = self.monitor.poll_once(handle).await?;
        self.store.persist(record)?;
        Ok(outcome)
    }

    /// Request cancellation of a run; a terminal run is left untouched
    pub async fn cancel(&self, record: &mut RunRecord) -> Result<PollOutcome> {
        let handle = record
            .handle_mut()
            .ok_or_else(|| BenchwrapError::Record("run has not been submitted".into()))?;
        let outcome = self.monitor.cancel(handle).await?;
        if outcome != PollOutcome::AlreadyTerminal {
            self.store.persist(record)?;
        }
        Ok(outcome)
    }

    /// Run one benchmark through every stage
    pub async fn run(&self, request: RunRequest, mut cancel: CancelSignal) -> Result<RunRecord> {
        let mut record = self.prepare(request)?;
        self.submit(&mut record).await?;
        self.track(&mut record, &mut cancel).await?;
        self.finish(&mut record).await?;
        Ok(record)
    }

    /// Run many benchmarks concurrently; results follow input order
    pub async fn run_all(
        &self,
        requests: Vec<RunRequest>,
        cancel: CancelSignal,
    ) -> Vec<Result<RunRecord>> {
        let runs = requests
            .into_iter()
            .map(|request| self.run(request, cancel.clone()));
        join_all(runs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{cancel_pair, JobId, JobState};
    use crate::record::{DataSource, RECORD_FILE};
    use crate::registry::{BenchmarkManifest, LAUNCH_SCRIPT};
    use crate::scheduler::fake::{FakeScheduler, FakeStatus};
    use crate::spec::ResourceRequest;
    use async_trait::async_trait;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    struct NoProfile;

    #[async_trait]
    impl ProfileConverter for NoProfile {
        async fn convert(&self, _job_id: &JobId, _output: &Path) -> Result<()> {
            Err(BenchwrapError::Telemetry("sh5util: no profile data".into()))
        }
    }

    struct Fixture {
        _storage: TempDir,
        _sources: TempDir,
        job_root: PathBuf,
        registry: Arc<BenchmarkRegistry>,
    }

    fn fixture(names: &[&str]) -> Fixture {
        let storage = TempDir::new().unwrap();
        let sources = TempDir::new().unwrap();
        let registry = BenchmarkRegistry::load(storage.path()).unwrap();
        for name in names {
            let dir = sources.path().join(name);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(LAUNCH_SCRIPT), "#!/bin/bash\n").unwrap();
            let manifest = BenchmarkManifest {
                resources: ResourceRequest {
                    ntasks: 4,
                    ..Default::default()
                },
                cores_per_node: Some(8),
                description: None,
            };
            registry.add(&dir, Some(manifest)).unwrap();
        }
        Fixture {
            job_root: storage.path().join("jobs"),
            registry: Arc::new(registry),
            _storage: storage,
            _sources: sources,
        }
    }

    fn policy() -> MonitorPolicy {
        MonitorPolicy {
            min_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            jitter: 0.1,
            wall_time_ceiling: Some(Duration::from_secs(30)),
            max_unreachable: 4,
            ..Default::default()
        }
    }

    fn pipeline(fx: &Fixture, fake: &Arc<FakeScheduler>) -> Pipeline {
        Pipeline::new(
            Arc::clone(&fx.registry),
            fake.clone(),
            Arc::new(NoProfile),
            policy(),
            &fx.job_root,
        )
    }

    #[tokio::test]
    async fn test_full_run_with_accounting() {
        let fx = fixture(&["mem_bandwidth"]);
        let fake = Arc::new(
            FakeScheduler::new()
                .with_statuses(vec![
                    FakeStatus::Listed(JobState::Pending),
                    FakeStatus::Listed(JobState::Running),
                    FakeStatus::NotListed,
                ])
                .then_always(FakeStatus::NotListed)
                .with_accounting("{id}|COMPLETED|0:0|00:15:23|01:00:00|2.4G|125.6K|125600\n"),
        );
        let pipeline = pipeline(&fx, &fake);

        let record = pipeline
            .run(RunRequest::new("mem").with_throughput(1000.0), CancelSignal::never())
            .await
            .unwrap();

        let handle = record.handle().unwrap();
        assert_eq!(handle.state(), JobState::Completed);
        assert_eq!(handle.exit_code(), Some(0));
        let metrics = record.metrics().unwrap();
        assert_eq!(metrics.time_to_solution_s, Some(923.0));
        assert_eq!(metrics.energy_to_solution_j, Some(125_600.0));
        assert!((metrics.average_power_w.unwrap() - 136.07).abs() < 0.01);
        assert!(metrics.performance_per_watt.is_some());
        assert_eq!(metrics.peak_power_w, None);

        // Profile conversion failed, so only a profile warning
        let sources: Vec<DataSource> = record.warnings().iter().map(|w| w.source).collect();
        assert_eq!(sources, vec![DataSource::Profile]);

        let loaded = pipeline.store().load(handle.job_id()).unwrap();
        assert_eq!(loaded.metrics(), record.metrics());
        assert!(fx.job_root.join("job_1000/accounting.txt").is_file());
    }

    #[tokio::test]
    async fn test_timeline_only_metrics() {
        let fx = fixture(&["stream"]);
        let fake = Arc::new(FakeScheduler::new().then_always(FakeStatus::Listed(JobState::Completed)));
        let pipeline = pipeline(&fx, &fake);

        let mut record = pipeline
            .prepare(RunRequest::new("stream").with_energy_profiling(false))
            .unwrap();
        pipeline.submit(&mut record).await.unwrap();
        let job_dir = fx.job_root.join("job_1000");
        fs::write(job_dir.join("timeline_1000.csv"), "time,power\n0,10\n1,20\n2,10\n").unwrap();

        pipeline.track(&mut record, &mut CancelSignal::never()).await.unwrap();
        pipeline.finish(&mut record).await.unwrap();

        let metrics = record.metrics().unwrap();
        assert_eq!(metrics.time_to_solution_s, Some(2.0));
        assert_eq!(metrics.energy_to_solution_j, Some(30.0));
        assert_eq!(metrics.average_power_w, Some(15.0));
        assert_eq!(metrics.peak_power_w, Some(20.0));
        // Accounting was missing
        assert_eq!(record.warnings().len(), 1);
        assert_eq!(record.warnings()[0].source, DataSource::Accounting);

        // Finishing twice would rewrite collected data
        assert!(matches!(
            pipeline.finish(&mut record).await,
            Err(BenchwrapError::RecordFieldAlreadySet(_))
        ));
    }

    #[tokio::test]
    async fn test_caller_errors_abort_before_submission() {
        let fx = fixture(&["flops_a", "flops_b"]);
        let fake = Arc::new(FakeScheduler::new());
        let pipeline = pipeline(&fx, &fake);

        let requests = [
            RunRequest::new("hpl"),
            RunRequest::new("flops"),
            RunRequest::new("flops_a").with_ntasks(64),
            RunRequest::new("flops_a").with_partition(""),
        ];
        for request in requests {
            let err = pipeline.run(request, CancelSignal::never()).await.unwrap_err();
            assert!(err.is_caller_error(), "unexpected {:?}", err);
        }
        assert_eq!(FakeScheduler::calls(&fake.submit_calls), 0);
        assert!(!fx.job_root.exists());
    }

    #[tokio::test]
    async fn test_submission_failure() {
        let fx = fixture(&["stream"]);
        let fake = Arc::new(FakeScheduler::new().with_submit_error("invalid partition"));
        let pipeline = pipeline(&fx, &fake);

        let err = pipeline
            .run(RunRequest::new("stream"), CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, BenchwrapError::Submission(_)));
        assert_eq!(FakeScheduler::calls(&fake.status_calls), 0);
    }

    #[tokio::test]
    async fn test_scheduler_unavailable_persists_partial_record() {
        let fx = fixture(&["stream"]);
        let fake = Arc::new(
            FakeScheduler::new()
                .with_statuses(vec![FakeStatus::Listed(JobState::Running)])
                .then_always(FakeStatus::Unreachable),
        );
        let pipeline = pipeline(&fx, &fake);

        let err = pipeline
            .run(RunRequest::new("stream"), CancelSignal::never())
            .await
            .unwrap_err();
        let last_known = match err {
            BenchwrapError::SchedulerUnavailable { last_known, .. } => last_known,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(last_known.state(), JobState::Running);

        let persisted = pipeline.store().load(last_known.job_id()).unwrap();
        assert_eq!(persisted.handle().unwrap().state(), JobState::Running);
        assert!(persisted.metrics().is_none());
        assert!(!persisted.telemetry_collected());
    }

    #[tokio::test]
    async fn test_cancellation() {
        let fx = fixture(&["stream"]);
        let fake = Arc::new(FakeScheduler::new().then_always(FakeStatus::Listed(JobState::Running)));
        let pipeline = pipeline(&fx, &fake);
        let (cancel, signal) = cancel_pair();
        cancel.cancel();

        let record = pipeline.run(RunRequest::new("stream"), signal).await.unwrap();
        assert_eq!(record.handle().unwrap().state(), JobState::Cancelled);
        assert_eq!(FakeScheduler::calls(&fake.cancel_calls), 1);
        assert!(record.metrics().is_some());
    }

    #[tokio::test]
    async fn test_run_all_keeps_input_order() {
        let fx = fixture(&["hpl", "stream"]);
        let fake = Arc::new(
            FakeScheduler::new()
                .with_statuses(vec![
                    FakeStatus::Listed(JobState::Running),
                    FakeStatus::Listed(JobState::Running),
                    FakeStatus::Listed(JobState::Running),
                ])
                .then_always(FakeStatus::Listed(JobState::Completed)),
        );
        let pipeline = pipeline(&fx, &fake);

        let results = pipeline
            .run_all(
                vec![
                    RunRequest::new("stream"),
                    RunRequest::new("missing"),
                    RunRequest::new("hpl"),
                ],
                CancelSignal::never(),
            )
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().request().benchmark, "stream");
        assert!(matches!(results[1], Err(BenchwrapError::NotFound(_))));
        assert_eq!(results[2].as_ref().unwrap().request().benchmark, "hpl");
        assert_eq!(pipeline.store().list().unwrap().len(), 2);
        for id in ["1000", "1001"] {
            assert!(fx.job_root.join(format!("job_{}", id)).join(RECORD_FILE).is_file());
        }
    }

    #[tokio::test]
    async fn test_refresh_and_cancel_stored_run() {
        let fx = fixture(&["stream"]);
        let fake = Arc::new(
            FakeScheduler::new()
                .with_statuses(vec![FakeStatus::Listed(JobState::Running)])
                .then_always(FakeStatus::Listed(JobState::Running)),
        );
        let pipeline = pipeline(&fx, &fake);

        let mut record = pipeline.prepare(RunRequest::new("stream")).unwrap();
        pipeline.submit(&mut record).await.unwrap();
        let job_id = record.handle().unwrap().job_id().clone();

        let mut stored = pipeline.load(&job_id).unwrap();
        let outcome = pipeline.refresh(&mut stored).await.unwrap();
        assert!(matches!(outcome, PollOutcome::Transitioned { to: JobState::Running, .. }));
        assert_eq!(
            pipeline.load(&job_id).unwrap().handle().unwrap().state(),
            JobState::Running
        );

        let outcome = pipeline.cancel(&mut stored).await.unwrap();
        assert!(matches!(outcome, PollOutcome::Transitioned { to: JobState::Cancelled, .. }));
        let mut stored = pipeline.load(&job_id).unwrap();
        assert_eq!(stored.handle().unwrap().state(), JobState::Cancelled);

        // Second cancel is a no-op
        let outcome = pipeline.cancel(&mut stored).await.unwrap();
        assert_eq!(outcome, PollOutcome::AlreadyTerminal);
        assert_eq!(FakeScheduler::calls(&fake.cancel_calls), 1);
    }

    #[tokio::test]
    async fn test_refresh_unsubmitted_run() {
        let fx = fixture(&["stream"]);
        let fake = Arc::new(FakeScheduler::new());
        let pipeline = pipeline(&fx, &fake);

        let mut record = pipeline.prepare(RunRequest::new("stream")).unwrap();
        assert!(matches!(
            pipeline.refresh(&mut record).await,
            Err(BenchwrapError::Record(_))
        ));
        assert!(matches!(
            pipeline.load(&JobId::new("4242")),
            Err(BenchwrapError::NotFound(_))
        ));
    }
}
