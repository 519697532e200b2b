//! # Benchwrap - Energy-Aware Benchmarking on Slurm
//!
//! Benchwrap submits benchmark workloads to a Slurm cluster, tracks each job
//! to a terminal state and turns whatever telemetry the cluster produced
//! (accounting, energy profiles, hardware-counter timelines) into
//! energy-efficiency metrics.
//!
//! ## Features
//!
//! - **Benchmark Registry**: benchmark directories or single `.py` workloads
//! - **Job Spec Builder**: resource validation and `sbatch` directives
//! - **Job Monitor**: polling with exponential backoff, jitter and a wall-time ceiling
//! - **Telemetry**: `sacct` accounting, `sh5util` energy series, timeline parsing
//! - **Metrics**: energy to solution, average/peak power, EDP, performance per watt
//! - **Run Store**: one directory per job with the record and raw artifacts
//!
//! ## Quick Start
//!
//! ```no_run
//! use benchwrap::prelude::*;
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn demo() -> benchwrap::Result<()> {
//! let root = Path::new("/scratch/benchwrap");
//! let registry = Arc::new(BenchmarkRegistry::load(root)?);
//! let gateway = Arc::new(SlurmGateway::new(SlurmCommands::default(), Duration::from_secs(60)));
//! let converter = Arc::new(Sh5utilConverter::new("sh5util", Duration::from_secs(300)));
//!
//! let pipeline = Pipeline::new(
//!     registry,
//!     gateway,
//!     converter,
//!     MonitorPolicy::default(),
//!     root.join("jobs"),
//! );
//!
//! let request = RunRequest::new("mem_bandwidth").with_partition("scc-cpu");
//! let record = pipeline.run(request, CancelSignal::never()).await?;
//! if let Some(metrics) = record.metrics() {
//!     println!("Energy to solution: {:?} J", metrics.energy_to_solution_j);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Metrics From Stored Telemetry
//!
//! ```no_run
//! use benchwrap::metrics;
//! use benchwrap::telemetry::TimelineSeries;
//! use std::path::Path;
//!
//! let timeline = TimelineSeries::from_file(Path::new("timeline_1234.csv")).unwrap();
//! let derived = metrics::compute(None, Some(&timeline), None);
//! println!("Average power: {:?} W", derived.average_power_w);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod monitor;
pub mod pipeline;
pub mod progress;
pub mod record;
pub mod registry;
pub mod scheduler;
pub mod spec;
pub mod telemetry;

// Re-export commonly used types
pub use config::BenchwrapConfig;
pub use error::{BenchwrapError, Result};
pub use pipeline::Pipeline;
pub use progress::ProgressReporter;
pub use record::{RunRecord, RunRequest};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use benchwrap::prelude::*;
    //! ```

    pub use crate::config::BenchwrapConfig;
    pub use crate::error::{BenchwrapError, Result};
    pub use crate::metrics::{compute, DerivedMetrics};
    pub use crate::monitor::{
        cancel_pair, CancelHandle, CancelSignal, JobHandle, JobId, JobMonitor, JobState,
        MonitorPolicy,
    };
    pub use crate::pipeline::Pipeline;
    pub use crate::progress::ProgressReporter;
    pub use crate::record::{RunRecord, RunRequest, RunStore};
    pub use crate::registry::{BenchmarkDefinition, BenchmarkManifest, BenchmarkRegistry};
    pub use crate::scheduler::{SchedulerGateway, SlurmCommands, SlurmGateway};
    pub use crate::spec::{ResourceRequest, SpecBuilder, SubmissionDescriptor};
    pub use crate::telemetry::{
        AccountingRecord, ProfileConverter, Sh5utilConverter, TelemetryCollector, TimelineSeries,
    };
}
