//! Benchmark registry
//!
//! Each benchmark is a directory under `<storage_root>/benchmarks/` holding a
//! `job_start.sh` launch script and an optional `benchmark.json` manifest.

mod catalog;
mod definition;

pub use catalog::*;
pub use definition::*;
