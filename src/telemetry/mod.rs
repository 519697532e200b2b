//! Telemetry extraction for finished jobs
//!
//! Three loosely synchronized sources: scheduler accounting, the profiling
//! converter's energy series and the hardware-counter timeline. Any of them
//! may be missing; the collector degrades to warnings instead of failing.

mod accounting;
mod collector;
mod profile;
mod table;
mod timeline;

pub use accounting::*;
pub use collector::*;
pub use profile::*;
pub use timeline::*;
