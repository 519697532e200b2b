//! Job lifecycle tracking
//!
//! The monitor owns every state change of a `JobHandle`:
//! `SUBMITTED -> PENDING -> RUNNING -> {COMPLETED, FAILED, CANCELLED, TIMED_OUT}`.

#[allow(clippy::module_inception)]
mod monitor;
mod policy;
mod state;

pub use monitor::*;
pub use policy::*;
pub use state::*;
