//! Job spec builder module
//!
//! Turns a benchmark definition plus a run request into a submission
//! descriptor for the scheduler gateway.

mod builder;
mod resources;

pub use builder::*;
pub use resources::*;
