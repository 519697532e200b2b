//! Progress reporting module
//!
//! Renders monitor events as terminal spinners, one per tracked job.

mod reporter;

pub use reporter::*;
