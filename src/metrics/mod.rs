//! Metrics engine

mod engine;

pub use engine::*;
