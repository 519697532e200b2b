//! Configuration module for Benchwrap
//!
//! Provides configuration management including CLI arguments,
//! the JSON config file, and runtime settings.

mod settings;

pub use settings::*;
