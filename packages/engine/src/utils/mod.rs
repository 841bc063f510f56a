// packages/engine/src/utils/mod.rs
//! Shared utilities: configuration loading and the engine error type.

pub mod config;
pub mod errors;

pub use config::{EngineConfig, LoggingConfig, SchedulerConfig};
pub use errors::{EngineError, Result};
