// packages/engine/src/utils/config.rs
//! Engine configuration
//!
//! Layered with the `config` crate: built-in defaults, an optional
//! `troupe.toml` next to the working directory, then `TROUPE__`-prefixed
//! environment variables (`TROUPE__SCHEDULER__TURN_LIMIT=50`).

use crate::runtime::environment::ExecutionMode;
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Fallback worker count when hardware parallelism cannot be detected
pub const DEFAULT_WORKERS: usize = 8;

/// Top-level configuration for the engine binary and embedders
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

/// Scheduler parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of turns to run (0 = until no agent is left)
    pub turn_limit: u64,

    /// How agents are ordered and dispatched within a turn
    pub mode: ExecutionMode,

    /// Blocking pause after every turn, in milliseconds
    pub delay_after_turn_ms: u64,

    /// RNG seed for turn ordering; drawn from entropy when absent
    pub seed: Option<u64>,

    /// Worker threads for parallel mode; hardware parallelism when absent
    pub workers: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            turn_limit: 0,
            mode: ExecutionMode::Parallel,
            delay_after_turn_ms: 0,
            seed: None,
            workers: None,
        }
    }
}

impl SchedulerConfig {
    pub fn sequential() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_turn_limit(mut self, turn_limit: u64) -> Self {
        self.turn_limit = turn_limit;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_after_turn_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn delay_after_turn(&self) -> Duration {
        Duration::from_millis(self.delay_after_turn_ms)
    }

    /// Resolved worker count for the parallel pool
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(DEFAULT_WORKERS)
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == Some(0) {
            return Err(EngineError::ConfigError(
                "scheduler.workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Log output settings, consumed by [`crate::observability::init_tracing`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl EngineConfig {
    /// Load from `troupe.toml` (optional) and the environment
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("troupe").required(false))
            .add_source(Self::env_source())
            .build()?;
        Self::finish(settings)
    }

    /// Load from an explicit file, still honouring environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(Self::env_source())
            .build()?;
        Self::finish(settings)
    }

    fn env_source() -> config::Environment {
        config::Environment::with_prefix("TROUPE")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    fn finish(settings: config::Config) -> Result<Self> {
        let config: EngineConfig = settings.try_deserialize()?;
        config.scheduler.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.scheduler.turn_limit, 0);
        assert_eq!(config.scheduler.mode, ExecutionMode::Parallel);
        assert_eq!(config.scheduler.seed, None);
        assert_eq!(config.logging.level, "info");
        assert!(config.scheduler.worker_count() >= 1);
    }

    #[test]
    fn test_validation() {
        assert!(SchedulerConfig::default().validate().is_ok());

        let invalid = SchedulerConfig::default().with_workers(0);
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_builder_helpers() {
        let config = SchedulerConfig::sequential()
            .with_turn_limit(3)
            .with_seed(7)
            .with_delay(Duration::from_millis(25));

        assert_eq!(config.mode, ExecutionMode::Sequential);
        assert_eq!(config.turn_limit, 3);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.delay_after_turn(), Duration::from_millis(25));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[scheduler]\nturn_limit = 12\nmode = \"sequential_random\"\nseed = 42\nworkers = 2\n\n[logging]\njson = true"
        )
        .unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.scheduler.turn_limit, 12);
        assert_eq!(config.scheduler.mode, ExecutionMode::SequentialRandom);
        assert_eq!(config.scheduler.seed, Some(42));
        assert_eq!(config.scheduler.worker_count(), 2);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[scheduler]\nworkers = 0").unwrap();

        assert!(EngineConfig::from_file(file.path()).is_err());
    }
}
