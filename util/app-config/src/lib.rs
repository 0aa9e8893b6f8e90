//! Evochora application configuration.
//!
//! One TOML file describes a whole run: the simulated world, the seeded
//! programs, and the pipeline services behind it. Configuration is loaded
//! once at startup, validated eagerly, and immutable for the duration of the
//! run. Validation failures are fatal initialization errors.

mod configs;
mod exit_code;

pub use configs::{
    AppConfig, CompressionConfig, DBConfig, EnergyStrategyConfig, EnvironmentConfig,
    IndexerConfig, MemoryOptimizationConfig, OrganismSeedConfig, ParallelConfig,
    PersistenceConfig, PipelineConfig, QueueConfig, ServerConfig, SimulationConfig,
};
pub use exit_code::ExitCode;

use std::path::Path;
use thiserror::Error;

/// Errors raised while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for the expected schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value violates a startup rule.
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl AppConfig {
    /// Load and validate a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<AppConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural rules that must hold before any service starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let shape = &self.simulation.environment.shape;
        if shape.is_empty() {
            return Err(ConfigError::Invalid(
                "simulation.environment.shape must have at least one dimension".to_string(),
            ));
        }
        if shape.iter().any(|&d| d == 0) {
            return Err(ConfigError::Invalid(format!(
                "simulation.environment.shape contains a zero extent: {:?}",
                shape
            )));
        }
        if self.pipeline.persistence.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.persistence.batch_size must be positive".to_string(),
            ));
        }
        if self.pipeline.indexer.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.indexer.batch_size must be positive".to_string(),
            ));
        }
        if self.pipeline.queue.max_bytes == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.queue.max_bytes must be positive".to_string(),
            ));
        }
        for seed in &self.simulation.organisms {
            if seed.placement.len() != shape.len() {
                return Err(ConfigError::Invalid(format!(
                    "organism placement {:?} does not match world dimensionality {}",
                    seed.placement,
                    shape.len()
                )));
            }
        }
        Ok(())
    }
}
