//! Configuration
//!
//! Layered with the `config` crate, lowest precedence first: serde defaults, a TOML
//! file (explicit path, or the user config dir), then `SCAFFOLD_*` environment
//! variables with `__` between nesting levels, e.g. `SCAFFOLD_COORDINATOR__MAX_CONCURRENCY=8`.

use crate::cache::CacheConfig;
use crate::coordinator::CoordinatorConfig;
use crate::error::ScaffoldError;
use crate::logging::LoggingConfig;
use crate::recovery::RecoveryConfig;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScaffoldConfig {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Coordinator(String),
    Cache(String),
    Recovery(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Coordinator(msg) => write!(f, "Coordinator: {}", msg),
            ValidationError::Cache(msg) => write!(f, "Cache: {}", msg),
            ValidationError::Recovery(msg) => write!(f, "Recovery: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl ScaffoldConfig {
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.coordinator.max_concurrency == 0 {
            errors.push(ValidationError::Coordinator("max_concurrency must be at least 1".into()));
        }
        if self.coordinator.max_retry_attempts == 0 {
            errors.push(ValidationError::Coordinator("max_retry_attempts must be at least 1".into()));
        }
        if self.cache.max_size == 0 {
            errors.push(ValidationError::Cache("max_size must be at least 1".into()));
        }
        let fraction = self.cache.eviction_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            errors.push(ValidationError::Cache(format!(
                "eviction_fraction must be in (0, 1], got {}",
                fraction
            )));
        }
        if self.recovery.max_history == 0 {
            errors.push(ValidationError::Recovery("max_history must be at least 1".into()));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// User-level config file: `<config dir>/scaffold/config.toml`
pub fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "scaffold").map(|dirs| dirs.config_dir().join("config.toml"))
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration. An explicit `path` must exist; the global file is optional.
    pub fn load(path: Option<&Path>) -> Result<ScaffoldConfig, ScaffoldError> {
        let mut builder = Config::builder();

        match path {
            Some(path) => {
                debug!(config_path = %path.display(), "Loading configuration file");
                builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
            }
            None => {
                if let Some(global) = global_config_path().filter(|p| p.exists()) {
                    debug!(config_path = %global.display(), "Loading global configuration file");
                    builder = builder.add_source(File::from(global).format(FileFormat::Toml).required(false));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SCAFFOLD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: ScaffoldConfig = builder.build()?.try_deserialize()?;
        config.validate().map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            ScaffoldError::Config(format!("Configuration validation failed:\n{}", messages.join("\n")))
        })?;
        Ok(config)
    }
}
