use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Configuration for the paradigm engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub paths: PathsConfig,
    pub execution: ExecutionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Base directory file locations resolve against
    pub base_dir: PathBuf,
    /// Directory the default paradigm source reads blueprints from
    pub paradigm_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Upper bound on input combinations one actuation may run;
    /// exceeding it fails the inference before any combination executes
    pub max_combinations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json"
    pub format: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig {
                base_dir: PathBuf::from("."),
                paradigm_dir: PathBuf::from("paradigms"),
            },
            execution: ExecutionConfig {
                max_combinations: 256,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| EngineError::io(&path.display().to_string(), &e))?;
        let config: Self = toml::from_str(&text).map_err(|e| EngineError::ConfigurationError {
            reason: format!("{}: {e}", path.display()),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `ENGINE_*` environment variable overrides
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(base_dir) = env::var("ENGINE_BASE_DIR") {
            self.paths.base_dir = PathBuf::from(base_dir);
        }
        if let Ok(paradigm_dir) = env::var("ENGINE_PARADIGM_DIR") {
            self.paths.paradigm_dir = PathBuf::from(paradigm_dir);
        }
        if let Ok(level) = env::var("ENGINE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = env::var("ENGINE_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(max) = env::var("ENGINE_MAX_COMBINATIONS") {
            if let Ok(max) = max.parse() {
                self.execution.max_combinations = max;
            }
        }
        self
    }

    /// Check the configuration is internally consistent
    pub fn validate(&self) -> EngineResult<()> {
        if self.execution.max_combinations == 0 {
            return Err(EngineError::ConfigurationError {
                reason: "execution.max_combinations must be at least 1".to_string(),
            });
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(EngineError::ConfigurationError {
                reason: format!(
                    "logging.format must be 'pretty' or 'json', got '{}'",
                    self.logging.format
                ),
            });
        }
        Ok(())
    }
}
