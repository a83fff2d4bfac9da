//! Configuration loading for the tracker importer
//!
//! Resolution priority for every setting:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing TOML file is not an error: defaults are used and a warning is logged.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// Environment variable overriding the database path
pub const ENV_DATABASE_PATH: &str = "TRACKER_DATABASE_PATH";
/// Environment variable overriding the log level
pub const ENV_LOG_LEVEL: &str = "TRACKER_LOG_LEVEL";
/// Environment variable overriding the preheat failure policy
pub const ENV_PREHEAT_POLICY: &str = "TRACKER_PREHEAT_POLICY";

/// What preheat does when a supplier cannot load its data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreheatFailurePolicy {
    /// Abort preheat on the first supplier error
    FailFast,
    /// Log the error and continue with a partially populated cache
    #[default]
    BestEffort,
}

impl FromStr for PreheatFailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-fast" | "fail_fast" | "failfast" => Ok(Self::FailFast),
            "best-effort" | "best_effort" | "besteffort" => Ok(Self::BestEffort),
            other => Err(Error::Config(format!(
                "Unknown preheat failure policy '{}' (expected 'fail-fast' or 'best-effort')",
                other
            ))),
        }
    }
}

impl fmt::Display for PreheatFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailFast => write!(f, "fail-fast"),
            Self::BestEffort => write!(f, "best-effort"),
        }
    }
}

/// Logging section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level filter (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Preheat section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreheatConfig {
    pub failure_policy: PreheatFailurePolicy,
}

/// Database section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Maximum time to keep retrying a read that hits "database is locked"
    pub max_lock_wait_ms: u64,
    /// Connection pool size
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_lock_wait_ms: 5000,
            max_connections: 10,
        }
    }
}

/// Importer configuration as stored in `import.toml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub database_path: PathBuf,
    pub logging: LoggingConfig,
    pub preheat: PreheatConfig,
    pub database: DatabaseConfig,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            logging: LoggingConfig::default(),
            preheat: PreheatConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl ImportConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load configuration from an explicit file, or the default location
    ///
    /// Environment overrides are applied on top of whatever the file provides.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let path = match config_file {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_file(),
        };

        let mut config = match path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
                info!("Loaded configuration from {}", path.display());
                Self::from_toml_str(&content)?
            }
            Some(path) => {
                warn!(
                    "Config file {} not found, using compiled defaults",
                    path.display()
                );
                Self::default()
            }
            None => {
                warn!("Could not determine config directory, using compiled defaults");
                Self::default()
            }
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `TRACKER_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var(ENV_DATABASE_PATH) {
            if !path.trim().is_empty() {
                self.database_path = PathBuf::from(path);
            }
        }
        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            if !level.trim().is_empty() {
                self.logging.level = level;
            }
        }
        if let Ok(policy) = std::env::var(ENV_PREHEAT_POLICY) {
            self.preheat.failure_policy = policy.parse()?;
        }
        Ok(())
    }

    /// Apply command-line values, which win over everything else
    pub fn apply_cli_overrides(
        &mut self,
        database_path: Option<&Path>,
        failure_policy: Option<PreheatFailurePolicy>,
    ) {
        if let Some(path) = database_path {
            self.database_path = path.to_path_buf();
        }
        if let Some(policy) = failure_policy {
            self.preheat.failure_policy = policy;
        }
    }
}

/// Default configuration file: `<config_dir>/tracker/import.toml`
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tracker").join("import.toml"))
}

/// OS-dependent default database location
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tracker").join("tracker.db"))
        .unwrap_or_else(|| PathBuf::from("./tracker_data/tracker.db"))
}
