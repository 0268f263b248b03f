//! Application configuration loaded from TOML.
//!
//! # Invariants
//! - Every field has a default, so an empty file is a valid configuration.
//! - `validate()` runs on every load path; invalid values never reach callers.
//!
//! Example:
//!
//! ```toml
//! database_path = "/var/lib/docgraph/docgraph.sqlite3"
//!
//! [logging]
//! level = "info"
//! dir = "/var/log/docgraph"
//!
//! [messaging]
//! topic = "author-cascade"
//! poll_interval_ms = 250
//! max_attempts = 5
//! claim_lease_ms = 60000
//! ```

use crate::logging::{default_log_level, normalize_level};
use crate::messaging::Topic;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DATABASE_PATH: &str = "docgraph.sqlite3";
pub const DEFAULT_TOPIC: &str = "author-cascade";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_CLAIM_LEASE_MS: u64 = 60_000;

/// Errors from loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(toml::de::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub logging: LoggingConfig,
    pub messaging: MessagingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            logging: LoggingConfig::default(),
            messaging: MessagingConfig::default(),
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    /// Absolute directory for rolling log files; file logging is off when unset.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            dir: None,
        }
    }
}

/// `[messaging]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MessagingConfig {
    pub topic: String,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    /// How long a consumer's claim on a message lasts before redelivery.
    pub claim_lease_ms: u64,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            claim_lease_ms: DEFAULT_CLAIM_LEASE_MS,
        }
    }
}

impl MessagingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::from_millis(self.claim_lease_ms)
    }
}

impl AppConfig {
    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "database_path must not be empty".to_string(),
            ));
        }
        normalize_level(&self.logging.level)
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        if let Some(dir) = &self.logging.dir {
            if !dir.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "logging.dir must be an absolute path, got `{}`",
                    dir.display()
                )));
            }
        }
        Topic::new(&self.messaging.topic).map_err(|err| ConfigError::Invalid(err.to_string()))?;
        if self.messaging.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "messaging.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.messaging.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "messaging.max_attempts must be greater than zero".to_string(),
            ));
        }
        if self.messaging.claim_lease_ms == 0 {
            return Err(ConfigError::Invalid(
                "messaging.claim_lease_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
