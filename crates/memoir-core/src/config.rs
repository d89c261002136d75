//! Configuration system for Memoir.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading/validation error.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(#[from] figment::Error),

    #[error("Configuration validation failed:\n  {0}")]
    Invalid(String),
}

/// Main configuration struct for Memoir.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Storage settings
    pub storage: StorageConfig,
    /// Message cache settings
    pub cache: CacheConfig,
    /// Context recovery tuning
    pub recovery: RecoveryTuning,
    /// Write deduplication settings
    pub dedup: DedupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for session data; defaults to the platform data dir.
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache entry time-to-live in seconds
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryTuning {
    /// Fraction of the token limit at which compression is triggered
    pub compression_threshold: f64,
    /// Fraction of the token limit the sliding-window fallback targets
    pub window_fraction: f64,
}

impl Default for RecoveryTuning {
    fn default() -> Self {
        Self {
            compression_threshold: 0.8,
            window_fraction: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Window in seconds within which equal-content messages are duplicates
    pub window_secs: i64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { window_secs: 5 }
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self
            .issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Error)
    }

    /// Get only error-level issues.
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Error)
            .collect()
    }

    /// Get only warning-level issues.
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warning)
            .collect()
    }

    fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue
    pub severity: IssueSeverity,
    /// Field path (e.g., "recovery.compression_threshold")
    pub field: String,
    /// Human-readable message
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

impl Config {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        let config_dir = Self::config_dir();

        Figment::new()
            // Default values
            .merge(figment::providers::Serialized::defaults(Config::default()))
            // User config
            .merge(Toml::file(config_dir.join("config.toml")))
            // Environment variables
            .merge(Env::prefixed("MEMOIR_").split("_"))
            .extract()
    }

    /// Load and validate configuration.
    pub fn load_validated() -> Result<Self, ConfigError> {
        let config = Self::load()?;
        let result = config.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(ConfigError::Invalid(errors.join("\n  ")));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.cache.ttl_secs == 0 {
            result.add_error("cache.ttl_secs", "ttl_secs must be greater than 0");
        }

        let threshold = self.recovery.compression_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            result.add_error(
                "recovery.compression_threshold",
                "compression_threshold must be in (0, 1]",
            );
        }

        let fraction = self.recovery.window_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            result.add_error(
                "recovery.window_fraction",
                "window_fraction must be in (0, 1]",
            );
        }

        if self.dedup.window_secs < 0 {
            result.add_error("dedup.window_secs", "window_secs cannot be negative");
        }

        if self.dedup.window_secs > 60 {
            result.add_warning(
                "dedup.window_secs",
                "window_secs is very high (> 60), distinct turns may be dropped",
            );
        }

        result
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("memoir"))
            .unwrap_or_else(|| PathBuf::from("~/.config/memoir"))
    }

    /// Resolve the session storage root.
    pub fn storage_root(&self) -> PathBuf {
        self.storage.root.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|p| p.join("memoir"))
                .unwrap_or_else(|| PathBuf::from("~/.local/share/memoir"))
                .join("sessions")
        })
    }
}
