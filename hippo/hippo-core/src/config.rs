//! Configuration for Hippo.
//!
//! Configuration lives in `~/.hippo/config.toml` by default. The location can
//! be overridden with the `HIPPO_CONFIG_PATH` environment variable, and
//! individual values with the `HIPPO_*` variables listed below.
//!
//! # Example
//!
//! ```no_run
//! use hippo_core::config::HippoConfig;
//!
//! # async fn example() -> hippo_core::Result<()> {
//! let config = HippoConfig::load_or_create_default().await?;
//! println!("Database backend: {}", config.database.backend);
//! println!("Confidence threshold: {}", config.capture.confidence_threshold);
//! # Ok(())
//! # }
//! ```

use crate::error::{HippoError, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// Environment variable names
pub const ENV_CONFIG_PATH: &str = "HIPPO_CONFIG_PATH";
pub const ENV_LOG_LEVEL: &str = "HIPPO_LOG_LEVEL";
pub const ENV_DB_BACKEND: &str = "HIPPO_DB_BACKEND";
pub const ENV_DB_PATH: &str = "HIPPO_DB_PATH";
pub const ENV_CONFIDENCE_THRESHOLD: &str = "HIPPO_CONFIDENCE_THRESHOLD";
pub const ENV_EXTRACTION_TIMEOUT_SECS: &str = "HIPPO_EXTRACTION_TIMEOUT_SECS";

/// Episodes with fewer linked messages never reach an extraction provider
pub const MIN_EXTRACTION_MESSAGES: usize = 2;

/// Upper bound for the linking grace windows (one day)
pub const MAX_GRACE_SECS: u64 = 86_400;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HippoConfig {
    pub general: GeneralConfig,
    pub database: DatabaseConfig,
    pub capture: CaptureConfig,
    pub linking: LinkingConfig,
    pub extraction: ExtractionConfig,
    pub scoring: ScoringConfig,
}

/// General configuration settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Backend: sqlite or memory
    pub backend: String,
    /// SQLite database file; defaults to ~/.hippo/hippo.db
    pub path: Option<PathBuf>,
    pub max_connections: u32,
}

/// Capture pipeline policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    pub confidence_threshold: f64,
    pub skip_duplicates: bool,
    /// Fewer linked messages than this skip extraction entirely
    pub min_messages: usize,
    pub auto_store: bool,
    pub agent_id: Option<String>,
    pub focus_areas: Vec<String>,
}

/// Message linking windows
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LinkingConfig {
    /// Grace added to `ended_at` for retroactive time-range linking
    pub import_grace_secs: u64,
    /// Grace for late direct-path messages; 0 disables it
    pub direct_grace_secs: u64,
}

/// Extraction provider cascade
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractionConfig {
    pub timeout_secs: u64,
    /// Ordered candidates; the first one that answers wins
    pub providers: Vec<ProviderConfig>,
}

/// One extraction provider candidate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub name: String,
    /// API dialect: openai or anthropic
    pub kind: String,
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

/// Relevance scoring trigger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
}

fn default_max_tokens() -> u32 {
    2048
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            path: None,
            max_connections: 5,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            skip_duplicates: true,
            min_messages: 2,
            auto_store: true,
            agent_id: None,
            focus_areas: Vec::new(),
        }
    }
}

impl Default for LinkingConfig {
    fn default() -> Self {
        Self {
            import_grace_secs: 5,
            direct_grace_secs: 0,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            providers: vec![
                ProviderConfig {
                    name: "anthropic".to_string(),
                    kind: "anthropic".to_string(),
                    endpoint: "https://api.anthropic.com/v1/messages".to_string(),
                    model: "claude-3-5-haiku-latest".to_string(),
                    api_key_env: Some("ANTHROPIC_API_KEY".to_string()),
                    max_tokens: default_max_tokens(),
                },
                ProviderConfig {
                    name: "openai".to_string(),
                    kind: "openai".to_string(),
                    endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
                    model: "gpt-4o-mini".to_string(),
                    api_key_env: Some("OPENAI_API_KEY".to_string()),
                    max_tokens: default_max_tokens(),
                },
            ],
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 10,
        }
    }
}

impl HippoConfig {
    /// Load configuration from the default location
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from_path(&config_path).await
    }

    /// Load configuration from a specific path
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| HippoError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Self = toml::from_str(&content)
            .map_err(|e| HippoError::Config(format!("Failed to parse config file: {}", e)))?;

        config.merge_env_vars()?;
        config.validate()?;

        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, writing the defaults first if no file exists
    pub async fn load_or_create_default() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path).await
        } else {
            info!("Creating default configuration at {}", config_path.display());
            let mut config = Self::default();
            config.save_to_path(&config_path).await?;
            config.merge_env_vars()?;
            config.validate()?;
            Ok(config)
        }
    }

    /// Save configuration to a specific path atomically (temp file + rename)
    pub async fn save_to_path(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        self.validate()?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    HippoError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| HippoError::Config(format!("Failed to serialize config: {}", e)))?;

        let temp_path = path.with_extension("toml.tmp");

        tokio::fs::write(&temp_path, content)
            .await
            .map_err(|e| HippoError::Config(format!("Failed to write config file: {}", e)))?;

        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|e| HippoError::Config(format!("Failed to rename config file: {}", e)))?;

        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.general.log_level.as_str()) {
            return Err(HippoError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.general.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_backends = ["sqlite", "memory"];
        if !valid_backends.contains(&self.database.backend.as_str()) {
            return Err(HippoError::Config(format!(
                "Invalid database backend '{}'. Must be one of: {}",
                self.database.backend,
                valid_backends.join(", ")
            )));
        }

        if self.database.max_connections == 0 {
            return Err(HippoError::Config(
                "database.max_connections must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.capture.confidence_threshold) {
            return Err(HippoError::Config(format!(
                "capture.confidence_threshold must be within 0..=1, got {}",
                self.capture.confidence_threshold
            )));
        }

        if self.capture.min_messages < MIN_EXTRACTION_MESSAGES {
            return Err(HippoError::Config(format!(
                "capture.min_messages must be at least {}, got {}",
                MIN_EXTRACTION_MESSAGES, self.capture.min_messages
            )));
        }

        for (key, secs) in [
            ("linking.import_grace_secs", self.linking.import_grace_secs),
            ("linking.direct_grace_secs", self.linking.direct_grace_secs),
        ] {
            if secs > MAX_GRACE_SECS {
                return Err(HippoError::Config(format!(
                    "{} must be at most {}, got {}",
                    key, MAX_GRACE_SECS, secs
                )));
            }
        }

        if self.extraction.timeout_secs == 0 {
            return Err(HippoError::Config(
                "extraction.timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.scoring.timeout_secs == 0 {
            return Err(HippoError::Config(
                "scoring.timeout_secs must be greater than 0".to_string(),
            ));
        }

        let valid_kinds = ["openai", "anthropic"];
        for provider in &self.extraction.providers {
            if !valid_kinds.contains(&provider.kind.as_str()) {
                return Err(HippoError::Config(format!(
                    "Provider '{}' has invalid kind '{}'. Must be one of: {}",
                    provider.name,
                    provider.kind,
                    valid_kinds.join(", ")
                )));
            }
            if provider.endpoint.is_empty() {
                return Err(HippoError::Config(format!(
                    "Provider '{}' has an empty endpoint",
                    provider.name
                )));
            }
        }

        Ok(())
    }

    /// Merge environment variable overrides into the configuration
    pub fn merge_env_vars(&mut self) -> Result<()> {
        self.merge_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production)
    pub fn merge_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(log_level) = lookup(ENV_LOG_LEVEL) {
            debug!("Overriding log_level from environment: {}", log_level);
            self.general.log_level = log_level;
        }

        if let Some(backend) = lookup(ENV_DB_BACKEND) {
            debug!("Overriding database backend from environment: {}", backend);
            self.database.backend = backend;
        }

        if let Some(path) = lookup(ENV_DB_PATH) {
            debug!("Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Some(threshold) = lookup(ENV_CONFIDENCE_THRESHOLD) {
            self.capture.confidence_threshold = threshold.parse::<f64>().map_err(|e| {
                HippoError::Config(format!("Invalid confidence threshold in environment: {}", e))
            })?;
        }

        if let Some(timeout) = lookup(ENV_EXTRACTION_TIMEOUT_SECS) {
            self.extraction.timeout_secs = timeout.parse::<u64>().map_err(|e| {
                HippoError::Config(format!("Invalid extraction timeout in environment: {}", e))
            })?;
        }

        Ok(())
    }

    /// Get the base directory (~/.hippo/)
    pub fn base_dir() -> Result<PathBuf> {
        if let Ok(config_path) = std::env::var(ENV_CONFIG_PATH) {
            let path = PathBuf::from(config_path);
            if let Some(parent) = path.parent() {
                return Ok(parent.to_path_buf());
            }
        }

        let base_dirs = BaseDirs::new()
            .ok_or_else(|| HippoError::Config("Could not determine home directory".to_string()))?;

        Ok(base_dirs.home_dir().join(".hippo"))
    }

    /// Get the configuration file path (~/.hippo/config.toml)
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(config_path) = std::env::var(ENV_CONFIG_PATH) {
            return Ok(PathBuf::from(config_path));
        }

        Ok(Self::base_dir()?.join("config.toml"))
    }

    /// Resolved SQLite database path
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database.path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::base_dir()?.join("hippo.db")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_is_valid() {
        let config = HippoConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capture.confidence_threshold, 0.7);
        assert!(config.capture.skip_duplicates);
        assert_eq!(config.linking.import_grace_secs, 5);
        assert_eq!(config.linking.direct_grace_secs, 0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = HippoConfig::default();
        config.capture.confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = HippoConfig::default();
        config.database.backend = "postgres".to_string();
        assert!(config.validate().is_err());

        let mut config = HippoConfig::default();
        config.extraction.providers[0].kind = "gemini".to_string();
        assert!(config.validate().is_err());

        let mut config = HippoConfig::default();
        config.capture.min_messages = 0;
        assert!(config.validate().is_err());
        config.capture.min_messages = MIN_EXTRACTION_MESSAGES;
        assert!(config.validate().is_ok());

        let mut config = HippoConfig::default();
        config.linking.import_grace_secs = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = HippoConfig::default();
        config.linking.direct_grace_secs = MAX_GRACE_SECS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_DB_BACKEND, "memory"),
            (ENV_CONFIDENCE_THRESHOLD, "0.5"),
            (ENV_EXTRACTION_TIMEOUT_SECS, "3"),
        ]
        .into_iter()
        .collect();

        let mut config = HippoConfig::default();
        config
            .merge_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.database.backend, "memory");
        assert_eq!(config.capture.confidence_threshold, 0.5);
        assert_eq!(config.extraction.timeout_secs, 3);
    }

    #[test]
    fn test_invalid_override() {
        let mut config = HippoConfig::default();
        let result = config.merge_overrides(|k| {
            (k == ENV_CONFIDENCE_THRESHOLD).then(|| "high".to_string())
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = HippoConfig::default();
        config.capture.focus_areas = vec!["testing".to_string()];
        config.linking.direct_grace_secs = 2;
        config.save_to_path(&path).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let loaded: HippoConfig = toml::from_str(&content).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let loaded: HippoConfig =
            toml::from_str("[capture]\nconfidence_threshold = 0.9\n").unwrap();
        assert_eq!(loaded.capture.confidence_threshold, 0.9);
        assert!(loaded.capture.skip_duplicates);
        assert_eq!(loaded.database.backend, "sqlite");
    }
}
