//! Engine configuration with hierarchical merging.
//!
//! Precedence (lowest to highest): programmatic defaults, the project
//! config file `.atelier/config.yaml`, local overrides `.atelier/local.yaml`,
//! and `ATELIER_*` environment variables (nested keys split on `__`).

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_parallel: {0}. Must be between 1 and 16")]
    InvalidMaxParallel(usize),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database URL cannot be empty")]
    EmptyDatabaseUrl,

    #[error("Invalid max_retries: {0}. Cannot be 0")]
    InvalidMaxRetries(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("LLM model name cannot be empty")]
    EmptyModelName,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API key; usually supplied via `ATELIER_LLM__API_KEY`.
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "claude-sonnet-4-20250514".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Concurrent experts per fan-out.
    pub max_parallel: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { max_parallel: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://.atelier/sessions.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `pretty`.
    pub format: String,
    /// File output directory; stdout-only when unset.
    pub log_dir: Option<PathBuf>,
    pub enable_stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            log_dir: None,
            enable_stdout: true,
        }
    }
}

/// Paths of the editable catalogs; the built-in catalogs apply when unset.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CatalogConfig {
    pub roles_dir: Option<PathBuf>,
    pub prompts_dir: Option<PathBuf>,
    pub weights_file: Option<PathBuf>,
    pub standards_file: Option<PathBuf>,
    pub constraints_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub llm: LlmConfig,
    pub retry: RetryConfig,
    pub executor: ExecutorConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub catalog: CatalogConfig,
    /// JSONL audit trail of search-tool calls; disabled when unset.
    pub tool_call_log: Option<PathBuf>,
    /// Directory for fallback-event records; disabled when unset.
    pub fallback_log_dir: Option<PathBuf>,
}

impl EngineConfig {
    pub fn load() -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Yaml::file(".atelier/config.yaml"))
            .merge(Yaml::file(".atelier/local.yaml"))
            .merge(Env::prefixed("ATELIER_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("ATELIER_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executor.max_parallel == 0 || self.executor.max_parallel > 16 {
            return Err(ConfigError::InvalidMaxParallel(self.executor.max_parallel));
        }
        if self.database.url.is_empty() {
            return Err(ConfigError::EmptyDatabaseUrl);
        }
        if self.llm.model.is_empty() {
            return Err(ConfigError::EmptyModelName);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(self.logging.format.clone()));
        }

        if self.retry.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(self.retry.max_retries));
        }
        if self.retry.initial_backoff_ms >= self.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                self.retry.initial_backoff_ms,
                self.retry.max_backoff_ms,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.executor.max_parallel, 4);
        assert_eq!(config.logging.level, "info");
        assert!(config.tool_call_log.is_none());
        config.validate().expect("default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
executor:
  max_parallel: 8
llm:
  model: claude-opus-4-20250514
  timeout_secs: 300
logging:
  level: debug
  format: json
";
        let config: EngineConfig = serde_yaml::from_str(yaml).expect("YAML should parse");
        assert_eq!(config.executor.max_parallel, 8);
        assert_eq!(config.llm.model, "claude-opus-4-20250514");
        assert_eq!(config.llm.timeout_secs, 300);
        assert_eq!(config.logging.level, "debug");
        // Unset sections keep their defaults.
        assert_eq!(config.retry.max_retries, 3);
        config.validate().expect("parsed config should be valid");
    }

    #[test]
    fn test_validate_rejects_zero_parallelism() {
        let mut config = EngineConfig::default();
        config.executor.max_parallel = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidMaxParallel(0)
        ));
    }

    #[test]
    fn test_validate_rejects_bad_log_level() {
        let mut config = EngineConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidLogLevel(_)
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut config = EngineConfig::default();
        config.retry.initial_backoff_ms = 60000;
        config.retry.max_backoff_ms = 1000;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidBackoff(60000, 1000)
        ));
    }

    #[test]
    fn test_hierarchical_merging() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut base = NamedTempFile::new().unwrap();
        writeln!(
            base,
            "executor:\n  max_parallel: 2\nlogging:\n  level: info\n  format: json"
        )
        .unwrap();
        base.flush().unwrap();

        let mut overrides = NamedTempFile::new().unwrap();
        writeln!(overrides, "logging:\n  level: debug").unwrap();
        overrides.flush().unwrap();

        let config: EngineConfig = Figment::new()
            .merge(Serialized::defaults(EngineConfig::default()))
            .merge(Yaml::file(base.path()))
            .merge(Yaml::file(overrides.path()))
            .extract()
            .unwrap();

        assert_eq!(config.executor.max_parallel, 2);
        assert_eq!(config.logging.level, "debug", "override should win");
        assert_eq!(
            config.logging.format, "json",
            "base value persists when not overridden"
        );
    }
}
