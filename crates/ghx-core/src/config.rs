//! Configuration types for ghx-core.
//!
//! This module defines [`EngineConfig`] (CLI-level overrides), [`ProjectConfig`]
//! (from `<state_dir>/config.yaml`), and its sub-configuration types. When an
//! orchestrator is assembled, values in `EngineConfig` take precedence over
//! values read from `ProjectConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ghx_api::ClientConfig;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::error::CoreError;
use crate::reader::{DEFAULT_MAX_FILE_BYTES, DEFAULT_MAX_TOTAL_BYTES};

// ── Engine Configuration (CLI-level) ─────────────────────────

/// Configuration provided by the CLI layer.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use ghx_core::EngineConfig;
///
/// let config = EngineConfig::builder()
///     .state_dir(PathBuf::from("/tmp/.ghx"))
///     .max_retries(5_u32)
///     .build();
/// assert_eq!(config.max_retries(), Some(5));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct EngineConfig {
    /// Directory holding `config.yaml`, sessions and logs.
    state_dir: PathBuf,

    /// Override the API base URL.
    #[builder(default, setter(into))]
    #[serde(skip_serializing_if = "Option::is_none")]
    base_url: Option<String>,

    /// Override the retry budget.
    #[builder(default, setter(into))]
    #[serde(skip_serializing_if = "Option::is_none")]
    max_retries: Option<u32>,

    /// Override the per-request timeout, in seconds.
    #[builder(default, setter(into))]
    #[serde(skip_serializing_if = "Option::is_none")]
    request_timeout_secs: Option<u64>,
}

impl EngineConfig {
    /// Returns the state directory.
    pub fn state_dir(&self) -> &PathBuf {
        &self.state_dir
    }

    /// Returns the base URL override, if set.
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    /// Returns the retry budget override, if set.
    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    /// Returns the request timeout override, if set.
    pub fn request_timeout_secs(&self) -> Option<u64> {
        self.request_timeout_secs
    }

    /// Returns the path to `config.yaml`.
    pub fn config_path(&self) -> PathBuf {
        self.state_dir.join("config.yaml")
    }

    /// Returns the directory used by the file session store.
    pub fn sessions_dir(&self) -> PathBuf {
        self.state_dir.join("sessions")
    }

    /// Returns the root of the log directory.
    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }
}

// ── Project Configuration (config.yaml) ──────────────────────

/// Project-level configuration, deserialized from `config.yaml`.
///
/// All fields have serde defaults so a missing or partial file still yields
/// a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    /// Remote API and retry settings.
    #[serde(default)]
    pub api: ApiSettings,

    /// Byte budgets for file reads.
    #[serde(default)]
    pub limits: ReadLimits,
}

/// Remote API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSettings {
    /// Base URL of the REST API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Linear backoff unit in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Longest rate-limit reset the client will wait for, in seconds.
    #[serde(default = "default_max_rate_limit_wait_secs")]
    pub max_rate_limit_wait_secs: u64,

    /// `User-Agent` header sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            max_retries: default_max_retries(),
            request_timeout_secs: default_request_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            max_rate_limit_wait_secs: default_max_rate_limit_wait_secs(),
            user_agent: default_user_agent(),
        }
    }
}

/// Per-file and per-batch byte budgets applied by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadLimits {
    /// Largest decoded file the reader will return.
    #[serde(default = "default_max_bytes_per_file")]
    pub max_bytes_per_file: u64,

    /// Largest cumulative size of one batch read.
    #[serde(default = "default_max_total_bytes")]
    pub max_total_bytes: u64,
}

impl Default for ReadLimits {
    fn default() -> Self {
        Self {
            max_bytes_per_file: default_max_bytes_per_file(),
            max_total_bytes: default_max_total_bytes(),
        }
    }
}

impl ProjectConfig {
    /// Resolve the API base URL, preferring the CLI override.
    pub fn base_url(&self, engine: &EngineConfig) -> String {
        engine
            .base_url()
            .map(str::to_owned)
            .unwrap_or_else(|| self.api.base_url.clone())
    }

    /// Build the client retry policy, preferring CLI overrides.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` if the resolved request timeout is zero.
    pub fn client_config(&self, engine: &EngineConfig) -> Result<ClientConfig, CoreError> {
        let timeout_secs = engine
            .request_timeout_secs()
            .unwrap_or(self.api.request_timeout_secs);
        if timeout_secs == 0 {
            return Err(CoreError::Config(
                "request timeout must be positive".to_owned(),
            ));
        }

        Ok(ClientConfig::builder()
            .max_retries(engine.max_retries().unwrap_or(self.api.max_retries))
            .request_timeout(Duration::from_secs(timeout_secs))
            .backoff_base(Duration::from_millis(self.api.backoff_base_ms))
            .max_rate_limit_wait(Duration::from_secs(self.api.max_rate_limit_wait_secs))
            .build())
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.limits.max_bytes_per_file == 0 || self.limits.max_total_bytes == 0 {
            return Err(CoreError::Config(
                "limits.maxBytesPerFile and limits.maxTotalBytes must be positive".to_owned(),
            ));
        }
        if self.api.request_timeout_secs == 0 {
            return Err(CoreError::Config(
                "api.requestTimeoutSecs must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}

// ── Default value functions for serde ────────────────────────

fn default_base_url() -> String {
    "https://api.github.com".to_owned()
}

fn default_max_retries() -> u32 {
    ghx_api::DEFAULT_MAX_RETRIES
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_max_rate_limit_wait_secs() -> u64 {
    900
}

fn default_user_agent() -> String {
    "ghx".to_owned()
}

fn default_max_bytes_per_file() -> u64 {
    DEFAULT_MAX_FILE_BYTES
}

fn default_max_total_bytes() -> u64 {
    DEFAULT_MAX_TOTAL_BYTES
}

// ── Config loading ───────────────────────────────────────────

/// Load [`ProjectConfig`] from `config.yaml`.
///
/// If the file does not exist, returns the default configuration.
///
/// # Errors
///
/// Returns `CoreError::Io` if the file exists but cannot be read.
/// Returns `CoreError::Yaml` if the file contains invalid YAML.
/// Returns `CoreError::Config` if a value is out of range.
pub fn load_project_config(config_path: &Path) -> Result<ProjectConfig, CoreError> {
    if !config_path.exists() {
        return Ok(ProjectConfig::default());
    }
    let content = std::fs::read_to_string(config_path)?;
    let config: ProjectConfig = serde_yaml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_should_build_engine_config_with_defaults() {
        let config = EngineConfig::builder()
            .state_dir(PathBuf::from("/tmp/.ghx"))
            .build();

        assert_eq!(config.state_dir(), &PathBuf::from("/tmp/.ghx"));
        assert!(config.base_url().is_none());
        assert!(config.max_retries().is_none());
        assert_eq!(config.config_path(), PathBuf::from("/tmp/.ghx/config.yaml"));
        assert_eq!(config.sessions_dir(), PathBuf::from("/tmp/.ghx/sessions"));
        assert_eq!(config.logs_dir(), PathBuf::from("/tmp/.ghx/logs"));
    }

    #[test]
    fn test_should_deserialize_default_project_config() {
        let config: ProjectConfig = serde_yaml::from_str("{}").expect("should parse");

        assert_eq!(config.api.base_url, "https://api.github.com");
        assert_eq!(config.api.max_retries, 3);
        assert_eq!(config.api.request_timeout_secs, 10);
        assert_eq!(config.api.backoff_base_ms, 1000);
        assert_eq!(config.limits.max_bytes_per_file, 1024 * 1024);
        assert_eq!(config.limits.max_total_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_should_deserialize_full_project_config() {
        let yaml = r#"
api:
  baseUrl: https://github.example.com/api/v3
  maxRetries: 5
  requestTimeoutSecs: 30
  backoffBaseMs: 250
  maxRateLimitWaitSecs: 120
  userAgent: ghx-test
limits:
  maxBytesPerFile: 65536
  maxTotalBytes: 262144
"#;
        let config: ProjectConfig = serde_yaml::from_str(yaml).expect("should parse YAML");

        assert_eq!(config.api.base_url, "https://github.example.com/api/v3");
        assert_eq!(config.api.max_retries, 5);
        assert_eq!(config.api.user_agent, "ghx-test");
        assert_eq!(config.limits.max_bytes_per_file, 65_536);
        assert_eq!(config.limits.max_total_bytes, 262_144);
    }

    #[test]
    fn test_should_prefer_cli_overrides_for_client_config() {
        let engine = EngineConfig::builder()
            .state_dir(PathBuf::from("/tmp/.ghx"))
            .max_retries(7_u32)
            .request_timeout_secs(2_u64)
            .base_url("http://localhost:8080".to_owned())
            .build();
        let project = ProjectConfig::default();

        let client = project.client_config(&engine).expect("should resolve");
        assert_eq!(client.max_retries(), 7);
        assert_eq!(client.request_timeout(), Duration::from_secs(2));
        assert_eq!(client.backoff_base(), Duration::from_millis(1000));
        assert_eq!(project.base_url(&engine), "http://localhost:8080");
    }

    #[test]
    fn test_should_reject_zero_timeout_override() {
        let engine = EngineConfig::builder()
            .state_dir(PathBuf::from("/tmp/.ghx"))
            .request_timeout_secs(0_u64)
            .build();

        let err = ProjectConfig::default().client_config(&engine).unwrap_err();
        assert!(matches!(err, CoreError::Config(ref msg) if msg.contains("timeout")));
    }

    #[test]
    fn test_should_load_default_when_config_file_missing() {
        let config = load_project_config(Path::new("/nonexistent/config.yaml"))
            .expect("should return default");
        assert_eq!(config.api.max_retries, 3);
    }

    #[test]
    fn test_should_load_config_from_tempfile() {
        let dir = tempfile::TempDir::new().expect("should create temp dir");
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, "api:\n  maxRetries: 1\n").expect("should write config");

        let config = load_project_config(&config_path).expect("should load config");
        assert_eq!(config.api.max_retries, 1);
        // Defaults still apply for unspecified fields
        assert_eq!(config.api.request_timeout_secs, 10);
        assert_eq!(config.limits, ReadLimits::default());
    }

    #[test]
    fn test_should_reject_zero_byte_limits() {
        let dir = tempfile::TempDir::new().expect("should create temp dir");
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, "limits:\n  maxTotalBytes: 0\n").expect("should write");

        let err = load_project_config(&config_path).unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn test_should_serialize_engine_config_to_json() {
        let config = EngineConfig::builder()
            .state_dir(PathBuf::from("/tmp/.ghx"))
            .max_retries(2_u32)
            .build();

        let value = serde_json::to_value(&config).expect("should serialize");
        assert_eq!(value["state_dir"], json!("/tmp/.ghx"));
        assert_eq!(value["max_retries"], json!(2));
        assert!(value.get("base_url").is_none());
    }
}
