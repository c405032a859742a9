//! Configuration management for the car rental API.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

use crate::error::{AppError, Result};

/// Prefix for environment variable overrides, e.g. `CAR_RENTAL__SERVER__ADDR`.
pub const ENV_PREFIX: &str = "CAR_RENTAL";

/// Main configuration for the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_addr")]
    pub addr: SocketAddr,

    /// Deployment environment reported by the health route
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Use the first `X-Forwarded-For` entry as the client address
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            environment: default_environment(),
            trust_forwarded_for: false,
        }
    }
}

fn default_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

fn default_environment() -> String {
    "development".to_string()
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Sliding window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Accepted requests allowed per window
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,

    /// Silence after which the offense count starts over, in milliseconds
    #[serde(default = "default_offense_reset_ms")]
    pub offense_reset_window_ms: u64,

    /// Cooldown applied on the first offense, doubled per consecutive offense
    #[serde(default = "default_base_cooldown_ms")]
    pub base_cooldown_ms: u64,

    /// Interval of the background cleanup sweep in milliseconds
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,

    /// Offense count at which an alert is raised
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: u32,

    /// Append-only abuse log file
    #[serde(default = "default_abuse_log_path")]
    pub abuse_log_path: PathBuf,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_requests: default_max_requests(),
            offense_reset_window_ms: default_offense_reset_ms(),
            base_cooldown_ms: default_base_cooldown_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            alert_threshold: default_alert_threshold(),
            abuse_log_path: default_abuse_log_path(),
        }
    }
}

fn default_window_ms() -> u64 {
    10_000
}

fn default_max_requests() -> usize {
    10
}

fn default_offense_reset_ms() -> u64 {
    120_000
}

fn default_base_cooldown_ms() -> u64 {
    10_000
}

fn default_cleanup_interval_ms() -> u64 {
    300_000
}

fn default_alert_threshold() -> u32 {
    5
}

fn default_abuse_log_path() -> PathBuf {
    PathBuf::from("./logs/abuse.log")
}

impl RateLimitingConfig {
    /// Reject settings the limiter cannot operate with.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.window_ms == 0, "window_ms must be greater than zero"),
            (self.max_requests == 0, "max_requests must be greater than zero"),
            (self.base_cooldown_ms == 0, "base_cooldown_ms must be greater than zero"),
            (self.cleanup_interval_ms == 0, "cleanup_interval_ms must be greater than zero"),
            (self.alert_threshold == 0, "alert_threshold must be greater than zero"),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(AppError::Config(format!("rate_limiting: {}", reason))),
            None => Ok(()),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(yaml).map_err(|e| AppError::Config(e.to_string()))?;
        config.rate_limiting.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file layered with environment overrides.
    ///
    /// Environment variables use the `CAR_RENTAL` prefix and `__` as the
    /// nesting separator, e.g. `CAR_RENTAL__RATE_LIMITING__MAX_REQUESTS=20`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path, "Loading configuration file");
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| AppError::Config(e.to_string()))?;
        config.rate_limiting.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_limiter_constants() {
        let config = AppConfig::default();
        assert_eq!(config.rate_limiting.window_ms, 10_000);
        assert_eq!(config.rate_limiting.max_requests, 10);
        assert_eq!(config.rate_limiting.offense_reset_window_ms, 120_000);
        assert_eq!(config.rate_limiting.base_cooldown_ms, 10_000);
        assert_eq!(config.rate_limiting.cleanup_interval_ms, 300_000);
        assert_eq!(config.rate_limiting.alert_threshold, 5);
        assert_eq!(config.server.addr.port(), 8000);
        assert!(!config.server.trust_forwarded_for);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
server:
  addr: "0.0.0.0:9000"
rate_limiting:
  max_requests: 3
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.addr.port(), 9000);
        assert_eq!(config.server.environment, "development");
        assert_eq!(config.rate_limiting.max_requests, 3);
        assert_eq!(config.rate_limiting.window_ms, 10_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_zero_window_rejected() {
        let yaml = "rate_limiting:\n  window_ms: 0\n";
        let err = AppConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        assert!(err.to_string().contains("window_ms"));
    }

    #[test]
    fn test_malformed_yaml_is_config_error() {
        let err = AppConfig::from_yaml("server: [").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_from_file_reads_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.yaml");
        std::fs::write(&path, "logging:\n  json: true\n").unwrap();

        let config = AppConfig::from_file(path.to_str().unwrap()).unwrap();
        assert!(config.logging.json);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = AppConfig::from_file("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
    }

    #[test]
    fn test_load_layers_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layered.yaml");
        std::fs::write(&path, "rate_limiting:\n  alert_threshold: 7\n").unwrap();

        let config = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.rate_limiting.alert_threshold, 7);
        assert_eq!(config.rate_limiting.max_requests, 10);
    }

    #[test]
    fn test_load_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.yaml");
        std::fs::write(
            &path,
            "server:\n  environment: staging\nrate_limiting:\n  window_ms: 5000\n",
        )
        .unwrap();

        // Other tests in this module never read these two keys from load().
        std::env::set_var("CAR_RENTAL__RATE_LIMITING__WINDOW_MS", "20000");
        std::env::set_var("CAR_RENTAL__SERVER__ENVIRONMENT", "production");
        let result = AppConfig::load(Some(path.to_str().unwrap()));
        std::env::remove_var("CAR_RENTAL__RATE_LIMITING__WINDOW_MS");
        std::env::remove_var("CAR_RENTAL__SERVER__ENVIRONMENT");

        let config = result.unwrap();
        assert_eq!(config.rate_limiting.window_ms, 20_000);
        assert_eq!(config.server.environment, "production");
        assert_eq!(config.rate_limiting.max_requests, 10);
    }
}
