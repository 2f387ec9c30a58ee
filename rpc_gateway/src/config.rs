//! Configuration management for the RPC gateway

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

use crate::providers::retry::{BackoffPolicy, BackoffStrategy, RetryPolicy};
use crate::{GatewayError, Result};

/// Main configuration structure for the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Global settings
    pub global: GlobalConfig,

    /// Endpoint list, in preference-independent insertion order
    pub endpoints: Vec<EndpointConfig>,

    /// Background health monitor settings
    pub health: HealthMonitorConfig,

    /// Retry and failover settings
    pub retry: RetryConfig,
}

/// Global gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Log level
    pub log_level: String,

    /// Interval between status log lines in the binary
    pub status_interval_seconds: u64,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Configuration for a single RPC endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Display and log identity
    pub name: String,

    /// HTTP RPC URL
    pub url: String,

    /// Priority (lower = preferred)
    #[serde(default = "default_priority")]
    pub priority: u32,

    /// Per-attempt timeout budget in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Advisory retry hint for this endpoint
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Enable this endpoint
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_priority() -> u32 {
    10
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_enabled() -> bool {
    true
}

impl EndpointConfig {
    /// Create a new endpoint config with defaults
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            priority: default_priority(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            enabled: default_enabled(),
        }
    }

    /// Builder-style setter for priority
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Builder-style setter for the timeout budget
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Builder-style setter for max_retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Builder-style setter for enabled
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Health monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthMonitorConfig {
    /// Run the background monitor
    pub enabled: bool,

    /// Probe interval in seconds
    pub check_interval_seconds: u64,
}

impl HealthMonitorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }
}

/// How state-changing operations are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationRetryMode {
    /// Single attempt, never fail over
    NoAutoRetry,

    /// Fail over, using the transaction hash to recognise an earlier attempt that landed
    IdempotencyKey,
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per operation, including the first one
    pub max_attempts: u32,

    /// Backoff strategy between attempts
    pub backoff: BackoffStrategy,

    /// Base delay in milliseconds
    pub base_delay_ms: u64,

    /// Upper bound for a single delay in milliseconds
    pub max_delay_ms: u64,

    /// Policy for state-changing operations such as transaction submission
    pub mutating: MutationRetryMode,
}

impl RetryConfig {
    /// Build the retry policy used by the executor
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            BackoffPolicy::new(
                self.backoff,
                Duration::from_millis(self.base_delay_ms),
                Duration::from_millis(self.max_delay_ms),
            ),
        )
    }
}

impl GatewayConfig {
    /// Load configuration from a file and environment variables
    ///
    /// The file is optional; `RPC_GATEWAY__RETRY__MAX_ATTEMPTS=5` style
    /// variables override it.
    pub fn load(path: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("RPC_GATEWAY").separator("__"))
            .build()?;

        let config: GatewayConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let enabled: Vec<&EndpointConfig> = self.endpoints.iter().filter(|e| e.enabled).collect();
        if enabled.is_empty() {
            return Err(GatewayError::configuration("no enabled endpoints configured"));
        }

        let mut names = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.name.trim().is_empty() {
                return Err(GatewayError::configuration(format!(
                    "endpoint with url {} has an empty name",
                    endpoint.url
                )));
            }

            if !names.insert(endpoint.name.as_str()) {
                return Err(GatewayError::configuration(format!(
                    "duplicate endpoint name: {}",
                    endpoint.name
                )));
            }

            if Url::parse(&endpoint.url).is_err() {
                return Err(GatewayError::configuration(format!(
                    "Invalid URL for endpoint {}: {}",
                    endpoint.name, endpoint.url
                )));
            }

            if endpoint.timeout_ms == 0 {
                return Err(GatewayError::configuration(format!(
                    "timeout_ms must be greater than 0 for endpoint: {}",
                    endpoint.name
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(GatewayError::configuration(
                "retry.max_attempts must be greater than 0",
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(GatewayError::configuration(
                "retry.base_delay_ms must not exceed retry.max_delay_ms",
            ));
        }

        if self.health.enabled && self.health.check_interval_seconds == 0 {
            return Err(GatewayError::configuration(
                "health.check_interval_seconds must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Enabled endpoints in configuration order
    pub fn enabled_endpoints(&self) -> Vec<EndpointConfig> {
        self.endpoints.iter().filter(|e| e.enabled).cloned().collect()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            endpoints: vec![
                EndpointConfig::new("llamarpc", "https://eth.llamarpc.com").with_priority(1),
                EndpointConfig::new("ankr", "https://rpc.ankr.com/eth").with_priority(2),
                EndpointConfig::new("cloudflare", "https://cloudflare-eth.com").with_priority(3),
            ],
            health: HealthMonitorConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            status_interval_seconds: 60,
            shutdown_timeout_seconds: 10,
        }
    }
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_seconds: 30,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Linear,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            mutating: MutationRetryMode::IdempotencyKey,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.health.check_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_empty_endpoints_is_configuration_error() {
        let config = GatewayConfig {
            endpoints: Vec::new(),
            ..Default::default()
        };

        let err = config.validate().unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }

    #[test]
    fn test_all_disabled_is_configuration_error() {
        let config = GatewayConfig {
            endpoints: vec![EndpointConfig::new("a", "https://a.example").with_enabled(false)],
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let config = GatewayConfig {
            endpoints: vec![
                EndpointConfig::new("a", "https://a.example"),
                EndpointConfig::new("a", "https://b.example"),
            ],
            ..Default::default()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate endpoint name"));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let config = GatewayConfig {
            endpoints: vec![EndpointConfig::new("a", "not a url")],
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = GatewayConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_builder() {
        let endpoint = EndpointConfig::new("alchemy", "https://eth-mainnet.example/v2/key")
            .with_priority(1)
            .with_timeout(Duration::from_millis(750))
            .with_max_retries(5);

        assert_eq!(endpoint.priority, 1);
        assert_eq!(endpoint.timeout_ms, 750);
        assert_eq!(endpoint.max_retries, 5);
        assert!(endpoint.enabled);
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let raw = r#"
            [retry]
            max_attempts = 5
            backoff = "exponential"

            [[endpoints]]
            name = "primary"
            url = "https://primary.example"
            priority = 1
        "#;

        let config: GatewayConfig = Config::builder()
            .add_source(File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff, BackoffStrategy::Exponential);
        assert_eq!(config.retry.mutating, MutationRetryMode::IdempotencyKey);
        assert_eq!(config.endpoints.len(), 1);
        assert_eq!(config.endpoints[0].timeout_ms, 5_000);
        assert!(config.validate().is_ok());
    }
}
