use crate::circuit_breaker::{CircuitBreakerConfig, RetryConfig};
use crate::error::{ResilienceError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration: which backends to watch and how hard to
/// defend against them failing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackstopConfig {
    /// Probe settings
    #[serde(default)]
    pub probe: ProbeConfig,
    /// Registry-wide resilience defaults
    #[serde(default)]
    pub defaults: ResilienceDefaults,
    /// Monitored backends
    pub services: Vec<ServiceConfig>,
}

/// HTTP probe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Per-request timeout in seconds
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_probe_timeout_secs() -> u64 {
    5
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Defaults applied to every service that doesn't override them
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceDefaults {
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// One monitored backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name, unique across the config
    pub name: String,
    /// Base endpoint, e.g. "http://localhost:3100"
    pub endpoint: String,
    /// Health path appended to the endpoint
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// Status code counted as healthy (InfluxDB's /ping answers 204)
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
    /// Alternate endpoint probed when the primary fails
    #[serde(default)]
    pub fallback_endpoint: Option<String>,
    /// Per-service circuit breaker override
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    /// Per-service retry override
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_health_path() -> String {
    "/".to_string()
}

fn default_expected_status() -> u16 {
    200
}

impl ServiceConfig {
    fn simple(name: &str, endpoint: &str, health_path: &str, expected_status: u16) -> Self {
        Self {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            health_path: health_path.to_string(),
            expected_status,
            fallback_endpoint: None,
            circuit_breaker: None,
            retry: None,
        }
    }
}

impl Default for BackstopConfig {
    /// The stock local telemetry stack
    fn default() -> Self {
        Self {
            probe: ProbeConfig::default(),
            defaults: ResilienceDefaults::default(),
            services: vec![
                ServiceConfig::simple("elastic", "http://localhost:8200", "/", 200),
                ServiceConfig::simple("loki", "http://localhost:3100", "/ready", 200),
                ServiceConfig::simple("influxdb", "http://localhost:8086", "/ping", 204),
                ServiceConfig::simple("grafana", "http://localhost:3000", "/api/health", 200),
            ],
        }
    }
}

impl BackstopConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ResilienceError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ResilienceError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.probe.timeout_secs == 0 {
            return Err(ResilienceError::Config(
                "probe timeout_secs must be greater than 0".to_string(),
            ));
        }

        self.defaults.circuit_breaker.validate()?;
        self.defaults.retry.validate()?;

        let mut seen = std::collections::HashSet::new();
        for service in &self.services {
            if service.name.is_empty() {
                return Err(ResilienceError::Config(
                    "service name must not be empty".to_string(),
                ));
            }
            if !seen.insert(service.name.as_str()) {
                return Err(ResilienceError::Config(format!(
                    "duplicate service name: {}",
                    service.name
                )));
            }
            if service.endpoint.is_empty() {
                return Err(ResilienceError::Config(format!(
                    "service {} has an empty endpoint",
                    service.name
                )));
            }
            if let Some(breaker) = &service.circuit_breaker {
                breaker.validate()?;
            }
            if let Some(retry) = &service.retry {
                retry.validate()?;
            }
        }

        Ok(())
    }
}
