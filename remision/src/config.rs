//! Configuration for the remision scheduler

use invoice_ledger::{Environment, TenantId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Remision scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Batch assembly and sweep loop
    pub scheduler: SchedulerConfig,

    /// Transport retry policy
    pub retry: RetryConfig,

    /// Gateway call limits
    pub gateway: GatewayConfig,

    /// Minimum spacing between gateway submissions
    pub flow_control: FlowControlConfig,

    /// Pause after consecutive transport failures
    pub breaker: BreakerConfig,

    /// Environment used for tenants without an override
    pub default_environment: Environment,

    /// Per-tenant environment overrides
    pub tenant_environments: HashMap<String, Environment>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "remision".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
            gateway: GatewayConfig::default(),
            flow_control: FlowControlConfig::default(),
            breaker: BreakerConfig::default(),
            default_environment: Environment::Staging,
            tenant_environments: HashMap::new(),
        }
    }
}

/// Batch assembly and sweep loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum records frozen into one batch
    pub max_batch_size: usize,

    /// Milliseconds between background sweeps
    pub sweep_interval_ms: u64,

    /// Batches driven concurrently by one sweep
    pub worker_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 1000,
            sweep_interval_ms: 60_000,
            worker_concurrency: 4,
        }
    }
}

impl SchedulerConfig {
    /// Sweep interval
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Transport retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Transport attempts before a batch fails terminally
    pub max_attempts: u32,

    /// Delay before the first retry (seconds)
    pub base_delay_secs: u64,

    /// Growth factor per attempt
    pub backoff_multiplier: f64,

    /// Upper bound for a single delay (seconds)
    pub max_delay_secs: u64,

    /// Random spread as a fraction of the delay (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 30,
            backoff_multiplier: 2.0,
            max_delay_secs: 3600,
            jitter_factor: 0.1,
        }
    }
}

/// Gateway call limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Timeout of a single submission (milliseconds)
    pub timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

impl GatewayConfig {
    /// Submission timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Minimum spacing between gateway submissions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowControlConfig {
    /// Seconds that must pass between two submissions
    pub min_interval_secs: u64,
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 60,
        }
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive transport failures that open the breaker
    pub failure_threshold: u32,

    /// Seconds the breaker stays open
    pub pause_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            pause_secs: 300,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Some(size) = env_parse("REMISION_MAX_BATCH_SIZE")? {
            config.scheduler.max_batch_size = size;
        }

        if let Some(attempts) = env_parse("REMISION_MAX_ATTEMPTS")? {
            config.retry.max_attempts = attempts;
        }

        if let Some(timeout) = env_parse("REMISION_GATEWAY_TIMEOUT_MS")? {
            config.gateway.timeout_ms = timeout;
        }

        if let Some(interval) = env_parse("REMISION_FLOW_CONTROL_SECS")? {
            config.flow_control.min_interval_secs = interval;
        }

        if let Ok(environment) = std::env::var("REMISION_ENVIRONMENT") {
            config.default_environment = match environment.to_ascii_lowercase().as_str() {
                "staging" => Environment::Staging,
                "production" => Environment::Production,
                other => {
                    return Err(crate::Error::Config(format!(
                        "Invalid REMISION_ENVIRONMENT: {}",
                        other
                    )))
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Environment a tenant submits to
    pub fn environment_for(&self, tenant: &TenantId) -> Environment {
        self.tenant_environments
            .get(tenant.as_str())
            .copied()
            .unwrap_or(self.default_environment)
    }

    /// Reject settings that would stall or spin the scheduler
    pub fn validate(&self) -> crate::Result<()> {
        if self.scheduler.max_batch_size == 0 {
            return Err(crate::Error::Config(
                "scheduler.max_batch_size must be positive".to_string(),
            ));
        }
        if self.scheduler.sweep_interval_ms == 0 {
            return Err(crate::Error::Config(
                "scheduler.sweep_interval_ms must be positive".to_string(),
            ));
        }
        if self.scheduler.worker_concurrency == 0 {
            return Err(crate::Error::Config(
                "scheduler.worker_concurrency must be positive".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(crate::Error::Config(
                "retry.max_attempts must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(crate::Error::Config(
                "retry.jitter_factor must be within 0.0 and 1.0".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(crate::Error::Config(
                "retry.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.gateway.timeout_ms == 0 {
            return Err(crate::Error::Config(
                "gateway.timeout_ms must be positive".to_string(),
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(crate::Error::Config(
                "breaker.failure_threshold must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T>(name: &str) -> crate::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|e| crate::Error::Config(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(None),
    }
}
