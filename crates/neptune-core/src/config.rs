//! Configuration management for the Neptune client.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`NEPTUNE_` prefix, `__` for nested keys,
//!    e.g. `NEPTUNE_ENDPOINT`, `NEPTUNE_RETRY__MAX_ATTEMPTS`)
//! 2. Config file (`neptune.toml`)
//! 3. Defaults

use serde::Deserialize;

use crate::error::CoreError;
use crate::types::Endpoint;

/// Connection and execution settings for one Neptune cluster.
#[derive(Debug, Clone, Deserialize)]
pub struct NeptuneConfig {
    /// Cluster hostname, without scheme or port.
    #[serde(default)]
    pub endpoint: String,

    /// AWS region used for request signing.
    #[serde(default)]
    pub region: String,

    /// Cluster port (default: 8182).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Use HTTPS (default). Disable only for local tunnels and test doubles.
    #[serde(default = "default_true")]
    pub tls: bool,

    /// Maximum rows kept in memory for the last query.
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Retry and timeout policy for query requests.
    #[serde(default)]
    pub retry: RetrySettings,

    /// Timeouts for the two-phase reset protocol.
    #[serde(default)]
    pub reset: ResetSettings,
}

/// Retry knobs. Defaults: 3 attempts, 120s/300s base timeouts, 5s backoff base.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RetrySettings {
    /// Maximum attempts per request, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base timeout for ordinary reads and writes.
    #[serde(default = "default_standard_timeout")]
    pub standard_timeout_secs: u64,

    /// Base timeout for SPARQL DELETE/CLEAR requests.
    #[serde(default = "default_extended_timeout")]
    pub extended_timeout_secs: u64,

    /// Delay before the first retry; doubles for each later retry.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ResetSettings {
    #[serde(default = "default_initiate_timeout")]
    pub initiate_timeout_secs: u64,

    #[serde(default = "default_perform_timeout")]
    pub perform_timeout_secs: u64,
}

fn default_port() -> u16 {
    8182
}

fn default_true() -> bool {
    true
}

fn default_max_results() -> usize {
    50_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_standard_timeout() -> u64 {
    120
}

fn default_extended_timeout() -> u64 {
    300
}

fn default_backoff_base() -> u64 {
    5
}

fn default_initiate_timeout() -> u64 {
    60
}

fn default_perform_timeout() -> u64 {
    600
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            standard_timeout_secs: default_standard_timeout(),
            extended_timeout_secs: default_extended_timeout(),
            backoff_base_secs: default_backoff_base(),
        }
    }
}

impl Default for ResetSettings {
    fn default() -> Self {
        Self {
            initiate_timeout_secs: default_initiate_timeout(),
            perform_timeout_secs: default_perform_timeout(),
        }
    }
}

impl NeptuneConfig {
    /// Settings for `endpoint` in `region` with every other knob at its default.
    pub fn new(endpoint: &str, region: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            region: region.to_string(),
            port: default_port(),
            tls: true,
            max_results: default_max_results(),
            retry: RetrySettings::default(),
            reset: ResetSettings::default(),
        }
    }

    /// Load from `<file_prefix>.toml` (optional) overlaid with `NEPTUNE_*` variables.
    pub fn load(file_prefix: &str) -> Result<Self, CoreError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(environment())
            .build()?;
        Self::from_config(cfg)
    }

    /// Load from `NEPTUNE_ENDPOINT`, `NEPTUNE_REGION`, `NEPTUNE_PORT`, ... only.
    pub fn from_environment() -> Result<Self, CoreError> {
        let cfg = config::Config::builder().add_source(environment()).build()?;
        Self::from_config(cfg)
    }

    /// Deserialize and validate an already-built `config::Config`.
    pub fn from_config(cfg: config::Config) -> Result<Self, CoreError> {
        let parsed: NeptuneConfig = cfg.try_deserialize()?;
        parsed.validate()?;
        tracing::debug!(
            endpoint = %parsed.endpoint,
            region = %parsed.region,
            port = parsed.port,
            "Loaded Neptune configuration"
        );
        Ok(parsed)
    }

    /// Check required fields and knob ranges.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.endpoint.trim().is_empty() {
            return Err(CoreError::Config(
                "endpoint is required (set NEPTUNE_ENDPOINT)".to_string(),
            ));
        }
        if self.region.trim().is_empty() {
            return Err(CoreError::Config(
                "region is required (set NEPTUNE_REGION)".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(CoreError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_results == 0 {
            return Err(CoreError::Config(
                "max_results must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the immutable endpoint described by this configuration.
    pub fn endpoint(&self) -> Result<Endpoint, CoreError> {
        Ok(Endpoint::new(&self.endpoint, self.port, &self.region)?.with_tls(self.tls))
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("NEPTUNE")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> Result<NeptuneConfig, CoreError> {
        let cfg = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        NeptuneConfig::from_config(cfg)
    }

    #[test]
    fn test_default_settings() {
        let config = NeptuneConfig::new("db.example.com", "us-east-1");
        assert_eq!(config.port, 8182);
        assert!(config.tls);
        assert_eq!(config.max_results, 50_000);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.standard_timeout_secs, 120);
        assert_eq!(config.retry.extended_timeout_secs, 300);
        assert_eq!(config.retry.backoff_base_secs, 5);
        assert_eq!(config.reset.initiate_timeout_secs, 60);
        assert_eq!(config.reset.perform_timeout_secs, 600);
    }

    #[test]
    fn test_toml_overrides() {
        let config = from_toml(
            r#"
            endpoint = "db.example.com"
            region = "eu-west-1"
            port = 8183

            [retry]
            max_attempts = 5
            backoff_base_secs = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.endpoint, "db.example.com");
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.port, 8183);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff_base_secs, 1);
        assert_eq!(config.retry.standard_timeout_secs, 120);
        assert_eq!(config.reset, ResetSettings::default());
    }

    #[test]
    fn test_missing_endpoint_is_rejected() {
        let err = from_toml(r#"region = "us-east-1""#).unwrap_err();
        assert!(matches!(err, CoreError::Config(msg) if msg.contains("NEPTUNE_ENDPOINT")));
    }

    #[test]
    fn test_zero_attempts_is_rejected() {
        let err = from_toml(
            r#"
            endpoint = "db.example.com"
            region = "us-east-1"
            [retry]
            max_attempts = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn test_endpoint_from_config() {
        let mut config = NeptuneConfig::new("db.example.com", "us-west-2");
        config.tls = false;
        let endpoint = config.endpoint().unwrap();
        assert_eq!(endpoint.base_url(), "http://db.example.com:8182");
        assert_eq!(endpoint.region(), "us-west-2");
    }
}
