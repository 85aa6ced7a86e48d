//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object or an empty
//! environment yields a working configuration.
//!
//! # Environment Variables
//!
//! - `IDSYNC_ASYNC_CONCURRENCY` - async propagation worker pool size (default: 4)
//! - `IDSYNC_CONNECTOR_TIMEOUT_MS` - per connector call timeout (default: 30000)
//! - `IDSYNC_FAILURE_POLICY` - `continue` or `fail_fast` (default: `continue`)
//! - `IDSYNC_PERSIST_EXECUTIONS` - write task execution records (default: true)
//! - `IDSYNC_RECON_PAGE_SIZE` - reconciliation page size (default: 100)
//! - `IDSYNC_RECON_CONCURRENCY` - items processed concurrently per cycle (default: 4)

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors that can occur during environment loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

/// What to do when a synchronous propagation task fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and keep executing the remaining tasks.
    #[default]
    Continue,
    /// Stop at the first synchronous failure and surface it to the caller.
    FailFast,
}

impl FailurePolicy {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Continue => "continue",
            FailurePolicy::FailFast => "fail_fast",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "continue" => Ok(FailurePolicy::Continue),
            "fail_fast" => Ok(FailurePolicy::FailFast),
            _ => Err(format!("expected 'continue' or 'fail_fast', got '{s}'")),
        }
    }
}

/// Reconciliation cycle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Identities or deltas fetched per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Items processed concurrently within one cycle.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_page_size() -> usize {
    100
}

fn default_concurrency() -> usize {
    4
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            concurrency: default_concurrency(),
        }
    }
}

/// Propagation and reconciliation engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker pool size for asynchronous propagation tasks.
    #[serde(default = "default_concurrency")]
    pub async_concurrency: usize,
    /// Timeout applied to every connector call, in milliseconds.
    #[serde(default = "default_connector_timeout_ms")]
    pub connector_timeout_ms: u64,
    /// Behavior on synchronous task failure.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Whether every attempted task is written to the execution history.
    #[serde(default = "default_persist_executions")]
    pub persist_executions: bool,
    /// Reconciliation settings.
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
}

fn default_connector_timeout_ms() -> u64 {
    30_000
}

fn default_persist_executions() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            async_concurrency: default_concurrency(),
            connector_timeout_ms: default_connector_timeout_ms(),
            failure_policy: FailurePolicy::default(),
            persist_executions: default_persist_executions(),
            reconciliation: ReconciliationConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `IDSYNC_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable cannot be parsed or
    /// a size is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            async_concurrency: parse_var(
                &lookup,
                "IDSYNC_ASYNC_CONCURRENCY",
                defaults.async_concurrency,
            )?,
            connector_timeout_ms: parse_var(
                &lookup,
                "IDSYNC_CONNECTOR_TIMEOUT_MS",
                defaults.connector_timeout_ms,
            )?,
            failure_policy: parse_var(&lookup, "IDSYNC_FAILURE_POLICY", defaults.failure_policy)?,
            persist_executions: parse_var(
                &lookup,
                "IDSYNC_PERSIST_EXECUTIONS",
                defaults.persist_executions,
            )?,
            reconciliation: ReconciliationConfig {
                page_size: parse_var(
                    &lookup,
                    "IDSYNC_RECON_PAGE_SIZE",
                    defaults.reconciliation.page_size,
                )?,
                concurrency: parse_var(
                    &lookup,
                    "IDSYNC_RECON_CONCURRENCY",
                    defaults.reconciliation.concurrency,
                )?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that every size is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("IDSYNC_ASYNC_CONCURRENCY", self.async_concurrency as u64),
            ("IDSYNC_CONNECTOR_TIMEOUT_MS", self.connector_timeout_ms),
            ("IDSYNC_RECON_PAGE_SIZE", self.reconciliation.page_size as u64),
            ("IDSYNC_RECON_CONCURRENCY", self.reconciliation.concurrency as u64),
        ];
        for (var, value) in checks {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    var: var.to_string(),
                    message: "Must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Connector call timeout.
    pub fn connector_timeout(&self) -> Duration {
        Duration::from_millis(self.connector_timeout_ms)
    }

    /// Set the async worker pool size.
    #[must_use]
    pub fn with_async_concurrency(mut self, async_concurrency: usize) -> Self {
        self.async_concurrency = async_concurrency;
        self
    }

    /// Set the failure policy.
    #[must_use]
    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    /// Set the connector call timeout.
    #[must_use]
    pub fn with_connector_timeout_ms(mut self, connector_timeout_ms: u64) -> Self {
        self.connector_timeout_ms = connector_timeout_ms;
        self
    }

    /// Set the reconciliation page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.reconciliation.page_size = page_size;
        self
    }
}

fn parse_var<F, T>(lookup: &F, var: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                var: var.to_string(),
                message: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.async_concurrency, 4);
        assert_eq!(config.connector_timeout(), Duration::from_secs(30));
        assert_eq!(config.failure_policy, FailurePolicy::Continue);
        assert!(config.persist_executions);
        assert_eq!(config.reconciliation.page_size, 100);
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("IDSYNC_ASYNC_CONCURRENCY", "8"),
            ("IDSYNC_FAILURE_POLICY", "fail-fast"),
            ("IDSYNC_PERSIST_EXECUTIONS", "false"),
            ("IDSYNC_RECON_PAGE_SIZE", " 25 "),
        ]))
        .unwrap();

        assert_eq!(config.async_concurrency, 8);
        assert_eq!(config.failure_policy, FailurePolicy::FailFast);
        assert!(!config.persist_executions);
        assert_eq!(config.reconciliation.page_size, 25);
    }

    #[test]
    fn test_invalid_values() {
        let err = EngineConfig::from_lookup(lookup(&[("IDSYNC_CONNECTOR_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("IDSYNC_CONNECTOR_TIMEOUT_MS"));

        let err =
            EngineConfig::from_lookup(lookup(&[("IDSYNC_RECON_CONCURRENCY", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var, .. } if var == "IDSYNC_RECON_CONCURRENCY"));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"failure_policy": "fail_fast", "reconciliation": {}}"#)
                .unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::FailFast);
        assert_eq!(config.reconciliation, ReconciliationConfig::default());
        assert_eq!(config.connector_timeout_ms, 30_000);
    }
}
