//! Process configuration sourced from the environment.
//!
//! All knobs have working defaults except provider credentials; the
//! service starts without them and reports their absence through the
//! health endpoint instead of refusing to boot.

use crate::recovery::RecoveryConfig;
use thiserror::Error;

/// Errors raised while reading the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable was set but did not parse.
    #[error("invalid value for {name}: {value}")]
    InvalidValue {
        /// The variable name.
        name: &'static str,
        /// The offending raw value.
        value: String,
    },
}

/// Resolved service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// API key for the primary generative provider.
    pub primary_api_key: Option<String>,
    /// Base URL for the primary provider's HTTP endpoint.
    pub primary_api_url: Option<String>,
    /// API key for the secondary fallback provider.
    pub secondary_api_key: Option<String>,
    /// Base URL for the secondary provider's HTTP endpoint.
    pub secondary_api_url: Option<String>,
    /// Recovery knobs applied to every step.
    pub recovery: RecoveryConfig,
    /// Socket address the HTTP server binds to.
    pub bind_addr: String,
    /// Deployment environment name ("production" hides error detail).
    pub environment: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            primary_api_key: None,
            primary_api_url: None,
            secondary_api_key: None,
            secondary_api_url: None,
            recovery: RecoveryConfig::default(),
            bind_addr: "0.0.0.0:3000".to_string(),
            environment: "development".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Reads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when a numeric override is
    /// set but unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut recovery = RecoveryConfig::default();
        if let Some(v) = read_parsed::<u32>("LESSONFLOW_MAX_RETRIES")? {
            recovery.max_retries = v;
        }
        if let Some(v) = read_parsed::<u64>("LESSONFLOW_INITIAL_BACKOFF_MS")? {
            recovery.initial_backoff_ms = v;
        }
        if let Some(v) = read_parsed::<u64>("LESSONFLOW_MAX_BACKOFF_MS")? {
            recovery.max_backoff_ms = v;
        }

        Ok(Self {
            primary_api_key: read("PRIMARY_API_KEY"),
            primary_api_url: read("PRIMARY_API_URL"),
            secondary_api_key: read("SECONDARY_API_KEY"),
            secondary_api_url: read("SECONDARY_API_URL"),
            recovery,
            bind_addr: read("LESSONFLOW_BIND").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            environment: read("LESSONFLOW_ENV").unwrap_or_else(|| "development".to_string()),
        })
    }

    /// True iff the primary provider is fully configured.
    #[must_use]
    pub fn has_primary_credentials(&self) -> bool {
        self.primary_api_key.is_some() && self.primary_api_url.is_some()
    }

    /// True iff the secondary provider is fully configured.
    #[must_use]
    pub fn has_secondary_credentials(&self) -> bool {
        self.secondary_api_key.is_some() && self.secondary_api_url.is_some()
    }

    /// True iff error detail must be withheld from HTTP responses.
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

fn read(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn read_parsed<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match read(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
    }
}
