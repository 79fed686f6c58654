//! Fetch engine configuration, read from `NOVEL_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a valid {expected}, got: '{value}'")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("{0}")]
    Inconsistent(String),
}

/// Parse an environment variable, falling back to `default` when unset.
pub fn env_or<T: FromStr>(
    var: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            expected,
            value,
        }),
        Err(_) => Ok(default),
    }
}

pub const DEFAULT_API_BASE_URL: &str = "https://fanqie.hnxianxin.cn";

/// Tunables for the Unit Fetcher and Batch Retriever.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Base URL of the upstream unit source.
    pub api_base_url: String,
    /// Batch Retriever concurrency.
    pub max_workers: usize,
    /// Total number of request attempts per unit.
    pub max_retries: u32,
    /// Lower bound of the jittered pre-request delay.
    pub min_wait: Duration,
    /// Upper bound of the jittered pre-request delay.
    pub max_wait: Duration,
    pub connect_timeout: Duration,
    /// Whole-request timeout (connect + response).
    pub request_timeout: Duration,
    /// Backoff after the k-th failed attempt is `backoff_base * 2^k`.
    pub backoff_base: Duration,
    /// Strings removed from every retrieved payload.
    pub watermarks: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            max_workers: 5,
            max_retries: 3,
            min_wait: Duration::from_millis(800),
            max_wait: Duration::from_millis(1500),
            connect_timeout: Duration::from_secs_f64(3.1),
            request_timeout: Duration::from_secs(20),
            backoff_base: Duration::from_millis(500),
            watermarks: vec!["妍希".to_string()],
        }
    }
}

impl FetchConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let api_base_url = std::env::var("NOVEL_API_BASE_URL")
            .ok()
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.api_base_url);

        let watermarks = match std::env::var("NOVEL_WATERMARKS") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            Err(_) => defaults.watermarks,
        };

        let config = Self {
            api_base_url,
            max_workers: env_or("NOVEL_MAX_WORKERS", "positive integer", defaults.max_workers)?,
            max_retries: env_or("NOVEL_MAX_RETRIES", "positive integer", defaults.max_retries)?,
            min_wait: Duration::from_millis(env_or("NOVEL_MIN_WAIT_TIME", "integer (ms)", 800)?),
            max_wait: Duration::from_millis(env_or("NOVEL_MAX_WAIT_TIME", "integer (ms)", 1500)?),
            connect_timeout: Duration::from_secs_f64(env_or(
                "NOVEL_MIN_CONNECT_TIMEOUT",
                "number (s)",
                3.1_f64,
            )?),
            request_timeout: Duration::from_secs(env_or("NOVEL_REQUEST_TIMEOUT", "integer (s)", 20)?),
            backoff_base: Duration::from_millis(env_or("NOVEL_BACKOFF_BASE_MS", "integer (ms)", 500)?),
            watermarks,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Inconsistent(
                "NOVEL_MAX_WORKERS must be at least 1".into(),
            ));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Inconsistent(
                "NOVEL_MAX_RETRIES must be at least 1".into(),
            ));
        }
        if self.min_wait > self.max_wait {
            return Err(ConfigError::Inconsistent(format!(
                "NOVEL_MIN_WAIT_TIME ({}ms) exceeds NOVEL_MAX_WAIT_TIME ({}ms)",
                self.min_wait.as_millis(),
                self.max_wait.as_millis()
            )));
        }
        Ok(())
    }
}
