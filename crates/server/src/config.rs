//! Server configuration, read once at startup from the environment.

use std::path::PathBuf;
use std::time::Duration;

use novel_dl_core::config::{env_or, ConfigError, FetchConfig};

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 47900;

/// Used only when `NOVEL_DL_JWT_SECRET` is unset. Fine for local runs.
pub const DEV_JWT_SECRET: &str = "novel-dl-dev-secret";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// `None` means the platform cache directory.
    pub db_path: Option<PathBuf>,
    pub jwt_secret: String,
    /// How long an unauthenticated push connection may stay open.
    pub auth_grace: Duration,
    /// Jobs executing concurrently.
    pub job_workers: usize,
    /// Jobs waiting for a worker before dispatch is refused.
    pub queue_capacity: usize,
    /// Delay between the cooperative cancel signal and the forced abort.
    pub cancel_grace: Duration,
    pub fetch: FetchConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            db_path: None,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            auth_grace: Duration::from_secs(10),
            job_workers: 2,
            queue_capacity: 64,
            cancel_grace: Duration::from_millis(2000),
            fetch: FetchConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = match std::env::var("NOVEL_DL_PORT").or_else(|_| std::env::var("PORT")) {
            Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "NOVEL_DL_PORT",
                expected: "port number",
                value: raw,
            })?,
            Err(_) => defaults.port,
        };

        let jwt_secret = match std::env::var("NOVEL_DL_JWT_SECRET") {
            Ok(s) if !s.trim().is_empty() => s,
            _ => {
                tracing::warn!("NOVEL_DL_JWT_SECRET not set, using the development secret");
                defaults.jwt_secret
            }
        };

        let config = Self {
            port,
            db_path: std::env::var_os("NOVEL_DL_DB_PATH").map(PathBuf::from),
            jwt_secret,
            auth_grace: Duration::from_secs(env_or(
                "NOVEL_DL_AUTH_GRACE_SECS",
                "integer (s)",
                10,
            )?),
            job_workers: env_or("NOVEL_DL_JOB_WORKERS", "positive integer", defaults.job_workers)?,
            queue_capacity: env_or(
                "NOVEL_DL_QUEUE_CAPACITY",
                "positive integer",
                defaults.queue_capacity,
            )?,
            cancel_grace: Duration::from_millis(env_or(
                "NOVEL_DL_CANCEL_GRACE_MS",
                "integer (ms)",
                2000,
            )?),
            fetch: FetchConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.job_workers == 0 {
            return Err(ConfigError::Inconsistent(
                "NOVEL_DL_JOB_WORKERS must be at least 1".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Inconsistent(
                "NOVEL_DL_QUEUE_CAPACITY must be at least 1".into(),
            ));
        }
        self.fetch.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "NOVEL_DL_PORT",
        "PORT",
        "NOVEL_DL_JOB_WORKERS",
        "NOVEL_MAX_RETRIES",
        "NOVEL_WATERMARKS",
    ];

    fn clear() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear();
        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.job_workers, 2);
        assert_eq!(config.fetch.max_retries, 3);
        assert_eq!(config.fetch.watermarks, vec!["妍希".to_string()]);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear();
        std::env::set_var("PORT", "8081");
        std::env::set_var("NOVEL_MAX_RETRIES", "5");
        std::env::set_var("NOVEL_WATERMARKS", "foo, bar,");
        let config = ServerConfig::from_env().unwrap();
        clear();

        assert_eq!(config.port, 8081);
        assert_eq!(config.fetch.max_retries, 5);
        assert_eq!(config.fetch.watermarks, vec!["foo", "bar"]);
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_garbage() {
        clear();
        std::env::set_var("NOVEL_DL_JOB_WORKERS", "many");
        let err = ServerConfig::from_env().unwrap_err();
        clear();
        assert!(err.to_string().contains("NOVEL_DL_JOB_WORKERS"));

        std::env::set_var("NOVEL_DL_JOB_WORKERS", "0");
        let err = ServerConfig::from_env().unwrap_err();
        clear();
        assert!(matches!(err, ConfigError::Inconsistent(_)));
    }
}
