//! Configuration management for shhh.
//!
//! Configuration can be set via environment variables:
//! - `SHHH_HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `SHHH_PORT` - Optional. Server port. Defaults to `8081`.
//! - `SHHH_PUBLIC_URL` - Optional. Base URL for read links. Defaults to `http://<host>:<port>`.
//! - `SHHH_STORE` - Optional. `memory` or `sqlite`. Defaults to `sqlite`.
//! - `SHHH_DATABASE_PATH` - Optional. SQLite file. Defaults to `./shhh.db`.
//! - `SHHH_SECRET_MAX_LENGTH` - Optional. Maximum secret length in characters. Defaults to `250`.
//! - `SHHH_KDF_ITERATIONS` - Optional. PBKDF2 iterations for new secrets. Defaults to `100000`.
//! - `SHHH_DEFAULT_TRIES` - Optional. Tries when a request omits them. Defaults to `5`.
//! - `SHHH_DEFAULT_EXPIRATION` - Optional. Expiration code when a request omits it. Defaults to `3d`.
//! - `SHHH_SWEEP_INTERVAL_SECS` - Optional. Seconds between expiry sweeps. Defaults to `60`.
//! - `SHHH_DB_LIVENESS_RETRY_COUNT` - Optional. Database ping attempts. Defaults to `5`.
//! - `SHHH_DB_LIVENESS_SLEEP_INTERVAL_MS` - Optional. Delay between pings. Defaults to `1000`.
//! - `SHHH_SERVE_UNSWEPT` - Optional. Keep serving expired secrets until swept. Defaults to `false`.
//! - `SHHH_BREACH_CHECK` - Optional. Look up every passphrase in Pwned Passwords. Defaults to `false`.
//! - `SHHH_BREACH_API_URL` - Optional. Pwned Passwords range endpoint.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::crypto::DEFAULT_ITERATIONS;
use crate::lifecycle::{ExpiredReadPolicy, LifecycleSettings};
use crate::secret::{is_allowed_tries, ExpirationCode, DEFAULT_READ_TRIES};
use crate::store::{LivenessCheck, SecretStoreType};
use crate::util::parse_bool;
use crate::validation::PWNED_PASSWORDS_API;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Public base URL used to build read links
    pub public_url: Option<String>,

    /// Storage backend
    pub store: SecretStoreType,

    /// SQLite database file, used when `store` is `Sqlite`
    pub database_path: PathBuf,

    pub secret_max_length: usize,

    /// PBKDF2 iterations written into new envelopes
    pub kdf_iterations: u32,

    pub default_tries: u32,

    pub default_expiration: ExpirationCode,

    pub sweep_interval: Duration,

    pub liveness: LivenessCheck,

    /// Serve expired secrets until the sweeper removes them
    pub serve_unswept: bool,

    /// Look every passphrase up in Pwned Passwords
    pub breach_check: bool,

    pub breach_api_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
            public_url: None,
            store: SecretStoreType::Sqlite,
            database_path: PathBuf::from("./shhh.db"),
            secret_max_length: 250,
            kdf_iterations: DEFAULT_ITERATIONS,
            default_tries: DEFAULT_READ_TRIES,
            default_expiration: ExpirationCode::default(),
            sweep_interval: Duration::from_secs(60),
            liveness: LivenessCheck::default(),
            serve_unswept: false,
            breach_check: false,
            breach_api_url: PWNED_PASSWORDS_API.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable is set but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from any name-to-value lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let host = lookup("SHHH_HOST").unwrap_or(defaults.host);
        let port = parse_var(&lookup, "SHHH_PORT", defaults.port)?;
        let public_url = lookup("SHHH_PUBLIC_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let store = match lookup("SHHH_STORE") {
            Some(value) => SecretStoreType::from_str(&value).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "SHHH_STORE".to_string(),
                    format!("unknown store {:?}", value),
                )
            })?,
            None => defaults.store,
        };

        let database_path = lookup("SHHH_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.database_path);

        let secret_max_length =
            parse_var(&lookup, "SHHH_SECRET_MAX_LENGTH", defaults.secret_max_length)?;
        if secret_max_length == 0 {
            return Err(invalid("SHHH_SECRET_MAX_LENGTH", "must be positive"));
        }

        let kdf_iterations = parse_var(&lookup, "SHHH_KDF_ITERATIONS", defaults.kdf_iterations)?;
        if kdf_iterations == 0 {
            return Err(invalid("SHHH_KDF_ITERATIONS", "must be positive"));
        }

        let default_tries = parse_var(&lookup, "SHHH_DEFAULT_TRIES", defaults.default_tries)?;
        if !is_allowed_tries(default_tries) {
            return Err(invalid("SHHH_DEFAULT_TRIES", "must be one of 3, 5, 10"));
        }

        let default_expiration: ExpirationCode =
            parse_var(&lookup, "SHHH_DEFAULT_EXPIRATION", defaults.default_expiration)?;
        if !default_expiration.is_allowed() {
            return Err(invalid(
                "SHHH_DEFAULT_EXPIRATION",
                "must be one of 10m, 30m, 1h, 3h, 6h, 1d, 2d, 3d, 5d, 7d",
            ));
        }

        let sweep_secs = parse_var(
            &lookup,
            "SHHH_SWEEP_INTERVAL_SECS",
            defaults.sweep_interval.as_secs(),
        )?;
        if sweep_secs == 0 {
            return Err(invalid("SHHH_SWEEP_INTERVAL_SECS", "must be positive"));
        }

        let retry_count = parse_var(
            &lookup,
            "SHHH_DB_LIVENESS_RETRY_COUNT",
            defaults.liveness.retry_count,
        )?;
        let sleep_ms = parse_var(
            &lookup,
            "SHHH_DB_LIVENESS_SLEEP_INTERVAL_MS",
            defaults.liveness.sleep_interval.as_millis() as u64,
        )?;

        let serve_unswept = lookup("SHHH_SERVE_UNSWEPT")
            .map(|v| parse_bool(&v))
            .unwrap_or(defaults.serve_unswept);
        let breach_check = lookup("SHHH_BREACH_CHECK")
            .map(|v| parse_bool(&v))
            .unwrap_or(defaults.breach_check);
        let breach_api_url = lookup("SHHH_BREACH_API_URL").unwrap_or(defaults.breach_api_url);

        Ok(Self {
            host,
            port,
            public_url,
            store,
            database_path,
            secret_max_length,
            kdf_iterations,
            default_tries,
            default_expiration,
            sweep_interval: Duration::from_secs(sweep_secs),
            liveness: LivenessCheck::new(retry_count, Duration::from_millis(sleep_ms)),
            serve_unswept,
            breach_check,
            breach_api_url,
        })
    }

    /// Base URL that read links start with, without a trailing slash.
    pub fn public_base_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }

    /// Lifecycle limits derived from this configuration.
    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            secret_max_length: self.secret_max_length,
            expired_reads: if self.serve_unswept {
                ExpiredReadPolicy::ServeUntilSwept
            } else {
                ExpiredReadPolicy::Reject
            },
            breach_check_always: self.breach_check,
        }
    }
}

fn invalid(name: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue(name.to_string(), reason.to_string())
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = from_pairs(&[]).unwrap();
        let defaults = Config::default();
        assert_eq!(config.host, defaults.host);
        assert_eq!(config.port, 8081);
        assert_eq!(config.public_url, None);
        assert_eq!(config.public_base_url(), "http://127.0.0.1:8081");
        assert_eq!(config.store, SecretStoreType::Sqlite);
        assert_eq!(config.database_path, PathBuf::from("./shhh.db"));
        assert_eq!(config.secret_max_length, 250);
        assert_eq!(config.kdf_iterations, 100_000);
        assert_eq!(config.default_tries, 5);
        assert_eq!(config.default_expiration.to_string(), "3d");
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.liveness, LivenessCheck::default());
        assert!(!config.serve_unswept);
        assert!(!config.breach_check);
        assert_eq!(config.breach_api_url, PWNED_PASSWORDS_API);
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("SHHH_HOST", "0.0.0.0"),
            ("SHHH_PORT", "9000"),
            ("SHHH_PUBLIC_URL", "https://shhh.example.org/"),
            ("SHHH_STORE", "memory"),
            ("SHHH_SECRET_MAX_LENGTH", "1000"),
            ("SHHH_DEFAULT_TRIES", "10"),
            ("SHHH_DEFAULT_EXPIRATION", "7d"),
            ("SHHH_DB_LIVENESS_RETRY_COUNT", "2"),
            ("SHHH_DB_LIVENESS_SLEEP_INTERVAL_MS", "250"),
            ("SHHH_SERVE_UNSWEPT", "yes"),
            ("SHHH_BREACH_CHECK", "1"),
        ])
        .unwrap();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.public_base_url(), "https://shhh.example.org");
        assert_eq!(config.store, SecretStoreType::Memory);
        assert_eq!(config.secret_max_length, 1000);
        assert_eq!(config.default_tries, 10);
        assert_eq!(config.default_expiration.to_string(), "7d");
        assert_eq!(
            config.liveness,
            LivenessCheck::new(2, Duration::from_millis(250))
        );

        let settings = config.lifecycle_settings();
        assert_eq!(settings.expired_reads, ExpiredReadPolicy::ServeUntilSwept);
        assert!(settings.breach_check_always);
        assert_eq!(settings.secret_max_length, 1000);
    }

    #[test]
    fn test_invalid_values() {
        for (name, value) in [
            ("SHHH_PORT", "eighty"),
            ("SHHH_STORE", "postgres"),
            ("SHHH_KDF_ITERATIONS", "0"),
            ("SHHH_DEFAULT_TRIES", "4"),
            ("SHHH_DEFAULT_EXPIRATION", "4d"),
            ("SHHH_DEFAULT_EXPIRATION", "soon"),
            ("SHHH_SWEEP_INTERVAL_SECS", "0"),
        ] {
            match from_pairs(&[(name, value)]) {
                Err(ConfigError::InvalidValue(var, _)) => assert_eq!(var, name),
                Ok(_) => panic!("{}={} should be rejected", name, value),
            }
        }
    }
}
