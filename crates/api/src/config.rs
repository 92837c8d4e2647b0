//! Application configuration loaded from environment variables.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a non-negative integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
}

/// Log output format, selected with `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `LOG_FORMAT`: `json` for JSON logs, anything else is human readable
/// - `DATABASE_URL`: Postgres store; the in-memory store when unset
/// - `NATS_URL`: outbox messages go to NATS; dropped when unset
/// - `TAX_PROVIDER_URL`, `TAX_PROVIDER_API_KEY`: external tax provider
/// - `SETTINGS_URL`: settings service serving `/settings/tax`
/// - `TAX_HTTP_TIMEOUT_SECS` (10): per-request limit for both; keep it well
///   below the recovery grace
/// - `RESERVATION_TTL_SECS` (900), `SWEEP_INTERVAL_SECS` (300),
///   `OUTBOX_INTERVAL_SECS` (5), `RECOVERY_INTERVAL_SECS` (60),
///   `CHECKOUT_RECOVERY_GRACE_SECS` (120), `FLAT_SHIPPING_CENTS` (999)
///
/// Blank values count as unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub nats_url: Option<String>,
    pub tax_provider_url: Option<String>,
    pub tax_provider_api_key: Option<String>,
    pub settings_url: Option<String>,
    pub tax_http_timeout_secs: u64,
    pub reservation_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub outbox_interval_secs: u64,
    pub recovery_interval_secs: u64,
    pub recovery_grace_secs: u64,
    pub flat_shipping_cents: u64,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let number = |name: &'static str, default: u64| -> Result<u64, ConfigError> {
            match var(name) {
                None => Ok(default),
                Some(value) => value
                    .parse()
                    .map_err(|_| ConfigError::InvalidNumber { name, value }),
            }
        };
        let defaults = Self::default();

        let port = number("PORT", u64::from(defaults.port))?;
        let port = u16::try_from(port).map_err(|_| ConfigError::InvalidNumber {
            name: "PORT",
            value: port.to_string(),
        })?;

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port,
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match var("LOG_FORMAT").as_deref() {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            database_url: var("DATABASE_URL"),
            nats_url: var("NATS_URL"),
            tax_provider_url: var("TAX_PROVIDER_URL"),
            tax_provider_api_key: var("TAX_PROVIDER_API_KEY"),
            settings_url: var("SETTINGS_URL"),
            tax_http_timeout_secs: number("TAX_HTTP_TIMEOUT_SECS", defaults.tax_http_timeout_secs)?,
            reservation_ttl_secs: number("RESERVATION_TTL_SECS", defaults.reservation_ttl_secs)?,
            sweep_interval_secs: number("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?,
            outbox_interval_secs: number("OUTBOX_INTERVAL_SECS", defaults.outbox_interval_secs)?,
            recovery_interval_secs: number(
                "RECOVERY_INTERVAL_SECS",
                defaults.recovery_interval_secs,
            )?,
            recovery_grace_secs: number(
                "CHECKOUT_RECOVERY_GRACE_SECS",
                defaults.recovery_grace_secs,
            )?,
            flat_shipping_cents: number("FLAT_SHIPPING_CENTS", defaults.flat_shipping_cents)?,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn outbox_interval(&self) -> Duration {
        Duration::from_secs(self.outbox_interval_secs.max(1))
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_interval_secs.max(1))
    }

    pub fn tax_http_timeout(&self) -> Duration {
        Duration::from_secs(self.tax_http_timeout_secs.max(1))
    }

    pub fn recovery_grace(&self) -> Duration {
        Duration::from_secs(self.recovery_grace_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            nats_url: None,
            tax_provider_url: None,
            tax_provider_api_key: None,
            settings_url: None,
            tax_http_timeout_secs: 10,
            reservation_ttl_secs: 900,
            sweep_interval_secs: 300,
            outbox_interval_secs: 5,
            recovery_interval_secs: 60,
            recovery_grace_secs: 120,
            flat_shipping_cents: 999,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.reservation_ttl_secs, 900);
        assert_eq!(config.flat_shipping_cents, 999);
    }

    #[test]
    fn test_empty_environment_gives_defaults() {
        assert_eq!(load(&[]).unwrap(), Config::default());
    }

    #[test]
    fn test_reads_overrides() {
        let config = load(&[
            ("PORT", "8080"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/checkout"),
            ("TAX_PROVIDER_URL", "https://tax.example.com"),
            ("RESERVATION_TTL_SECS", "60"),
            ("FLAT_SHIPPING_CENTS", "0"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/checkout")
        );
        assert_eq!(config.tax_provider_url.as_deref(), Some("https://tax.example.com"));
        assert!(config.nats_url.is_none());
        assert_eq!(config.reservation_ttl_secs, 60);
        assert_eq!(config.flat_shipping_cents, 0);
    }

    #[test]
    fn test_blank_values_are_unset() {
        let config = load(&[("NATS_URL", "  "), ("SWEEP_INTERVAL_SECS", "")]).unwrap();
        assert!(config.nats_url.is_none());
        assert_eq!(config.sweep_interval_secs, 300);
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        let err = load(&[("RECOVERY_INTERVAL_SECS", "soon")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidNumber {
                name: "RECOVERY_INTERVAL_SECS",
                value: "soon".to_string()
            }
        );
        assert!(load(&[("PORT", "70000")]).is_err());
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_intervals_never_zero() {
        let config = Config {
            outbox_interval_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.outbox_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_tax_http_timeout() {
        let config = Config::default();
        assert_eq!(config.tax_http_timeout(), Duration::from_secs(10));
        assert!(config.tax_http_timeout() < config.recovery_grace());

        let config = load(&[("TAX_HTTP_TIMEOUT_SECS", "3")]).unwrap();
        assert_eq!(config.tax_http_timeout(), Duration::from_secs(3));
    }
}
