//! Configuration management for RateWatch
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `RATEWATCH__SECTION__KEY` environment variables.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "RATEWATCH";

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP API server configuration
    pub server: ServerConfig,

    /// SOAP protocol listener configuration
    pub protocol: ProtocolConfig,

    /// Upstream rate source configuration
    pub upstream: UpstreamConfig,

    /// Alert scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Outbound mail configuration
    pub smtp: SmtpConfig,

    /// Currency catalog configuration
    pub currencies: CurrencyConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("currencies.supported")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

/// HTTP API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// HTTP API port
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8000,
        }
    }
}

/// SOAP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Whether to start the listener with `serve`
    pub enabled: bool,
    /// Host to bind to
    pub host: String,
    /// Listener port
    pub port: u16,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 8001,
        }
    }
}

/// Upstream rate source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the NBP API
    pub base_url: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Widest date range a single request may span, in days
    pub max_range_days: u32,
    /// Days of history scanned when resolving the latest value
    pub lookback_days: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.nbp.pl/api".to_string(),
            timeout_secs: 15,
            max_range_days: 93,
            lookback_days: 10,
        }
    }
}

/// Alert scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Whether to start the scheduler with `serve`
    pub enabled: bool,
    /// Check interval in seconds
    pub check_interval_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_seconds: 15 * 60,
        }
    }
}

/// Outbound mail configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// SMTP relay host
    pub host: String,
    /// SMTP relay port (STARTTLS)
    pub port: u16,
    /// Login user, if the relay requires authentication
    pub username: Option<String>,
    /// Login password
    pub password: Option<String>,
    /// Sender address
    pub from_address: String,
    /// Sender display name, also used to sign the message body
    pub from_name: String,
    /// Connection and command timeout in seconds
    pub timeout_secs: u64,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "smtp.gmail.com".to_string(),
            port: 587,
            username: None,
            password: None,
            from_address: "alerts@ratewatch.local".to_string(),
            from_name: "NBP Currency Alert".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Currency catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CurrencyConfig {
    /// Currency all upstream rates are quoted against
    pub anchor: String,
    /// Codes accepted by the HTTP API
    pub supported: Vec<String>,
}

impl CurrencyConfig {
    /// Whether a code (any case) is in the supported list
    pub fn is_supported(&self, code: &str) -> bool {
        self.supported.iter().any(|c| c.eq_ignore_ascii_case(code))
    }
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        let supported = [
            "USD", "EUR", "CHF", "GBP", "AUD", "CAD", "HUF", "JPY", "CZK", "DKK", "NOK", "SEK",
            "CNY", "KRW", "BGN", "TRY", "ILS", "NZD", "SGD", "RON", "MXN", "ZAR", "BRL", "MYR",
            "PHP", "THB", "INR", "IDR", "HKD", "CLP", "UAH",
        ];

        Self {
            anchor: "PLN".to_string(),
            supported: supported.iter().map(|c| (*c).to_string()).collect(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_upstream_limits() {
        let config = Config::default();
        assert_eq!(config.upstream.max_range_days, 93);
        assert_eq!(config.upstream.lookback_days, 10);
        assert_eq!(config.upstream.timeout_secs, 15);
        assert_eq!(config.scheduler.check_interval_seconds, 900);
        assert_eq!(config.currencies.anchor, "PLN");
        assert_eq!(config.currencies.supported.len(), 31);
    }

    #[test]
    fn supported_lookup_ignores_case() {
        let currencies = CurrencyConfig::default();
        assert!(currencies.is_supported("eur"));
        assert!(currencies.is_supported("USD"));
        assert!(!currencies.is_supported("XYZ"));
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(
            file,
            "[upstream]\nmax_range_days = 30\n\n[scheduler]\ncheck_interval_seconds = 60"
        )
        .expect("write config");

        let config = Config::load(Some(file.path())).expect("config loads");
        assert_eq!(config.upstream.max_range_days, 30);
        assert_eq!(config.scheduler.check_interval_seconds, 60);
        assert_eq!(config.upstream.lookback_days, 10);
        assert_eq!(config.server.http_port, 8000);
    }
}
