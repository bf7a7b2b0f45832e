use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::workflows::booking::ConfirmationPolicy;

/// Distinguishes runtime behavior for different stages of the service.
///
/// Informational only: the confirmation policy is configured separately and is
/// never inferred from the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub booking: BookingConfig,
    pub payment: EndpointConfig,
    pub sync: EndpointConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            booking: BookingConfig::from_env()?,
            payment: EndpointConfig::from_env("PAYMENT_API_URL", "PAYMENT_API_KEY"),
            sync: EndpointConfig::from_env("SYNC_API_URL", "SYNC_API_KEY"),
        })
    }

    /// Production must use a remote payment coordinator.
    pub fn check_payment_backend(&self) -> Result<(), ConfigError> {
        if self.environment == AppEnvironment::Production && self.payment.base_url.is_none() {
            return Err(ConfigError::SimulatedPaymentsInProduction);
        }
        Ok(())
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Lifecycle rules handed to the booking orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingConfig {
    pub confirmation_policy: ConfirmationPolicy,
    pub cancellation_window_hours: i64,
    pub currency: String,
    pub reconcile_interval: Duration,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            confirmation_policy: ConfirmationPolicy::Strict,
            cancellation_window_hours: 24,
            currency: "usd".to_string(),
            reconcile_interval: Duration::from_secs(60),
        }
    }
}

impl BookingConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let confirmation_policy = match env::var("BOOKING_CONFIRMATION_POLICY") {
            Ok(raw) => ConfirmationPolicy::parse(&raw).ok_or(ConfigError::InvalidPolicy(raw))?,
            Err(_) => defaults.confirmation_policy,
        };

        let cancellation_window_hours = match env::var("BOOKING_CANCELLATION_WINDOW_HOURS") {
            Ok(raw) => raw
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|hours| *hours >= 0)
                .ok_or(ConfigError::InvalidWindow)?,
            Err(_) => defaults.cancellation_window_hours,
        };

        let currency = match env::var("BOOKING_CURRENCY") {
            Ok(raw) => {
                let code = raw.trim().to_ascii_lowercase();
                if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                    return Err(ConfigError::InvalidCurrency(raw));
                }
                code
            }
            Err(_) => defaults.currency,
        };

        let reconcile_interval = match env::var("BOOKING_RECONCILE_INTERVAL_SECS") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .ok_or(ConfigError::InvalidInterval)?,
            Err(_) => defaults.reconcile_interval,
        };

        Ok(Self {
            confirmation_policy,
            cancellation_window_hours,
            currency,
            reconcile_interval,
        })
    }
}

/// Optional remote collaborator; absent URL selects the in-process adapter.
#[derive(Debug, Clone, Default)]
pub struct EndpointConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl EndpointConfig {
    fn from_env(url_var: &str, key_var: &str) -> Self {
        let base_url = env::var(url_var)
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty());
        let api_key = env::var(key_var).ok().filter(|value| !value.is_empty());
        Self { base_url, api_key }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidPolicy(String),
    InvalidWindow,
    InvalidCurrency(String),
    InvalidInterval,
    SimulatedPaymentsInProduction,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidPolicy(value) => write!(
                f,
                "BOOKING_CONFIRMATION_POLICY must be 'strict' or 'relaxed' (got '{value}')"
            ),
            ConfigError::InvalidWindow => write!(
                f,
                "BOOKING_CANCELLATION_WINDOW_HOURS must be a non-negative integer"
            ),
            ConfigError::InvalidCurrency(value) => write!(
                f,
                "BOOKING_CURRENCY must be a three letter currency code (got '{value}')"
            ),
            ConfigError::InvalidInterval => write!(
                f,
                "BOOKING_RECONCILE_INTERVAL_SECS must be a positive integer"
            ),
            ConfigError::SimulatedPaymentsInProduction => write!(
                f,
                "PAYMENT_API_URL is required when APP_ENV is production"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for var in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "BOOKING_CONFIRMATION_POLICY",
            "BOOKING_CANCELLATION_WINDOW_HOURS",
            "BOOKING_CURRENCY",
            "BOOKING_RECONCILE_INTERVAL_SECS",
            "PAYMENT_API_URL",
            "PAYMENT_API_KEY",
            "SYNC_API_URL",
            "SYNC_API_KEY",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.booking, BookingConfig::default());
        assert!(config.payment.base_url.is_none());
        assert!(config.sync.base_url.is_none());
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
    }

    #[test]
    fn confirmation_policy_is_independent_of_environment() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_ENV", "development");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.booking.confirmation_policy, ConfirmationPolicy::Strict);

        env::set_var("BOOKING_CONFIRMATION_POLICY", "relaxed");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(
            config.booking.confirmation_policy,
            ConfirmationPolicy::Relaxed
        );
        reset_env();
    }

    #[test]
    fn rejects_unknown_policy_and_bad_currency() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("BOOKING_CONFIRMATION_POLICY", "whatever");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidPolicy(_))
        ));

        reset_env();
        env::set_var("BOOKING_CURRENCY", "dollars");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidCurrency(_))
        ));
        reset_env();
    }

    #[test]
    fn endpoint_urls_are_trimmed() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("SYNC_API_URL", "https://pms.example.test/");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(
            config.sync.base_url.as_deref(),
            Some("https://pms.example.test")
        );
        reset_env();
    }

    #[test]
    fn production_requires_a_payment_endpoint() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_ENV", "production");
        let config = AppConfig::load().expect("config loads");
        assert!(matches!(
            config.check_payment_backend(),
            Err(ConfigError::SimulatedPaymentsInProduction)
        ));

        env::set_var("PAYMENT_API_URL", "https://payments.example.test");
        let config = AppConfig::load().expect("config loads");
        assert!(config.check_payment_backend().is_ok());

        reset_env();
        let config = AppConfig::load().expect("config loads");
        assert!(config.check_payment_backend().is_ok());
    }
}
