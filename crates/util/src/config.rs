use std::{env, fmt, net::SocketAddr, time::Duration};

use super::{server_bind_address, DEFAULT_DATABASE_URL};

const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 3_000;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    /// HS256 secret used to validate partner bearer tokens minted by the
    /// external auth system.
    pub token_secret: Vec<u8>,
    /// Per-attempt budget for outbound webhook deliveries.
    pub delivery_timeout: Duration,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        let database_url =
            env::var("APP_DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let token_secret = match env::var("APP_TOKEN_SECRET") {
            Ok(value) if !value.is_empty() => value.into_bytes(),
            _ if environment == Environment::Production => {
                return Err(ConfigError::MissingTokenSecret)
            }
            _ => b"dev-token-secret".to_vec(),
        };

        let delivery_timeout = match env::var("APP_DELIVERY_TIMEOUT_MS") {
            Ok(raw) => Duration::from_millis(
                raw.parse()
                    .map_err(|_| ConfigError::InvalidDeliveryTimeout(raw))?,
            ),
            Err(_) => Duration::from_millis(DEFAULT_DELIVERY_TIMEOUT_MS),
        };

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            token_secret,
            delivery_timeout,
        })
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    MissingTokenSecret,
    InvalidDeliveryTimeout(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::MissingTokenSecret => {
                write!(f, "APP_TOKEN_SECRET is required when APP_ENV=production")
            }
            Self::InvalidDeliveryTimeout(value) => write!(
                f,
                "APP_DELIVERY_TIMEOUT_MS must be a duration in milliseconds (got {value})"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    static ENV_GUARD: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    fn clear_env() {
        env::remove_var("APP_ENV");
        env::remove_var("APP_BIND_ADDR");
        env::remove_var("APP_DATABASE_URL");
        env::remove_var("APP_TOKEN_SECRET");
        env::remove_var("APP_DELIVERY_TIMEOUT_MS");
    }

    #[test]
    fn loads_defaults_in_development() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();

        let config = AppConfig::from_env().expect("config should load with defaults");
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.token_secret, b"dev-token-secret");
        assert_eq!(config.delivery_timeout, Duration::from_millis(3_000));
    }

    #[test]
    fn rejects_invalid_environment() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("APP_ENV", "invalid");

        let err = AppConfig::from_env().expect_err("invalid env should error");
        assert!(matches!(err, ConfigError::InvalidEnvironment(value) if value == "invalid"));

        env::remove_var("APP_ENV");
    }

    #[test]
    fn production_requires_token_secret() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("APP_ENV", "production");

        let err = AppConfig::from_env().expect_err("missing secret should error");
        assert!(matches!(err, ConfigError::MissingTokenSecret));

        env::set_var("APP_TOKEN_SECRET", "prod-secret");
        let config = AppConfig::from_env().expect("config should load");
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.token_secret, b"prod-secret");

        clear_env();
    }

    #[test]
    fn parses_delivery_timeout_override() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("APP_DELIVERY_TIMEOUT_MS", "250");

        let config = AppConfig::from_env().expect("config should load");
        assert_eq!(config.delivery_timeout, Duration::from_millis(250));

        env::set_var("APP_DELIVERY_TIMEOUT_MS", "fast");
        let err = AppConfig::from_env().expect_err("non-numeric timeout should error");
        assert!(matches!(err, ConfigError::InvalidDeliveryTimeout(_)));

        clear_env();
    }
}
