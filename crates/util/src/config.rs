use std::{env, fmt, time::Duration};

use super::database_url;

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

/// Default quiet period before an edited draft is persisted automatically.
pub const DEFAULT_DEBOUNCE_MS: u64 = 750;

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub database_url: String,
    pub autosave_debounce: Duration,
    pub autosave_enabled: bool,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;

        let debounce_ms = match env::var("AUTOSAVE_DEBOUNCE_MS") {
            Ok(raw) => raw
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidDebounceWindow(raw.clone()))?,
            Err(_) => DEFAULT_DEBOUNCE_MS,
        };
        if debounce_ms == 0 {
            return Err(ConfigError::InvalidDebounceWindow("0".to_string()));
        }

        let autosave_enabled = match env::var("AUTOSAVE_ENABLED") {
            Ok(raw) => match raw.as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => return Err(ConfigError::InvalidAutosaveFlag(raw)),
            },
            Err(_) => true,
        };

        Ok(Self {
            environment,
            database_url: database_url(),
            autosave_debounce: Duration::from_millis(debounce_ms),
            autosave_enabled,
        })
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    InvalidDebounceWindow(String),
    InvalidAutosaveFlag(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::InvalidDebounceWindow(value) => write!(
                f,
                "AUTOSAVE_DEBOUNCE_MS must be a positive integer number of milliseconds (got {value})"
            ),
            Self::InvalidAutosaveFlag(value) => {
                write!(f, "AUTOSAVE_ENABLED must be 'true' or 'false' (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
