use std::env;

use crate::errors::ConfigError;

/// Runtime environment used by the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    fn from_str(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "staging" | "stage" => Environment::Staging,
            _ => Environment::Development,
        }
    }
}

/// Global configuration shared by the batch tools.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub environment: Environment,
    /// Worker tasks used by the batch execution runtime.
    pub worker_count: usize,
    /// Total attempts the verification orchestrator may spend per rule.
    pub max_verification_attempts: usize,
    /// Fixed backoff, in milliseconds, between transient generator retries.
    pub retry_backoff_ms: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            worker_count: 4,
            max_verification_attempts: 5,
            retry_backoff_ms: 1_000,
        }
    }
}

impl CoreConfig {
    /// Loads configuration from `RULEFLOW_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env_with_prefix("RULEFLOW_")
    }

    /// Loads configuration from env vars carrying the provided prefix.
    pub fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        let key = |suffix: &str| format!("{prefix}{suffix}");

        let environment = env::var(key("ENV"))
            .map(|raw| Environment::from_str(&raw))
            .unwrap_or_default();

        let defaults = CoreConfig::default();
        let worker_count = parse_var(&key("WORKERS"), defaults.worker_count)?;
        let max_verification_attempts =
            parse_var(&key("MAX_ATTEMPTS"), defaults.max_verification_attempts)?;
        let retry_backoff_ms = parse_var(&key("RETRY_BACKOFF_MS"), defaults.retry_backoff_ms)?;

        Ok(Self {
            environment,
            worker_count: worker_count.max(1),
            max_verification_attempts: max_verification_attempts.max(1),
            retry_backoff_ms,
        })
    }

    pub fn is_production(&self) -> bool {
        matches!(self.environment, Environment::Production)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|err| ConfigError::InvalidEnvVar {
            key: key.to_string(),
            message: format!("{err}"),
        }),
        Err(_) => Ok(default),
    }
}
