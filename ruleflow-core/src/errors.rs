use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type used across the Ruleflow core crate.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Canonical error representation shared by the Ruleflow services.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("i/o error at {path}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("catalogue path does not exist: {0}")]
    MissingPath(String),

    #[error("failed to parse rule catalogue from {path}: {message}")]
    CatalogParse { path: String, message: String },

    #[error("duplicate rule identifier detected: {id}")]
    DuplicateRule { id: String },

    #[error("unsupported context value: {0}")]
    UnsupportedValue(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("general error: {0}")]
    General(String),
}

impl CoreError {
    pub fn from_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CoreError::Io {
            path: path.into().display().to_string(),
            source,
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Deserialization(err.to_string())
    }
}

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        CoreError::General(err.to_string())
    }
}

/// Dedicated configuration error used by the configuration module.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable missing: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for environment variable {key}: {message}")]
    InvalidEnvVar { key: String, message: String },
}

impl From<ConfigError> for CoreError {
    fn from(value: ConfigError) -> Self {
        CoreError::Config(value.to_string())
    }
}
