use thiserror::Error;

use ruleflow_core::CoreError;

/// Errors raised by the execution engine and its batch runtime.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("duplicate rule identifier: {0}")]
    DuplicateRule(String),

    #[error("starting rule not found: {0}")]
    StartRuleNotFound(String),

    #[error("data path does not exist: {0}")]
    MissingPath(String),

    #[error("failed to parse data file {path}: {message}")]
    DataParse { path: String, message: String },

    #[error("runtime is shutting down")]
    ShuttingDown,

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}
