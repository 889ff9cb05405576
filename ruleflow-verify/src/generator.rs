use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ruleflow_core::{Rule, VarPath};

/// Expression pair proposed by the generation collaborator for a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionProposal {
    /// Dotted path the calculation result is written to.
    pub output_variable: Option<VarPath>,
    pub calculation_cel: String,
    /// Routing expression, or `None` when the rule is a final step.
    pub routing_cel: Option<String>,
}

/// Failures surfaced by a generation collaborator.
#[derive(Debug, Clone, Error)]
pub enum GeneratorError {
    #[error("generator rate limited")]
    RateLimited,

    #[error("generator server error: {0}")]
    Server(String),

    #[error("no generation collaborator is configured")]
    Unavailable,

    #[error("generation failed: {0}")]
    Failed(String),
}

impl GeneratorError {
    /// Transient failures are retried with a fixed backoff; anything
    /// else stops the retry loop immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, GeneratorError::RateLimited | GeneratorError::Server(_))
    }
}

/// Capability injected into the verification orchestrator: propose a
/// (possibly corrected) expression pair for a rule, given feedback about
/// why the previous attempt failed.
///
/// Keeping this behind a trait keeps the verifier itself free of any
/// network dependency and unit-testable offline.
#[async_trait]
pub trait ExpressionGenerator: Send + Sync {
    async fn propose(
        &self,
        rule: &Rule,
        feedback: Option<&str>,
    ) -> Result<ExpressionProposal, GeneratorError>;
}

/// Generator used when no collaborator is wired (e.g. the offline batch
/// CLI): every request reports that generation is unavailable, so rules
/// that fail verification go straight to manual review.
pub struct DisabledGenerator;

#[async_trait]
impl ExpressionGenerator for DisabledGenerator {
    async fn propose(
        &self,
        _rule: &Rule,
        _feedback: Option<&str>,
    ) -> Result<ExpressionProposal, GeneratorError> {
        Err(GeneratorError::Unavailable)
    }
}
