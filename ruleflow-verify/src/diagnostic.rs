use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of a verification finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Uses a token or function outside the dialect surface.
    Forbidden,
    /// Int/double, bool/string or comparison-type violation.
    TypeMismatch,
    /// Syntactically valid but semantically wrong (range bugs,
    /// unguarded division, precedence traps).
    LogicError,
    /// The expression does not parse at all.
    Syntax,
    /// Evaluator failure against sample data not explained by the
    /// sample's approximate types.
    RuntimeFault,
}

impl DiagnosticKind {
    pub fn label(&self) -> &'static str {
        match self {
            DiagnosticKind::Forbidden => "FORBIDDEN",
            DiagnosticKind::TypeMismatch => "TYPE ERROR",
            DiagnosticKind::LogicError => "LOGIC ERROR",
            DiagnosticKind::Syntax => "SYNTAX ERROR",
            DiagnosticKind::RuntimeFault => "RUNTIME ERROR",
        }
    }
}

/// A single verification finding. The message names the offending
/// substring and the exact legal alternative; it is reused verbatim as
/// feedback to the generation collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Forbidden, message)
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::TypeMismatch, message)
    }

    pub fn logic_error(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::LogicError, message)
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Syntax, message)
    }

    pub fn runtime_fault(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::RuntimeFault, message)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.message)
    }
}
