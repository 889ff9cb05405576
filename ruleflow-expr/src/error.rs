use thiserror::Error;

/// Failures raised by the embedded expression evaluator.
///
/// The taxonomy matters as much as the messages: the structural validity
/// checker treats only the parse family as a hard failure, and the test
/// executor tolerates the data-dependent family because synthesized
/// sample data is only approximately typed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("failed to parse expression: {0}")]
    Parse(String),

    #[error("no matching overload for '{op}' between {lhs} and {rhs}")]
    Overload {
        op: String,
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("ternary condition must be a boolean, found {0}")]
    TernaryCondition(&'static str),

    #[error("division by zero")]
    DivisionByZero,

    #[error("{function}() cannot convert {found}")]
    Conversion {
        function: &'static str,
        found: &'static str,
    },

    #[error("method .{method}() requires a string receiver, found {found}")]
    MethodReceiver {
        method: String,
        found: &'static str,
    },

    #[error("{function}() expects {expected} argument(s), found {found}")]
    Arity {
        function: String,
        expected: usize,
        found: usize,
    },

    #[error("unknown function: {0}()")]
    UnknownFunction(String),

    #[error("unknown method: .{0}()")]
    UnknownMethod(String),
}

impl EvalError {
    /// Whether the expression failed to parse at all.
    pub fn is_parse(&self) -> bool {
        matches!(self, EvalError::Parse(_))
    }

    /// Whether the failure can be explained by absent or approximately
    /// typed data rather than by the expression itself.
    pub fn is_data_dependent(&self) -> bool {
        matches!(
            self,
            EvalError::Overload { .. }
                | EvalError::TernaryCondition(_)
                | EvalError::DivisionByZero
                | EvalError::Conversion { .. }
                | EvalError::MethodReceiver { .. }
        )
    }

    /// Whether the failure is a division by zero, degraded to a null
    /// result by the execution engine.
    pub fn is_division_by_zero(&self) -> bool {
        matches!(self, EvalError::DivisionByZero)
    }
}
