//! The constrained policy-expression dialect.
//!
//! This crate defines the entire legal surface of the dialect (a minimal,
//! strictly typed CEL subset) and provides the embedded lexer, parser and
//! evaluator the verification and execution services share. Anything
//! outside the surface described by [`grammar`] is illegal by
//! construction.

pub mod ast;
pub mod error;
pub mod eval;
pub mod grammar;
pub mod parser;
pub mod token;

pub use ast::{BinaryOp, Expr, Literal, UnaryOp};
pub use error::EvalError;
pub use eval::{evaluate, evaluate_ast};
pub use parser::parse;
