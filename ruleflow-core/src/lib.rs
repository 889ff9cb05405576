//! Core shared library for the Ruleflow platform.
//!
//! This crate exposes the primitives the verification and execution
//! services depend on: the typed value model, the dotted-path context,
//! the rule catalogue model and loader, common errors, configuration
//! loading and logging setup.

pub mod catalog;
pub mod config;
pub mod context;
pub mod errors;
pub mod logging;
pub mod path;
pub mod rule;
pub mod serde_utils;
pub mod value;

pub use context::Context;
pub use errors::{CoreError, Result as CoreResult};
pub use path::VarPath;
pub use rule::{DataAttribute, DataRequirement, OutgoingRoute, Rule, SkipReason};
pub use value::{ScalarKind, Value};
