//! Rule-graph execution engine.
//!
//! Walks a repository of rules from a starting point using the
//! compute-then-route pattern: evaluate the calculation expression
//! against the accumulating context, write the result, evaluate the
//! routing expression against the updated context to pick the next
//! rule, and stop on loops, step ceilings or terminal rules. A batch
//! runtime executes independent (starting rule, data row) runs across
//! worker tasks.

pub mod data;
pub mod error;
pub mod executor;
pub mod prepare;
pub mod report;
pub mod repo;
pub mod runtime;
pub mod sanitize;
pub mod scheduler;
pub mod task;

pub use data::DataSet;
pub use error::EngineError;
pub use executor::{Executor, RunResult, RunStatus, StepRecord, LOOP_WINDOW, MAX_STEPS};
pub use report::{ExecutionReport, RunSummary};
pub use repo::RuleRepository;
pub use runtime::{run_batch, BatchRuntime, EngineRunHandler, RunHandler, RuntimeHandle};
pub use sanitize::{sanitize_routes, NoopResolver, RouteResolver, SanitizeReport};
pub use scheduler::RunScheduler;
pub use task::{RunRecord, RunRequest, RunState};
