use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ruleflow_core::{Context, Value};

use crate::executor::{RunResult, RunStatus, StepRecord};

/// Serializable summary of one execution run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub start_rule: String,
    pub data_row_index: usize,
    pub initial_context: serde_json::Value,
    pub final_context: Context,
    /// Final context flattened into dotted-path variables for quick
    /// inspection.
    pub context_variables: BTreeMap<String, Value>,
    pub trace: Vec<StepRecord>,
    pub total_steps: usize,
    pub status: RunStatus,
}

impl RunSummary {
    pub fn from_result(
        start_rule: impl Into<String>,
        data_row_index: usize,
        initial_context: &Context,
        result: RunResult,
    ) -> Self {
        Self {
            start_rule: start_rule.into(),
            data_row_index,
            initial_context: initial_context.to_json(),
            context_variables: result.final_context.flatten(),
            total_steps: result.total_steps(),
            status: result.status,
            trace: result.trace,
            final_context: result.final_context,
        }
    }

    /// Compact `A -> B -> C` rendering of the traversed path.
    pub fn path(&self) -> String {
        self.trace
            .iter()
            .map(|step| step.rule_id.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

/// Batch execution report written once at the end of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub generated_at: DateTime<Utc>,
    pub starting_rules_count: usize,
    pub total_runs: usize,
    pub total_steps: usize,
    pub results: Vec<RunSummary>,
}

impl ExecutionReport {
    pub fn new(starting_rules_count: usize, mut results: Vec<RunSummary>) -> Self {
        results.sort_by(|a, b| {
            a.start_rule
                .cmp(&b.start_rule)
                .then(a.data_row_index.cmp(&b.data_row_index))
        });
        Self {
            generated_at: Utc::now(),
            starting_rules_count,
            total_runs: results.len(),
            total_steps: results.iter().map(|r| r.total_steps).sum(),
            results,
        }
    }

    /// Every run ended without a single successful step.
    pub fn all_failed(&self) -> bool {
        self.total_runs > 0 && self.total_steps == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{} runs over {} starting rules, {} total steps",
            self.total_runs, self.starting_rules_count, self.total_steps
        )
    }
}
