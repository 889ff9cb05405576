use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ruleflow_core::{Context, SkipReason, Value, VarPath};
use ruleflow_expr::{evaluate, EvalError};

use crate::data::DataSet;
use crate::prepare::prepare;
use crate::repo::RuleRepository;

/// Hard ceiling on steps per run, independent of loop detection.
pub const MAX_STEPS: usize = 200;

/// Number of trailing visits inspected for a repeating pattern.
pub const LOOP_WINDOW: usize = 6;

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunStatus {
    /// Natural end: a final rule, no routing expression, or a routing
    /// expression that produced no target.
    Completed,
    /// Routed to an identifier the repository does not know.
    UnknownOrTerminal { rule_id: String },
    /// Reached a rule flagged for manual review.
    SkippedManualReview {
        rule_id: String,
        skip_reason: Option<SkipReason>,
    },
    /// The runtime loop detector found a repeating visit pattern.
    LoopDetected { pattern: Vec<String> },
    /// The step ceiling stopped a runaway traversal.
    StepCeiling,
}

/// One step of an execution trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: usize,
    pub rule_id: String,
    pub rule_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculation_cel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculated_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_variable: Option<VarPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing_cel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_rule: Option<String>,
    pub context_snapshot: serde_json::Value,
}

/// Result of one compute-then-route run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub final_context: Context,
    pub trace: Vec<StepRecord>,
    pub status: RunStatus,
}

impl RunResult {
    pub fn total_steps(&self) -> usize {
        self.trace.len()
    }
}

/// Inspects the last [`LOOP_WINDOW`] visits for a repeating sub-pattern
/// of length 1, 2 or 3 (self-loop, ping-pong, 3-cycle) and returns the
/// pattern when found. Needed even after static sanitization: routing
/// expressions compute targets from live data and can produce cycles
/// the static graph never declared.
pub fn detect_runtime_loop(visited: &[String]) -> Option<Vec<String>> {
    if visited.len() < LOOP_WINDOW {
        return None;
    }
    let recent = &visited[visited.len() - LOOP_WINDOW..];
    for cycle_len in 1..=3usize {
        if recent.len() < cycle_len * 2 {
            continue;
        }
        let tail = &recent[recent.len() - cycle_len * 2..];
        let pattern = &tail[..cycle_len];
        if tail
            .iter()
            .enumerate()
            .all(|(i, id)| id == &pattern[i % cycle_len])
        {
            return Some(pattern.to_vec());
        }
    }
    None
}

/// Single-threaded compute-then-route walker over one rule repository.
pub struct Executor<'r> {
    repo: &'r RuleRepository,
}

impl<'r> Executor<'r> {
    pub fn new(repo: &'r RuleRepository) -> Self {
        Self { repo }
    }

    /// Walks the graph from `start_id`, mutating a private copy of the
    /// seed context. Evaluator faults degrade to null or error-marker
    /// values; only missing-rule, manual-review, missing-routing,
    /// loop-detection and step-ceiling conditions end the run.
    pub fn run(
        &self,
        start_id: &str,
        seed: Context,
        data: Option<&DataSet>,
        row_index: usize,
    ) -> RunResult {
        let mut context = seed;
        let mut trace: Vec<StepRecord> = Vec::new();
        let mut visited: Vec<String> = Vec::new();
        let mut steps = 0usize;
        let mut current = Some(start_id.to_string());

        info!(start = start_id, row = row_index, "starting engine");

        let status = loop {
            let Some(current_id) = current.clone() else {
                break RunStatus::Completed;
            };

            if steps >= MAX_STEPS {
                warn!(start = start_id, "step ceiling reached, stopping");
                break RunStatus::StepCeiling;
            }

            visited.push(current_id.clone());
            if steps >= LOOP_WINDOW {
                if let Some(pattern) = detect_runtime_loop(&visited) {
                    warn!(start = start_id, ?pattern, "runtime loop detected, stopping");
                    break RunStatus::LoopDetected { pattern };
                }
            }

            steps += 1;

            let Some(rule) = self.repo.get(&current_id) else {
                debug!(rule_id = %current_id, "reached unknown or terminal identifier");
                trace.push(StepRecord {
                    step: steps,
                    rule_id: current_id.clone(),
                    rule_name: String::new(),
                    calculation_cel: None,
                    calculated_value: None,
                    output_variable: None,
                    routing_cel: None,
                    next_rule: None,
                    context_snapshot: context.to_json(),
                });
                break RunStatus::UnknownOrTerminal {
                    rule_id: current_id,
                };
            };

            if !rule.is_executable() {
                debug!(rule_id = %current_id, "skipping manual-review rule");
                trace.push(StepRecord {
                    step: steps,
                    rule_id: current_id.clone(),
                    rule_name: rule.rule_name.clone(),
                    calculation_cel: None,
                    calculated_value: None,
                    output_variable: None,
                    routing_cel: None,
                    next_rule: None,
                    context_snapshot: context.to_json(),
                });
                break RunStatus::SkippedManualReview {
                    rule_id: current_id,
                    skip_reason: rule.skip_reason,
                };
            }

            // Chained rules get their own data row injected so their
            // inputs exist even when the seed only covered the start.
            if current_id != start_id {
                if let Some(data) = data {
                    if let Some(row) = data.row(&current_id, row_index) {
                        context.deep_merge(row);
                    }
                }
            }

            debug!(step = steps, rule_id = %current_id, name = %rule.rule_name, "executing rule");

            let mut record = StepRecord {
                step: steps,
                rule_id: current_id.clone(),
                rule_name: rule.rule_name.clone(),
                calculation_cel: rule.calculation_cel.clone(),
                calculated_value: None,
                output_variable: rule.output_variable.clone(),
                routing_cel: rule.routing_cel.clone(),
                next_rule: None,
                context_snapshot: serde_json::Value::Null,
            };

            if let Some(calculation) = &rule.calculation_cel {
                let value = self.calculate(calculation, &context);
                if let Some(output) = &rule.output_variable {
                    write_output(&mut context, output, value.clone());
                    debug!(variable = %output, value = %value, "state updated");
                }
                record.calculated_value = Some(value);
            }

            // Route against the updated context. A final rule never
            // routes, whatever its routing expression says.
            current = if rule.is_final {
                None
            } else if let Some(routing) = &rule.routing_cel {
                let next = self.route(routing, &context);
                debug!(next = next.as_deref().unwrap_or("-"), "routing decision");
                next
            } else {
                debug!("no routing expression, stopping");
                None
            };

            record.next_rule = current.clone();
            record.context_snapshot = context.to_json();
            trace.push(record);
        };

        RunResult {
            final_context: context,
            trace,
            status,
        }
    }

    fn calculate(&self, expr: &str, context: &Context) -> Value {
        match evaluate_prepared(expr, context) {
            Ok(value) => value,
            Err(err) if err.is_division_by_zero() => {
                debug!("division by zero, writing null");
                Value::Null
            }
            Err(err) => {
                warn!(error = %err, "calculation fault, writing error marker");
                Value::Str(format!("ERROR: {err}"))
            }
        }
    }

    fn route(&self, expr: &str, context: &Context) -> Option<String> {
        match evaluate_prepared(expr, context) {
            Ok(Value::Str(next)) if !next.is_empty() => Some(next),
            Ok(Value::Null) => None,
            Ok(other) => {
                warn!(value = %other, "routing produced a non-identifier value");
                None
            }
            Err(err) => {
                warn!(error = %err, "routing fault, ending run");
                None
            }
        }
    }
}

/// Pre-resolves the expression against the sanitized context, evaluates
/// it over the double-coerced copy, and suppresses non-finite results
/// from unguarded division to null.
fn evaluate_prepared(expr: &str, context: &Context) -> Result<Value, EvalError> {
    let sanitized = context.sanitize_keys();
    let prepared = prepare(expr, &sanitized);
    let result = evaluate(&prepared, &sanitized.coerce_numeric())?;
    Ok(match result {
        Value::Double(value) if !value.is_finite() => Value::Null,
        other => other,
    })
}

fn write_output(context: &mut Context, output: &VarPath, value: Value) {
    if value.is_null() {
        return;
    }
    context.write(output, normalize_output(value));
}

/// Trims string outputs and canonicalizes compliance-status synonyms to
/// a single Title-Case spelling.
fn normalize_output(value: Value) -> Value {
    match value {
        Value::Str(text) => {
            let trimmed = text.trim();
            let normalized = match trimmed.to_ascii_lowercase().as_str() {
                "compliant" => "Compliant",
                "non-compliant" | "non_compliant" | "noncompliant" => "Non-Compliant",
                _ => trimmed,
            };
            Value::Str(normalized.to_string())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruleflow_core::Rule;

    fn rule(raw: serde_json::Value) -> Rule {
        serde_json::from_value(raw).expect("rule")
    }

    fn repo(rules: Vec<Rule>) -> RuleRepository {
        RuleRepository::from_rules(rules).expect("repo")
    }

    fn ctx(json: serde_json::Value) -> Context {
        Context::from_json(json).expect("context")
    }

    fn grades_served_rule() -> Rule {
        rule(serde_json::json!({
            "rule_id": "R001",
            "rule_name": "Grades Served",
            "calculation_cel": "EPS.is_public_school == true ? 'PK-12' : 'Not Applicable'",
            "output_variable": "derived.grades_served",
        }))
    }

    #[test]
    fn computes_and_writes_derived_output() {
        let repo = repo(vec![grades_served_rule()]);
        let executor = Executor::new(&repo);
        let result = executor.run(
            "R001",
            ctx(serde_json::json!({"EPS": {"is_public_school": true}})),
            None,
            0,
        );

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(
            result.final_context.read(&"derived.grades_served".into()),
            Value::from("PK-12")
        );
        assert_eq!(result.trace.len(), 1);
    }

    #[test]
    fn missing_boolean_input_takes_the_else_branch() {
        let repo = repo(vec![grades_served_rule()]);
        let executor = Executor::new(&repo);
        let result = executor.run("R001", Context::new(), None, 0);

        assert_eq!(
            result.final_context.read(&"derived.grades_served".into()),
            Value::from("Not Applicable")
        );
    }

    #[test]
    fn routes_on_the_updated_context() {
        let repo = repo(vec![
            rule(serde_json::json!({
                "rule_id": "R001",
                "rule_name": "Assign District",
                "calculation_cel":
                    "SIS.school == 'Paris High' ? 'Paris District' : 'Unassigned'",
                "output_variable": "derived.district",
                "routing_cel":
                    "derived.district == 'Paris District' ? 'R005' : 'R004'",
            })),
            rule(serde_json::json!({
                "rule_id": "R005",
                "rule_name": "Paris Workflow",
                "calculation_cel": "'Paris Handled'",
                "output_variable": "derived.outcome",
            })),
        ]);
        let executor = Executor::new(&repo);
        let result = executor.run(
            "R001",
            ctx(serde_json::json!({"SIS": {"school": "Paris High"}})),
            None,
            0,
        );

        let path: Vec<&str> = result.trace.iter().map(|s| s.rule_id.as_str()).collect();
        assert_eq!(path, vec!["R001", "R005"]);
        assert_eq!(
            result.final_context.read(&"derived.outcome".into()),
            Value::from("Paris Handled")
        );
        assert_eq!(result.status, RunStatus::Completed);
    }

    #[test]
    fn ping_pong_terminates_with_recorded_pattern() {
        let repo = repo(vec![
            rule(serde_json::json!({
                "rule_id": "A",
                "rule_name": "A",
                "routing_cel": "'B'",
            })),
            rule(serde_json::json!({
                "rule_id": "B",
                "rule_name": "B",
                "routing_cel": "'A'",
            })),
        ]);
        let executor = Executor::new(&repo);
        let result = executor.run("A", Context::new(), None, 0);

        match result.status {
            RunStatus::LoopDetected { pattern } => {
                assert_eq!(pattern, vec!["B".to_string(), "A".to_string()]);
            }
            other => panic!("expected loop detection, got {other:?}"),
        }
        assert!(result.trace.len() <= LOOP_WINDOW);
    }

    #[test]
    fn division_by_zero_writes_null_not_an_error_marker() {
        let repo = repo(vec![rule(serde_json::json!({
            "rule_id": "R001",
            "rule_name": "Ratio",
            "calculation_cel": "double(EPS.a) / double(EPS.b)",
            "output_variable": "derived.ratio",
        }))]);
        let executor = Executor::new(&repo);
        let result = executor.run(
            "R001",
            ctx(serde_json::json!({"EPS": {"a": 10, "b": 0}})),
            None,
            0,
        );

        // 10.0 / 0.0 is infinity, suppressed to null, so nothing is written.
        assert!(result
            .final_context
            .read(&"derived.ratio".into())
            .is_null());
        assert_eq!(result.status, RunStatus::Completed);
    }

    #[test]
    fn guarded_size_check_never_produces_an_error_marker() {
        let repo = repo(vec![rule(serde_json::json!({
            "rule_id": "R001",
            "rule_name": "Name Check",
            "calculation_cel": "EPS.name.size() > 0 ? 'ok' : 'empty'",
            "output_variable": "derived.check",
        }))]);
        let executor = Executor::new(&repo);
        let result = executor.run(
            "R001",
            ctx(serde_json::json!({"EPS": {"name": "Lincoln"}})),
            None,
            0,
        );
        assert_eq!(
            result.final_context.read(&"derived.check".into()),
            Value::from("ok")
        );
    }

    #[test]
    fn manual_review_rules_terminate_the_run() {
        let repo = repo(vec![rule(serde_json::json!({
            "rule_id": "R001",
            "rule_name": "Qualitative",
            "manual_review": true,
            "skip_reason": "cel_generation_failed",
        }))]);
        let executor = Executor::new(&repo);
        let result = executor.run("R001", Context::new(), None, 0);

        assert_eq!(
            result.status,
            RunStatus::SkippedManualReview {
                rule_id: "R001".to_string(),
                skip_reason: Some(SkipReason::CelGenerationFailed),
            }
        );
    }

    #[test]
    fn final_rules_never_route() {
        let repo = repo(vec![
            rule(serde_json::json!({
                "rule_id": "R001",
                "rule_name": "Terminal",
                "is_final": true,
                "calculation_cel": "'done'",
                "output_variable": "derived.state",
                "routing_cel": "'R002'",
            })),
            rule(serde_json::json!({
                "rule_id": "R002",
                "rule_name": "Unreachable",
            })),
        ]);
        let executor = Executor::new(&repo);
        let result = executor.run("R001", Context::new(), None, 0);
        assert_eq!(result.trace.len(), 1);
        assert_eq!(result.status, RunStatus::Completed);
    }

    #[test]
    fn calculation_faults_leave_an_inspectable_marker() {
        let repo = repo(vec![rule(serde_json::json!({
            "rule_id": "R001",
            "rule_name": "Broken",
            "calculation_cel": "EPS.name.split(',')",
            "output_variable": "derived.parts",
        }))]);
        let executor = Executor::new(&repo);
        let result = executor.run(
            "R001",
            ctx(serde_json::json!({"EPS": {"name": "a,b"}})),
            None,
            0,
        );

        match result.final_context.read(&"derived.parts".into()) {
            Value::Str(marker) => assert!(marker.starts_with("ERROR:")),
            other => panic!("expected error marker, got {other:?}"),
        }
        assert_eq!(result.status, RunStatus::Completed);
    }

    #[test]
    fn string_range_is_rewritten_before_evaluation() {
        let repo = repo(vec![rule(serde_json::json!({
            "rule_id": "R001",
            "rule_name": "Grade Window",
            "calculation_cel":
                "SIS.grade >= '1' && SIS.grade <= '12' ? 'Eligible' : 'Not Applicable'",
            "output_variable": "derived.eligibility",
        }))]);
        let executor = Executor::new(&repo);
        // '9' would fail the lexicographic comparison ('9' > '12'), but
        // the membership rewrite makes it eligible.
        let result = executor.run(
            "R001",
            ctx(serde_json::json!({"SIS": {"grade": "9"}})),
            None,
            0,
        );
        assert_eq!(
            result.final_context.read(&"derived.eligibility".into()),
            Value::from("Eligible")
        );
    }
}
