use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ruleflow_core::{Rule, SkipReason, VarPath};
use ruleflow_expr::grammar;

use crate::analyzer::analyze;
use crate::diagnostic::Diagnostic;
use crate::generator::{ExpressionGenerator, ExpressionProposal};
use crate::repair::{repair, ExprRole};
use crate::sample::test_execute;
use crate::structural::check_structure;

/// States of the per-rule verification machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationState {
    Pending,
    Repaired,
    StaticChecked,
    StructurallyValid,
    TestExecuted,
    Verified,
    Retrying,
    ManualReview,
}

/// Outcome of verifying one rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleVerification {
    pub rule_id: String,
    pub state: VerificationState,
    /// Attempts spent, including the one that succeeded.
    pub attempts: usize,
    pub output_variable: Option<VarPath>,
    pub calculation_cel: Option<String>,
    pub routing_cel: Option<String>,
    /// Diagnostics from the last failing attempt, empty on success.
    pub diagnostics: Vec<Diagnostic>,
    pub skip_reason: Option<SkipReason>,
}

impl RuleVerification {
    pub fn is_verified(&self) -> bool {
        self.state == VerificationState::Verified
    }

    /// Writes the verification result back onto the rule. Only the five
    /// verifier-owned fields are touched; everything else round-trips.
    pub fn apply(&self, rule: &mut Rule) {
        if self.is_verified() {
            rule.calculation_cel = self.calculation_cel.clone();
            rule.output_variable = self.output_variable.clone();
            rule.routing_cel = self.routing_cel.clone();
            rule.manual_review = false;
            rule.skip_reason = None;
        } else {
            rule.manual_review = true;
            rule.skip_reason = self.skip_reason;
        }
    }
}

/// Batch verification summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub total: usize,
    pub verified: usize,
    pub manual_review: usize,
    pub manual_review_ids: Vec<String>,
}

impl VerificationReport {
    /// Every rule failed; the batch achieved nothing.
    pub fn all_failed(&self) -> bool {
        self.total > 0 && self.verified == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{}/{} rules verified, {} flagged for manual review",
            self.verified, self.total, self.manual_review
        )
    }
}

/// Composes repair, static analysis, structural checking and test
/// execution into a bounded retry loop against the injected generation
/// collaborator.
pub struct Verifier<'g> {
    generator: &'g dyn ExpressionGenerator,
    max_attempts: usize,
    backoff: Duration,
}

impl<'g> Verifier<'g> {
    pub fn new(generator: &'g dyn ExpressionGenerator) -> Self {
        Self {
            generator,
            max_attempts: 5,
            backoff: Duration::from_secs(1),
        }
    }

    pub fn with_limits(mut self, max_attempts: usize, backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff = backoff;
        self
    }

    /// Verifies one rule, retrying through the generator on failure.
    ///
    /// The rule's own expressions, when present, are the first
    /// candidate; every subsequent candidate comes from the generator,
    /// fed the diagnostics of the previous attempt. Exhausting the
    /// attempt budget (or a permanent generator failure) ends in
    /// `ManualReview`, a terminal but non-fatal outcome.
    pub async fn verify_rule(&self, rule: &Rule) -> RuleVerification {
        let annotated = rule.with_prefixes();
        let mut candidate = rule.calculation_cel.clone().map(|calculation_cel| {
            ExpressionProposal {
                output_variable: rule.output_variable.clone(),
                calculation_cel,
                routing_cel: rule.routing_cel.clone(),
            }
        });

        let mut feedback: Option<String> = None;
        let mut last_diagnostics = Vec::new();
        let mut attempts = 0;

        while attempts < self.max_attempts {
            attempts += 1;

            let proposal = match candidate.take() {
                Some(proposal) => proposal,
                None => match self.generator.propose(&annotated, feedback.as_deref()).await {
                    Ok(proposal) => proposal,
                    Err(err) if err.is_transient() => {
                        warn!(rule_id = %rule.rule_id, attempt = attempts, error = %err,
                              "transient generator failure, backing off");
                        tokio::time::sleep(self.backoff).await;
                        continue;
                    }
                    Err(err) => {
                        debug!(rule_id = %rule.rule_id, error = %err,
                               "generator unavailable, stopping retries");
                        break;
                    }
                },
            };

            match self.verify_proposal(&rule.rule_id, &proposal) {
                Ok(verified) => {
                    info!(rule_id = %rule.rule_id, attempt = attempts, "rule verified");
                    return RuleVerification {
                        rule_id: rule.rule_id.clone(),
                        state: VerificationState::Verified,
                        attempts,
                        output_variable: verified.output_variable,
                        calculation_cel: Some(verified.calculation_cel),
                        routing_cel: verified.routing_cel,
                        diagnostics: Vec::new(),
                        skip_reason: None,
                    };
                }
                Err(diagnostics) => {
                    debug!(rule_id = %rule.rule_id, attempt = attempts,
                           count = diagnostics.len(), "verification attempt failed");
                    feedback = Some(build_feedback(&proposal, &diagnostics));
                    last_diagnostics = diagnostics;
                }
            }
        }

        let skip_reason = if rule.has_data_requirements() {
            SkipReason::CelGenerationFailed
        } else {
            SkipReason::NonComputationalFormattingRule
        };
        warn!(rule_id = %rule.rule_id, attempts, reason = %skip_reason,
              "rule flagged for manual review");
        RuleVerification {
            rule_id: rule.rule_id.clone(),
            state: VerificationState::ManualReview,
            attempts,
            output_variable: None,
            calculation_cel: None,
            routing_cel: None,
            diagnostics: last_diagnostics,
            skip_reason: Some(skip_reason),
        }
    }

    /// Verifies every rule, concurrently up to `concurrency`, and writes
    /// the results back onto the catalogue. Rules are independent, so no
    /// state is shared between verifications.
    pub async fn verify_catalog(
        &self,
        rules: &mut [Rule],
        concurrency: usize,
    ) -> VerificationReport {
        let verifications: Vec<(usize, RuleVerification)> =
            stream::iter(rules.iter().cloned().enumerate())
                .map(|(index, rule)| async move { (index, self.verify_rule(&rule).await) })
                .buffer_unordered(concurrency.max(1))
                .collect()
                .await;

        let mut manual_review_ids = Vec::new();
        let mut verified = 0;
        for (index, verification) in verifications {
            if verification.is_verified() {
                verified += 1;
            } else {
                manual_review_ids.push(verification.rule_id.clone());
            }
            verification.apply(&mut rules[index]);
        }
        manual_review_ids.sort();

        VerificationReport {
            total: rules.len(),
            verified,
            manual_review: manual_review_ids.len(),
            manual_review_ids,
        }
    }

    /// Runs one proposal through repair, static analysis, structural
    /// checking and test execution, returning the repaired pair on
    /// success or the diagnostics that stopped it.
    fn verify_proposal(
        &self,
        rule_id: &str,
        proposal: &ExpressionProposal,
    ) -> Result<ExpressionProposal, Vec<Diagnostic>> {
        let calculation = repair(&proposal.calculation_cel, ExprRole::Calculation);
        let routing = proposal
            .routing_cel
            .as_deref()
            .filter(|expr| !expr.trim().is_empty() && expr.trim() != "null")
            .map(|expr| repair(expr, ExprRole::Routing));
        debug!(rule_id, state = ?VerificationState::Repaired, "expressions repaired");

        if calculation.trim().is_empty() {
            return Err(vec![Diagnostic::syntax("calculation_cel: empty expression")]);
        }

        let mut diagnostics = collect_labelled(&calculation, routing.as_deref(), analyze_slot);
        if !diagnostics.is_empty() {
            return Err(diagnostics);
        }
        debug!(rule_id, state = ?VerificationState::StaticChecked, "no static findings");

        diagnostics = collect_labelled(&calculation, routing.as_deref(), structural_slot);
        if !diagnostics.is_empty() {
            return Err(diagnostics);
        }
        debug!(rule_id, state = ?VerificationState::StructurallyValid, "expressions parse");

        diagnostics = collect_labelled(&calculation, routing.as_deref(), test_slot);
        if !diagnostics.is_empty() {
            return Err(diagnostics);
        }
        debug!(rule_id, state = ?VerificationState::TestExecuted, "sample execution passed");

        Ok(ExpressionProposal {
            output_variable: proposal.output_variable.clone(),
            calculation_cel: calculation,
            routing_cel: routing,
        })
    }
}

fn analyze_slot(expr: &str) -> Vec<Diagnostic> {
    analyze(expr)
}

fn structural_slot(expr: &str) -> Vec<Diagnostic> {
    check_structure(expr).into_iter().collect()
}

fn test_slot(expr: &str) -> Vec<Diagnostic> {
    test_execute(expr).into_iter().collect()
}

fn collect_labelled(
    calculation: &str,
    routing: Option<&str>,
    check: fn(&str) -> Vec<Diagnostic>,
) -> Vec<Diagnostic> {
    let mut diagnostics: Vec<Diagnostic> = check(calculation)
        .into_iter()
        .map(|d| Diagnostic::new(d.kind, format!("calculation_cel: {}", d.message)))
        .collect();
    if let Some(routing) = routing {
        diagnostics.extend(
            check(routing)
                .into_iter()
                .map(|d| Diagnostic::new(d.kind, format!("routing_cel: {}", d.message))),
        );
    }
    diagnostics
}

/// Renders the feedback message for the generation collaborator: the
/// offending expressions, the diagnostics verbatim, and the dialect's
/// hard rules.
fn build_feedback(proposal: &ExpressionProposal, diagnostics: &[Diagnostic]) -> String {
    let mut lines = Vec::new();
    lines.push("#### Previously Generated Expressions".to_string());
    lines.push(format!("calculation_cel: {}", proposal.calculation_cel));
    if let Some(routing) = &proposal.routing_cel {
        lines.push(format!("routing_cel: {routing}"));
    }
    lines.push(String::new());
    lines.push("#### Errors".to_string());
    for diagnostic in diagnostics {
        lines.push(format!("- {diagnostic}"));
    }
    lines.push(String::new());
    lines.push(
        "Please fix the expressions so they compile AND execute without errors.".to_string(),
    );
    lines.push(grammar::hard_rules());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::generator::{DisabledGenerator, GeneratorError};
    use crate::DiagnosticKind;

    struct ScriptedGenerator {
        responses: Mutex<VecDeque<Result<ExpressionProposal, GeneratorError>>>,
        feedbacks: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedGenerator {
        fn new(responses: Vec<Result<ExpressionProposal, GeneratorError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                feedbacks: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ExpressionGenerator for ScriptedGenerator {
        async fn propose(
            &self,
            _rule: &Rule,
            feedback: Option<&str>,
        ) -> Result<ExpressionProposal, GeneratorError> {
            self.feedbacks
                .lock()
                .expect("feedbacks")
                .push(feedback.map(str::to_string));
            self.responses
                .lock()
                .expect("responses")
                .pop_front()
                .unwrap_or(Err(GeneratorError::Unavailable))
        }
    }

    fn rule_with(calculation: Option<&str>, data_required: bool) -> Rule {
        let mut raw = serde_json::json!({
            "rule_id": "R001",
            "rule_name": "Grades Served",
            "entity_applied": "school",
        });
        if data_required {
            raw["data_required"] = serde_json::json!([
                {"data_source": "Entity Profile System (EPS)"}
            ]);
        }
        let mut rule: Rule = serde_json::from_value(raw).expect("rule");
        rule.calculation_cel = calculation.map(str::to_string);
        if calculation.is_some() {
            rule.output_variable = Some("derived.grades_served".into());
        }
        rule
    }

    fn proposal(calculation: &str) -> ExpressionProposal {
        ExpressionProposal {
            output_variable: Some("derived.grades_served".into()),
            calculation_cel: calculation.to_string(),
            routing_cel: None,
        }
    }

    #[tokio::test]
    async fn valid_expressions_verify_on_the_first_attempt() {
        let generator = DisabledGenerator;
        let verifier = Verifier::new(&generator);
        let rule = rule_with(
            Some("EPS.is_public_school == true ? 'PK-12' : 'Not Applicable'"),
            true,
        );

        let verification = verifier.verify_rule(&rule).await;
        assert!(verification.is_verified());
        assert_eq!(verification.attempts, 1);
        assert_eq!(
            verification.calculation_cel.as_deref(),
            Some("EPS.is_public_school == true ? 'PK-12' : 'Not Applicable'")
        );
    }

    #[tokio::test]
    async fn feedback_reaches_the_generator_and_a_fix_verifies() {
        let generator = ScriptedGenerator::new(vec![Ok(proposal(
            "SIS.grade_level in ['9', '10', '11', '12'] ? 'Eligible' : 'Not Applicable'",
        ))]);
        let verifier = Verifier::new(&generator);
        // The range comparison is flagged as a logic error, so the
        // second attempt comes from the generator.
        let rule = rule_with(
            Some("SIS.grade_level >= '9' && SIS.grade_level <= '12' ? 'Eligible' : 'No'"),
            true,
        );

        let verification = verifier.verify_rule(&rule).await;
        assert!(verification.is_verified());
        assert_eq!(verification.attempts, 2);

        let feedbacks = generator.feedbacks.lock().expect("feedbacks");
        let feedback = feedbacks[0].as_deref().expect("feedback present");
        assert!(feedback.contains("lexicographic"));
        assert!(feedback.contains("CRITICAL RULES"));
    }

    #[tokio::test]
    async fn exhausted_attempts_mean_manual_review() {
        let generator = ScriptedGenerator::new(vec![
            Ok(proposal("sum(EPS.scores) > 10.0 ? 'a' : 'b'")),
            Ok(proposal("count(EPS.scores) > 10.0 ? 'a' : 'b'")),
        ]);
        let verifier =
            Verifier::new(&generator).with_limits(3, Duration::from_millis(1));
        let rule = rule_with(Some("avg(EPS.scores) > 10.0 ? 'a' : 'b'"), true);

        let verification = verifier.verify_rule(&rule).await;
        assert_eq!(verification.state, VerificationState::ManualReview);
        assert_eq!(verification.attempts, 3);
        assert_eq!(
            verification.skip_reason,
            Some(SkipReason::CelGenerationFailed)
        );
        assert!(verification
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::Forbidden));
    }

    #[tokio::test]
    async fn rules_without_data_requirements_skip_as_formatting_rules() {
        let generator = DisabledGenerator;
        let verifier = Verifier::new(&generator);
        let rule = rule_with(None, false);

        let verification = verifier.verify_rule(&rule).await;
        assert_eq!(verification.state, VerificationState::ManualReview);
        assert_eq!(
            verification.skip_reason,
            Some(SkipReason::NonComputationalFormattingRule)
        );
    }

    #[tokio::test]
    async fn transient_generator_failures_retry_within_the_budget() {
        let generator = ScriptedGenerator::new(vec![
            Err(GeneratorError::RateLimited),
            Ok(proposal(
                "EPS.is_public_school == true ? 'PK-12' : 'Not Applicable'",
            )),
        ]);
        let verifier =
            Verifier::new(&generator).with_limits(5, Duration::from_millis(1));
        let rule = rule_with(None, true);

        let verification = verifier.verify_rule(&rule).await;
        assert!(verification.is_verified());
        assert_eq!(verification.attempts, 2);
    }

    #[tokio::test]
    async fn batch_verification_applies_results_and_counts() {
        let generator = DisabledGenerator;
        let verifier = Verifier::new(&generator);
        let mut rules = vec![
            rule_with(
                Some("EPS.is_public_school == true ? 'PK-12' : 'Not Applicable'"),
                true,
            ),
            {
                let mut rule = rule_with(Some("lookup_grades(EPS.school_id)"), true);
                rule.rule_id = "R002".to_string();
                rule
            },
        ];

        let report = verifier.verify_catalog(&mut rules, 4).await;
        assert_eq!(report.total, 2);
        assert_eq!(report.verified, 1);
        assert_eq!(report.manual_review_ids, vec!["R002".to_string()]);
        assert!(!report.all_failed());

        assert!(!rules[0].manual_review);
        assert!(rules[1].manual_review);
        assert_eq!(
            rules[1].skip_reason,
            Some(SkipReason::CelGenerationFailed)
        );
    }
}
