use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::path::{source_prefix, VarPath};
use crate::value::ScalarKind;

/// Sentinel route target emitted upstream when the intended successor
/// could not be identified in the rule set.
pub const EXTERNAL_MISSING: &str = "EXTERNAL_MISSING";

/// Conditional edge from one rule to its successor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutgoingRoute {
    /// Free-text condition under which the route is taken.
    #[serde(default)]
    pub condition: String,
    /// Target rule identifier; `None` marks an intentional terminal edge.
    #[serde(default)]
    pub next_rule: Option<String>,
}

impl OutgoingRoute {
    pub fn is_unresolved(&self) -> bool {
        matches!(self.next_rule.as_deref(), Some(EXTERNAL_MISSING))
    }
}

/// Attribute metadata declared by a data requirement. Never executed;
/// consulted by the verifier to infer plausible sample types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataAttribute {
    pub attribute_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub example_values: Vec<String>,
    #[serde(default)]
    pub data_type: String,
}

impl DataAttribute {
    pub fn kind(&self) -> ScalarKind {
        ScalarKind::parse(&self.data_type)
    }
}

/// A data source a rule reads from, with the attributes it needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataRequirement {
    pub data_source: String,
    #[serde(default)]
    pub data_attributes: Vec<DataAttribute>,
    /// Sanitised variable namespace for this source, injected before the
    /// requirement is shown to the generation collaborator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cel_prefix: Option<String>,
}

impl DataRequirement {
    /// The expression namespace for this source, deriving it on demand
    /// when no prefix has been injected yet.
    pub fn prefix(&self) -> String {
        self.cel_prefix
            .clone()
            .unwrap_or_else(|| source_prefix(&self.data_source))
    }
}

/// Why a rule was routed to manual review instead of automation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SkipReason {
    #[serde(rename = "non_computational_formatting_rule")]
    NonComputationalFormattingRule,
    #[serde(rename = "cel_generation_failed")]
    CelGenerationFailed,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NonComputationalFormattingRule => "non_computational_formatting_rule",
            SkipReason::CelGenerationFailed => "cel_generation_failed",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative business rule enriched with executable expressions.
///
/// Unknown catalogue fields are collected in `extra` and round-trip
/// verbatim; verification only ever adds `calculation_cel`,
/// `output_variable`, `routing_cel`, `manual_review` and `skip_reason`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    /// Unique identifier, e.g. `R001`.
    pub rule_id: String,
    #[serde(default)]
    pub rule_name: String,
    #[serde(default)]
    pub entity_applied: String,
    #[serde(default)]
    pub data_required: Vec<DataRequirement>,
    /// Documentation only; conditions are never executed directly.
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub outgoing_routes: Vec<OutgoingRoute>,
    /// Terminal node marker. When true no route is traversed regardless
    /// of what `routing_cel` evaluates to.
    #[serde(default)]
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculation_cel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_variable: Option<VarPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_cel: Option<String>,
    /// When true the expressions must never be executed.
    #[serde(default)]
    pub manual_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Rule {
    pub fn has_data_requirements(&self) -> bool {
        !self.data_required.is_empty()
    }

    /// Whether the engine may evaluate this rule's expressions.
    pub fn is_executable(&self) -> bool {
        !self.manual_review
    }

    /// Returns a copy whose data requirements carry their sanitised
    /// namespace prefixes, ready to be shown to the generation
    /// collaborator.
    pub fn with_prefixes(&self) -> Rule {
        let mut rule = self.clone();
        for requirement in &mut rule.data_required {
            requirement.cel_prefix = Some(source_prefix(&requirement.data_source));
        }
        rule
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_unknown_fields_through_round_trip() {
        let raw = serde_json::json!({
            "rule_id": "R001",
            "rule_name": "Grades Served",
            "entity_applied": "school",
            "is_final": false,
            "citation": "EdFacts FS039",
            "page_number": 6,
        });
        let rule: Rule = serde_json::from_value(raw).expect("rule");
        assert_eq!(rule.extra["citation"], "EdFacts FS039");

        let round = serde_json::to_value(&rule).expect("serialize");
        assert_eq!(round["citation"], "EdFacts FS039");
        assert_eq!(round["page_number"], 6);
        assert!(round.get("calculation_cel").is_none());
    }

    #[test]
    fn injects_namespace_prefixes() {
        let rule: Rule = serde_json::from_value(serde_json::json!({
            "rule_id": "R002",
            "data_required": [
                {"data_source": "Entity Profile System (EPS)"},
                {"data_source": "5Essentials Survey"},
            ],
        }))
        .expect("rule");
        let annotated = rule.with_prefixes();
        assert_eq!(annotated.data_required[0].prefix(), "EPS");
        assert_eq!(annotated.data_required[1].prefix(), "_5Essentials_Survey");
    }

    #[test]
    fn recognises_unresolved_routes() {
        let route = OutgoingRoute {
            condition: "school is eligible".into(),
            next_rule: Some(EXTERNAL_MISSING.into()),
        };
        assert!(route.is_unresolved());
    }

    #[test]
    fn skip_reason_serialises_to_catalogue_spelling() {
        let json = serde_json::to_string(&SkipReason::CelGenerationFailed).expect("json");
        assert_eq!(json, "\"cel_generation_failed\"");
    }
}
