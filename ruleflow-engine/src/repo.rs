use std::collections::{HashMap, HashSet};

use ruleflow_core::Rule;

use crate::error::EngineError;

/// Read-only, id-keyed view of a rule catalogue, built once per batch.
#[derive(Debug, Default, Clone)]
pub struct RuleRepository {
    rules: HashMap<String, Rule>,
}

impl RuleRepository {
    /// Indexes a flat rule list by identifier. Duplicates are an error.
    pub fn from_rules(rules: Vec<Rule>) -> Result<Self, EngineError> {
        let mut map = HashMap::with_capacity(rules.len());
        for rule in rules {
            if map.insert(rule.rule_id.clone(), rule.clone()).is_some() {
                return Err(EngineError::DuplicateRule(rule.rule_id));
            }
        }
        Ok(Self { rules: map })
    }

    pub fn get(&self, rule_id: &str) -> Option<&Rule> {
        self.rules.get(rule_id)
    }

    pub fn contains(&self, rule_id: &str) -> bool {
        self.rules.contains_key(rule_id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rules.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values()
    }

    /// Root entry points: rules never referenced as a routing target.
    pub fn starting_rules(&self) -> Vec<String> {
        let mut targets = HashSet::new();
        for rule in self.rules.values() {
            for route in &rule.outgoing_routes {
                if let Some(target) = &route.next_rule {
                    targets.insert(target.clone());
                }
            }
        }
        let mut roots: Vec<String> = self
            .rules
            .keys()
            .filter(|id| !targets.contains(*id))
            .cloned()
            .collect();
        roots.sort();
        roots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, targets: &[&str]) -> Rule {
        serde_json::from_value(serde_json::json!({
            "rule_id": id,
            "outgoing_routes": targets
                .iter()
                .map(|t| serde_json::json!({"condition": "", "next_rule": t}))
                .collect::<Vec<_>>(),
        }))
        .expect("rule")
    }

    #[test]
    fn detects_starting_rules() {
        let repo = RuleRepository::from_rules(vec![
            rule("R001", &["R002"]),
            rule("R002", &["R003"]),
            rule("R003", &[]),
            rule("R010", &["R002"]),
        ])
        .expect("repo");
        assert_eq!(repo.starting_rules(), vec!["R001", "R010"]);
    }

    #[test]
    fn rejects_duplicate_identifiers() {
        let err =
            RuleRepository::from_rules(vec![rule("R001", &[]), rule("R001", &[])]).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateRule(_)));
    }
}
