use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use ruleflow_core::{OutgoingRoute, Rule};

/// External collaborator consulted for routes whose declared target is
/// not a known rule identifier (e.g. the upstream `EXTERNAL_MISSING`
/// sentinel): given the source rule and the broken route, it may name
/// the intended successor from the known identifiers.
#[async_trait]
pub trait RouteResolver: Send + Sync {
    async fn resolve(
        &self,
        rule: &Rule,
        route: &OutgoingRoute,
        known_ids: &[String],
    ) -> Option<String>;
}

/// Resolver used when no collaborator is wired: unresolved routes are
/// simply dropped.
pub struct NoopResolver;

#[async_trait]
impl RouteResolver for NoopResolver {
    async fn resolve(
        &self,
        _rule: &Rule,
        _route: &OutgoingRoute,
        _known_ids: &[String],
    ) -> Option<String> {
        None
    }
}

/// What the sanitizer did to the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizeReport {
    pub resolved: usize,
    pub dropped: usize,
    pub cycles_broken: usize,
    /// Rules marked `is_final` because they lost their last route.
    pub finalized: Vec<String>,
}

/// Validates every declared route against the rule set and breaks the
/// static cycles the runtime should never see.
///
/// Unresolvable targets are dropped after consulting the resolver.
/// Self-loops are removed; for a two-node cycle A -> B -> A the
/// back-edge B -> A is removed, keeping A -> B. A rule left without
/// routes becomes `is_final`. One pass reaches a fixed point because
/// only 1- and 2-cycles are targeted; longer cycles are deliberately
/// left to the runtime loop detector, since routing expressions compute
/// their targets from live data.
pub async fn sanitize_routes(rules: &mut [Rule], resolver: &dyn RouteResolver) -> SanitizeReport {
    let known_ids: Vec<String> = rules.iter().map(|rule| rule.rule_id.clone()).collect();
    let known: HashSet<&str> = known_ids.iter().map(String::as_str).collect();
    let mut report = SanitizeReport::default();

    // Target validation and resolution.
    for index in 0..rules.len() {
        let routes = rules[index].outgoing_routes.clone();
        let mut valid_routes = Vec::with_capacity(routes.len());
        for route in routes {
            match &route.next_rule {
                None => valid_routes.push(route),
                Some(target) if known.contains(target.as_str()) => valid_routes.push(route),
                Some(target) => {
                    match resolver.resolve(&rules[index], &route, &known_ids).await {
                        Some(resolved) if known.contains(resolved.as_str()) => {
                            info!(rule_id = %rules[index].rule_id, from = %target,
                                  to = %resolved, "resolved invalid route target");
                            report.resolved += 1;
                            valid_routes.push(OutgoingRoute {
                                condition: route.condition.clone(),
                                next_rule: Some(resolved),
                            });
                        }
                        _ => {
                            warn!(rule_id = %rules[index].rule_id, target = %target,
                                  "removing unresolvable route");
                            report.dropped += 1;
                        }
                    }
                }
            }
        }
        rules[index].outgoing_routes = valid_routes;
    }

    // Self-loops.
    for rule in rules.iter_mut() {
        let own_id = rule.rule_id.clone();
        let before = rule.outgoing_routes.len();
        rule.outgoing_routes
            .retain(|route| route.next_rule.as_deref() != Some(own_id.as_str()));
        let removed = before - rule.outgoing_routes.len();
        if removed > 0 {
            warn!(rule_id = %own_id, removed, "removed self-loop route");
            report.cycles_broken += removed;
        }
    }

    // Two-node cycles: the rule encountered first keeps its edge.
    let index_of: HashMap<String, usize> = rules
        .iter()
        .enumerate()
        .map(|(index, rule)| (rule.rule_id.clone(), index))
        .collect();
    for a_index in 0..rules.len() {
        let a_id = rules[a_index].rule_id.clone();
        let targets: Vec<String> = rules[a_index]
            .outgoing_routes
            .iter()
            .filter_map(|route| route.next_rule.clone())
            .collect();
        for b_id in targets {
            let Some(&b_index) = index_of.get(&b_id) else {
                continue;
            };
            let b = &mut rules[b_index];
            let before = b.outgoing_routes.len();
            b.outgoing_routes
                .retain(|route| route.next_rule.as_deref() != Some(a_id.as_str()));
            let removed = before - b.outgoing_routes.len();
            if removed > 0 {
                warn!(from = %b_id, back_to = %a_id, "removed two-node cycle back-edge");
                report.cycles_broken += removed;
            }
        }
    }

    // Finalize rules that lost every route.
    for rule in rules.iter_mut() {
        if rule.outgoing_routes.is_empty() && !rule.is_final {
            rule.is_final = true;
            info!(rule_id = %rule.rule_id, "no routes left, marked final");
            report.finalized.push(rule.rule_id.clone());
        }
    }
    report.finalized.sort();

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedResolver(&'static str);

    #[async_trait]
    impl RouteResolver for FixedResolver {
        async fn resolve(
            &self,
            _rule: &Rule,
            _route: &OutgoingRoute,
            _known_ids: &[String],
        ) -> Option<String> {
            Some(self.0.to_string())
        }
    }

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

    #[tokio::test]
    async fn drops_unresolvable_targets_and_finalizes() {
        let mut rules = vec![rule("R001", &["EXTERNAL_MISSING"]), rule("R002", &[])];
        let report = sanitize_routes(&mut rules, &NoopResolver).await;

        assert_eq!(report.dropped, 1);
        assert!(rules[0].outgoing_routes.is_empty());
        assert!(rules[0].is_final);
        assert_eq!(
            report.finalized,
            vec!["R001".to_string(), "R002".to_string()]
        );
    }

    #[tokio::test]
    async fn resolver_can_rescue_a_route() {
        let mut rules = vec![rule("R001", &["EXTERNAL_MISSING"]), rule("R002", &[])];
        let report = sanitize_routes(&mut rules, &FixedResolver("R002")).await;

        assert_eq!(report.resolved, 1);
        assert_eq!(
            rules[0].outgoing_routes[0].next_rule.as_deref(),
            Some("R002")
        );
        assert!(!rules[0].is_final);
    }

    #[tokio::test]
    async fn removes_self_loops() {
        let mut rules = vec![rule("R001", &["R001", "R002"]), rule("R002", &[])];
        let report = sanitize_routes(&mut rules, &NoopResolver).await;

        assert_eq!(report.cycles_broken, 1);
        assert_eq!(rules[0].outgoing_routes.len(), 1);
        assert!(!rules[0].is_final);
    }

    #[tokio::test]
    async fn breaks_two_node_cycles_keeping_the_forward_edge() {
        let mut rules = vec![rule("A", &["B"]), rule("B", &["A"])];
        let report = sanitize_routes(&mut rules, &NoopResolver).await;

        assert_eq!(report.cycles_broken, 1);
        assert_eq!(
            rules[0].outgoing_routes[0].next_rule.as_deref(),
            Some("B")
        );
        assert!(rules[1].outgoing_routes.is_empty());
        assert!(rules[1].is_final);
        assert_eq!(report.finalized, vec!["B".to_string()]);
    }

    #[tokio::test]
    async fn sanitization_is_idempotent() {
        let mut rules = vec![rule("A", &["B", "A"]), rule("B", &["A"]), rule("C", &["D"])];
        sanitize_routes(&mut rules, &NoopResolver).await;
        let snapshot = rules.clone();
        let report = sanitize_routes(&mut rules, &NoopResolver).await;

        assert_eq!(rules, snapshot);
        assert_eq!(report.cycles_broken, 0);
        assert_eq!(report.dropped, 0);
    }
}
