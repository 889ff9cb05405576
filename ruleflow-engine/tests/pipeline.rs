use std::sync::Arc;

use serde_json::json;

use ruleflow_core::{Rule, Value};
use ruleflow_engine::{
    run_batch, sanitize_routes, DataSet, NoopResolver, RuleRepository, RunStatus,
};

fn rule(raw: serde_json::Value) -> Rule {
    serde_json::from_value(raw).expect("rule")
}

#[tokio::test]
async fn sanitized_graph_executes_end_to_end() {
    let mut rules = vec![
        rule(json!({
            "rule_id": "R001",
            "rule_name": "Responsible District",
            "calculation_cel":
                "SIS.home_school == 'Paris Cooperative High School' \
                 ? 'Paris District' : 'Unassigned'",
            "output_variable": "derived.responsible_district",
            "routing_cel":
                "derived.responsible_district == 'Paris District' ? 'R005' : 'R004'",
            "outgoing_routes": [
                {"condition": "Paris school", "next_rule": "R005"},
                {"condition": "handled elsewhere", "next_rule": "EXTERNAL_MISSING"},
            ],
        })),
        rule(json!({
            "rule_id": "R005",
            "rule_name": "Paris Workflow",
            "calculation_cel": "' compliant '",
            "output_variable": "derived.status",
            "outgoing_routes": [
                {"condition": "recheck", "next_rule": "R001"},
            ],
        })),
    ];

    // The unresolved target is dropped and the R005 -> R001 back-edge
    // is broken, leaving R005 terminal.
    let sanitize_report = sanitize_routes(&mut rules, &NoopResolver).await;
    assert_eq!(sanitize_report.dropped, 1);
    assert_eq!(sanitize_report.cycles_broken, 1);
    assert_eq!(sanitize_report.finalized, vec!["R005".to_string()]);
    assert!(rules[1].is_final);

    let repo = Arc::new(RuleRepository::from_rules(rules).expect("repo"));
    assert_eq!(repo.starting_rules(), vec!["R001".to_string()]);

    let data: DataSet = serde_json::from_value(json!({
        "R001": {"data": [
            {"SIS": {"home_school": "Paris Cooperative High School"}},
        ]},
    }))
    .expect("data");

    let report = run_batch(repo, Arc::new(data), &["R001".to_string()], 1, 2).await;
    assert_eq!(report.total_runs, 1);

    let summary = &report.results[0];
    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.total_steps, 2);
    assert_eq!(summary.path(), "R001 -> R005");
    assert_eq!(
        summary.context_variables.get("derived.responsible_district"),
        Some(&Value::from("Paris District"))
    );
    // The raw calculation value is trimmed and canonicalized on write.
    assert_eq!(
        summary.context_variables.get("derived.status"),
        Some(&Value::from("Compliant"))
    );
}
