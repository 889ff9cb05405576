use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::errors::CoreError;
use crate::rule::Rule;
use crate::serde_utils::write_pretty_json;

/// Loads a rule catalogue from a JSON or YAML file.
///
/// Accepted shapes: a `{ "rules": [...] }` document, a bare list, or a
/// single rule object. Duplicate rule identifiers are rejected.
pub fn load_catalog(path: impl AsRef<Path>) -> Result<Vec<Rule>, CoreError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(CoreError::MissingPath(path.display().to_string()));
    }

    let raw = fs::read_to_string(path).map_err(|err| CoreError::from_io(path, err))?;
    let rules = parse_catalog(&raw, path)?;
    ensure_unique_ids(&rules)?;
    tracing::debug!(count = rules.len(), path = %path.display(), "loaded rule catalogue");
    Ok(rules)
}

/// Writes a catalogue back as pretty JSON, the flat-file interchange
/// format of the batch tools.
pub fn save_catalog(path: impl AsRef<Path>, rules: &[Rule]) -> Result<(), CoreError> {
    write_pretty_json(path, &rules)
}

fn parse_catalog(raw: &str, path: &Path) -> Result<Vec<Rule>, CoreError> {
    let mut attempts = Vec::new();

    if let Ok(doc) = serde_yaml::from_str::<CatalogDocument>(raw) {
        return Ok(doc.rules);
    }
    attempts.push("rules document");

    if let Ok(list) = serde_yaml::from_str::<Vec<Rule>>(raw) {
        return Ok(list);
    }
    attempts.push("list");

    if let Ok(rule) = serde_yaml::from_str::<Rule>(raw) {
        return Ok(vec![rule]);
    }
    attempts.push("single");

    Err(CoreError::CatalogParse {
        path: path.display().to_string(),
        message: format!("unable to parse rule catalogue using {attempts:?} formats"),
    })
}

fn ensure_unique_ids(rules: &[Rule]) -> Result<(), CoreError> {
    let mut seen = HashSet::new();
    for rule in rules {
        if !seen.insert(rule.rule_id.clone()) {
            return Err(CoreError::DuplicateRule {
                id: rule.rule_id.clone(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    rules: Vec<Rule>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_list() {
        let raw = r#"[{"rule_id": "R001"}, {"rule_id": "R002"}]"#;
        let rules = parse_catalog(raw, Path::new("rules.json")).expect("rules");
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].rule_id, "R002");
    }

    #[test]
    fn parses_yaml_document() {
        let raw = "rules:\n  - rule_id: R001\n    rule_name: Grades Served\n";
        let rules = parse_catalog(raw, Path::new("rules.yaml")).expect("rules");
        assert_eq!(rules[0].rule_name, "Grades Served");
    }

    #[test]
    fn rejects_duplicate_identifiers() {
        let raw = r#"[{"rule_id": "R001"}, {"rule_id": "R001"}]"#;
        let rules = parse_catalog(raw, Path::new("rules.json")).expect("rules");
        let err = ensure_unique_ids(&rules).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateRule { .. }));
    }
}
