use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use ruleflow_core::Context;

use crate::error::EngineError;

/// Data rows available for one rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleRows {
    #[serde(default)]
    pub data: Vec<Context>,
}

/// Mock/sample data payload keyed by rule identifier, the context-seed
/// shape produced by the external data collaborator. The engine has no
/// dependency on how the rows were generated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataSet {
    rows: HashMap<String, RuleRows>,
}

impl DataSet {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EngineError::MissingPath(path.display().to_string()));
        }
        let raw = fs::read_to_string(path)
            .map_err(|err| EngineError::Core(ruleflow_core::CoreError::from_io(path, err)))?;
        serde_json::from_str(&raw).map_err(|err| EngineError::DataParse {
            path: path.display().to_string(),
            message: err.to_string(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rule_count(&self) -> usize {
        self.rows.len()
    }

    pub fn total_rows(&self) -> usize {
        self.rows.values().map(|rows| rows.data.len()).sum()
    }

    pub fn rows_for(&self, rule_id: &str) -> usize {
        self.rows.get(rule_id).map(|rows| rows.data.len()).unwrap_or(0)
    }

    /// Row at `index` for a rule, falling back to row 0 when the index
    /// is out of range. Used to inject inputs for chained rules mid-run.
    pub fn row(&self, rule_id: &str, index: usize) -> Option<Context> {
        let rows = self.rows.get(rule_id)?;
        rows.data
            .get(index)
            .or_else(|| rows.data.first())
            .cloned()
    }

    /// Builds the initial context for a run by merging the row at
    /// `index` for each of the given rules, in order.
    pub fn seed(&self, rule_ids: &[&str], index: usize) -> Context {
        let mut merged = Context::new();
        for rule_id in rule_ids {
            if let Some(rows) = self.rows.get(*rule_id) {
                if let Some(row) = rows.data.get(index) {
                    merged.deep_merge(row.clone());
                }
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruleflow_core::Value;

    fn data_set() -> DataSet {
        serde_json::from_value(serde_json::json!({
            "R001": {"data": [
                {"EPS": {"is_public_school": true}},
                {"EPS": {"is_public_school": false}},
            ]},
            "R002": {"data": [
                {"SIS": {"grade_level": "9"}},
            ]},
        }))
        .expect("data set")
    }

    #[test]
    fn seeds_merge_rows_at_the_same_index() {
        let data = data_set();
        let ctx = data.seed(&["R001", "R002"], 0);
        assert_eq!(
            ctx.read(&"EPS.is_public_school".into()),
            Value::Bool(true)
        );
        assert_eq!(ctx.read(&"SIS.grade_level".into()), Value::from("9"));
    }

    #[test]
    fn out_of_range_rows_fall_back_to_the_first() {
        let data = data_set();
        let row = data.row("R002", 5).expect("row");
        assert_eq!(row.read(&"SIS.grade_level".into()), Value::from("9"));
        assert!(data.row("R999", 0).is_none());
    }
}
