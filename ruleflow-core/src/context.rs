use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::path::{sanitize_identifier, VarPath};
use crate::value::Value;

/// Nested, dotted-path addressable store of typed values.
///
/// One context is created (or seeded) per execution run, mutated in place
/// by successive rule calculations and discarded when the run ends.
/// Reading a missing path yields [`Value::Null`], never an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    root: BTreeMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(root: BTreeMap<String, Value>) -> Self {
        Self { root }
    }

    /// Builds a context from a JSON object (e.g. a mock data row).
    pub fn from_json(json: serde_json::Value) -> Result<Self, CoreError> {
        match Value::from_json(json)? {
            Value::Map(root) => Ok(Self { root }),
            other => Err(CoreError::UnsupportedValue(format!(
                "context seed must be an object, found {}",
                other.type_name()
            ))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.root
    }

    /// Walks the dotted path and returns a copy of the value, or
    /// [`Value::Null`] when any segment is missing or a non-map value is
    /// traversed.
    pub fn read(&self, path: &VarPath) -> Value {
        let mut current: Option<&Value> = None;
        for segment in path.segments() {
            let map = match current {
                None => &self.root,
                Some(Value::Map(map)) => map,
                Some(_) => return Value::Null,
            };
            match map.get(segment) {
                Some(value) => current = Some(value),
                None => return Value::Null,
            }
        }
        current.cloned().unwrap_or(Value::Null)
    }

    /// Writes a value at the dotted path, creating intermediate maps.
    /// A scalar occupying an intermediate segment is replaced by a map.
    pub fn write(&mut self, path: &VarPath, value: Value) {
        let segments: Vec<&str> = path.segments().collect();
        if segments.is_empty() {
            return;
        }

        let mut current = &mut self.root;
        for segment in &segments[..segments.len() - 1] {
            let slot = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Map(BTreeMap::new()));
            if !matches!(slot, Value::Map(_)) {
                *slot = Value::Map(BTreeMap::new());
            }
            match slot {
                Value::Map(map) => current = map,
                _ => unreachable!("slot was just replaced with a map"),
            }
        }
        current.insert(segments[segments.len() - 1].to_string(), value);
    }

    /// Recursively merges another context into this one. Nested maps are
    /// merged key by key; any other collision is overwritten by `other`.
    pub fn deep_merge(&mut self, other: Context) {
        merge_maps(&mut self.root, other.root);
    }

    /// Flattens the tree into dotted-path keys, e.g.
    /// `{"derived": {"x": 1}}` becomes `{"derived.x": 1}`.
    pub fn flatten(&self) -> BTreeMap<String, Value> {
        let mut flat = BTreeMap::new();
        flatten_into(&self.root, "", &mut flat);
        flat
    }

    /// Returns a copy whose keys have been sanitised into valid
    /// expression identifiers, matching the namespaces the verifier
    /// derives for data sources.
    pub fn sanitize_keys(&self) -> Context {
        Context {
            root: sanitize_map(&self.root),
        }
    }

    /// Returns a copy with every integer promoted to a double, so data
    /// values always match double literals in prepared expressions.
    pub fn coerce_numeric(&self) -> Context {
        Context {
            root: self
                .root
                .iter()
                .map(|(key, value)| (key.clone(), value.clone().coerce_numeric()))
                .collect(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        Value::Map(self.root.clone()).to_json()
    }
}

fn merge_maps(base: &mut BTreeMap<String, Value>, override_map: BTreeMap<String, Value>) {
    for (key, value) in override_map {
        match (base.get_mut(&key), value) {
            (Some(Value::Map(existing)), Value::Map(incoming)) => {
                merge_maps(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn flatten_into(map: &BTreeMap<String, Value>, prefix: &str, flat: &mut BTreeMap<String, Value>) {
    for (key, value) in map {
        let full_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Map(nested) => flatten_into(nested, &full_key, flat),
            other => {
                flat.insert(full_key, other.clone());
            }
        }
    }
}

fn sanitize_map(map: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    map.iter()
        .map(|(key, value)| {
            let sanitized = sanitize_identifier(key);
            let value = match value {
                Value::Map(nested) => Value::Map(sanitize_map(nested)),
                other => other.clone(),
            };
            (sanitized, value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Context {
        Context::from_json(serde_json::json!({
            "EPS": {"is_public_school": true, "grades_offered": "PK-12"},
        }))
        .expect("seed context")
    }

    #[test]
    fn missing_path_reads_null() {
        let ctx = seeded();
        assert_eq!(ctx.read(&"EPS.missing".into()), Value::Null);
        assert_eq!(ctx.read(&"Nope.at_all".into()), Value::Null);
        assert_eq!(
            ctx.read(&"EPS.grades_offered.too_deep".into()),
            Value::Null
        );
    }

    #[test]
    fn writes_create_intermediate_maps() {
        let mut ctx = Context::new();
        ctx.write(&"derived.grades_served".into(), Value::from("PK-12"));
        assert_eq!(
            ctx.read(&"derived.grades_served".into()),
            Value::from("PK-12")
        );
    }

    #[test]
    fn deep_merge_prefers_incoming_scalars() {
        let mut base = seeded();
        let incoming = Context::from_json(serde_json::json!({
            "EPS": {"grades_offered": "K-8"},
            "SIS": {"grade_level": "5"},
        }))
        .expect("incoming");
        base.deep_merge(incoming);
        assert_eq!(ctx_str(&base, "EPS.grades_offered"), "K-8");
        assert_eq!(ctx_str(&base, "SIS.grade_level"), "5");
        assert_eq!(base.read(&"EPS.is_public_school".into()), Value::Bool(true));
    }

    #[test]
    fn flattens_to_dotted_keys() {
        let ctx = seeded();
        let flat = ctx.flatten();
        assert_eq!(flat.get("EPS.grades_offered"), Some(&Value::from("PK-12")));
    }

    #[test]
    fn sanitizes_keys_recursively() {
        let ctx = Context::from_json(serde_json::json!({
            "5Essentials": {"response rate": 82},
        }))
        .expect("context");
        let clean = ctx.sanitize_keys();
        assert_eq!(
            clean.read(&"_5Essentials.response_rate".into()),
            Value::Int(82)
        );
    }

    fn ctx_str(ctx: &Context, path: &str) -> String {
        match ctx.read(&path.into()) {
            Value::Str(value) => value,
            other => panic!("expected string at {path}, found {other:?}"),
        }
    }
}
