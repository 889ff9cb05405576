use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

/// Typed value stored in a [`Context`](crate::Context) and produced by
/// expression evaluation.
///
/// Integer and double are deliberately distinct variants: the expression
/// dialect is strictly typed and mixing the two is an error the rest of
/// the platform works hard to detect and repair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Human readable type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(value) => Some(*value),
            Value::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// Interprets the value as a boolean when it unambiguously represents
    /// one: a real boolean, or the strings "true"/"false" in any casing.
    pub fn as_loose_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            Value::Str(value) => match value.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Recursively promotes every integer to a double, leaving booleans
    /// untouched. The execution engine applies this to the whole context
    /// so data values always match double literals in expressions.
    pub fn coerce_numeric(self) -> Value {
        match self {
            Value::Int(value) => Value::Double(value as f64),
            Value::Map(map) => Value::Map(
                map.into_iter()
                    .map(|(key, value)| (key, value.coerce_numeric()))
                    .collect(),
            ),
            other => other,
        }
    }

    /// Converts a JSON value. Arrays are rejected: context rows hold
    /// scalars and nested objects only.
    pub fn from_json(json: serde_json::Value) -> Result<Value, CoreError> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(value) => Ok(Value::Bool(value)),
            serde_json::Value::Number(number) => {
                if let Some(value) = number.as_i64() {
                    Ok(Value::Int(value))
                } else if let Some(value) = number.as_f64() {
                    Ok(Value::Double(value))
                } else {
                    Err(CoreError::UnsupportedValue(number.to_string()))
                }
            }
            serde_json::Value::String(value) => Ok(Value::Str(value)),
            serde_json::Value::Object(map) => {
                let mut converted = BTreeMap::new();
                for (key, value) in map {
                    converted.insert(key, Value::from_json(value)?);
                }
                Ok(Value::Map(converted))
            }
            serde_json::Value::Array(_) => Err(CoreError::UnsupportedValue(
                "arrays are not valid context values".to_string(),
            )),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(value) => serde_json::Value::Bool(*value),
            Value::Int(value) => serde_json::Value::from(*value),
            Value::Double(value) => serde_json::Number::from_f64(*value)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(value) => serde_json::Value::String(value.clone()),
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Double(value) => write!(f, "{value}"),
            Value::Str(value) => write!(f, "{value}"),
            Value::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

/// Primitive kind declared by catalogue attribute metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Integer,
    Double,
    Boolean,
}

impl ScalarKind {
    /// Parses the loosely specified `data_type` strings found in rule
    /// catalogues. Unknown declarations default to string, the most
    /// common case in business data.
    pub fn parse(raw: &str) -> ScalarKind {
        match raw.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" => ScalarKind::Integer,
            "double" | "float" | "number" | "numeric" | "decimal" => ScalarKind::Double,
            "bool" | "boolean" => ScalarKind::Boolean,
            _ => ScalarKind::String,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinguishes_int_and_double_on_deserialize() {
        let int: Value = serde_json::from_str("3").expect("int");
        let double: Value = serde_json::from_str("3.0").expect("double");
        assert_eq!(int, Value::Int(3));
        assert_eq!(double, Value::Double(3.0));
    }

    #[test]
    fn coerces_nested_integers_to_double() {
        let value: Value = serde_json::from_str(r#"{"a": {"b": 7, "c": true}}"#).expect("map");
        let coerced = value.coerce_numeric();
        let json = coerced.to_json();
        assert_eq!(json["a"]["b"], serde_json::json!(7.0));
        assert_eq!(json["a"]["c"], serde_json::json!(true));
    }

    #[test]
    fn loose_bool_accepts_string_spellings() {
        assert_eq!(Value::from("TRUE").as_loose_bool(), Some(true));
        assert_eq!(Value::from("false").as_loose_bool(), Some(false));
        assert_eq!(Value::from("yes").as_loose_bool(), None);
    }

    #[test]
    fn rejects_arrays_in_context_rows() {
        let err = Value::from_json(serde_json::json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("arrays"));
    }

    #[test]
    fn scalar_kind_parsing_defaults_to_string() {
        assert_eq!(ScalarKind::parse("boolean"), ScalarKind::Boolean);
        assert_eq!(ScalarKind::parse("Float"), ScalarKind::Double);
        assert_eq!(ScalarKind::parse("mystery"), ScalarKind::String);
    }
}
