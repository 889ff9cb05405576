use std::fs;
use std::path::Path;

use crate::errors::{CoreError, Result};

/// Serializes a value to pretty JSON with canonical error handling.
pub fn to_pretty_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|err| CoreError::Serialization(err.to_string()))
}

/// Deserializes a JSON string with shared error semantics.
pub fn from_json_str<T: serde::de::DeserializeOwned>(input: &str) -> Result<T> {
    serde_json::from_str(input).map_err(|err| CoreError::Deserialization(err.to_string()))
}

/// Writes a value to disk as pretty JSON, the interchange format of
/// every batch artifact.
pub fn write_pretty_json<T: serde::Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, to_pretty_json(value)?).map_err(|err| CoreError::from_io(path, err))
}
