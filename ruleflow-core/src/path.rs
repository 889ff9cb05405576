use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Dotted path used to address a value inside a [`Context`](crate::Context),
/// e.g. `derived.responsible_district`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct VarPath(String);

impl VarPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.').filter(|segment| !segment.is_empty())
    }
}

impl From<&str> for VarPath {
    fn from(value: &str) -> Self {
        VarPath::new(value)
    }
}

impl From<String> for VarPath {
    fn from(value: String) -> Self {
        VarPath::new(value)
    }
}

impl fmt::Display for VarPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

lazy_static! {
    static ref NON_WORD: Regex = Regex::new(r"[^\w]").expect("non-word pattern");
    static ref UNDERSCORE_RUN: Regex = Regex::new(r"_+").expect("underscore pattern");
    static ref PAREN_ABBREV: Regex = Regex::new(r"\(([^)]+)\)").expect("abbreviation pattern");
}

/// Converts an arbitrary string into a valid expression identifier.
///
/// Non-word characters become `_`, runs of underscores collapse, and a
/// digit-leading result is prefixed with `_` so it can appear in a
/// dotted variable path.
pub fn sanitize_identifier(name: &str) -> String {
    let replaced = NON_WORD.replace_all(name, "_");
    let collapsed = UNDERSCORE_RUN.replace_all(&replaced, "_");
    let trimmed = collapsed.trim_matches('_');
    if trimmed
        .chars()
        .next()
        .map(|first| first.is_ascii_digit())
        .unwrap_or(false)
    {
        format!("_{trimmed}")
    } else if trimmed.is_empty() {
        name.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Derives the variable namespace prefix for a data source name.
///
/// A parenthesised abbreviation wins when present: `"Entity Profile
/// System (EPS)"` becomes `EPS`. Otherwise the whole name is sanitised:
/// `"SIS Enrollment"` becomes `SIS_Enrollment`.
pub fn source_prefix(data_source: &str) -> String {
    let raw = PAREN_ABBREV
        .captures(data_source)
        .and_then(|captures| captures.get(1))
        .map(|group| group.as_str())
        .unwrap_or(data_source);
    sanitize_identifier(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_segments() {
        let path = VarPath::from("derived.grades_served");
        let segments: Vec<&str> = path.segments().collect();
        assert_eq!(segments, vec!["derived", "grades_served"]);
    }

    #[test]
    fn sanitizes_identifiers() {
        assert_eq!(sanitize_identifier("SIS Enrollment"), "SIS_Enrollment");
        assert_eq!(sanitize_identifier("5Essentials"), "_5Essentials");
        assert_eq!(sanitize_identifier("UC  BEAR"), "UC_BEAR");
        assert_eq!(sanitize_identifier("already_clean"), "already_clean");
    }

    #[test]
    fn prefers_parenthesised_abbreviation() {
        assert_eq!(source_prefix("Entity Profile System (EPS)"), "EPS");
        assert_eq!(source_prefix("Pearson AccessNext"), "Pearson_AccessNext");
    }
}
