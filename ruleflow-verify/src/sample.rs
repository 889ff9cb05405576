use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::Regex;

use ruleflow_core::{Context, Value, VarPath};
use ruleflow_expr::evaluate;

use crate::diagnostic::Diagnostic;

const VAR: &str = r"[a-zA-Z_]\w*(?:\.[a-zA-Z_]\w*)+";

lazy_static! {
    static ref DOTTED: Regex = Regex::new(&format!(r"\b({VAR})\b")).expect("dotted");
    static ref STR_CMP: Regex = Regex::new(&format!(r"({VAR})\s*[!=]=\s*'")).expect("str cmp");
    static ref STR_CMP_REV: Regex =
        Regex::new(&format!(r"'\s*[!=]=\s*({VAR})")).expect("str cmp rev");
    static ref STR_METHOD: Regex = Regex::new(&format!(
        r"({VAR})\s*\.\s*(?:contains|startsWith|endsWith)\s*\("
    ))
    .expect("str method");
    static ref STR_IN_LIST: Regex = Regex::new(&format!(r"({VAR})\s+in\s+\[")).expect("in list");
    static ref NUM_CMP: Regex = Regex::new(&format!(r"({VAR})\s*[><=!]=?\s*\d")).expect("num cmp");
    static ref NUM_CMP_REV: Regex =
        Regex::new(&format!(r"\d\s*[><=!]=?\s*({VAR})")).expect("num cmp rev");
    static ref DOUBLE_WRAP: Regex =
        Regex::new(&format!(r"\bdouble\s*\(\s*({VAR})\s*\)")).expect("double wrap");
    static ref BOOL_CMP: Regex =
        Regex::new(&format!(r"({VAR})\s*==\s*(?:true|false)\b")).expect("bool cmp");
    static ref DERIVED: Regex = Regex::new(r"derived\.(\w+)").expect("derived");
}

const STRING_METHOD_SUFFIXES: &[&str] = &["contains", "startsWith", "endsWith", "size", "matches"];

/// Extracts the dotted variable references from an expression, with
/// trailing method segments stripped and order preserved.
pub fn extract_variables(expr: &str) -> Vec<VarPath> {
    let mut seen = BTreeSet::new();
    let mut variables = Vec::new();
    for captures in DOTTED.captures_iter(expr) {
        let mut segments: Vec<&str> = captures[1].split('.').collect();
        while segments.len() > 1
            && STRING_METHOD_SUFFIXES.contains(segments.last().expect("segment"))
        {
            segments.pop();
        }
        if segments.len() < 2 {
            continue;
        }
        let path = segments.join(".");
        if seen.insert(path.clone()) {
            variables.push(VarPath::new(path));
        }
    }
    variables
}

/// Builds one synthetic context satisfying the expression's own literal
/// comparisons: string-compared variables get a string, boolean-compared
/// ones a boolean, numeric ones a non-zero double (so a synthetic zero
/// never causes a spurious division failure). Unclassified variables
/// default to string, the most common case in business data.
pub fn synthesize(expr: &str) -> Context {
    let mut strings = BTreeSet::new();
    let mut numbers = BTreeSet::new();
    let mut booleans = BTreeSet::new();

    for regex in [&*STR_CMP, &*STR_CMP_REV, &*STR_METHOD, &*STR_IN_LIST] {
        for captures in regex.captures_iter(expr) {
            strings.insert(captures[1].to_string());
        }
    }
    for regex in [&*NUM_CMP, &*NUM_CMP_REV, &*DOUBLE_WRAP] {
        for captures in regex.captures_iter(expr) {
            numbers.insert(captures[1].to_string());
        }
    }
    for captures in BOOL_CMP.captures_iter(expr) {
        booleans.insert(captures[1].to_string());
    }

    let mut ctx = Context::new();
    for variable in extract_variables(expr) {
        let key = variable.as_str().to_string();
        let value = if strings.contains(&key) {
            Value::from("sample_value")
        } else if booleans.contains(&key) {
            Value::Bool(true)
        } else if numbers.contains(&key) {
            Value::Double(10.0)
        } else {
            Value::from("sample_value")
        };
        ctx.write(&variable, value);
    }

    // Routing expressions reference derived outputs written by earlier
    // calculations; give those placeholders too.
    if expr.contains("derived") {
        for captures in DERIVED.captures_iter(expr) {
            let path = VarPath::new(format!("derived.{}", &captures[1]));
            if ctx.read(&path).is_null() {
                ctx.write(&path, Value::from("sample_value"));
            }
        }
    }

    ctx
}

/// Test-executes an already repaired expression against synthesized
/// sample data.
///
/// Division by zero, overload and conversion failures, and non-boolean
/// ternary conditions are tolerated: they are artifacts of the sample
/// data's approximate types. Anything else is a genuine fault in the
/// expression itself.
pub fn test_execute(expr: &str) -> Option<Diagnostic> {
    let trimmed = expr.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return None;
    }

    let ctx = synthesize(expr);
    match evaluate(expr, &ctx) {
        Ok(_) => None,
        Err(err) if err.is_parse() => Some(Diagnostic::syntax(err.to_string())),
        Err(err) if err.is_data_dependent() => None,
        Err(err) => Some(Diagnostic::runtime_fault(format!(
            "test execution with sample data failed: {err}"
        ))),
    }
}
