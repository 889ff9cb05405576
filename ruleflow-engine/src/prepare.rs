//! Data-aware expression pre-resolution.
//!
//! The embedded evaluator is strictly typed: it cannot compare typed or
//! numeric values against null, and after context-wide numeric coercion
//! every data value is a double while expression integer literals are
//! ints. These passes rewrite an expression against the live context so
//! the evaluator only ever sees resolvable comparisons. They mirror the
//! verifier's static repairs but run with data in hand.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use ruleflow_core::{Context, Value};
use ruleflow_expr::grammar;

const VAR: &str = r"[a-zA-Z_]\w*(?:\.[a-zA-Z_]\w*)*";

lazy_static! {
    static ref NULL_CHECK: Regex =
        Regex::new(&format!(r"\b({VAR})\s*(!=|==)\s*null\b")).expect("null check");
    static ref NULL_CHECK_REV: Regex =
        Regex::new(&format!(r"\bnull\s*(!=|==)\s*({VAR})\b")).expect("null check rev");
    static ref BOOL_CHECK: Regex =
        Regex::new(&format!(r"\b({VAR})\s*(==|!=)\s*(true|false)\b")).expect("bool check");
    static ref BOOL_CHECK_REV: Regex =
        Regex::new(&format!(r"\b(true|false)\s*(==|!=)\s*({VAR})\b")).expect("bool check rev");
    static ref STRING_RANGE: Regex = Regex::new(&format!(
        r"\b({VAR})\s*>=\s*'(\d+)'\s*&&\s*({VAR})\s*<=\s*'(\d+)'"
    ))
    .expect("string range");
    static ref STRING_RANGE_REV: Regex = Regex::new(&format!(
        r"\b({VAR})\s*<=\s*'(\d+)'\s*&&\s*({VAR})\s*>=\s*'(\d+)'"
    ))
    .expect("string range rev");
    static ref CMP_INT: Regex =
        Regex::new(r"([><=!]=?)\s*(\d+)([\s)\]&|?:,])").expect("cmp int");
    static ref CMP_INT_EOL: Regex = Regex::new(r"([><=!]=?)\s*(\d+)$").expect("cmp int eol");
    static ref TERNARY_INT_THEN: Regex = Regex::new(r"(\?)\s*(\d+)\s*(:)").expect("ternary then");
    static ref TERNARY_INT_ELSE: Regex =
        Regex::new(r"(:)\s*(\d+)([\s)]|$)").expect("ternary else");
    static ref LIST_LITERAL: Regex = Regex::new(r"\[([^\]]*)\]").expect("list literal");
    static ref LIST_INT: Regex = Regex::new(r"(\d+)(\.\d+)?").expect("list int");
    static ref MOD_EQ: Regex = Regex::new(
        r"\bdouble\(([^)]+)\)\s*%\s*(\d+)(?:\.0)?\s*\)\s*(==|!=)\s*(\d+)\.0"
    )
    .expect("mod eq");
    static ref MOD_BARE_DOUBLE: Regex =
        Regex::new(r"\bdouble\(([^)]+)\)\s*%\s*(\d+)\.0\b").expect("mod bare double");
    static ref MOD_BARE_INT: Regex =
        Regex::new(r"\bdouble\(([^)]+)\)\s*%\s*(\d+)($|[^.\d])").expect("mod bare int");
    static ref SIZE_CMP_DOUBLE: Regex =
        Regex::new(r"\.size\(\)\s*([><=!]=?)\s*(\d+)\.0\b").expect("size cmp");
    static ref SIZE_GT_ZERO: Regex = Regex::new(
        r"([a-zA-Z_]\w*(?:\.[a-zA-Z_]\w*)+)\.size\(\)\s*([><=!]=?)\s*(\d+)"
    )
    .expect("size gt zero");
}

/// Applies every pre-resolution pass against the (sanitized-key)
/// context, in the order the evaluator needs them.
pub fn prepare(expr: &str, ctx: &Context) -> String {
    let resolved = resolve_null_checks(expr, ctx);
    let resolved = resolve_bool_comparisons(&resolved, ctx);
    let resolved = rewrite_string_ranges(&resolved);
    let resolved = promote_int_literals(&resolved);
    let resolved = restore_size_comparisons(&resolved);
    rewrite_size_nonempty(&resolved, ctx)
}

/// Resolves `v == null` / `v != null` (both operand orders) by direct
/// context lookup, substituting `true`/`false`.
pub fn resolve_null_checks(expr: &str, ctx: &Context) -> String {
    let resolved = NULL_CHECK
        .replace_all(expr, |captures: &Captures| {
            resolve_null(&captures[1], &captures[2], ctx)
                .unwrap_or_else(|| captures[0].to_string())
        })
        .into_owned();
    NULL_CHECK_REV
        .replace_all(&resolved, |captures: &Captures| {
            resolve_null(&captures[2], &captures[1], ctx)
                .unwrap_or_else(|| captures[0].to_string())
        })
        .into_owned()
}

fn resolve_null(var: &str, op: &str, ctx: &Context) -> Option<String> {
    if grammar::is_reserved(var) {
        return None;
    }
    let is_null = ctx.read(&var.into()).is_null();
    let result = if op == "!=" { !is_null } else { is_null };
    Some(result.to_string())
}

/// Resolves `v == true/false` (both operand orders) using the stored
/// value. Booleans and the strings "true"/"false" (case-insensitive)
/// resolve; a missing value counts as not-true, so `v == true` becomes
/// `false` and `v != true` becomes `true`; any other value is left for
/// the evaluator.
pub fn resolve_bool_comparisons(expr: &str, ctx: &Context) -> String {
    let resolved = BOOL_CHECK
        .replace_all(expr, |captures: &Captures| {
            resolve_bool(&captures[1], &captures[2], &captures[3], ctx)
                .unwrap_or_else(|| captures[0].to_string())
        })
        .into_owned();
    BOOL_CHECK_REV
        .replace_all(&resolved, |captures: &Captures| {
            resolve_bool(&captures[3], &captures[2], &captures[1], ctx)
                .unwrap_or_else(|| captures[0].to_string())
        })
        .into_owned()
}

fn resolve_bool(var: &str, op: &str, keyword: &str, ctx: &Context) -> Option<String> {
    if grammar::is_reserved(var) {
        return None;
    }
    let checking_true = keyword == "true";
    let value = ctx.read(&var.into());
    let stored = match value {
        Value::Null => false,
        other => other.as_loose_bool()?,
    };
    let result = if op == "==" {
        stored == checking_true
    } else {
        stored != checking_true
    };
    Some(result.to_string())
}

/// Rewrites lexicographic numeral ranges like `v >= '1' && v <= '12'`
/// into explicit membership lists, in either operand order. Ranges wider
/// than 50 elements are left alone.
pub fn rewrite_string_ranges(expr: &str) -> String {
    let rewritten = STRING_RANGE
        .replace_all(expr, |captures: &Captures| {
            expand_range(&captures[1], &captures[3], &captures[2], &captures[4])
                .unwrap_or_else(|| captures[0].to_string())
        })
        .into_owned();
    STRING_RANGE_REV
        .replace_all(&rewritten, |captures: &Captures| {
            expand_range(&captures[1], &captures[3], &captures[4], &captures[2])
                .unwrap_or_else(|| captures[0].to_string())
        })
        .into_owned()
}

fn expand_range(var_a: &str, var_b: &str, low: &str, high: &str) -> Option<String> {
    if var_a != var_b {
        return None;
    }
    let low: i64 = low.parse().ok()?;
    let high: i64 = high.parse().ok()?;
    if high < low || high - low > 50 {
        return None;
    }
    let items: Vec<String> = (low..=high).map(|n| format!("'{n}'")).collect();
    Some(format!("{var_a} in [{}]", items.join(", ")))
}

/// Promotes integer literals to doubles so they match the coerced
/// context, then rewrites modulo back to integer arithmetic (`%` only
/// operates on ints).
pub fn promote_int_literals(expr: &str) -> String {
    let fixed = CMP_INT.replace_all(expr, "${1} ${2}.0${3}").into_owned();
    let fixed = CMP_INT_EOL.replace_all(&fixed, "${1} ${2}.0").into_owned();
    let fixed = TERNARY_INT_THEN
        .replace_all(&fixed, "${1} ${2}.0 ${3}")
        .into_owned();
    let fixed = TERNARY_INT_ELSE
        .replace_all(&fixed, "${1} ${2}.0${3}")
        .into_owned();
    let fixed = LIST_LITERAL
        .replace_all(&fixed, |captures: &Captures| {
            let content = &captures[1];
            if content.contains('\'') || content.contains('"') {
                return captures[0].to_string();
            }
            let promoted = LIST_INT.replace_all(content, |inner: &Captures| {
                if inner.get(2).is_some() {
                    inner[0].to_string()
                } else {
                    format!("{}.0", &inner[1])
                }
            });
            format!("[{promoted}]")
        })
        .into_owned();
    let fixed = MOD_EQ
        .replace_all(&fixed, "int(${1}) % ${2}) ${3} ${4}")
        .into_owned();
    let fixed = MOD_BARE_DOUBLE
        .replace_all(&fixed, "int(${1}) % ${2}")
        .into_owned();
    MOD_BARE_INT
        .replace_all(&fixed, |captures: &Captures| {
            format!("int({}) % {}{}", &captures[1], &captures[2], &captures[3])
        })
        .into_owned()
}

/// `.size()` returns an int; reverts the double promotion applied to
/// its comparison literals.
pub fn restore_size_comparisons(expr: &str) -> String {
    if !expr.contains(".size()") {
        return expr.to_string();
    }
    SIZE_CMP_DOUBLE
        .replace_all(expr, ".size() ${1} ${2}")
        .into_owned()
}

/// Rewrites `v.size() > 0` to `v != ''` when the stored value is a
/// string, sidestepping overload failures inside enclosing ternaries.
pub fn rewrite_size_nonempty(expr: &str, ctx: &Context) -> String {
    if !expr.contains(".size()") {
        return expr.to_string();
    }
    SIZE_GT_ZERO
        .replace_all(expr, |captures: &Captures| {
            let var = &captures[1];
            let op = &captures[2];
            let literal: i64 = captures[3].parse().unwrap_or(-1);
            if literal == 0 && matches!(ctx.read(&var.into()), Value::Str(_)) {
                if op == ">" || op == ">=" {
                    return format!("{var} != ''");
                }
                if op == "==" {
                    return format!("{var} == ''");
                }
            }
            captures[0].to_string()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(json: serde_json::Value) -> Context {
        Context::from_json(json).expect("context")
    }

    #[test]
    fn resolves_null_checks_by_lookup() {
        let ctx = ctx(serde_json::json!({"A": {"b": 1}}));
        assert_eq!(resolve_null_checks("A.b != null", &ctx), "true");
        assert_eq!(resolve_null_checks("A.missing != null", &ctx), "false");
        assert_eq!(resolve_null_checks("A.missing == null", &ctx), "true");
        assert_eq!(resolve_null_checks("null == A.b", &ctx), "false");
    }

    #[test]
    fn resolves_bool_comparisons_from_stored_values() {
        let ctx = ctx(serde_json::json!({
            "EPS": {"a": true, "b": "False", "c": "maybe"},
        }));
        assert_eq!(resolve_bool_comparisons("EPS.a == true", &ctx), "true");
        assert_eq!(resolve_bool_comparisons("EPS.b == false", &ctx), "true");
        assert_eq!(resolve_bool_comparisons("EPS.a != true", &ctx), "false");
        // Ambiguous strings stay for the evaluator.
        assert_eq!(
            resolve_bool_comparisons("EPS.c == true", &ctx),
            "EPS.c == true"
        );
        // Missing values count as not-true.
        assert_eq!(resolve_bool_comparisons("EPS.missing == true", &ctx), "false");
        assert_eq!(resolve_bool_comparisons("EPS.missing != true", &ctx), "true");
    }

    #[test]
    fn rewrites_string_ranges_to_membership() {
        let rewritten =
            rewrite_string_ranges("SIS.grade >= '1' && SIS.grade <= '12' ? 'ok' : 'no'");
        assert!(rewritten.starts_with("SIS.grade in ['1', '2'"));
        assert!(rewritten.contains("'12']"));
        // Different variables are untouched.
        assert_eq!(
            rewrite_string_ranges("SIS.a >= '1' && SIS.b <= '12'"),
            "SIS.a >= '1' && SIS.b <= '12'"
        );
    }

    #[test]
    fn promotes_int_literals_but_keeps_modulo_integer() {
        assert_eq!(
            promote_int_literals("SIS.year == 2019"),
            "SIS.year == 2019.0"
        );
        assert_eq!(
            promote_int_literals("(double(SIS.year) % 2) == 0"),
            "(int(SIS.year) % 2) == 0"
        );
        assert_eq!(
            promote_int_literals("double(SIS.count) % 2.0"),
            "int(SIS.count) % 2"
        );
    }

    #[test]
    fn size_rewrites_for_string_values() {
        let ctx = ctx(serde_json::json!({"EPS": {"name": "Lincoln", "count": 3}}));
        assert_eq!(
            rewrite_size_nonempty("EPS.name.size() > 0", &ctx),
            "EPS.name != ''"
        );
        assert_eq!(
            rewrite_size_nonempty("EPS.count.size() > 0", &ctx),
            "EPS.count.size() > 0"
        );
        assert_eq!(
            restore_size_comparisons("EPS.name.size() > 0.0"),
            "EPS.name.size() > 0"
        );
    }
}
