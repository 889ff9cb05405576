use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::text::{
    find_matching_colon, find_toplevel, is_fully_wrapped, paren_balance, split_code_segments,
    tail_window,
};

/// Which of the two expression roles a string plays. The null-else
/// rewrite only applies to calculations: a routing expression returning
/// null legitimately ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprRole {
    Calculation,
    Routing,
}

struct RepairPass {
    name: &'static str,
    calculation_only: bool,
    apply: fn(&str) -> String,
}

/// The ordered repair pipeline. Each pass is a pure function; the order
/// is load-bearing (numeric promotion must run before the `.size()`
/// revert, parenthesization before numeric promotion).
const PASSES: &[RepairPass] = &[
    RepairPass {
        name: "escape_digit_identifiers",
        calculation_only: false,
        apply: escape_digit_identifiers,
    },
    RepairPass {
        name: "parenthesize_nested_ternaries",
        calculation_only: false,
        apply: parenthesize_nested_ternaries,
    },
    RepairPass {
        name: "balance_parentheses",
        calculation_only: false,
        apply: balance_parentheses,
    },
    RepairPass {
        name: "normalize_numeric_types",
        calculation_only: false,
        apply: normalize_numeric_types,
    },
    RepairPass {
        name: "replace_null_else_branch",
        calculation_only: true,
        apply: replace_null_else_branch,
    },
    RepairPass {
        name: "trim_string_literals",
        calculation_only: false,
        apply: trim_string_literals,
    },
    RepairPass {
        name: "restore_size_comparisons",
        calculation_only: false,
        apply: restore_size_comparisons,
    },
];

/// Deterministically rewrites the common generation mistakes before the
/// expression reaches the analyzer or the evaluator. Idempotent:
/// `repair(repair(e)) == repair(e)`.
pub fn repair(expr: &str, role: ExprRole) -> String {
    let mut fixed = expr.to_string();
    for pass in PASSES {
        if pass.calculation_only && role != ExprRole::Calculation {
            continue;
        }
        let next = (pass.apply)(&fixed);
        if next != fixed {
            tracing::debug!(pass = pass.name, "auto-repaired expression");
        }
        fixed = next;
    }
    fixed
}

lazy_static! {
    static ref DIGIT_IDENT: Regex =
        Regex::new(r"(^|[^\w])(\d+[a-zA-Z_]\w*)").expect("digit identifier");
    static ref TERNARY_INT_TIMES_DOUBLE: Regex =
        Regex::new(r"\?\s*(\d+)\s*:\s*(\d+)\s*\)\s*([*/%])\s*(\d+\.\d+)").expect("fix a");
    static ref VAR_CMP_DOUBLE: Regex = Regex::new(
        r"\b([a-zA-Z_]\w*(?:\.[a-zA-Z_]\w*)+)\s*([><=!]=?)\s*(\d+\.\d+)"
    )
    .expect("fix b");
    static ref DOUBLE_CMP_VAR: Regex = Regex::new(
        r"(\d+\.\d+)\s*([><=!]=?)\s*([a-zA-Z_]\w*(?:\.[a-zA-Z_]\w*)+)"
    )
    .expect("fix c");
    static ref INT_CONVERSION_ARITH: Regex = Regex::new(
        r"\bint\(\s*([a-zA-Z_]\w*(?:\.[a-zA-Z_]\w*)+)\s*\)\s*([+\-*/])\s*(\d+(?:\.\d+)?)"
    )
    .expect("fix d");
    static ref CMP_INT: Regex =
        Regex::new(r"([><=!]=?)\s*(\d+)([\s)\]&|?:,])").expect("fix f");
    static ref CMP_INT_EOL: Regex = Regex::new(r"([><=!]=?)\s*(\d+)$").expect("fix f eol");
    static ref TERNARY_INT_THEN: Regex = Regex::new(r"(\?)\s*(\d+)\s*(:)").expect("fix g then");
    static ref TERNARY_INT_ELSE: Regex =
        Regex::new(r"(:)\s*(\d+)([\s)]|$)").expect("fix g else");
    static ref LIST_LITERAL: Regex = Regex::new(r"\[([^\]]*)\]").expect("fix h");
    static ref LIST_INT: Regex = Regex::new(r"(\d+)(\.\d+)?").expect("fix h int");
    static ref CONCAT_LHS: Regex = Regex::new(
        r"\b([a-zA-Z_]\w*(?:\.[a-zA-Z_]\w*)+)(\s*\+\s*')"
    )
    .expect("fix e lhs");
    static ref CONCAT_RHS: Regex = Regex::new(
        r"('\s*\+\s*)([a-zA-Z_]\w*(?:\.[a-zA-Z_]\w*)+)"
    )
    .expect("fix e rhs");
    static ref STRING_METHOD_AHEAD: Regex =
        Regex::new(r"^\s*\.\s*(?:contains|startsWith|endsWith)").expect("fix e method");
    static ref NULL_ELSE_EOL: Regex = Regex::new(r":\s*null\s*$").expect("null else eol");
    static ref NULL_ELSE_PAREN: Regex = Regex::new(r":\s*null\s*\)").expect("null else paren");
    static ref STRING_LITERAL: Regex = Regex::new(r"'([^']*)'").expect("string literal");
    static ref SIZE_CMP_DOUBLE: Regex =
        Regex::new(r"\.size\(\)\s*([><=!]=?)\s*(\d+)\.0\b").expect("size cmp");
}

/// Pass 1: identifiers cannot start with a digit, so `5Essentials.rate`
/// becomes `_5Essentials.rate`. Quoted strings are left untouched.
fn escape_digit_identifiers(expr: &str) -> String {
    split_code_segments(expr)
        .into_iter()
        .map(|(is_code, segment)| {
            if is_code {
                DIGIT_IDENT
                    .replace_all(&segment, "${1}_${2}")
                    .into_owned()
            } else {
                segment
            }
        })
        .collect()
}

/// Pass 2: the dialect requires `A ? (B ? C : D) : E`; generators often
/// produce `A ? B ? C : D : E`, which does not parse. Recursively wraps
/// unparenthesized true branches, respecting quotes and existing parens.
fn parenthesize_nested_ternaries(expr: &str) -> String {
    let Some(q_pos) = find_toplevel(expr, '?') else {
        return expr.to_string();
    };
    let true_start = q_pos + 1;
    let Some(colon_pos) = find_matching_colon(expr, true_start) else {
        return expr.to_string(); // malformed, leave it for the parser to report
    };

    let true_branch = expr[true_start..colon_pos].trim();
    let false_branch = &expr[colon_pos + 1..];

    let fixed_true = if is_fully_wrapped(true_branch) {
        let inner = &true_branch[1..true_branch.len() - 1];
        format!("({})", parenthesize_nested_ternaries(inner))
    } else {
        let fixed = parenthesize_nested_ternaries(true_branch);
        if find_toplevel(&fixed, '?').is_some() {
            format!("({fixed})")
        } else {
            fixed
        }
    };

    let fixed_false = parenthesize_nested_ternaries(false_branch.trim_start());
    let condition = expr[..q_pos].trim_end();
    format!("{condition} ? {fixed_true} : {fixed_false}")
}

/// Pass 3: appends the closing parentheses a deeply chained ternary is
/// missing. Counts ignore parentheses inside string literals.
fn balance_parentheses(expr: &str) -> String {
    let (open, close) = paren_balance(expr);
    if open > close {
        let mut fixed = expr.to_string();
        fixed.push_str(&")".repeat(open - close));
        fixed
    } else {
        expr.to_string()
    }
}

/// Pass 4: numeric-type normalization. Integer ternary results adjacent
/// to double literals become doubles, dotted variables compared against
/// double literals are wrapped in `double()`, `int(v) op N` becomes
/// `double(v) op N.0`, integer literals in comparisons, ternary returns
/// and all-numeric lists are promoted, and non-string operands next to
/// string concatenation are wrapped in `string()`.
fn normalize_numeric_types(expr: &str) -> String {
    let fixed = TERNARY_INT_TIMES_DOUBLE
        .replace_all(expr, "? ${1}.0 : ${2}.0) ${3} ${4}")
        .into_owned();
    // Literal promotion runs before the double() wraps: wrapping first
    // would leave `v != 0` as `v != 0.0` on the first run and
    // `double(v) != 0.0` on the second, breaking idempotence.
    let fixed = CMP_INT
        .replace_all(&fixed, "${1} ${2}.0${3}")
        .into_owned();
    let fixed = CMP_INT_EOL.replace_all(&fixed, "${1} ${2}.0").into_owned();
    let fixed = TERNARY_INT_THEN
        .replace_all(&fixed, "${1} ${2}.0 ${3}")
        .into_owned();
    let fixed = TERNARY_INT_ELSE
        .replace_all(&fixed, "${1} ${2}.0${3}")
        .into_owned();
    let fixed = promote_numeric_lists(&fixed);
    let fixed = wrap_var_compared_to_double(&fixed);
    let fixed = DOUBLE_CMP_VAR
        .replace_all(&fixed, "${1} ${2} double(${3})")
        .into_owned();
    let fixed = INT_CONVERSION_ARITH
        .replace_all(&fixed, |captures: &Captures| {
            let literal = &captures[3];
            if literal.contains('.') {
                captures[0].to_string()
            } else {
                format!("double({}) {} {}.0", &captures[1], &captures[2], literal)
            }
        })
        .into_owned();
    wrap_string_concat(&fixed)
}

fn wrap_var_compared_to_double(expr: &str) -> String {
    let mut out = String::new();
    let mut last = 0;
    for captures in VAR_CMP_DOUBLE.captures_iter(expr) {
        let whole = captures.get(0).expect("match");
        if expr[..whole.start()].trim_end().ends_with("double(") {
            continue;
        }
        out.push_str(&expr[last..whole.start()]);
        out.push_str(&format!(
            "double({}) {} {}",
            &captures[1], &captures[2], &captures[3]
        ));
        last = whole.end();
    }
    out.push_str(&expr[last..]);
    out
}

fn promote_numeric_lists(expr: &str) -> String {
    LIST_LITERAL
        .replace_all(expr, |captures: &Captures| {
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
        .into_owned()
}

fn wrap_string_concat(expr: &str) -> String {
    if !expr.contains('+') || !expr.contains('\'') {
        return expr.to_string();
    }

    // VAR + 'literal'  becomes  string(VAR) + 'literal'
    let mut out = String::new();
    let mut last = 0;
    for captures in CONCAT_LHS.captures_iter(expr) {
        let whole = captures.get(0).expect("match");
        if tail_window(expr, whole.start(), 10).contains("string(") {
            continue;
        }
        out.push_str(&expr[last..whole.start()]);
        out.push_str(&format!("string({})", &captures[1]));
        out.push_str(&captures[2]);
        last = whole.end();
    }
    out.push_str(&expr[last..]);
    let expr = out;

    // 'literal' + VAR  becomes  'literal' + string(VAR), unless the
    // variable is immediately used as a string via one of its methods.
    let mut out = String::new();
    let mut last = 0;
    for captures in CONCAT_RHS.captures_iter(&expr) {
        let whole = captures.get(0).expect("match");
        if STRING_METHOD_AHEAD.is_match(&expr[whole.end()..]) {
            continue;
        }
        out.push_str(&expr[last..whole.start()]);
        out.push_str(&captures[1]);
        out.push_str(&format!("string({})", &captures[2]));
        last = whole.end();
    }
    out.push_str(&expr[last..]);
    out
}

/// Pass 5: a calculation's failure path must carry a meaningful value,
/// so a bare `null` else-branch becomes `'Not Applicable'`.
fn replace_null_else_branch(expr: &str) -> String {
    let fixed = NULL_ELSE_EOL
        .replace(expr, ": 'Not Applicable'")
        .into_owned();
    NULL_ELSE_PAREN
        .replace_all(&fixed, ": 'Not Applicable')")
        .into_owned()
}

/// Pass 6: strips leading/trailing whitespace inside string literals,
/// `' compliant'` becomes `'compliant'`.
fn trim_string_literals(expr: &str) -> String {
    STRING_LITERAL
        .replace_all(expr, |captures: &Captures| {
            format!("'{}'", captures[1].trim())
        })
        .into_owned()
}

/// Pass 7: `.size()` returns an integer; reverts the double promotion
/// pass 4 applies to its comparison literals.
fn restore_size_comparisons(expr: &str) -> String {
    SIZE_CMP_DOUBLE
        .replace_all(expr, ".size() ${1} ${2}")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repair_calc(expr: &str) -> String {
        repair(expr, ExprRole::Calculation)
    }

    #[test]
    fn escapes_digit_identifiers_outside_strings() {
        assert_eq!(
            repair_calc("5Essentials.rate >= 50.0"),
            "double(_5Essentials.rate) >= 50.0"
        );
        assert_eq!(
            repair_calc("EPS.label == '5Essentials'"),
            "EPS.label == '5Essentials'"
        );
    }

    #[test]
    fn parenthesizes_nested_ternary_true_branches() {
        let fixed = repair_calc("a.x == 1 ? b.y == 2 ? 'c' : 'd' : 'e'");
        assert_eq!(
            fixed,
            "double(a.x) == 1.0 ? (double(b.y) == 2.0 ? 'c' : 'd') : 'e'"
        );
        assert!(ruleflow_expr::parse(&fixed).is_ok());
    }

    #[test]
    fn appends_missing_closing_parentheses() {
        assert_eq!(
            repair_calc("(a.x == 'y' ? 'one' : 'two'"),
            "(a.x == 'y' ? 'one' : 'two')"
        );
    }

    #[test]
    fn promotes_integer_ternary_results_next_to_doubles() {
        assert_eq!(
            repair_calc("(a.flag == true ? 1 : 0) * 100.0"),
            "(a.flag == true ? 1.0 : 0.0) * 100.0"
        );
    }

    #[test]
    fn wraps_variables_compared_to_double_literals() {
        assert_eq!(
            repair_calc("EPS.rate >= 95.5"),
            "double(EPS.rate) >= 95.5"
        );
        assert_eq!(
            repair_calc("95.5 <= EPS.rate"),
            "95.5 <= double(EPS.rate)"
        );
        // Already wrapped stays wrapped.
        assert_eq!(
            repair_calc("double(EPS.rate) >= 95.5"),
            "double(EPS.rate) >= 95.5"
        );
    }

    #[test]
    fn rewrites_int_conversion_arithmetic() {
        assert_eq!(
            repair_calc("int(SIS.year) - 1"),
            "double(SIS.year) - 1.0"
        );
    }

    #[test]
    fn promotes_comparison_and_list_integers() {
        assert_eq!(
            repair_calc("SIS.year == 2019"),
            "double(SIS.year) == 2019.0"
        );
        assert_eq!(
            repair_calc("SIS.year in [2020, 2022, 2024]"),
            "SIS.year in [2020.0, 2022.0, 2024.0]"
        );
        assert_eq!(
            repair_calc("SIS.grade in ['1', '2']"),
            "SIS.grade in ['1', '2']"
        );
    }

    #[test]
    fn wraps_concatenated_non_string_operands() {
        assert_eq!(
            repair_calc("EIS.salary + '|' + EIS.name"),
            "string(EIS.salary) + '|' + string(EIS.name)"
        );
    }

    #[test]
    fn replaces_null_else_branch_for_calculations_only() {
        assert_eq!(
            repair("a.x == 'y' ? 'ok' : null", ExprRole::Calculation),
            "a.x == 'y' ? 'ok' : 'Not Applicable'"
        );
        assert_eq!(
            repair("a.x == 'y' ? 'R002' : null", ExprRole::Routing),
            "a.x == 'y' ? 'R002' : null"
        );
    }

    #[test]
    fn trims_whitespace_inside_string_literals() {
        assert_eq!(
            repair_calc("a.x == ' compliant '"),
            "a.x == 'compliant'"
        );
    }

    #[test]
    fn size_comparisons_stay_integer() {
        assert_eq!(
            repair_calc("EPS.name.size() > 0"),
            "EPS.name.size() > 0"
        );
        assert_eq!(
            repair_calc("EPS.name.size() > 0.0"),
            "EPS.name.size() > 0"
        );
    }

    #[test]
    fn repair_is_idempotent() {
        let cases = [
            "5Essentials.rate >= 50.0",
            "a.x == 1 ? b.y == 2 ? 'c' : 'd' : 'e'",
            "(a.flag == true ? 1 : 0) * 100.0",
            "EIS.salary + '|' + EIS.name",
            "a.x == 'y' ? 'ok' : null",
            "EPS.name.size() > 0",
            "SIS.year in [2020, 2022]",
            "EPS.total != 0 ? (double(EPS.part) / double(EPS.total)) * 100.0 : 0.0",
        ];
        for case in cases {
            let once = repair(case, ExprRole::Calculation);
            let twice = repair(&once, ExprRole::Calculation);
            assert_eq!(once, twice, "repair not idempotent for {case}");
        }
    }
}
