use lazy_static::lazy_static;
use regex::Regex;

use ruleflow_expr::grammar;

use crate::diagnostic::Diagnostic;
use crate::text::{find_toplevel, strip_string_literals, tail_window};

lazy_static! {
    static ref AGGREGATE_FN: Regex = Regex::new(
        r"\b(SUM|sum|COUNT|count|AVG|avg|MIN|min|MAX|max|AVERAGE|average|TOTAL|total|filter|map|reduce|exists|all|flatten|sort|reverse|distinct|unique|length|len)\s*\("
    )
    .expect("aggregate pattern");
    static ref MAP_LITERAL: Regex = Regex::new(r"\{\s*'?\w+'?\s*:").expect("map pattern");
    static ref CUSTOM_FN: Regex = Regex::new(r"\b(lookup_\w+|get_\w+)\s*\(").expect("custom fn");
    static ref DATE_ARITH: Regex =
        Regex::new(r"_date\s*[-+]\s*\w+.*_date").expect("date arithmetic");
    static ref DATE_FN: Regex = Regex::new(
        r"\b(daysBetween|dateDiff|datediff|dateAdd|dateadd|duration|timestamp|getDate|getMonth|getYear|parseDate|formatDate|toDate|toTimestamp)\s*\("
    )
    .expect("date fn");
    static ref BAD_STRING_METHOD: Regex = Regex::new(
        r"\.(split|trim|strip|lower|upper|toLower|toUpper|toLowerCase|toUpperCase|replace|replaceAll|substring|substr|slice|matches|match|indexOf|lastIndexOf|charAt|padLeft|padRight|format|join|concat)\s*\("
    )
    .expect("string method");
    static ref BAD_CONVERSION: Regex = Regex::new(
        r"\b(float|str|list|dict|Number|String|Boolean|parseInt|parseFloat|parseDouble|toString|toInt|toDouble|to_int|to_double|to_string)\s*\("
    )
    .expect("conversion");
    static ref MATH_FN: Regex = Regex::new(
        r"\b(abs|ceil|floor|round|pow|sqrt|log|log10|exp|Math\.\w+|math\.\w+)\s*\("
    )
    .expect("math fn");
    static ref INDEXING: Regex =
        Regex::new(r"\b([a-zA-Z_]\w*(?:\.[a-zA-Z_]\w*)*)\s*\[").expect("indexing");
    static ref DOTTED_VAR: Regex =
        Regex::new(r"\b[a-zA-Z_]\w*(?:\.[a-zA-Z_]\w*)+\b").expect("dotted var");
    static ref BARE_AFTER_OP: Regex =
        Regex::new(r"(?:[><=!]=?|[+\-*/%])\s*([a-zA-Z_]\w*)\b").expect("bare after op");
    static ref BARE_BEFORE_OP: Regex =
        Regex::new(r"\b([a-zA-Z_]\w*)\s*(?:[><=!]=?|[+\-*/%])").expect("bare before op");
    static ref BARE_TERNARY_COND: Regex =
        Regex::new(r"^!?\s*[a-zA-Z_]\w*(?:\.[a-zA-Z_]\w*)+$").expect("bare condition");
    static ref INNER_BARE_COND: Regex =
        Regex::new(r":\s*(!?\s*[a-zA-Z_]\w*(?:\.[a-zA-Z_]\w*)+)\s*\?").expect("inner bare");
    static ref OPERATOR_CHARS: Regex = Regex::new(r"[><=!&|]").expect("operator chars");
    static ref INT_TERNARY_TIMES_DOUBLE: Regex =
        Regex::new(r"\?\s*(\d+)\s*:\s*(\d+)\s*\)\s*\*\s*(\d+\.\d+)").expect("ternary mix");
    static ref INT_OP_DOUBLE: Regex =
        Regex::new(r"(^|[^\d.])(\d+)\s*[*/%]\s*(\d+\.\d+)").expect("int op double");
    static ref STRING_COND: Regex = Regex::new(r"'[^']*'\s*\?").expect("string cond");
    static ref VAR_CMP_DOUBLE: Regex = Regex::new(
        r"\b([a-zA-Z_]\w*(?:\.[a-zA-Z_]\w*)+)\s*([><=!]=?)\s*(\d+\.\d+)"
    )
    .expect("var cmp double");
    static ref VAR_DIV_VAR: Regex = Regex::new(
        r"\b([a-zA-Z_]\w*(?:\.[a-zA-Z_]\w*)+)\s*/\s*([a-zA-Z_]\w*(?:\.[a-zA-Z_]\w*)+)\b"
    )
    .expect("var division");
    static ref STRING_RANGE: Regex = Regex::new(
        r"\b([a-zA-Z_]\w*(?:\.[a-zA-Z_]\w*)*)\s*>=\s*'(\d+)'\s*&&\s*([a-zA-Z_]\w*(?:\.[a-zA-Z_]\w*)*)\s*<=\s*'(\d+)'"
    )
    .expect("string range");
    static ref GUARDED_DENOMINATOR: Regex =
        Regex::new(r"/\s*\([^)]*\?\s*[\d.]+\s*:\s*0(?:\.0)?\s*\)").expect("guarded denominator");
    static ref MIXED_AND_OR: Regex =
        Regex::new(r"&&\s*[^()]*?\.\w+\([^)]*\)\s*\|\|").expect("mixed and or");
}

/// Statically analyzes an expression for forbidden constructs, type
/// mismatches and logic errors.
///
/// The three categories are evaluated independently and the first match
/// per category wins, so at most one diagnostic of each kind is
/// reported. All checks ignore the contents of single-quoted strings.
pub fn analyze(expr: &str) -> Vec<Diagnostic> {
    let cleaned = strip_string_literals(expr);

    let mut diagnostics = Vec::new();
    if let Some(diagnostic) = check_forbidden(expr, &cleaned) {
        diagnostics.push(diagnostic);
    }
    if let Some(diagnostic) = check_type_mismatch(expr, &cleaned) {
        diagnostics.push(diagnostic);
    }
    if let Some(diagnostic) = check_logic_error(expr, &cleaned) {
        diagnostics.push(diagnostic);
    }
    diagnostics
}

fn check_forbidden(expr: &str, cleaned: &str) -> Option<Diagnostic> {
    if let Some(captures) = AGGREGATE_FN.captures(cleaned) {
        let function = &captures[1];
        return Some(Diagnostic::forbidden(format!(
            "'{function}()' is not available in this runtime. Expressions evaluate one record \
             at a time. Express per-record logic (e.g. a 0/1 flag or the raw value) and remove \
             '{function}()' calls."
        )));
    }

    if MAP_LITERAL.is_match(expr) {
        return Some(Diagnostic::forbidden(
            "Map/struct literals {'key': value} are not supported. Return a single scalar \
             value. Encode multi-valued outputs as a delimited string.",
        ));
    }

    if let Some(captures) = CUSTOM_FN.captures(cleaned) {
        let function = &captures[1];
        return Some(Diagnostic::forbidden(format!(
            "Custom function '{function}()' does not exist. Use ternary chains or 'in' checks \
             instead."
        )));
    }

    if DATE_ARITH.is_match(cleaned) {
        return Some(Diagnostic::forbidden(
            "Date arithmetic on string dates is not supported. Compare date strings directly \
             with <, >, == (ISO ordering).",
        ));
    }
    if let Some(captures) = DATE_FN.captures(cleaned) {
        let function = &captures[1];
        return Some(Diagnostic::forbidden(format!(
            "'{function}()' is not available in this runtime. Compare date strings directly \
             with <, >, == (ISO ordering). Do NOT attempt date parsing, arithmetic, or \
             timestamp functions."
        )));
    }

    if let Some(captures) = BAD_STRING_METHOD.captures(cleaned) {
        let method = &captures[1];
        let allowed = grammar::allowed_string_methods();
        return Some(Diagnostic::forbidden(format!(
            "'.{method}()' is not available in this runtime. The only supported string methods \
             are: {allowed}. Rewrite using those methods or ternary logic."
        )));
    }

    if let Some(captures) = BAD_CONVERSION.captures(cleaned) {
        let function = &captures[1];
        return Some(Diagnostic::forbidden(format!(
            "'{function}()' does not exist. The only type conversions available are: double(), \
             int(), string(). Replace '{function}()' with the correct function."
        )));
    }

    if let Some(captures) = MATH_FN.captures(cleaned) {
        let function = &captures[1];
        return Some(Diagnostic::forbidden(format!(
            "'{function}()' is not available. Only basic arithmetic operators (+, -, *, /, %) \
             are supported. Rewrite using those operators and ternary logic."
        )));
    }

    for captures in INDEXING.captures_iter(cleaned) {
        let var = &captures[1];
        if var == "in" || var.ends_with(".in") {
            continue;
        }
        // A bare name before a bracket may open a list literal; only a
        // dotted name is definitely a map access.
        let after = &cleaned[captures.get(0).expect("match").end()..];
        if !var.contains('.') && after.trim_start().starts_with(|c| c == '\'' || c == '"') {
            continue;
        }
        return Some(Diagnostic::forbidden(format!(
            "Map/array indexing '{var}[...]' is not supported. Use ternary chains instead."
        )));
    }

    let without_dotted = DOTTED_VAR.replace_all(cleaned, "");
    for captures in BARE_AFTER_OP
        .captures_iter(&without_dotted)
        .chain(BARE_BEFORE_OP.captures_iter(&without_dotted))
    {
        let name = &captures[1];
        if grammar::is_reserved(name) {
            continue;
        }
        return Some(Diagnostic::forbidden(format!(
            "Bare variable '{name}' is not namespace-qualified. All variables must use the \
             'prefix.attribute' format from the rule's data requirements (e.g. 'EIS.{name}' \
             instead of '{name}')."
        )));
    }

    None
}

fn check_type_mismatch(expr: &str, cleaned: &str) -> Option<Diagnostic> {
    // Bare dotted variable as a ternary condition, e.g. `SIS.has_iep ? ...`.
    if let Some(q_pos) = find_toplevel(cleaned, '?') {
        if q_pos > 0 {
            let condition = cleaned[..q_pos].trim();
            if BARE_TERNARY_COND.is_match(condition) {
                let bare = condition.trim_start_matches('!').trim();
                return Some(Diagnostic::type_mismatch(format!(
                    "Bare variable used as ternary condition: '{condition}'. An explicit \
                     boolean comparison is required. Write '{bare} == true' (if boolean) or \
                     '{bare} == 'true'' (if string)."
                )));
            }
            if let Some(captures) = INNER_BARE_COND.captures(cleaned) {
                let bare = captures[1].trim();
                if !OPERATOR_CHARS.is_match(bare) {
                    return Some(Diagnostic::type_mismatch(format!(
                        "Bare variable used as ternary condition: '{bare}'. An explicit \
                         boolean comparison is required."
                    )));
                }
            }
        }
    }

    // Bare string literal as a ternary condition, e.g. `&& 'text' ? ...`.
    for found in STRING_COND.find_iter(expr) {
        let prefix = expr[..found.start()].trim_end();
        let last = prefix.chars().last();
        if matches!(last, Some('=') | Some('!') | Some('>') | Some('<')) {
            continue;
        }
        if prefix.ends_with("in [") || prefix.ends_with("in[") {
            continue;
        }
        if matches!(last, Some(',') | Some('[')) {
            continue;
        }
        return Some(Diagnostic::type_mismatch(
            "A string literal is used as a ternary condition. String literals are not \
             booleans. Remove the ternary or replace it with a proper boolean condition like \
             'VAR == value ? ... : ...'.",
        ));
    }

    if let Some(captures) = INT_TERNARY_TIMES_DOUBLE.captures(cleaned) {
        let (i1, i2, d) = (&captures[1], &captures[2], &captures[3]);
        return Some(Diagnostic::type_mismatch(format!(
            "Ternary returns int ({i1}/{i2}) then multiplied by double ({d}). Int and double \
             cannot mix. Change the ternary to return doubles: '? {i1}.0 : {i2}.0' or wrap in \
             double(): '? double({i1}) : double({i2})'."
        )));
    }

    if let Some(captures) = INT_OP_DOUBLE.captures(cleaned) {
        let (int_literal, double_literal) = (&captures[2], &captures[3]);
        if !int_literal.starts_with('0') || int_literal == "0" {
            return Some(Diagnostic::type_mismatch(format!(
                "Integer literal {int_literal} mixed with double literal {double_literal} in \
                 arithmetic. Use double literals everywhere: {int_literal}.0 instead of \
                 {int_literal}."
            )));
        }
    }

    if let Some(captures) = VAR_CMP_DOUBLE.captures(cleaned) {
        let whole = captures.get(0).expect("match");
        let (var, op, lit) = (&captures[1], &captures[2], &captures[3]);
        if !tail_window(cleaned, whole.start(), 10).contains("double(") {
            return Some(Diagnostic::type_mismatch(format!(
                "'{var} {op} {lit}': the variable may be int but is compared to double {lit}. \
                 Wrap it in double(): 'double({var}) {op} {lit}'."
            )));
        }
    }

    if cleaned.contains('/') {
        if let Some(captures) = VAR_DIV_VAR.captures(cleaned) {
            let whole = captures.get(0).expect("match");
            let (a, b) = (&captures[1], &captures[2]);
            if !tail_window(cleaned, whole.start(), 10).contains("double(") {
                return Some(Diagnostic::type_mismatch(format!(
                    "Division '{a} / {b}' without double() conversion. Wrap both operands: \
                     'double({a}) / double({b})'. Also guard against zero: '{b} != 0 ? \
                     (double({a}) / double({b})) : 0.0'."
                )));
            }
        }
    }

    None
}

fn check_logic_error(expr: &str, cleaned: &str) -> Option<Diagnostic> {
    // Uses the original text: the quotes are what make the range lexicographic.
    for captures in STRING_RANGE.captures_iter(expr) {
        if captures[1] != captures[3] {
            continue;
        }
        let (var, low, high) = (&captures[1], &captures[2], &captures[4]);
        return Some(Diagnostic::logic_error(format!(
            "String range comparison '{var} >= '{low}' && {var} <= '{high}'' uses \
             lexicographic ordering, which fails for multi-digit numbers (e.g. '9' > '12'). \
             Use 'in' with an explicit list instead: '{var} in ['{low}', ..., '{high}']'."
        )));
    }

    if GUARDED_DENOMINATOR.is_match(cleaned) {
        return Some(Diagnostic::logic_error(
            "Division by an expression that can return 0.0. The denominator ternary can \
             evaluate to 0.0, producing infinity. Wrap the ENTIRE division in a zero guard: \
             '(denominator != 0.0) ? (numerator / denominator) * 100.0 : 0.0'. Do NOT put the \
             guard inside the denominator.",
        ));
    }

    if cleaned.contains("&&") && cleaned.contains("||") && MIXED_AND_OR.is_match(cleaned) {
        return Some(Diagnostic::logic_error(
            "Mixed '&&' and '||' without grouping parentheses. '||' has lower precedence than \
             '&&', so 'A && B || C' means '(A && B) || C', NOT 'A && (B || C)'. Wrap the '||' \
             alternatives in parentheses: 'A && (B || C || D)'.",
        ));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::DiagnosticKind;

    fn kinds(expr: &str) -> Vec<DiagnosticKind> {
        analyze(expr).into_iter().map(|d| d.kind).collect()
    }

    #[test]
    fn minimal_valid_expression_is_clean() {
        assert!(analyze("EPS.is_public_school == true ? 'PK-12' : 'Not Applicable'").is_empty());
        assert!(analyze("SIS.grade_level in ['9', '10', '11', '12']").is_empty());
        assert!(analyze(
            "double(EPS.total) != 0.0 ? (double(EPS.part) / double(EPS.total)) * 100.0 : 0.0"
        )
        .is_empty());
    }

    #[test]
    fn flags_every_forbidden_family() {
        let cases = [
            "sum(SIS.scores) > 10.0",
            "{'district': EPS.name}",
            "lookup_district(EPS.school_id)",
            "daysBetween(SIS.start_date, SIS.end_date) > 30.0",
            "EPS.name.split(',')",
            "parseInt(SIS.grade_level) >= 9",
            "round(EPS.rate) == 50.0",
            "EPS.scores[0] > 10.0",
            "salary >= 100000.0",
        ];
        for expr in cases {
            let diagnostics = analyze(expr);
            assert!(
                diagnostics
                    .iter()
                    .any(|d| d.kind == DiagnosticKind::Forbidden),
                "expected Forbidden for {expr}: {diagnostics:?}"
            );
        }
    }

    #[test]
    fn ignores_patterns_inside_string_literals() {
        assert!(analyze("EPS.note == 'call sum(x) later'").is_empty());
        assert!(analyze("EPS.label == 'a.split(b)'").is_empty());
    }

    #[test]
    fn flags_bare_ternary_conditions() {
        assert_eq!(
            kinds("SIS.has_iep ? 'Y' : 'N'"),
            vec![DiagnosticKind::TypeMismatch]
        );
        assert!(analyze("SIS.has_iep == true ? 'Y' : 'N'").is_empty());
    }

    #[test]
    fn flags_bare_string_condition_but_not_comparisons() {
        assert_eq!(
            kinds("EPS.x == 1.0 && 'text' ? 'a' : 'b'"),
            vec![DiagnosticKind::TypeMismatch]
        );
        assert!(analyze("EPS.kind == 'text' ? 'a' : 'b'").is_empty());
    }

    #[test]
    fn flags_numeric_type_mixing() {
        let diagnostics = analyze("(EPS.flag == true ? 1 : 0) * 100.0");
        assert!(diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::TypeMismatch));

        let diagnostics = analyze("EPS.rate >= 95.5");
        assert!(diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::TypeMismatch));
        assert!(analyze("double(EPS.rate) >= 95.5").is_empty());
    }

    #[test]
    fn flags_division_without_double() {
        let diagnostics = analyze("EPS.part / EPS.total > 0.5");
        assert!(diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::TypeMismatch));
    }

    #[test]
    fn flags_lexicographic_range_always() {
        let diagnostics = analyze("SIS.grade_level >= '1' && SIS.grade_level <= '12'");
        assert_eq!(
            diagnostics
                .iter()
                .filter(|d| d.kind == DiagnosticKind::LogicError)
                .count(),
            1
        );
        let message = &diagnostics
            .iter()
            .find(|d| d.kind == DiagnosticKind::LogicError)
            .expect("logic diagnostic")
            .message;
        assert!(message.contains("SIS.grade_level"));
        assert!(message.contains("'9' > '12'"));
    }

    #[test]
    fn flags_guard_inside_denominator() {
        let diagnostics =
            analyze("double(EPS.a) / (EPS.b != 0.0 ? 2.0 : 0.0)");
        assert!(diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::LogicError));
    }

    #[test]
    fn flags_mixed_connectives_without_grouping() {
        let diagnostics = analyze(
            "EPS.kind == 'public' && EPS.name.contains('High') || EPS.name.contains('Academy')",
        );
        assert!(diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::LogicError));
        assert!(analyze(
            "EPS.kind == 'public' && (EPS.name.contains('High') || EPS.name.contains('Academy'))"
        )
        .is_empty());
    }

    #[test]
    fn multiple_categories_fire_together() {
        let kinds = kinds("sum(EPS.scores) / (EPS.b != 0.0 ? 2.0 : 0.0)");
        assert!(kinds.contains(&DiagnosticKind::Forbidden));
        assert!(kinds.contains(&DiagnosticKind::LogicError));
    }
}
