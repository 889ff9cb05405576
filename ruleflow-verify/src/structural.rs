use ruleflow_core::Context;
use ruleflow_expr::evaluate;

use crate::diagnostic::Diagnostic;

/// Compiles and evaluates the expression against an empty context.
///
/// Only an unparsable expression is a hard diagnostic. A well-formed
/// expression that cannot execute without data (missing variables,
/// overload failures on null reads) is expected at this stage and
/// passes; the test executor covers it with sample data next.
pub fn check_structure(expr: &str) -> Option<Diagnostic> {
    match evaluate(expr, &Context::new()) {
        Err(err) if err.is_parse() => Some(Diagnostic::syntax(err.to_string())),
        _ => None,
    }
}
