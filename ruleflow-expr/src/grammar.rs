//! The dialect surface, expressed as data.
//!
//! Every other component treats this module as ground truth: the static
//! analyzer consults it to word diagnostics, the evaluator to resolve
//! functions and methods, and the verification orchestrator to render
//! the hard rules fed back to the generation collaborator.

/// Comparison operators, both operands must share a type.
pub const COMPARISON_OPERATORS: &[&str] = &["==", "!=", ">", ">=", "<", "<="];

/// Boolean connectives; operands must be booleans.
pub const BOOLEAN_OPERATORS: &[&str] = &["&&", "||", "!"];

/// Arithmetic operators; `+` additionally concatenates strings.
pub const ARITHMETIC_OPERATORS: &[&str] = &["+", "-", "*", "/", "%"];

/// The only type conversions the dialect provides.
pub const CONVERSIONS: &[&str] = &["double", "int", "string"];

/// Free functions callable without a receiver.
pub const FREE_FUNCTIONS: &[&str] = &["double", "int", "string", "size"];

/// Methods callable on a string with dot notation.
pub const STRING_METHODS: &[&str] = &["contains", "startsWith", "endsWith", "size"];

/// Words that may never be used as variable segments.
pub const RESERVED_WORDS: &[&str] = &[
    "true", "false", "null", "in", "double", "int", "uint", "string", "bool", "bytes", "size",
    "has", "type",
];

pub fn is_reserved(word: &str) -> bool {
    RESERVED_WORDS.contains(&word)
}

pub fn is_function(name: &str) -> bool {
    FREE_FUNCTIONS.contains(&name)
}

pub fn is_conversion(name: &str) -> bool {
    CONVERSIONS.contains(&name)
}

pub fn is_string_method(name: &str) -> bool {
    STRING_METHODS.contains(&name)
}

/// Summary of the allowed string methods, used in diagnostics.
pub fn allowed_string_methods() -> String {
    ".contains(), .startsWith(), .endsWith(), size()".to_string()
}

/// The dialect's hard rules, rendered for generator feedback. Reused
/// verbatim whenever a verification attempt fails.
pub fn hard_rules() -> String {
    [
        "CRITICAL RULES:",
        "1. ONLY use supported operators: ==, !=, >, >=, <, <=, &&, ||, !, +, -, *, /, %, in, ?:",
        "2. ONLY use supported functions: double(), int(), string(), size()",
        "3. ONLY use supported string methods: .contains(), .startsWith(), .endsWith()",
        "4. NO OTHER functions, methods, or macros exist, e.g. no sum(), count(), avg(), min(), \
         max(), split(), trim(), lower(), upper(), daysBetween(), abs(), round(), filter(), map().",
        "5. All variables MUST be namespace-qualified: prefix.attribute (e.g. SIS.grade_level).",
        "6. Wrap division in double(): b != 0 ? (double(a) / double(b)) : 0.0",
        "7. Ternary true-branch ternaries MUST be in parentheses: A ? (B ? C : D) : E",
        "8. Boolean conditions must be explicit: X == true or X == 'true', not bare X.",
        "9. Both branches of a ternary must return the SAME type.",
    ]
    .join("\n")
}
