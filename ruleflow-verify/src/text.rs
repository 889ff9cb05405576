//! Quote-aware scanning helpers shared by the analyzer and the repair
//! passes. Detection must never fire on patterns inside single-quoted
//! string literals, so every scan tracks quote state explicitly.

/// Removes single-quoted string literals (with `\'` escapes) entirely,
/// leaving only code. Most analyzer checks run on this form.
pub fn strip_string_literals(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut chars = expr.chars();
    let mut in_str = false;
    while let Some(c) = chars.next() {
        if in_str {
            match c {
                '\\' => {
                    chars.next();
                }
                '\'' => in_str = false,
                _ => {}
            }
        } else if c == '\'' {
            in_str = true;
        } else {
            out.push(c);
        }
    }
    out
}

/// Splits an expression into alternating code and string-literal
/// segments so a rewrite can touch code only and reassemble verbatim.
pub fn split_code_segments(expr: &str) -> Vec<(bool, String)> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_str = false;
    let mut chars = expr.chars().peekable();

    while let Some(c) = chars.next() {
        if in_str {
            current.push(c);
            if c == '\\' {
                if let Some(&escaped) = chars.peek() {
                    current.push(escaped);
                    chars.next();
                }
            } else if c == '\'' {
                segments.push((false, std::mem::take(&mut current)));
                in_str = false;
            }
        } else if c == '\'' {
            if !current.is_empty() {
                segments.push((true, std::mem::take(&mut current)));
            }
            current.push(c);
            in_str = true;
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        segments.push((!in_str, current));
    }
    segments
}

/// Index of the first `needle` character at the top level, outside
/// parentheses and string literals.
pub fn find_toplevel(expr: &str, needle: char) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_str = false;
    let mut skip_next = false;
    for (i, c) in expr.char_indices() {
        if skip_next {
            skip_next = false;
            continue;
        }
        if in_str {
            match c {
                '\\' => skip_next = true,
                '\'' => in_str = false,
                _ => {}
            }
            continue;
        }
        match c {
            '\'' => in_str = true,
            '(' => depth += 1,
            ')' => depth -= 1,
            c if depth == 0 && c == needle => return Some(i),
            _ => {}
        }
    }
    None
}

/// Starting just after a `?`, finds the matching `:` by counting nested
/// ternaries, respecting parentheses and string literals.
pub fn find_matching_colon(expr: &str, start: usize) -> Option<usize> {
    let mut ternary_depth = 1i32;
    let mut paren_depth = 0i32;
    let mut in_str = false;
    let mut skip_next = false;
    for (i, c) in expr.char_indices().skip_while(|(i, _)| *i < start) {
        if skip_next {
            skip_next = false;
            continue;
        }
        if in_str {
            match c {
                '\\' => skip_next = true,
                '\'' => in_str = false,
                _ => {}
            }
            continue;
        }
        match c {
            '\'' => in_str = true,
            '(' => paren_depth += 1,
            ')' => paren_depth -= 1,
            '?' if paren_depth == 0 => ternary_depth += 1,
            ':' if paren_depth == 0 => {
                ternary_depth -= 1;
                if ternary_depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Whether the expression is entirely enclosed in one matched pair of
/// parentheses, e.g. `(A ? B : C)`.
pub fn is_fully_wrapped(expr: &str) -> bool {
    if !expr.starts_with('(') {
        return false;
    }
    let mut depth = 0i32;
    let mut in_str = false;
    let mut skip_next = false;
    let last = expr.len().saturating_sub(1);
    for (i, c) in expr.char_indices() {
        if skip_next {
            skip_next = false;
            continue;
        }
        if in_str {
            match c {
                '\\' => skip_next = true,
                '\'' => in_str = false,
                _ => {}
            }
            continue;
        }
        match c {
            '\'' => in_str = true,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return i == last;
                }
            }
            _ => {}
        }
    }
    false
}

/// The up-to-`max_len`-byte slice ending at `end`, clamped to a char
/// boundary so windows never split a multi-byte character inside a
/// string literal.
pub fn tail_window(text: &str, end: usize, max_len: usize) -> &str {
    let mut start = end.saturating_sub(max_len);
    while start > 0 && !text.is_char_boundary(start) {
        start -= 1;
    }
    &text[start..end]
}

/// Counts parentheses outside string literals.
pub fn paren_balance(expr: &str) -> (usize, usize) {
    let mut open = 0;
    let mut close = 0;
    let mut in_str = false;
    let mut skip_next = false;
    for c in expr.chars() {
        if skip_next {
            skip_next = false;
            continue;
        }
        if in_str {
            match c {
                '\\' => skip_next = true,
                '\'' => in_str = false,
                _ => {}
            }
            continue;
        }
        match c {
            '\'' => in_str = true,
            '(' => open += 1,
            ')' => close += 1,
            _ => {}
        }
    }
    (open, close)
}
