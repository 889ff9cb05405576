use ruleflow_core::{Context, Value};

use crate::ast::{BinaryOp, Expr, Literal, UnaryOp};
use crate::error::EvalError;
use crate::grammar;
use crate::parser::parse;

/// Parses and evaluates an expression against a context.
pub fn evaluate(input: &str, ctx: &Context) -> Result<Value, EvalError> {
    let ast = parse(input)?;
    evaluate_ast(&ast, ctx)
}

/// Evaluates a parsed expression tree.
///
/// The evaluator is strictly typed: int and double never mix, ordering
/// and logic require matching operand types, and comparing a typed value
/// against null is an overload error. The execution engine pre-resolves
/// null and boolean checks precisely because of that strictness.
pub fn evaluate_ast(expr: &Expr, ctx: &Context) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(literal) => Ok(literal.to_value()),
        Expr::Var(path) => Ok(ctx.read(path)),
        Expr::Unary { op, operand } => {
            let value = evaluate_ast(operand, ctx)?;
            eval_unary(*op, value)
        }
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, ctx),
        Expr::Ternary {
            condition,
            then_branch,
            else_branch,
        } => match evaluate_ast(condition, ctx)? {
            Value::Bool(true) => evaluate_ast(then_branch, ctx),
            Value::Bool(false) => evaluate_ast(else_branch, ctx),
            other => Err(EvalError::TernaryCondition(other.type_name())),
        },
        Expr::Membership { needle, list } => {
            let needle = evaluate_ast(needle, ctx)?;
            Ok(Value::Bool(
                list.iter().any(|element| loose_eq(&needle, &element.to_value())),
            ))
        }
        Expr::Call { function, args } => eval_call(function, args, ctx),
        Expr::Method {
            receiver,
            method,
            args,
        } => eval_method(receiver, method, args, ctx),
    }
}

fn eval_unary(op: UnaryOp, value: Value) -> Result<Value, EvalError> {
    match (op, value) {
        (UnaryOp::Not, Value::Bool(value)) => Ok(Value::Bool(!value)),
        (UnaryOp::Not, other) => Err(EvalError::Overload {
            op: "!".to_string(),
            lhs: other.type_name(),
            rhs: "bool",
        }),
        (UnaryOp::Neg, Value::Int(value)) => Ok(Value::Int(-value)),
        (UnaryOp::Neg, Value::Double(value)) => Ok(Value::Double(-value)),
        (UnaryOp::Neg, other) => Err(EvalError::Overload {
            op: "-".to_string(),
            lhs: other.type_name(),
            rhs: "numeric",
        }),
    }
}

fn eval_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, ctx: &Context) -> Result<Value, EvalError> {
    // Boolean connectives short-circuit so guarded branches never run.
    if matches!(op, BinaryOp::And | BinaryOp::Or) {
        let left = expect_bool(op, evaluate_ast(lhs, ctx)?)?;
        return match (op, left) {
            (BinaryOp::And, false) => Ok(Value::Bool(false)),
            (BinaryOp::Or, true) => Ok(Value::Bool(true)),
            _ => {
                let right = expect_bool(op, evaluate_ast(rhs, ctx)?)?;
                Ok(Value::Bool(right))
            }
        };
    }

    let left = evaluate_ast(lhs, ctx)?;
    let right = evaluate_ast(rhs, ctx)?;

    match op {
        BinaryOp::Eq => eval_equality(&left, &right).map(Value::Bool),
        BinaryOp::Ne => eval_equality(&left, &right).map(|eq| Value::Bool(!eq)),
        BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt | BinaryOp::Le => {
            eval_ordering(op, &left, &right)
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            eval_arithmetic(op, left, right)
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn expect_bool(op: BinaryOp, value: Value) -> Result<bool, EvalError> {
    value.as_bool().ok_or_else(|| EvalError::Overload {
        op: op.symbol().to_string(),
        lhs: value.type_name(),
        rhs: "bool",
    })
}

fn eval_equality(left: &Value, right: &Value) -> Result<bool, EvalError> {
    match (left, right) {
        (Value::Null, Value::Null) => Ok(true),
        (Value::Bool(l), Value::Bool(r)) => Ok(l == r),
        (Value::Int(l), Value::Int(r)) => Ok(l == r),
        (Value::Double(l), Value::Double(r)) => Ok(l == r),
        (Value::Str(l), Value::Str(r)) => Ok(l == r),
        (l, r) => Err(EvalError::Overload {
            op: "==".to_string(),
            lhs: l.type_name(),
            rhs: r.type_name(),
        }),
    }
}

fn eval_ordering(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let ordering = match (left, right) {
        (Value::Int(l), Value::Int(r)) => l.cmp(r),
        (Value::Double(l), Value::Double(r)) => {
            l.partial_cmp(r).ok_or_else(|| EvalError::Overload {
                op: op.symbol().to_string(),
                lhs: "double",
                rhs: "double",
            })?
        }
        // Lexicographic: correct for ISO dates, a known trap for
        // numeric strings, which the analyzer flags separately.
        (Value::Str(l), Value::Str(r)) => l.cmp(r),
        (l, r) => {
            return Err(EvalError::Overload {
                op: op.symbol().to_string(),
                lhs: l.type_name(),
                rhs: r.type_name(),
            })
        }
    };

    let result = match op {
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::Ge => ordering.is_ge(),
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        _ => unreachable!("ordering operator"),
    };
    Ok(Value::Bool(result))
}

fn eval_arithmetic(op: BinaryOp, left: Value, right: Value) -> Result<Value, EvalError> {
    match (op, &left, &right) {
        (BinaryOp::Add, Value::Str(l), Value::Str(r)) => Ok(Value::Str(format!("{l}{r}"))),
        (BinaryOp::Add, Value::Int(l), Value::Int(r)) => Ok(Value::Int(l + r)),
        (BinaryOp::Add, Value::Double(l), Value::Double(r)) => Ok(Value::Double(l + r)),
        (BinaryOp::Sub, Value::Int(l), Value::Int(r)) => Ok(Value::Int(l - r)),
        (BinaryOp::Sub, Value::Double(l), Value::Double(r)) => Ok(Value::Double(l - r)),
        (BinaryOp::Mul, Value::Int(l), Value::Int(r)) => Ok(Value::Int(l * r)),
        (BinaryOp::Mul, Value::Double(l), Value::Double(r)) => Ok(Value::Double(l * r)),
        (BinaryOp::Div, Value::Int(l), Value::Int(r)) => {
            if *r == 0 {
                Err(EvalError::DivisionByZero)
            } else {
                Ok(Value::Int(l / r))
            }
        }
        // IEEE division: a zero denominator yields infinity, which the
        // execution engine suppresses to null.
        (BinaryOp::Div, Value::Double(l), Value::Double(r)) => Ok(Value::Double(l / r)),
        (BinaryOp::Mod, Value::Int(l), Value::Int(r)) => {
            if *r == 0 {
                Err(EvalError::DivisionByZero)
            } else {
                Ok(Value::Int(l % r))
            }
        }
        (BinaryOp::Mod, l, r) => Err(EvalError::Overload {
            op: "%".to_string(),
            lhs: l.type_name(),
            rhs: r.type_name(),
        }),
        (op, l, r) => Err(EvalError::Overload {
            op: op.symbol().to_string(),
            lhs: l.type_name(),
            rhs: r.type_name(),
        }),
    }
}

fn loose_eq(needle: &Value, element: &Value) -> bool {
    match (needle, element) {
        (Value::Int(_) | Value::Double(_), Value::Int(_) | Value::Double(_)) => {
            needle.as_double() == element.as_double()
        }
        _ => eval_equality(needle, element).unwrap_or(false),
    }
}

fn eval_call(function: &str, args: &[Expr], ctx: &Context) -> Result<Value, EvalError> {
    if !grammar::is_function(function) {
        return Err(EvalError::UnknownFunction(function.to_string()));
    }
    if args.len() != 1 {
        return Err(EvalError::Arity {
            function: function.to_string(),
            expected: 1,
            found: args.len(),
        });
    }

    let value = evaluate_ast(&args[0], ctx)?;
    match function {
        "double" => match value {
            Value::Double(v) => Ok(Value::Double(v)),
            Value::Int(v) => Ok(Value::Double(v as f64)),
            Value::Str(v) => v
                .trim()
                .parse()
                .map(Value::Double)
                .map_err(|_| EvalError::Conversion {
                    function: "double",
                    found: "string",
                }),
            other => Err(EvalError::Conversion {
                function: "double",
                found: other.type_name(),
            }),
        },
        "int" => match value {
            Value::Int(v) => Ok(Value::Int(v)),
            Value::Double(v) => Ok(Value::Int(v as i64)),
            Value::Str(v) => v
                .trim()
                .parse()
                .map(Value::Int)
                .map_err(|_| EvalError::Conversion {
                    function: "int",
                    found: "string",
                }),
            other => Err(EvalError::Conversion {
                function: "int",
                found: other.type_name(),
            }),
        },
        "string" => match value {
            Value::Str(v) => Ok(Value::Str(v)),
            Value::Int(v) => Ok(Value::Str(v.to_string())),
            Value::Double(v) => Ok(Value::Str(v.to_string())),
            Value::Bool(v) => Ok(Value::Str(v.to_string())),
            other => Err(EvalError::Conversion {
                function: "string",
                found: other.type_name(),
            }),
        },
        "size" => match value {
            Value::Str(v) => Ok(Value::Int(v.chars().count() as i64)),
            other => Err(EvalError::Conversion {
                function: "size",
                found: other.type_name(),
            }),
        },
        _ => Err(EvalError::UnknownFunction(function.to_string())),
    }
}

fn eval_method(
    receiver: &Expr,
    method: &str,
    args: &[Expr],
    ctx: &Context,
) -> Result<Value, EvalError> {
    if !grammar::is_string_method(method) {
        return Err(EvalError::UnknownMethod(method.to_string()));
    }

    let receiver = evaluate_ast(receiver, ctx)?;
    let text = match receiver {
        Value::Str(text) => text,
        other => {
            return Err(EvalError::MethodReceiver {
                method: method.to_string(),
                found: other.type_name(),
            })
        }
    };

    if method == "size" {
        if !args.is_empty() {
            return Err(EvalError::Arity {
                function: "size".to_string(),
                expected: 0,
                found: args.len(),
            });
        }
        return Ok(Value::Int(text.chars().count() as i64));
    }

    if args.len() != 1 {
        return Err(EvalError::Arity {
            function: method.to_string(),
            expected: 1,
            found: args.len(),
        });
    }
    let argument = evaluate_ast(&args[0], ctx)?;
    let needle = argument.as_str().ok_or_else(|| EvalError::Overload {
        op: format!(".{method}()"),
        lhs: "string",
        rhs: argument.type_name(),
    })?;

    let result = match method {
        "contains" => text.contains(needle),
        "startsWith" => text.starts_with(needle),
        "endsWith" => text.ends_with(needle),
        _ => unreachable!("string method"),
    };
    Ok(Value::Bool(result))
}
