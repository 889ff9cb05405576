use ruleflow_core::VarPath;

use crate::ast::{BinaryOp, Expr, Literal, UnaryOp};
use crate::error::EvalError;
use crate::token::{tokenize, Token};

/// Parses an expression string into an AST.
///
/// The grammar mirrors CEL precedence: ternary, then `||`, `&&`,
/// comparison/membership, additive, multiplicative, unary, postfix.
/// As in CEL, a ternary's true branch is a conditional-or, so nested
/// ternaries there require parentheses while else-branch chains do not.
pub fn parse(input: &str) -> Result<Expr, EvalError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(EvalError::Parse("empty expression".to_string()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression()?;
    if let Some(extra) = parser.peek() {
        return Err(EvalError::Parse(format!(
            "unexpected trailing input at '{extra}'"
        )));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_ahead(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, context: &str) -> Result<(), EvalError> {
        match self.next() {
            Some(found) if &found == expected => Ok(()),
            Some(found) => Err(EvalError::Parse(format!(
                "expected '{expected}' {context}, found '{found}'"
            ))),
            None => Err(EvalError::Parse(format!(
                "expected '{expected}' {context}, found end of expression"
            ))),
        }
    }

    fn expression(&mut self) -> Result<Expr, EvalError> {
        let condition = self.conditional_or()?;
        if !self.eat(&Token::Question) {
            return Ok(condition);
        }

        // The true branch is a conditional-or: an unparenthesized nested
        // ternary here is a parse error, which the auto-repair
        // transformer exists to fix.
        let then_branch = self.conditional_or()?;
        self.expect(&Token::Colon, "after ternary true branch")?;
        let else_branch = self.expression()?;
        Ok(Expr::Ternary {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        })
    }

    fn conditional_or(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.conditional_and()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.conditional_and()?;
            expr = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
            };
        }
        Ok(expr)
    }

    fn conditional_and(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.relation()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.relation()?;
            expr = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
            };
        }
        Ok(expr)
    }

    fn relation(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.addition()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => Some(BinaryOp::Eq),
                Some(Token::NotEq) => Some(BinaryOp::Ne),
                Some(Token::Gt) => Some(BinaryOp::Gt),
                Some(Token::GtEq) => Some(BinaryOp::Ge),
                Some(Token::Lt) => Some(BinaryOp::Lt),
                Some(Token::LtEq) => Some(BinaryOp::Le),
                Some(Token::In) => None,
                _ => break,
            };

            match op {
                Some(op) => {
                    self.pos += 1;
                    let rhs = self.addition()?;
                    expr = Expr::Binary {
                        op,
                        lhs: Box::new(expr),
                        rhs: Box::new(rhs),
                    };
                }
                None => {
                    self.pos += 1;
                    let list = self.literal_list()?;
                    expr = Expr::Membership {
                        needle: Box::new(expr),
                        list,
                    };
                }
            }
        }
        Ok(expr)
    }

    fn addition(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.multiplication()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.multiplication()?;
            expr = Expr::Binary {
                op,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
            };
        }
        Ok(expr)
    }

    fn multiplication(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.unary()?;
            expr = Expr::Binary {
                op,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
            };
        }
        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        if self.eat(&Token::Bang) {
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        if self.eat(&Token::Minus) {
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.member()
    }

    fn member(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.primary()?;

        while self.peek() == Some(&Token::Dot) {
            let segment = match self.peek_ahead(1) {
                Some(Token::Ident(name)) => name.clone(),
                Some(other) => {
                    return Err(EvalError::Parse(format!(
                        "expected identifier after '.', found '{other}'"
                    )))
                }
                None => {
                    return Err(EvalError::Parse(
                        "expected identifier after '.', found end of expression".to_string(),
                    ))
                }
            };
            self.pos += 2;

            if self.eat(&Token::LParen) {
                let args = self.call_args()?;
                expr = Expr::Method {
                    receiver: Box::new(expr),
                    method: segment,
                    args,
                };
            } else {
                expr = match expr {
                    Expr::Var(path) => Expr::Var(VarPath::new(format!("{path}.{segment}"))),
                    _ => {
                        return Err(EvalError::Parse(format!(
                            "field access '.{segment}' is only valid on a variable"
                        )))
                    }
                };
            }
        }

        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        match self.next() {
            Some(Token::Str(value)) => Ok(Expr::Literal(Literal::Str(value))),
            Some(Token::Int(value)) => Ok(Expr::Literal(Literal::Int(value))),
            Some(Token::Double(value)) => Ok(Expr::Literal(Literal::Double(value))),
            Some(Token::Bool(value)) => Ok(Expr::Literal(Literal::Bool(value))),
            Some(Token::Null) => Ok(Expr::Literal(Literal::Null)),
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    let args = self.call_args()?;
                    Ok(Expr::Call {
                        function: name,
                        args,
                    })
                } else {
                    Ok(Expr::Var(VarPath::new(name)))
                }
            }
            Some(Token::LParen) => {
                let expr = self.expression()?;
                self.expect(&Token::RParen, "to close group")?;
                Ok(expr)
            }
            Some(Token::LBracket) => Err(EvalError::Parse(
                "list literals are only valid on the right of 'in'".to_string(),
            )),
            Some(other) => Err(EvalError::Parse(format!(
                "unexpected token '{other}'"
            ))),
            None => Err(EvalError::Parse(
                "unexpected end of expression".to_string(),
            )),
        }
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, EvalError> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RParen, "to close call")?;
            return Ok(args);
        }
    }

    fn literal_list(&mut self) -> Result<Vec<Literal>, EvalError> {
        self.expect(&Token::LBracket, "after 'in'")?;
        let mut list = Vec::new();
        if self.eat(&Token::RBracket) {
            return Ok(list);
        }
        loop {
            list.push(self.list_element()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RBracket, "to close list")?;
            return Ok(list);
        }
    }

    fn list_element(&mut self) -> Result<Literal, EvalError> {
        let negate = self.eat(&Token::Minus);
        match self.next() {
            Some(Token::Str(value)) if !negate => Ok(Literal::Str(value)),
            Some(Token::Int(value)) => Ok(Literal::Int(if negate { -value } else { value })),
            Some(Token::Double(value)) => {
                Ok(Literal::Double(if negate { -value } else { value }))
            }
            Some(Token::Bool(value)) if !negate => Ok(Literal::Bool(value)),
            Some(Token::Null) if !negate => Ok(Literal::Null),
            Some(other) => Err(EvalError::Parse(format!(
                "membership lists hold literals only, found '{other}'"
            ))),
            None => Err(EvalError::Parse(
                "unterminated membership list".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotted_variables_and_methods() {
        let expr = parse("EPS.school_name.startsWith('Lincoln')").expect("parse");
        match expr {
            Expr::Method {
                receiver, method, ..
            } => {
                assert_eq!(method, "startsWith");
                assert_eq!(*receiver, Expr::Var("EPS.school_name".into()));
            }
            other => panic!("unexpected AST: {other:?}"),
        }
    }

    #[test]
    fn precedence_puts_or_below_and() {
        let expr = parse("a.x == 1 || b.y == 2 && c.z == 3").expect("parse");
        match expr {
            Expr::Binary { op: BinaryOp::Or, .. } => {}
            other => panic!("expected top-level ||, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unparenthesized_nested_ternary_true_branch() {
        assert!(parse("a.x == 1 ? b.y == 2 ? 'a' : 'b' : 'c'").is_err());
        assert!(parse("a.x == 1 ? (b.y == 2 ? 'a' : 'b') : 'c'").is_ok());
    }

    #[test]
    fn else_branch_chains_without_parentheses() {
        assert!(parse("a.x == 1 ? 'a' : b.y == 2 ? 'b' : 'c'").is_ok());
    }

    #[test]
    fn membership_requires_literal_lists() {
        assert!(parse("SIS.grade in ['9', '10', '11', '12']").is_ok());
        assert!(parse("SIS.grade in [SIS.other]").is_err());
    }

    #[test]
    fn reports_unbalanced_parentheses() {
        let err = parse("(a.x == 1").unwrap_err();
        assert!(err.is_parse());
    }
}
