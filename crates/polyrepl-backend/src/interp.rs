//! The calc language: lexer, parser, and evaluator.
//!
//! A deliberately small language with persistent bindings: integer and
//! float arithmetic, string literals and concatenation, identifiers, and
//! assignment. Bare expressions evaluate to a value the caller can print;
//! assignments produce no value.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A calc runtime value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

/// User-level evaluation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalcError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("name '{0}' is not defined")]
    Undefined(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("type error: {0}")]
    Type(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(String),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Assign,
}

fn tokenize(input: &str) -> Result<Vec<Token>, CalcError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '%' => {
                chars.next();
                tokens.push(Token::Percent);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Assign);
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                while let Some(ch) = chars.next() {
                    if ch == quote {
                        closed = true;
                        break;
                    }
                    if ch == '\\' {
                        match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(other) => s.push(other),
                            None => break,
                        }
                    } else {
                        s.push(ch);
                    }
                }
                if !closed {
                    return Err(CalcError::Syntax("unterminated string literal".to_string()));
                }
                tokens.push(Token::Str(s));
            }
            '0'..='9' | '.' => {
                let mut raw = String::new();
                let mut seen_dot = false;
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        raw.push(d);
                        chars.next();
                    } else if d == '.' && !seen_dot {
                        seen_dot = true;
                        raw.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Number(raw));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(CalcError::Syntax(format!("unexpected character '{other}'")));
            }
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

/// Expression tree.
#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Variable(String),
    Unary(Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn at_end(&self) -> bool {
        self.pos == self.tokens.len()
    }

    fn expression(&mut self) -> Result<Expr, CalcError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, CalcError> {
        let mut lhs = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr, CalcError> {
        match self.next() {
            Some(Token::Number(raw)) => {
                let literal = if raw.contains('.') {
                    raw.parse::<f64>().ok().map(Value::Float)
                } else {
                    raw.parse::<i64>().ok().map(Value::Int)
                };
                literal.map(Expr::Literal).ok_or_else(|| {
                    CalcError::Syntax(format!("invalid number literal '{raw}'"))
                })
            }
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::Ident(name)) => Ok(Expr::Variable(name)),
            Some(Token::Minus) => Ok(Expr::Unary(Box::new(self.factor()?))),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(CalcError::Syntax("expected ')'".to_string())),
                }
            }
            Some(other) => Err(CalcError::Syntax(format!("unexpected token {other:?}"))),
            None => Err(CalcError::Syntax("unexpected end of input".to_string())),
        }
    }
}

fn eval(expr: &Expr, bindings: &HashMap<String, Value>) -> Result<Value, CalcError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Variable(name) => bindings
            .get(name)
            .cloned()
            .ok_or_else(|| CalcError::Undefined(name.clone())),
        Expr::Unary(inner) => match eval(inner, bindings)? {
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Float(x) => Ok(Value::Float(-x)),
            Value::Str(_) => Err(CalcError::Type("cannot negate a string".to_string())),
        },
        Expr::Binary(lhs, op, rhs) => {
            let l = eval(lhs, bindings)?;
            let r = eval(rhs, bindings)?;
            apply(*op, l, r)
        }
    }
}

fn apply(op: BinOp, l: Value, r: Value) -> Result<Value, CalcError> {
    use Value::{Float, Int, Str};
    match (op, l, r) {
        (BinOp::Add, Str(a), Str(b)) => Ok(Str(a + &b)),
        (_, Str(_), _) | (_, _, Str(_)) => Err(CalcError::Type(
            "strings only support '+' with other strings".to_string(),
        )),
        (BinOp::Add, a, b) => numeric(a, b, i64::checked_add, |x, y| x + y),
        (BinOp::Sub, a, b) => numeric(a, b, i64::checked_sub, |x, y| x - y),
        (BinOp::Mul, a, b) => numeric(a, b, i64::checked_mul, |x, y| x * y),
        (BinOp::Div, _, Int(0)) => Err(CalcError::DivisionByZero),
        (BinOp::Div, a, b) => {
            // Division is always float, like a REPL user expects of `1 / 2`.
            let (x, y) = (as_f64(&a), as_f64(&b));
            if y == 0.0 {
                Err(CalcError::DivisionByZero)
            } else {
                Ok(Float(x / y))
            }
        }
        (BinOp::Rem, Int(_), Int(0)) => Err(CalcError::DivisionByZero),
        (BinOp::Rem, Int(a), Int(b)) => Ok(Int(a.rem_euclid(b))),
        (BinOp::Rem, _, _) => Err(CalcError::Type(
            "'%' requires integer operands".to_string(),
        )),
    }
}

fn numeric(
    l: Value,
    r: Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, CalcError> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => int_op(a, b)
            .map(Value::Int)
            .ok_or_else(|| CalcError::Type("integer overflow".to_string())),
        (a, b) => Ok(Value::Float(float_op(as_f64(&a), as_f64(&b)))),
    }
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Int(i) => *i as f64,
        Value::Float(x) => *x,
        Value::Str(_) => f64::NAN,
    }
}

/// Execute one line against the bindings.
///
/// Returns `Some(value)` when the line was a bare expression (the value the
/// REPL should echo) and `None` for assignments and blank lines.
///
/// The line is first parsed as an expression; only if that fails is it
/// parsed as an `ident = expression` assignment. When both parses fail, the
/// expression error is reported. This two-attempt order is the tie-break:
/// any line that is a well-formed expression is evaluated as one.
pub fn run_line(
    bindings: &mut HashMap<String, Value>,
    line: &str,
) -> Result<Option<Value>, CalcError> {
    let tokens = tokenize(line)?;
    if tokens.is_empty() {
        return Ok(None);
    }

    let mut parser = Parser::new(&tokens);
    let expr_attempt = parser.expression();
    if let Ok(expr) = &expr_attempt {
        if parser.at_end() {
            return eval(expr, bindings).map(Some);
        }
    }

    // Statement attempt: `ident = expression`.
    if let [Token::Ident(name), Token::Assign, rest @ ..] = tokens.as_slice() {
        if !rest.is_empty() {
            let mut parser = Parser::new(rest);
            let expr = parser.expression()?;
            if !parser.at_end() {
                return Err(CalcError::Syntax(
                    "unexpected trailing input after assignment".to_string(),
                ));
            }
            let value = eval(&expr, bindings)?;
            bindings.insert(name.clone(), value);
            return Ok(None);
        }
    }

    match expr_attempt {
        Ok(_) => Err(CalcError::Syntax(
            "unexpected trailing input after expression".to_string(),
        )),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(bindings: &mut HashMap<String, Value>, line: &str) -> Option<Value> {
        run_line(bindings, line).unwrap()
    }

    #[test]
    fn arithmetic_with_precedence() {
        let mut b = HashMap::new();
        assert_eq!(run(&mut b, "1 + 2 * 3"), Some(Value::Int(7)));
        assert_eq!(run(&mut b, "(1 + 2) * 3"), Some(Value::Int(9)));
        assert_eq!(run(&mut b, "-4 + 10"), Some(Value::Int(6)));
    }

    #[test]
    fn assignment_binds_and_echoes_nothing() {
        let mut b = HashMap::new();
        assert_eq!(run(&mut b, "a = 21"), None);
        assert_eq!(run(&mut b, "a * 2"), Some(Value::Int(42)));
    }

    #[test]
    fn undefined_variable_reports_name() {
        let mut b = HashMap::new();
        let err = run_line(&mut b, "ghost + 1").unwrap_err();
        assert_eq!(err, CalcError::Undefined("ghost".to_string()));
    }

    #[test]
    fn division_is_float_and_checked() {
        let mut b = HashMap::new();
        assert_eq!(run(&mut b, "7 / 2"), Some(Value::Float(3.5)));
        assert_eq!(
            run_line(&mut b, "1 / 0").unwrap_err(),
            CalcError::DivisionByZero
        );
        assert_eq!(
            run_line(&mut b, "5 % 0").unwrap_err(),
            CalcError::DivisionByZero
        );
    }

    #[test]
    fn string_concatenation() {
        let mut b = HashMap::new();
        run(&mut b, "greeting = 'hello, ' + \"world\"");
        assert_eq!(
            run(&mut b, "greeting"),
            Some(Value::Str("hello, world".to_string()))
        );
        assert!(matches!(
            run_line(&mut b, "greeting * 2"),
            Err(CalcError::Type(_))
        ));
    }

    #[test]
    fn expression_attempt_wins_over_statement() {
        // `a` alone is a valid expression even when an assignment would
        // also be imaginable for the prefix.
        let mut b = HashMap::new();
        run(&mut b, "a = 1");
        assert_eq!(run(&mut b, "a"), Some(Value::Int(1)));
    }

    #[test]
    fn malformed_input_is_a_syntax_error() {
        let mut b = HashMap::new();
        assert!(matches!(run_line(&mut b, "1 +"), Err(CalcError::Syntax(_))));
        assert!(matches!(
            run_line(&mut b, "a = = 2"),
            Err(CalcError::Syntax(_))
        ));
        assert!(matches!(run_line(&mut b, "@"), Err(CalcError::Syntax(_))));
    }

    #[test]
    fn number_literals_parse_by_shape() {
        let mut b = HashMap::new();
        assert_eq!(run(&mut b, "1.5 + 1"), Some(Value::Float(2.5)));
        assert_eq!(run(&mut b, "10"), Some(Value::Int(10)));
        // Too large for i64: reported as a syntax error, not a panic.
        assert!(matches!(
            run_line(&mut b, "99999999999999999999"),
            Err(CalcError::Syntax(_))
        ));
    }

    #[test]
    fn blank_line_is_a_no_op() {
        let mut b = HashMap::new();
        assert_eq!(run(&mut b, "   "), None);
    }
}
