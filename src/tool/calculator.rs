//! Sandboxed arithmetic for the `eval_expression` tool.
//!
//! Input is tokenized and parsed by a small recursive-descent parser into an
//! [`Expr`] tree. The tree only has node types for number literals, unary
//! minus, the binary operators `+ - * / % **` and grouping, so anything else
//! (identifiers, attribute access, strings, calls, `//`, unary plus) is
//! rejected before evaluation. `^` is accepted as a spelling of `**`.
//!
//! Numbers follow Python semantics: integers stay integral, `/` is true
//! division, `%` is floored, `**` is right-associative and binds tighter than
//! unary minus.

use std::fmt;

use crate::error::ToolError;
use crate::tool::ToolSpec;
use agent_relay_derive::tool_args;

/// Nesting bound for parentheses and unary operators.
const MAX_DEPTH: usize = 64;
const MAX_TOKENS: usize = 1024;

/// Arguments of the `eval_expression` tool.
#[tool_args]
pub struct EvalExpressionArgs {
    /// Arithmetic expression, e.g. `((2*8)^2)/3`
    pub expression: String,
}

/// Build the `eval_expression` function tool.
pub fn eval_expression_tool() -> ToolSpec {
    ToolSpec::typed(
        "eval_expression",
        "Evaluate an arithmetic expression using + - * / % ** (or ^) and parentheses. \
         Returns the numeric result as a string.",
        |args: EvalExpressionArgs| {
            let value = evaluate(&args.expression)?;
            Ok(serde_json::Value::String(value.to_string()))
        },
    )
}

/// Parse and evaluate an expression.
pub fn evaluate(input: &str) -> Result<Number, ToolError> {
    let expr = parse(input)?;
    expr.eval()
}

/// Parse an expression into its syntax tree without evaluating it.
pub fn parse(input: &str) -> Result<Expr, ToolError> {
    let tokens = tokenize(input)?;
    if tokens.len() > MAX_TOKENS {
        return Err(ToolError::unsupported_expression("expression is too long"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expr()?;
    match parser.peek() {
        None => Ok(expr),
        Some(tok) => Err(ToolError::unsupported_expression(format!(
            "unexpected {} after complete expression",
            tok
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(Number),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Pow,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Num(n) => write!(f, "number {}", n),
            Token::Plus => f.write_str("'+'"),
            Token::Minus => f.write_str("'-'"),
            Token::Star => f.write_str("'*'"),
            Token::Slash => f.write_str("'/'"),
            Token::Percent => f.write_str("'%'"),
            Token::Pow => f.write_str("'**'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ToolError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                tokens.push(Token::Num(parse_number(&literal)?));
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    tokens.push(Token::Pow);
                    i += 2;
                } else {
                    tokens.push(Token::Star);
                    i += 1;
                }
            }
            '^' => {
                tokens.push(Token::Pow);
                i += 1;
            }
            '/' => {
                if chars.get(i + 1) == Some(&'/') {
                    return Err(ToolError::unsupported_expression(
                        "floor division '//' is not allowed",
                    ));
                }
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                return Err(ToolError::unsupported_expression(format!(
                    "identifier '{}' is not allowed",
                    ident
                )));
            }
            other => {
                return Err(ToolError::unsupported_expression(format!(
                    "character '{}' is not allowed",
                    other
                )));
            }
        }
    }

    Ok(tokens)
}

fn parse_number(literal: &str) -> Result<Number, ToolError> {
    let malformed = || ToolError::unsupported_expression(format!("malformed number '{}'", literal));
    if literal == "." || literal.matches('.').count() > 1 {
        return Err(malformed());
    }
    if literal.contains('.') {
        return literal.parse::<f64>().map(Number::Float).map_err(|_| malformed());
    }
    // Literals beyond i64 degrade to float rather than failing
    match literal.parse::<i64>() {
        Ok(n) => Ok(Number::Int(n)),
        Err(_) => literal.parse::<f64>().map(Number::Float).map_err(|_| malformed()),
    }
}

/// Binary operators of the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

/// Syntax tree of an arithmetic expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(Number),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.peek();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn enter(&mut self) -> Result<(), ToolError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ToolError::unsupported_expression(
                "expression is nested too deeply",
            ));
        }
        Ok(())
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<Expr, ToolError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    // term := unary (('*' | '/' | '%') unary)*
    fn term(&mut self) -> Result<Expr, ToolError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    // unary := '-' unary | power
    fn unary(&mut self) -> Result<Expr, ToolError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.bump();
                self.enter()?;
                let operand = self.unary()?;
                self.depth -= 1;
                Ok(Expr::Neg(Box::new(operand)))
            }
            Some(Token::Plus) => Err(ToolError::unsupported_expression(
                "unary '+' is not allowed",
            )),
            _ => self.power(),
        }
    }

    // power := atom ['**' unary]
    fn power(&mut self) -> Result<Expr, ToolError> {
        let base = self.atom()?;
        if self.peek() == Some(Token::Pow) {
            self.bump();
            self.enter()?;
            let exponent = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    // atom := NUMBER | '(' expr ')'
    fn atom(&mut self) -> Result<Expr, ToolError> {
        match self.bump() {
            Some(Token::Num(n)) => Ok(Expr::Num(n)),
            Some(Token::LParen) => {
                self.enter()?;
                let inner = self.expr()?;
                self.depth -= 1;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(ToolError::unsupported_expression("unbalanced parentheses")),
                }
            }
            Some(tok) => Err(ToolError::unsupported_expression(format!(
                "unexpected {}",
                tok
            ))),
            None => Err(ToolError::unsupported_expression(
                "unexpected end of expression",
            )),
        }
    }
}

impl Expr {
    pub fn eval(&self) -> Result<Number, ToolError> {
        match self {
            Expr::Num(n) => Ok(*n),
            Expr::Neg(inner) => inner.eval()?.neg(),
            Expr::Binary(op, lhs, rhs) => {
                let a = lhs.eval()?;
                let b = rhs.eval()?;
                let result = match op {
                    BinOp::Add => a.add(b),
                    BinOp::Sub => a.sub(b),
                    BinOp::Mul => a.mul(b),
                    BinOp::Div => a.div(b),
                    BinOp::Mod => a.rem(b),
                    BinOp::Pow => a.pow(b),
                }?;
                result.finite()
            }
        }
    }
}

/// A calculator value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    fn finite(self) -> Result<Number, ToolError> {
        match self {
            Number::Float(f) if !f.is_finite() => {
                Err(ToolError::execution_failed("numerical result out of range"))
            }
            n => Ok(n),
        }
    }

    fn neg(self) -> Result<Number, ToolError> {
        Ok(match self {
            Number::Int(i) => i
                .checked_neg()
                .map(Number::Int)
                .unwrap_or(Number::Float(-(i as f64))),
            Number::Float(f) => Number::Float(-f),
        })
    }

    fn int_op(
        self,
        rhs: Number,
        checked: fn(i64, i64) -> Option<i64>,
        float: fn(f64, f64) -> f64,
    ) -> Number {
        match (self, rhs) {
            (Number::Int(a), Number::Int(b)) => checked(a, b)
                .map(Number::Int)
                .unwrap_or_else(|| Number::Float(float(a as f64, b as f64))),
            (a, b) => Number::Float(float(a.as_f64(), b.as_f64())),
        }
    }

    fn add(self, rhs: Number) -> Result<Number, ToolError> {
        Ok(self.int_op(rhs, i64::checked_add, |a, b| a + b))
    }

    fn sub(self, rhs: Number) -> Result<Number, ToolError> {
        Ok(self.int_op(rhs, i64::checked_sub, |a, b| a - b))
    }

    fn mul(self, rhs: Number) -> Result<Number, ToolError> {
        Ok(self.int_op(rhs, i64::checked_mul, |a, b| a * b))
    }

    fn div(self, rhs: Number) -> Result<Number, ToolError> {
        let divisor = rhs.as_f64();
        if divisor == 0.0 {
            return Err(ToolError::execution_failed("division by zero"));
        }
        Ok(Number::Float(self.as_f64() / divisor))
    }

    fn rem(self, rhs: Number) -> Result<Number, ToolError> {
        if rhs.as_f64() == 0.0 {
            return Err(ToolError::execution_failed("modulo by zero"));
        }
        Ok(self.int_op(rhs, floored_rem_i64, floored_rem_f64))
    }

    fn pow(self, rhs: Number) -> Result<Number, ToolError> {
        match (self, rhs) {
            (Number::Int(base), Number::Int(exp)) if exp >= 0 => {
                let checked = u32::try_from(exp).ok().and_then(|e| base.checked_pow(e));
                Ok(checked
                    .map(Number::Int)
                    .unwrap_or_else(|| Number::Float((base as f64).powf(exp as f64))))
            }
            (base, exp) => {
                let (b, e) = (base.as_f64(), exp.as_f64());
                if b == 0.0 && e < 0.0 {
                    return Err(ToolError::execution_failed(
                        "zero cannot be raised to a negative power",
                    ));
                }
                if b < 0.0 && e.fract() != 0.0 {
                    return Err(ToolError::execution_failed(
                        "negative number raised to a fractional power has no real result",
                    ));
                }
                Ok(Number::Float(b.powf(e)))
            }
        }
    }
}

fn floored_rem_i64(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        r.checked_add(b)
    } else {
        Some(r)
    }
}

fn floored_rem_f64(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
        r + b
    } else if r == 0.0 {
        0.0_f64.copysign(b)
    } else {
        r
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{}", i),
            Number::Float(x) => f.write_str(&format_float(*x)),
        }
    }
}

/// Render a float the way Python's `repr` does.
fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let abs = x.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        // Rust gives "1.5e-5"; Python writes "1.5e-05"
        let rendered = format!("{:e}", x);
        return match rendered.split_once('e') {
            Some((mantissa, exp)) => {
                let (sign, digits) = match exp.strip_prefix('-') {
                    Some(d) => ('-', d),
                    None => ('+', exp),
                };
                format!("{}e{}{:0>2}", mantissa, sign, digits)
            }
            None => rendered,
        };
    }
    if x.fract() == 0.0 {
        format!("{:.1}", x)
    } else {
        format!("{}", x)
    }
}
