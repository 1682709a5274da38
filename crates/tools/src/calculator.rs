//! Calculator tool: evaluates arithmetic expressions.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! sum     = product (('+' | '-') product)*
//! product = power (('*' | '/' | '%') power)*
//! power   = unary ('^' power)?
//! unary   = '-' unary | atom
//! atom    = NUMBER | '(' sum ')'
//! ```

use async_trait::async_trait;
use chatloom_core::error::ToolError;
use chatloom_core::tool::{ParameterKind, Tool, ToolParameter};
use tokio_util::sync::CancellationToken;
use std::iter::Peekable;
use std::str::CharIndices;
use thiserror::Error;

/// Nesting limit for parentheses, unary minus and exponent chains.
const MAX_DEPTH: usize = 64;

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression. Supports + - * / % ^, parentheses and decimals."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::new(
                "expression",
                ParameterKind::String,
                "The expression to evaluate, e.g. '(2 + 3) * 4'",
            )
            .required(),
        ]
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        let expr = arguments["expression"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("missing 'expression' argument".into()))?;

        let value = evaluate(expr).map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason: e.to_string(),
        })?;

        Ok(format_number(value))
    }
}

/// Integers print without a trailing `.0`.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalcError {
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("missing closing parenthesis")]
    UnclosedParen,

    #[error("division by zero")]
    DivisionByZero,

    #[error("result is not a finite number")]
    NotFinite,

    #[error("expression nested too deeply")]
    TooDeep,
}

/// Evaluate an arithmetic expression.
pub fn evaluate(expr: &str) -> Result<f64, CalcError> {
    let mut parser = Parser {
        src: expr,
        chars: expr.char_indices().peekable(),
        depth: 0,
    };
    let value = parser.sum()?;
    parser.skip_ws();
    if let Some(&(offset, ch)) = parser.chars.peek() {
        return Err(CalcError::UnexpectedChar { ch, offset });
    }
    if !value.is_finite() {
        return Err(CalcError::NotFinite);
    }
    Ok(value)
}

struct Parser<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
    depth: usize,
}

impl Parser<'_> {
    /// Run `f` one nesting level deeper.
    fn nested(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<f64, CalcError>,
    ) -> Result<f64, CalcError> {
        if self.depth >= MAX_DEPTH {
            return Err(CalcError::TooDeep);
        }
        self.depth += 1;
        let value = f(self);
        self.depth -= 1;
        value
    }

    fn skip_ws(&mut self) {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
    }

    /// Consume `want` if it is the next non-blank character.
    fn eat(&mut self, want: char) -> bool {
        self.skip_ws();
        self.chars.next_if(|&(_, c)| c == want).is_some()
    }

    fn sum(&mut self) -> Result<f64, CalcError> {
        let mut acc = self.product()?;
        loop {
            if self.eat('+') {
                acc += self.product()?;
            } else if self.eat('-') {
                acc -= self.product()?;
            } else {
                return Ok(acc);
            }
        }
    }

    fn product(&mut self) -> Result<f64, CalcError> {
        let mut acc = self.power()?;
        loop {
            if self.eat('*') {
                acc *= self.power()?;
            } else if self.eat('/') {
                let rhs = self.power()?;
                if rhs == 0.0 {
                    return Err(CalcError::DivisionByZero);
                }
                acc /= rhs;
            } else if self.eat('%') {
                let rhs = self.power()?;
                if rhs == 0.0 {
                    return Err(CalcError::DivisionByZero);
                }
                acc %= rhs;
            } else {
                return Ok(acc);
            }
        }
    }

    // Right-associative: 2^3^2 == 2^9
    fn power(&mut self) -> Result<f64, CalcError> {
        let base = self.unary()?;
        if self.eat('^') {
            let exp = self.nested(Self::power)?;
            return Ok(base.powf(exp));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<f64, CalcError> {
        if self.eat('-') {
            return Ok(-self.nested(Self::unary)?);
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<f64, CalcError> {
        if self.eat('(') {
            return self.nested(|p| {
                let inner = p.sum()?;
                if !p.eat(')') {
                    return Err(CalcError::UnclosedParen);
                }
                Ok(inner)
            });
        }

        self.skip_ws();
        let start = match self.chars.peek() {
            Some(&(i, c)) if c.is_ascii_digit() || c == '.' => i,
            Some(&(offset, ch)) => return Err(CalcError::UnexpectedChar { ch, offset }),
            None => return Err(CalcError::UnexpectedEnd),
        };
        let mut end = start;
        while let Some((i, c)) = self.chars.next_if(|(_, c)| c.is_ascii_digit() || *c == '.') {
            end = i + c.len_utf8();
        }
        let literal = &self.src[start..end];
        literal
            .parse()
            .map_err(|_| CalcError::InvalidNumber(literal.to_string()))
    }
}
