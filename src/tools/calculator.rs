//! Arithmetic tool
//!
//! Accepts either a `sum ...` command or a plain arithmetic expression made of
//! digits, whitespace, `.` and `+ - * / ( )`. Expressions are parsed by a small
//! recursive-descent evaluator, never by a general interpreter.

use crate::models::{ToolInput, ToolOutput, ToolParam};
use crate::Result;
use regex::Regex;
use serde_json::json;
use std::sync::OnceLock;

use super::Tool;

const SUM_PREFIXES: &[&str] = &["sum", "сумма"];

fn allowed_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\d\s.+\-*/()]+$").expect("static regex"))
}

fn number_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+\.?\d*").expect("static regex"))
}

pub struct CalculatorTool;

#[async_trait::async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &'static str {
        "calculator"
    }

    fn description(&self) -> &'static str {
        "Performs arithmetic. Supports + - * / with parentheses, decimal numbers, \
         and summing a list of numbers with the 'sum' command."
    }

    fn inputs(&self) -> Vec<ToolParam> {
        vec![ToolParam {
            name: "expression",
            param_type: "string",
            description: "Expression to evaluate. Examples: '45.7 + 128.91', \
                          '(500 + 250) * 0.2', 'sum 100 200 300'",
            nullable: false,
        }]
    }

    fn output_type(&self) -> &'static str {
        "object"
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let expression = input.require_str("expression")?;

        Ok(match calculate_rounded(expression) {
            Ok(value) => ToolOutput::success(json!({ "result": value })),
            Err(reason) => {
                let message = format!("Calculation error: {}", reason);
                let data = json!({ "error": &message });
                ToolOutput::failure(data, message)
            }
        })
    }
}

/// Normalize and evaluate a calculator request.
pub fn calculate(expression: &str) -> std::result::Result<f64, String> {
    let expr = expression
        .to_lowercase()
        .replace(',', ".")
        .replace('×', "*")
        .replace('÷', "/");
    let expr = expr.trim();

    let value = if SUM_PREFIXES.iter().any(|p| expr.starts_with(p)) {
        number_pattern()
            .find_iter(expr)
            .map(|m| {
                m.as_str()
                    .parse::<f64>()
                    .map_err(|e| format!("invalid number '{}': {}", m.as_str(), e))
            })
            .sum::<std::result::Result<f64, String>>()?
    } else {
        if !allowed_chars().is_match(expr) {
            return Err("Expression contains invalid characters".to_string());
        }
        evaluate(expr)?
    };

    finite(value)
}

fn finite(value: f64) -> std::result::Result<f64, String> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err("result is not a finite number".to_string())
    }
}

/// Evaluate and round to two decimals, the form the tool reports.
pub fn calculate_rounded(expression: &str) -> std::result::Result<f64, String> {
    calculate(expression).map(round2)
}

fn round2(value: f64) -> f64 {
    let scaled = value * 100.0;
    if scaled.is_finite() {
        scaled.round() / 100.0
    } else {
        value
    }
}

//
// ================= Evaluator =================
//

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    FloorDiv,
    Power,
    LParen,
    RParen,
}

fn tokenize(expr: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => {
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{}'", literal))?;
                tokens.push(Token::Number(finite(value)?));
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Power);
                i += 2;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                tokens.push(Token::FloorDiv);
                i += 2;
            }
            '/' => {
                tokens.push(Token::Slash);
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
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }

    Ok(tokens)
}

/// Grammar:
///   expr   := term (('+' | '-') term)*
///   term   := unary (('*' | '/' | '//') unary)*
///   unary  := ('+' | '-') unary | power
///   power  := atom ('**' unary)?
///   atom   := NUMBER | '(' expr ')'
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == Token::Plus { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.unary()?;
        while let Some(op @ (Token::Star | Token::Slash | Token::FloorDiv)) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            value = match op {
                Token::Star => value * rhs,
                _ if rhs == 0.0 => return Err("division by zero".to_string()),
                Token::Slash => value / rhs,
                _ => (value / rhs).floor(),
            };
        }
        Ok(value)
    }

    fn unary(&mut self) -> std::result::Result<f64, String> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> std::result::Result<f64, String> {
        let base = self.atom()?;
        if self.peek() == Some(Token::Power) {
            self.pos += 1;
            let exponent = self.unary()?;
            return finite(base.powf(exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> std::result::Result<f64, String> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err("missing closing parenthesis".to_string()),
                }
            }
            Some(token) => Err(format!("unexpected token {:?}", token)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn evaluate(expr: &str) -> std::result::Result<f64, String> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }

    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expr()?;

    if let Some(token) = parser.peek() {
        return Err(format!("unexpected token {:?}", token));
    }

    Ok(value)
}
