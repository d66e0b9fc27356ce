//! A scientific calculator skill.
//!
//! Adapted from the teacher's `tools::Calculator` for the skill
//! interface. Since the concrete expression-parsing crate the teacher
//! used (`evalexpr`) has no remaining justification outside a
//! full-language calculator and none of this crate's reference skills
//! need more than arithmetic, this is a small hand-rolled recursive
//! descent parser over `+ - * / ^ ( )` and unary minus, matching the
//! arithmetic subset of the teacher's quick-start examples.

use crate::conductor::skill::Skill;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Evaluates arithmetic expressions supplied by the LLM as the
/// `expression` argument.
pub struct CalculatorSkill;

#[async_trait]
impl Skill for CalculatorSkill {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluates an arithmetic expression and returns the numeric result. \
         Supports +, -, *, /, ^, parentheses, and unary minus."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The arithmetic expression to evaluate, e.g. \"(2 + 3) * 4\"."
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(
        &self,
        args: HashMap<String, Value>,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let expression = args
            .get("expression")
            .and_then(|v| v.as_str())
            .ok_or("missing required argument 'expression'")?;
        let result = evaluate(expression)?;
        Ok(result.to_string())
    }
}

fn evaluate(expr: &str) -> Result<f64, String> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(format!("unexpected trailing input at token {}", parser.pos));
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '^' => {
                tokens.push(Token::Caret);
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
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number literal '{}'", text))?;
                tokens.push(Token::Number(n));
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn parse_expr(&mut self) -> Result<f64, String> {
        let mut value = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    value += self.parse_term()?;
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    value -= self.parse_term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_term(&mut self) -> Result<f64, String> {
        let mut value = self.parse_power()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.pos += 1;
                    value *= self.parse_power()?;
                }
                Some(Token::Slash) => {
                    self.pos += 1;
                    let divisor = self.parse_power()?;
                    if divisor == 0.0 {
                        return Err("division by zero".to_string());
                    }
                    value /= divisor;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_power(&mut self) -> Result<f64, String> {
        let base = self.parse_unary()?;
        if let Some(Token::Caret) = self.peek() {
            self.pos += 1;
            let exponent = self.parse_power()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn parse_unary(&mut self) -> Result<f64, String> {
        if let Some(Token::Minus) = self.peek() {
            self.pos += 1;
            return Ok(-self.parse_unary()?);
        }
        if let Some(Token::Plus) = self.peek() {
            self.pos += 1;
            return self.parse_unary();
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<f64, String> {
        match self.peek().cloned() {
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(n)
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let value = self.parse_expr()?;
                match self.peek() {
                    Some(Token::RParen) => {
                        self.pos += 1;
                        Ok(value)
                    }
                    _ => Err("expected closing parenthesis".to_string()),
                }
            }
            other => Err(format!("unexpected token: {:?}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_of_operations() {
        assert_eq!(evaluate("10 + 5 * 2").unwrap(), 20.0);
        assert_eq!(evaluate("(10 + 5) * 2").unwrap(), 30.0);
        assert_eq!(evaluate("2^3").unwrap(), 8.0);
        assert_eq!(evaluate("-2^2").unwrap(), -4.0);
    }

    #[test]
    fn division_by_zero_is_error() {
        assert!(evaluate("1 / 0").is_err());
    }

    #[tokio::test]
    async fn skill_execute_returns_stringified_result() {
        let skill = CalculatorSkill;
        let mut args = HashMap::new();
        args.insert("expression".to_string(), Value::String("2 + 2".to_string()));
        let result = skill.execute(args).await.unwrap();
        assert_eq!(result, "4");
    }
}
