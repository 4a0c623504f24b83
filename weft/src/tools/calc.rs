//! Calculator tool: arithmetic over `+ - * / ( )` with f64 semantics. Pure.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{required_str, SideEffect, Tool, ToolContext, ToolError, ToolOutput, ToolSpec};

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "calculator".into(),
            description: Some("Evaluate an arithmetic expression".into()),
            input_schema: json!({
                "type": "object",
                "properties": { "expression": { "type": "string" } },
                "required": ["expression"]
            }),
        }
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::Pure
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let expr = required_str(&args, "expression")?;
        let value = eval(expr)?;
        let text = if value.fract() == 0.0 && value.abs() < 1e15 {
            format!("{}", value as i64)
        } else {
            format!("{}", value)
        };
        Ok(ToolOutput { text })
    }
}

/// Recursive-descent evaluation: expr := term (('+'|'-') term)*;
/// term := factor (('*'|'/') factor)*; factor := number | '(' expr ')' | '-' factor.
fn eval(src: &str) -> Result<f64, ToolError> {
    let tokens: Vec<char> = src.chars().filter(|c| !c.is_whitespace()).collect();
    let mut pos = 0;
    let value = parse_expr(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(ToolError::InvalidInput(format!(
            "trailing input at position {}",
            pos
        )));
    }
    Ok(value)
}

fn parse_expr(tokens: &[char], pos: &mut usize) -> Result<f64, ToolError> {
    let mut value = parse_term(tokens, pos)?;
    while let Some(&op) = tokens.get(*pos) {
        match op {
            '+' => {
                *pos += 1;
                value += parse_term(tokens, pos)?;
            }
            '-' => {
                *pos += 1;
                value -= parse_term(tokens, pos)?;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_term(tokens: &[char], pos: &mut usize) -> Result<f64, ToolError> {
    let mut value = parse_factor(tokens, pos)?;
    while let Some(&op) = tokens.get(*pos) {
        match op {
            '*' => {
                *pos += 1;
                value *= parse_factor(tokens, pos)?;
            }
            '/' => {
                *pos += 1;
                let divisor = parse_factor(tokens, pos)?;
                if divisor == 0.0 {
                    return Err(ToolError::InvalidInput("division by zero".into()));
                }
                value /= divisor;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_factor(tokens: &[char], pos: &mut usize) -> Result<f64, ToolError> {
    match tokens.get(*pos) {
        Some('(') => {
            *pos += 1;
            let value = parse_expr(tokens, pos)?;
            if tokens.get(*pos) != Some(&')') {
                return Err(ToolError::InvalidInput("expected ')'".into()));
            }
            *pos += 1;
            Ok(value)
        }
        Some('-') => {
            *pos += 1;
            Ok(-parse_factor(tokens, pos)?)
        }
        Some(c) if c.is_ascii_digit() || *c == '.' => {
            let start = *pos;
            while tokens
                .get(*pos)
                .map(|c| c.is_ascii_digit() || *c == '.')
                .unwrap_or(false)
            {
                *pos += 1;
            }
            let raw: String = tokens[start..*pos].iter().collect();
            raw.parse::<f64>()
                .map_err(|_| ToolError::InvalidInput(format!("bad number {:?}", raw)))
        }
        other => Err(ToolError::InvalidInput(format!(
            "unexpected token {:?}",
            other
        ))),
    }
}
