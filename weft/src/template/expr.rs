//! Restricted boolean expressions for routing and graph edges.
//!
//! Grammar: comparisons (`==`, `!=`, `<`, `<=`, `>`, `>=`), string containment
//! (`contains`), `&&`, `||`, `!`, parentheses, string/number/bool literals,
//! dotted scope paths, and the `else` sentinel (always true). No lambdas, no
//! calls, no attribute dereference beyond dotted lookup into the scope.

use serde_json::Value;

use crate::scope::Scope;

use super::{validate_path, TemplateError};

/// The sentinel expression matching when no earlier `when` clause did.
pub const ELSE_SENTINEL: &str = "else";

/// Evaluates a conditional expression against the scope.
pub fn eval_condition(expr: &str, scope: &Scope) -> Result<bool, TemplateError> {
    let expr = expr.trim();
    if expr == ELSE_SENTINEL {
        return Ok(true);
    }
    let tokens = tokenize(expr)?;
    let mut parser = Parser {
        tokens,
        position: 0,
        scope,
    };
    let value = parser.parse_or()?;
    if parser.position != parser.tokens.len() {
        return Err(TemplateError::Syntax(format!(
            "trailing input in expression {:?}",
            expr
        )));
    }
    Ok(truthy(&value))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(String),
    Str(String),
    Num(f64),
    Bool(bool),
    Op(&'static str), // == != <= >= < > && || ! ( ) contains
}

fn tokenize(src: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::Op("("));
                i += 1;
            }
            ')' => {
                tokens.push(Token::Op(")"));
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op("!="));
                    i += 2;
                } else {
                    tokens.push(Token::Op("!"));
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op("=="));
                    i += 2;
                } else {
                    return Err(TemplateError::Syntax("single '=' in expression".to_string()));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op("<="));
                    i += 2;
                } else {
                    tokens.push(Token::Op("<"));
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(">="));
                    i += 2;
                } else {
                    tokens.push(Token::Op(">"));
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::Op("&&"));
                    i += 2;
                } else {
                    return Err(TemplateError::Syntax("single '&' in expression".to_string()));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::Op("||"));
                    i += 2;
                } else {
                    return Err(TemplateError::Syntax("single '|' in expression".to_string()));
                }
            }
            '"' | '\'' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            text.push(ch);
                            i += 1;
                        }
                        None => {
                            return Err(TemplateError::Syntax(
                                "unterminated string literal".to_string(),
                            ))
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let raw: String = chars[start..i].iter().collect();
                let n = raw
                    .parse::<f64>()
                    .map_err(|_| TemplateError::Syntax(format!("bad number {:?}", raw)))?;
                tokens.push(Token::Num(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric()
                        || chars[i] == '_'
                        || chars[i] == '.'
                        || chars[i] == '-'
                        || chars[i] == '$')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "true" => tokens.push(Token::Bool(true)),
                    "false" => tokens.push(Token::Bool(false)),
                    "contains" => tokens.push(Token::Op("contains")),
                    _ => {
                        validate_path(&word)?;
                        tokens.push(Token::Path(word));
                    }
                }
            }
            other => {
                return Err(TemplateError::Security(format!(
                    "disallowed character {:?} in expression",
                    other
                )))
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    position: usize,
    scope: &'a Scope,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(o)) if *o == op) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Value, TemplateError> {
        let mut left = self.parse_and()?;
        while self.eat_op("||") {
            let right = self.parse_and()?;
            left = Value::Bool(truthy(&left) || truthy(&right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Value, TemplateError> {
        let mut left = self.parse_unary()?;
        while self.eat_op("&&") {
            let right = self.parse_unary()?;
            left = Value::Bool(truthy(&left) && truthy(&right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Value, TemplateError> {
        if self.eat_op("!") {
            let value = self.parse_unary()?;
            return Ok(Value::Bool(!truthy(&value)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Value, TemplateError> {
        let left = self.parse_operand()?;
        let op = match self.peek() {
            Some(Token::Op(o))
                if matches!(*o, "==" | "!=" | "<" | "<=" | ">" | ">=" | "contains") =>
            {
                *o
            }
            _ => return Ok(left),
        };
        self.position += 1;
        let right = self.parse_operand()?;
        Ok(Value::Bool(compare(op, &left, &right)?))
    }

    fn parse_operand(&mut self) -> Result<Value, TemplateError> {
        match self.peek().cloned() {
            Some(Token::Op("(")) => {
                self.position += 1;
                let value = self.parse_or()?;
                if !self.eat_op(")") {
                    return Err(TemplateError::Syntax("expected ')'".to_string()));
                }
                Ok(value)
            }
            Some(Token::Str(s)) => {
                self.position += 1;
                Ok(Value::String(s))
            }
            Some(Token::Num(n)) => {
                self.position += 1;
                Ok(Value::from(n))
            }
            Some(Token::Bool(b)) => {
                self.position += 1;
                Ok(Value::Bool(b))
            }
            Some(Token::Path(p)) => {
                self.position += 1;
                Ok(self.scope.lookup(&p).cloned().unwrap_or(Value::Null))
            }
            other => Err(TemplateError::Syntax(format!(
                "unexpected token {:?}",
                other
            ))),
        }
    }
}

/// Truthiness: null/false/0/empty string/empty array are false.
fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

/// Numeric view of a value: numbers directly, numeric strings parsed.
fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn compare(op: &str, left: &Value, right: &Value) -> Result<bool, TemplateError> {
    if op == "contains" {
        return match (left, right) {
            (Value::String(hay), needle) => {
                let needle = match needle {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Ok(hay.contains(&needle))
            }
            (Value::Array(items), needle) => Ok(items.contains(needle)),
            _ => Ok(false),
        };
    }
    if let (Some(l), Some(r)) = (as_number(left), as_number(right)) {
        return Ok(match op {
            "==" => l == r,
            "!=" => l != r,
            "<" => l < r,
            "<=" => l <= r,
            ">" => l > r,
            ">=" => l >= r,
            _ => unreachable!("comparison op"),
        });
    }
    let l = super::filters::to_display(left);
    let r = super::filters::to_display(right);
    Ok(match op {
        "==" => l == r,
        "!=" => l != r,
        "<" => l < r,
        "<=" => l <= r,
        ">" => l > r,
        ">=" => l >= r,
        _ => unreachable!("comparison op"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> Scope {
        let mut s = Scope::new();
        s.set_nested(&["evaluation", "score"], json!(75));
        s.set("last_response", json!("route: faq please"));
        s.set("flag", json!(true));
        s.set("empty", json!(""));
        s
    }

    /// **Scenario**: numeric comparison against a scope path.
    #[test]
    fn numeric_comparison() {
        let s = scope();
        assert!(eval_condition("evaluation.score < 80", &s).unwrap());
        assert!(!eval_condition("evaluation.score >= 80", &s).unwrap());
        assert!(eval_condition("evaluation.score == 75", &s).unwrap());
    }

    /// **Scenario**: numeric strings compare numerically.
    #[test]
    fn numeric_string_coercion() {
        let mut s = Scope::new();
        s.set("score", json!("90"));
        assert!(eval_condition("score >= 80", &s).unwrap());
    }

    /// **Scenario**: containment, boolean connectives, and negation.
    #[test]
    fn contains_and_connectives() {
        let s = scope();
        assert!(eval_condition("last_response contains 'faq'", &s).unwrap());
        assert!(eval_condition("flag && evaluation.score > 50", &s).unwrap());
        assert!(eval_condition("!empty || false", &s).unwrap());
        assert!(!eval_condition("!(flag)", &s).unwrap());
    }

    /// **Scenario**: the else sentinel always matches.
    #[test]
    fn else_sentinel_matches() {
        let s = Scope::new();
        assert!(eval_condition("else", &s).unwrap());
        assert!(eval_condition("  else  ", &s).unwrap());
    }

    /// **Scenario**: missing paths are null and falsy.
    #[test]
    fn missing_path_is_falsy() {
        let s = Scope::new();
        assert!(!eval_condition("nothing.here", &s).unwrap());
        assert!(eval_condition("nothing.here == nothing.there", &s).unwrap());
    }

    /// **Scenario**: disallowed constructs are security errors.
    #[test]
    fn disallowed_constructs_rejected() {
        let s = Scope::new();
        assert!(matches!(
            eval_condition("__import__ == 1", &s),
            Err(TemplateError::Security(_))
        ));
        assert!(matches!(
            eval_condition("a ; b", &s),
            Err(TemplateError::Security(_))
        ));
        assert!(matches!(
            eval_condition("a = 1", &s),
            Err(TemplateError::Syntax(_))
        ));
    }
}
