//! The fixed filter whitelist for template substitution.
//!
//! Exactly six filters: `truncate(n)`, `tojson`, `title`, `length`,
//! `default(x)`, `join(sep)`. Anything else is a sandbox violation.

use serde_json::Value;

use super::TemplateError;

/// Applies one `name` or `name(args)` filter to a value.
pub(crate) fn apply(part: &str, value: Value) -> Result<Value, TemplateError> {
    let (name, args) = parse_invocation(part)?;
    match name.as_str() {
        "truncate" => {
            let n = single_usize_arg(&name, &args)?;
            let text = to_display(&value);
            if text.chars().count() <= n {
                Ok(Value::String(text))
            } else {
                let cut: String = text.chars().take(n).collect();
                Ok(Value::String(format!("{}...", cut)))
            }
        }
        "tojson" => {
            no_args(&name, &args)?;
            let json = serde_json::to_string(&value)
                .map_err(|e| TemplateError::Syntax(format!("tojson: {}", e)))?;
            Ok(Value::String(json))
        }
        "title" => {
            no_args(&name, &args)?;
            let text = to_display(&value);
            let mut out = String::with_capacity(text.len());
            let mut at_word_start = true;
            for c in text.chars() {
                if at_word_start {
                    out.extend(c.to_uppercase());
                } else {
                    out.push(c);
                }
                at_word_start = c.is_whitespace();
            }
            Ok(Value::String(out))
        }
        "length" => {
            no_args(&name, &args)?;
            let len = match &value {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                Value::Null => 0,
                _ => to_display(&value).chars().count(),
            };
            Ok(Value::from(len))
        }
        "default" => {
            let arg = single_arg(&name, &args)?;
            match &value {
                Value::Null => Ok(arg),
                Value::String(s) if s.is_empty() => Ok(arg),
                _ => Ok(value),
            }
        }
        "join" => {
            let sep = match single_arg(&name, &args)? {
                Value::String(s) => s,
                other => to_display(&other),
            };
            match value {
                Value::Array(items) => {
                    let joined = items
                        .iter()
                        .map(to_display)
                        .collect::<Vec<_>>()
                        .join(&sep);
                    Ok(Value::String(joined))
                }
                other => Ok(Value::String(to_display(&other))),
            }
        }
        other => Err(TemplateError::Security(format!(
            "unknown filter {:?} (allowed: truncate, tojson, title, length, default, join)",
            other
        ))),
    }
}

/// Renders a value to display text: strings verbatim, null empty, rest as JSON.
pub(crate) fn to_display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Parses `name` or `name(arg, arg)` into name and literal args.
fn parse_invocation(part: &str) -> Result<(String, Vec<Value>), TemplateError> {
    let part = part.trim();
    let Some(open) = part.find('(') else {
        if !part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(TemplateError::Security(format!(
                "malformed filter {:?}",
                part
            )));
        }
        return Ok((part.to_string(), Vec::new()));
    };
    if !part.ends_with(')') {
        return Err(TemplateError::Syntax(format!(
            "unclosed filter arguments in {:?}",
            part
        )));
    }
    let name = part[..open].trim().to_string();
    let args_src = &part[open + 1..part.len() - 1];
    let mut args = Vec::new();
    for raw in split_args(args_src) {
        args.push(parse_literal(&raw)?);
    }
    Ok((name, args))
}

/// Splits filter arguments on commas outside quotes.
fn split_args(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in s.chars() {
        match (c, quote) {
            ('"', None) | ('\'', None) => {
                quote = Some(c);
                current.push(c);
            }
            (q, Some(open)) if q == open => {
                quote = None;
                current.push(c);
            }
            (',', None) => {
                parts.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Parses a quoted string, number, or boolean literal. Paths are not allowed
/// in filter arguments; only literals keep the sandbox closed.
fn parse_literal(raw: &str) -> Result<Value, TemplateError> {
    let raw = raw.trim();
    if (raw.starts_with('"') && raw.ends_with('"') && raw.len() >= 2)
        || (raw.starts_with('\'') && raw.ends_with('\'') && raw.len() >= 2)
    {
        return Ok(Value::String(raw[1..raw.len() - 1].to_string()));
    }
    if raw == "true" {
        return Ok(Value::Bool(true));
    }
    if raw == "false" {
        return Ok(Value::Bool(false));
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Ok(Value::from(i));
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Ok(Value::from(f));
    }
    Err(TemplateError::Security(format!(
        "filter argument {:?} is not a literal",
        raw
    )))
}

fn no_args(name: &str, args: &[Value]) -> Result<(), TemplateError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(TemplateError::Syntax(format!(
            "filter {} takes no arguments",
            name
        )))
    }
}

fn single_arg(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    if args.len() == 1 {
        Ok(args[0].clone())
    } else {
        Err(TemplateError::Syntax(format!(
            "filter {} takes exactly one argument",
            name
        )))
    }
}

fn single_usize_arg(name: &str, args: &[Value]) -> Result<usize, TemplateError> {
    match single_arg(name, args)? {
        Value::Number(n) => n
            .as_u64()
            .map(|v| v as usize)
            .ok_or_else(|| TemplateError::Syntax(format!("filter {} needs a non-negative integer", name))),
        _ => Err(TemplateError::Syntax(format!(
            "filter {} needs an integer argument",
            name
        ))),
    }
}
