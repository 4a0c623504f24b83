//! Loading workflow documents and coercing CLI input overrides.
//!
//! Documents are YAML (JSON being a YAML subset, both parse). Parse failures
//! are schema errors; filesystem failures are I/O errors. Input overrides are
//! `key=value` strings coerced against the declared `inputs` schema.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use crate::error::EngineError;
use crate::spec::{InputSpec, InputType, WorkflowSpec};

/// Parses a workflow document from a string.
pub fn from_str(doc: &str) -> Result<WorkflowSpec, EngineError> {
    serde_yaml::from_str(doc).map_err(|e| EngineError::Schema(e.to_string()))
}

/// Reads and parses a workflow document from disk, returning the raw bytes
/// alongside the parsed spec (the bytes become the session's spec snapshot).
pub fn from_path(path: &Path) -> Result<(WorkflowSpec, Vec<u8>), EngineError> {
    let bytes = std::fs::read(path)
        .map_err(|e| EngineError::Io(format!("read {}: {}", path.display(), e)))?;
    let doc = String::from_utf8(bytes.clone())
        .map_err(|e| EngineError::Schema(format!("{}: not UTF-8: {}", path.display(), e)))?;
    Ok((from_str(&doc)?, bytes))
}

/// Splits a `key=value` override. Everything after the first `=` is the value.
pub fn parse_override(raw: &str) -> Result<(String, String), EngineError> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(EngineError::Usage(format!(
            "input override {:?} is not key=value",
            raw
        ))),
    }
}

/// Resolves the run's variables: declared defaults, then overrides coerced to
/// the declared type, then required-ness.
///
/// Overrides for undeclared keys pass through as strings so specs can
/// reference ad-hoc values.
pub fn resolve_inputs(
    spec: &WorkflowSpec,
    overrides: &[(String, String)],
) -> Result<BTreeMap<String, Value>, EngineError> {
    let mut values: BTreeMap<String, Value> = BTreeMap::new();
    for (name, input) in &spec.inputs {
        if let Some(default) = &input.default {
            values.insert(name.clone(), default.clone());
        }
    }
    for (key, raw) in overrides {
        let value = match spec.inputs.get(key) {
            Some(input) => coerce(key, raw, input)?,
            None => Value::String(raw.clone()),
        };
        values.insert(key.clone(), value);
    }
    for (name, input) in &spec.inputs {
        if input.required && !values.contains_key(name) {
            return Err(EngineError::Usage(format!(
                "missing required input {:?} (pass {}=...)",
                name, name
            )));
        }
    }
    Ok(values)
}

fn coerce(name: &str, raw: &str, input: &InputSpec) -> Result<Value, EngineError> {
    let value = match input.kind {
        InputType::String => Value::String(raw.to_string()),
        InputType::Integer => raw
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| EngineError::Usage(format!("input {:?} must be an integer", name)))?,
        InputType::Number => raw
            .trim()
            .parse::<f64>()
            .map(Value::from)
            .map_err(|_| EngineError::Usage(format!("input {:?} must be a number", name)))?,
        InputType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Value::Bool(true),
            "false" | "0" | "no" => Value::Bool(false),
            _ => {
                return Err(EngineError::Usage(format!(
                    "input {:?} must be a boolean",
                    name
                )))
            }
        },
    };
    if let Some(allowed) = &input.allowed {
        if !allowed.contains(&value) {
            return Err(EngineError::Usage(format!(
                "input {:?} must be one of {}",
                name,
                serde_json::to_string(allowed).unwrap_or_default()
            )));
        }
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec_with_inputs() -> WorkflowSpec {
        from_str(
            r#"
name: s
runtime: { provider: openai, model_id: m }
inputs:
  topic: { type: string, required: true }
  limit: { type: integer, default: 10 }
  mode: { type: string, enum: ["fast", "slow"], default: "fast" }
  deep: { type: boolean, default: false }
agents:
  a: { prompt: "p" }
pattern:
  type: chain
  steps:
    - { type: agent, agent: a, input: "{{ inputs.topic }}" }
"#,
        )
        .unwrap()
    }

    /// **Scenario**: defaults apply, overrides coerce to declared types.
    #[test]
    fn defaults_and_coercion() {
        let spec = spec_with_inputs();
        let vars = resolve_inputs(
            &spec,
            &[
                ("topic".into(), "rust".into()),
                ("limit".into(), "3".into()),
                ("deep".into(), "yes".into()),
            ],
        )
        .unwrap();
        assert_eq!(vars["topic"], json!("rust"));
        assert_eq!(vars["limit"], json!(3));
        assert_eq!(vars["mode"], json!("fast"));
        assert_eq!(vars["deep"], json!(true));
    }

    /// **Scenario**: missing required input is a usage error.
    #[test]
    fn missing_required_is_usage_error() {
        let spec = spec_with_inputs();
        let err = resolve_inputs(&spec, &[]).unwrap_err();
        assert!(matches!(err, EngineError::Usage(_)), "{err}");
        assert_eq!(err.exit_code(), 2);
    }

    /// **Scenario**: enum violation and bad integer are usage errors.
    #[test]
    fn enum_and_type_violations() {
        let spec = spec_with_inputs();
        let err = resolve_inputs(
            &spec,
            &[("topic".into(), "t".into()), ("mode".into(), "warp".into())],
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Usage(_)), "{err}");
        let err = resolve_inputs(
            &spec,
            &[("topic".into(), "t".into()), ("limit".into(), "x".into())],
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Usage(_)), "{err}");
    }

    /// **Scenario**: malformed override string is rejected; value may contain '='.
    #[test]
    fn override_parsing() {
        assert!(parse_override("k=v").is_ok());
        assert_eq!(parse_override("k=a=b").unwrap().1, "a=b");
        assert!(matches!(parse_override("novalue"), Err(EngineError::Usage(_))));
        assert!(matches!(parse_override("=v"), Err(EngineError::Usage(_))));
    }

    /// **Scenario**: a document that is not a spec is a schema error (exit 3).
    #[test]
    fn parse_failure_is_schema_error() {
        let err = from_str("agents: []").unwrap_err();
        assert!(matches!(err, EngineError::Schema(_)), "{err}");
        assert_eq!(err.exit_code(), 3);
    }
}
