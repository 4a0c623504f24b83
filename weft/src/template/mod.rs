//! Sandboxed template rendering: `{{ path | filter(args) }}` over a Scope.
//!
//! Substitution is dotted-path lookup into the scope plus a fixed filter
//! whitelist (`truncate`, `tojson`, `title`, `length`, `default`, `join`).
//! There is no call syntax on values, no attribute traversal outside the
//! scope, and no file or environment access; anything outside the whitelist
//! is a `TemplateError::Security`, which is fatal and never retried.

mod expr;
mod filters;

pub use expr::eval_condition;

use thiserror::Error;

use crate::scope::Scope;

/// Template or expression failure.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Sandbox violation: unknown filter, call syntax, disallowed traversal.
    #[error("template security: {0}")]
    Security(String),
    /// Malformed template or expression text.
    #[error("template syntax: {0}")]
    Syntax(String),
}

/// Renders a template string against a scope.
///
/// Text outside `{{ … }}` is copied verbatim. A missing path renders as the
/// empty string unless a `default(x)` filter replaces it. Errors are fatal to
/// the workflow; see the error-kind mapping in [`crate::error`].
pub fn render(template: &str, scope: &Scope) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    loop {
        match rest.find("{{") {
            None => {
                out.push_str(rest);
                return Ok(out);
            }
            Some(open) => {
                out.push_str(&rest[..open]);
                let after = &rest[open + 2..];
                let close = after
                    .find("}}")
                    .ok_or_else(|| TemplateError::Syntax("unclosed {{".to_string()))?;
                let inner = after[..close].trim();
                out.push_str(&render_expression(inner, scope)?);
                rest = &after[close + 2..];
            }
        }
    }
}

/// Renders one `path | filter | filter(args)` expression to a string.
fn render_expression(inner: &str, scope: &Scope) -> Result<String, TemplateError> {
    let mut parts = split_pipes(inner);
    if parts.is_empty() {
        return Err(TemplateError::Syntax("empty substitution".to_string()));
    }
    let path = parts.remove(0);
    validate_path(&path)?;
    let mut value = scope
        .lookup(&path)
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    for part in parts {
        value = filters::apply(&part, value)?;
    }
    Ok(filters::to_display(&value))
}

/// Splits on `|` outside quotes so filter arguments may contain pipes.
fn split_pipes(s: &str) -> Vec<String> {
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
            ('|', None) => {
                parts.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() || parts.is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Validates a lookup path: dotted identifiers only.
///
/// Rejects call syntax, indexing brackets, dunder names, and empty segments.
/// `$TRACE` is the one allowed non-alphanumeric leading segment.
pub(crate) fn validate_path(path: &str) -> Result<(), TemplateError> {
    if path.is_empty() {
        return Err(TemplateError::Syntax("empty path".to_string()));
    }
    for forbidden in ["(", ")", "[", "]", "__"] {
        if path.contains(forbidden) {
            return Err(TemplateError::Security(format!(
                "disallowed construct {:?} in path {:?}",
                forbidden, path
            )));
        }
    }
    for (i, seg) in path.split('.').enumerate() {
        if seg.is_empty() {
            return Err(TemplateError::Syntax(format!("empty segment in {:?}", path)));
        }
        if i == 0 && seg == "$TRACE" {
            continue;
        }
        if !seg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(TemplateError::Security(format!(
                "disallowed segment {:?} in path {:?}",
                seg, path
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> Scope {
        let mut s = Scope::new();
        s.set("last_response", json!("hello world"));
        s.set_nested(&["inputs", "topic"], json!("rust"));
        s.set("items", json!(["a", "b", "c"]));
        s.set("count", json!(42));
        s
    }

    /// **Scenario**: plain text and simple substitution.
    #[test]
    fn render_plain_and_substitution() {
        let s = scope();
        assert_eq!(render("no vars", &s).unwrap(), "no vars");
        assert_eq!(
            render("say: {{ last_response }}", &s).unwrap(),
            "say: hello world"
        );
        assert_eq!(render("{{ inputs.topic }}!", &s).unwrap(), "rust!");
    }

    /// **Scenario**: numbers render without quotes; missing paths render empty.
    #[test]
    fn render_number_and_missing() {
        let s = scope();
        assert_eq!(render("n={{ count }}", &s).unwrap(), "n=42");
        assert_eq!(render("x={{ nope.deep }}", &s).unwrap(), "x=");
    }

    /// **Scenario**: filters chain left to right.
    #[test]
    fn render_filter_chain() {
        let s = scope();
        assert_eq!(
            render("{{ items | join(\", \") | truncate(4) }}", &s).unwrap(),
            "a, b..."
        );
        assert_eq!(render("{{ items | length }}", &s).unwrap(), "3");
        assert_eq!(
            render("{{ missing | default(\"fallback\") }}", &s).unwrap(),
            "fallback"
        );
    }

    /// **Scenario**: unknown filter is a security error, not a render.
    #[test]
    fn unknown_filter_is_security_error() {
        let s = scope();
        let err = render("{{ last_response | exec('rm') }}", &s).unwrap_err();
        assert!(matches!(err, TemplateError::Security(_)), "{err}");
    }

    /// **Scenario**: call syntax and bracket indexing on paths are rejected.
    #[test]
    fn call_and_index_syntax_rejected() {
        let s = scope();
        assert!(matches!(
            render("{{ inputs.topic() }}", &s),
            Err(TemplateError::Security(_))
        ));
        assert!(matches!(
            render("{{ items[0] }}", &s),
            Err(TemplateError::Security(_))
        ));
        assert!(matches!(
            render("{{ __class__ }}", &s),
            Err(TemplateError::Security(_))
        ));
    }

    /// **Scenario**: unclosed braces are a syntax error.
    #[test]
    fn unclosed_braces_syntax_error() {
        let s = scope();
        assert!(matches!(
            render("{{ last_response", &s),
            Err(TemplateError::Syntax(_))
        ));
    }

    /// **Scenario**: $TRACE is an allowed leading segment.
    #[test]
    fn trace_variable_allowed() {
        let mut s = scope();
        s.set("$TRACE", json!({"trace_id": "t-1"}));
        assert_eq!(
            render("{{ $TRACE.trace_id }}", &s).unwrap(),
            "t-1"
        );
    }
}
