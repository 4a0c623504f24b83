//! Typed `WEFT_*` environment overrides, captured once and frozen.
//!
//! The engine layers these over a spec's runtime at construction time and
//! never re-reads the environment afterwards, so a run's configuration is
//! immutable for its whole lifetime.

/// Snapshot of the engine-relevant environment variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvOverrides {
    /// `WEFT_PROVIDER`: bedrock | openai | ollama.
    pub provider: Option<String>,
    /// `WEFT_MODEL_ID`.
    pub model_id: Option<String>,
    /// `WEFT_REGION` (bedrock).
    pub region: Option<String>,
    /// `WEFT_OLLAMA_HOST`.
    pub ollama_host: Option<String>,
    /// `WEFT_MAX_PARALLEL`; non-numeric values are ignored.
    pub max_parallel: Option<usize>,
    /// `WEFT_BYPASS_TOOL_CONSENT`: true/1/yes.
    pub bypass_tool_consent: bool,
}

fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl EnvOverrides {
    /// Reads the `WEFT_*` variables from the current process environment.
    pub fn capture() -> Self {
        Self {
            provider: var("WEFT_PROVIDER"),
            model_id: var("WEFT_MODEL_ID"),
            region: var("WEFT_REGION"),
            ollama_host: var("WEFT_OLLAMA_HOST"),
            max_parallel: var("WEFT_MAX_PARALLEL").and_then(|v| v.trim().parse().ok()),
            bypass_tool_consent: var("WEFT_BYPASS_TOOL_CONSENT")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
                .unwrap_or(false),
        }
    }
}
