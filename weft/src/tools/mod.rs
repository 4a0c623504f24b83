//! Tool abstraction: name-indexed registry, safety guards, builtin tools.
//!
//! A tool exposes a name, a JSON-Schema input description, a side-effect
//! class, and an async `call`. The registry enforces the cross-cutting
//! guards: SSRF screening on every HTTP call, path sandboxing for file
//! writes, bounded output for reads, and a per-call timeout.

mod calc;
pub(crate) mod file;
mod http;
pub mod registry;
pub mod ssrf;

pub use calc::CalculatorTool;
pub use file::{GrepTool, ReadFileTool, WriteFileTool};
pub use http::HttpRequestTool;
pub use registry::ToolRegistry;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::spec::SecuritySpec;

/// Tool specification sent to the model alongside the conversation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    /// JSON Schema for arguments.
    pub input_schema: Value,
}

/// Result of a single tool call.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub text: String,
}

/// What a tool touches; drives consent and sandbox decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    Pure,
    Network,
    FilesystemRead,
    FilesystemWrite,
}

/// Per-run context handed to every tool call.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Directory file-write tools are sandboxed to.
    pub artifacts_dir: PathBuf,
    pub security: SecurityPolicy,
    /// True when a human could be asked for consent; write tools refuse
    /// without `bypass_tool_consent` in that mode.
    pub interactive: bool,
}

/// Frozen security posture derived from the spec's `security` block plus
/// environment overrides.
#[derive(Debug, Clone, Default)]
pub struct SecurityPolicy {
    pub allow_hosts: Vec<String>,
    pub allow_private_network: bool,
    pub bypass_tool_consent: bool,
}

impl SecurityPolicy {
    pub fn from_spec(spec: &SecuritySpec, bypass_from_env: bool) -> Self {
        Self {
            allow_hosts: spec.allow_hosts.clone(),
            allow_private_network: spec.allow_private_network,
            bypass_tool_consent: spec.bypass_tool_consent || bypass_from_env,
        }
    }
}

/// Errors from listing or calling tools.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("invalid arguments: {0}")]
    InvalidInput(String),
    /// SSRF screen or path sandbox rejected the call.
    #[error("blocked: {0}")]
    Blocked(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("i/o: {0}")]
    Io(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("consent required: {0}")]
    ConsentRequired(String),
}

impl ToolError {
    /// Transient network failures may be retried; timeouts only for
    /// idempotent tools (the registry downgrades them otherwise).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolError::Transport(_) | ToolError::Timeout(_))
    }
}

/// A callable tool. Implementations must be cheap to share (`Arc`).
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn spec(&self) -> ToolSpec;
    fn side_effect(&self) -> SideEffect;
    /// False when a timed-out call must not be retried.
    fn idempotent(&self) -> bool {
        true
    }
    /// Per-call deadline enforced by the registry.
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError>;
}

/// Pulls a required string field out of tool arguments.
pub(crate) fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    args.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidInput(format!("missing string field {:?}", field)))
}
