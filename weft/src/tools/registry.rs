//! Central registry for tools: registration, listing, and guarded calls.
//!
//! Calls go through the registry so the per-call timeout and error
//! classification apply uniformly, whatever the tool does inside.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::{
    CalculatorTool, GrepTool, HttpRequestTool, ReadFileTool, Tool, ToolContext, ToolError,
    ToolOutput, ToolSpec, WriteFileTool,
};

/// Name-indexed tool registry. Insert-only within a workflow's life.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Creates a registry with the builtin tool set registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(HttpRequestTool::new()));
        registry.register(Arc::new(ReadFileTool));
        registry.register(Arc::new(WriteFileTool));
        registry.register(Arc::new(GrepTool));
        registry.register(Arc::new(CalculatorTool));
        registry
    }

    /// Registers a tool; same name replaces.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// True when a tool with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All registered names, sorted for stable diagnostics.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Specs for a subset of tools, in the order given. Unknown names error.
    pub fn specs_for(&self, names: &[String]) -> Result<Vec<ToolSpec>, ToolError> {
        names
            .iter()
            .map(|n| {
                self.tools
                    .get(n)
                    .map(|t| t.spec())
                    .ok_or_else(|| ToolError::NotFound(n.clone()))
            })
            .collect()
    }

    /// Calls a tool by name with the consent gate and per-tool timeout
    /// applied.
    ///
    /// A timeout on a non-idempotent tool is downgraded to a non-retryable
    /// I/O error so the retry loop does not repeat a side effect.
    pub async fn call(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        if tool.side_effect() == super::SideEffect::FilesystemWrite
            && ctx.interactive
            && !ctx.security.bypass_tool_consent
        {
            return Err(ToolError::ConsentRequired(format!(
                "{} writes files; set security.bypass_tool_consent or approve",
                name
            )));
        }
        let deadline = tool.timeout();
        tracing::debug!(tool = name, "tool call");
        match tokio::time::timeout(deadline, tool.call(args, ctx)).await {
            Ok(result) => result,
            Err(_) if tool.idempotent() => Err(ToolError::Timeout(deadline)),
            Err(_) => Err(ToolError::Io(format!(
                "tool {} timed out after {:?} and is not idempotent",
                name, deadline
            ))),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
