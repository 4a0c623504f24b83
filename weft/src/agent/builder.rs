//! Agent builder and cache.
//!
//! Cache key: `(agent id or alias, canonical runtime overrides, sorted tool
//! names)`. A hit returns the existing handle; a miss resolves the effective
//! runtime, fetches the pooled model client, and builds the handle with the
//! run's hooks installed. Insert-only within a workflow's life.

use std::sync::Arc;

use dashmap::DashMap;
use env_config::EnvOverrides;

use crate::agent::runtime::{canonical_overrides, resolve};
use crate::agent::AgentHandle;
use crate::context::{CycleHooks, TokenMeter};
use crate::error::EngineError;
use crate::llm::ClientPool;
use crate::spec::WorkflowSpec;
use crate::tools::{ToolContext, ToolRegistry};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AgentKey {
    name: String,
    overrides: String,
    tools: Vec<String>,
}

/// Builds and caches agent handles for one run.
pub struct AgentCache {
    spec: Arc<WorkflowSpec>,
    env: EnvOverrides,
    pool: Arc<ClientPool>,
    registry: Arc<ToolRegistry>,
    tool_ctx: ToolContext,
    hooks: CycleHooks,
    meter: Arc<TokenMeter>,
    agents: DashMap<AgentKey, Arc<AgentHandle>>,
}

impl AgentCache {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        spec: Arc<WorkflowSpec>,
        env: EnvOverrides,
        pool: Arc<ClientPool>,
        registry: Arc<ToolRegistry>,
        tool_ctx: ToolContext,
        hooks: CycleHooks,
        meter: Arc<TokenMeter>,
    ) -> Self {
        Self {
            spec,
            env,
            pool,
            registry,
            tool_ctx,
            hooks,
            meter,
            agents: DashMap::new(),
        }
    }

    /// The handle for a declared agent, built on first use.
    pub fn obtain(&self, agent_id: &str) -> Result<Arc<AgentHandle>, EngineError> {
        self.obtain_with(agent_id, None, None)
    }

    /// Variant for workers: `alias` separates conversations of instances
    /// sharing one template; `tool_overrides` replaces the declared tool set.
    pub fn obtain_with(
        &self,
        agent_id: &str,
        alias: Option<&str>,
        tool_overrides: Option<&[String]>,
    ) -> Result<Arc<AgentHandle>, EngineError> {
        let agent_spec = self.spec.agents.get(agent_id).ok_or_else(|| {
            EngineError::Unexpected(format!(
                "agent {:?} passed the capability gate but is undeclared",
                agent_id
            ))
        })?;

        let name = alias.unwrap_or(agent_id).to_string();
        let mut tools: Vec<String> = tool_overrides
            .map(<[String]>::to_vec)
            .unwrap_or_else(|| agent_spec.tools.clone());
        tools.sort();

        let key = AgentKey {
            name: name.clone(),
            overrides: canonical_overrides(agent_spec.runtime.as_ref()),
            tools: tools.clone(),
        };
        if let Some(handle) = self.agents.get(&key) {
            return Ok(handle.clone());
        }

        let runtime = resolve(&self.spec.runtime, agent_spec.runtime.as_ref(), &self.env)?;
        let client = self.pool.get(&runtime).map_err(EngineError::from)?;
        tracing::debug!(agent = %name, model = %runtime.model_id, "agent built");

        let handle = Arc::new(AgentHandle::new(
            name,
            agent_spec.prompt.clone(),
            client,
            tools,
            self.registry.clone(),
            self.tool_ctx.clone(),
            self.meter.clone(),
            self.hooks.clone(),
        ));
        let entry = self.agents.entry(key).or_insert(handle);
        Ok(entry.clone())
    }

    /// Every handle built so far (conversation snapshot walk).
    pub fn handles(&self) -> Vec<Arc<AgentHandle>> {
        self.agents.iter().map(|e| e.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockModel, MockModelFactory};
    use crate::spec::load::from_str;

    fn cache() -> AgentCache {
        let spec: Arc<WorkflowSpec> = Arc::new(
            from_str(
                r#"
name: t
runtime: { provider: openai, model_id: m }
agents:
  a: { prompt: "A" }
  b: { prompt: "B", tools: [calculator] }
pattern:
  type: chain
  steps:
    - { type: agent, agent: a, input: "x" }
"#,
            )
            .unwrap(),
        );
        let factory = Arc::new(MockModelFactory::new(Arc::new(MockModel::reply("ok"))));
        AgentCache::new(
            spec,
            EnvOverrides::default(),
            Arc::new(ClientPool::new(factory)),
            Arc::new(ToolRegistry::with_builtins()),
            ToolContext {
                artifacts_dir: std::env::temp_dir(),
                security: Default::default(),
                interactive: false,
            },
            CycleHooks::default(),
            Arc::new(TokenMeter::new()),
        )
    }

    /// **Scenario**: equivalent keys hit the cache; distinct agents do not.
    #[test]
    fn cache_hit_and_miss() {
        let cache = cache();
        let a1 = cache.obtain("a").unwrap();
        let a2 = cache.obtain("a").unwrap();
        let b = cache.obtain("b").unwrap();
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
        assert_eq!(cache.handles().len(), 2);
    }

    /// **Scenario**: an alias or a tool override is a distinct cache entry.
    #[test]
    fn alias_and_overrides_are_distinct() {
        let cache = cache();
        let base = cache.obtain("a").unwrap();
        let worker = cache.obtain_with("a", Some("a/worker-1"), None).unwrap();
        assert!(!Arc::ptr_eq(&base, &worker));
        assert_eq!(worker.name(), "a/worker-1");

        let retooled = cache
            .obtain_with("a", None, Some(&["grep".to_string()]))
            .unwrap();
        assert!(!Arc::ptr_eq(&base, &retooled));
    }

    /// **Scenario**: an undeclared agent id is an engine invariant breach.
    #[test]
    fn undeclared_agent_rejected() {
        let cache = cache();
        let err = cache.obtain("ghost").unwrap_err();
        assert!(matches!(err, EngineError::Unexpected(_)), "{err}");
    }
}
