//! Effective runtime resolution: spec runtime, environment, per-agent
//! overrides.
//!
//! Layering: `WEFT_*` environment values apply over the spec's base runtime
//! at engine construction; a per-agent `runtime` block wins over both. The
//! result is frozen into the agent handle.

use env_config::EnvOverrides;

use crate::error::EngineError;
use crate::llm::Provider;
use crate::spec::{Budgets, FailurePolicy, RuntimeOverrides, RuntimeSpec};

/// The fully-layered runtime an agent is built against.
#[derive(Debug, Clone)]
pub struct ResolvedRuntime {
    pub provider: Provider,
    pub model_id: String,
    pub region: Option<String>,
    pub host: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub max_parallel: usize,
    pub budgets: Budgets,
    pub failure_policy: FailurePolicy,
}

impl ResolvedRuntime {
    /// The provider-specific location: region for bedrock, host for ollama.
    pub fn location(&self) -> Option<&str> {
        match self.provider {
            Provider::Bedrock => self.region.as_deref(),
            Provider::Ollama => self.host.as_deref(),
            Provider::OpenAi => None,
        }
    }
}

/// Resolves the effective runtime for one agent.
pub fn resolve(
    base: &RuntimeSpec,
    agent_overrides: Option<&RuntimeOverrides>,
    env: &EnvOverrides,
) -> Result<ResolvedRuntime, EngineError> {
    let mut provider_name = base.provider.clone();
    let mut model_id = base.model_id.clone();
    let mut region = base.region.clone();
    let mut host = base.host.clone();
    let mut temperature = base.temperature;
    let mut max_tokens = base.max_tokens;
    let mut top_p = base.top_p;

    if let Some(p) = &env.provider {
        provider_name = p.clone();
    }
    if let Some(m) = &env.model_id {
        model_id = m.clone();
    }
    if let Some(r) = &env.region {
        region = Some(r.clone());
    }
    if let Some(h) = &env.ollama_host {
        host = Some(h.clone());
    }

    if let Some(overrides) = agent_overrides {
        if let Some(p) = &overrides.provider {
            provider_name = p.clone();
        }
        if let Some(m) = &overrides.model_id {
            model_id = m.clone();
        }
        if let Some(r) = &overrides.region {
            region = Some(r.clone());
        }
        if let Some(h) = &overrides.host {
            host = Some(h.clone());
        }
        if overrides.temperature.is_some() {
            temperature = overrides.temperature;
        }
        if overrides.max_tokens.is_some() {
            max_tokens = overrides.max_tokens;
        }
        if overrides.top_p.is_some() {
            top_p = overrides.top_p;
        }
    }

    let provider = Provider::parse(&provider_name).ok_or_else(|| {
        EngineError::Unexpected(format!(
            "provider {:?} passed the capability gate but is unknown",
            provider_name
        ))
    })?;

    Ok(ResolvedRuntime {
        provider,
        model_id,
        region,
        host,
        temperature,
        max_tokens,
        top_p,
        max_parallel: env.max_parallel.unwrap_or(base.max_parallel).max(1),
        budgets: base.budgets.clone(),
        failure_policy: base.failure_policy.clone(),
    })
}

/// Canonical string for an agent's overrides, used in cache keys.
pub fn canonical_overrides(overrides: Option<&RuntimeOverrides>) -> String {
    match overrides {
        None => String::new(),
        Some(o) => serde_json::to_string(&serde_json::json!({
            "provider": o.provider,
            "model_id": o.model_id,
            "region": o.region,
            "host": o.host,
            "temperature": o.temperature,
            "max_tokens": o.max_tokens,
            "top_p": o.top_p,
        }))
        .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> RuntimeSpec {
        RuntimeSpec {
            provider: "openai".into(),
            model_id: "base-model".into(),
            region: None,
            host: None,
            temperature: Some(0.2),
            max_tokens: None,
            top_p: None,
            max_parallel: 4,
            budgets: Budgets::default(),
            failure_policy: FailurePolicy::default(),
        }
    }

    /// **Scenario**: no overrides resolves the base runtime as-is.
    #[test]
    fn base_runtime_resolves() {
        let rt = resolve(&base(), None, &EnvOverrides::default()).unwrap();
        assert_eq!(rt.provider, Provider::OpenAi);
        assert_eq!(rt.model_id, "base-model");
        assert_eq!(rt.temperature, Some(0.2));
        assert_eq!(rt.max_parallel, 4);
    }

    /// **Scenario**: env applies over base; per-agent overrides win over env.
    #[test]
    fn layering_order() {
        let env = EnvOverrides {
            model_id: Some("env-model".into()),
            max_parallel: Some(2),
            ..Default::default()
        };
        let rt = resolve(&base(), None, &env).unwrap();
        assert_eq!(rt.model_id, "env-model");
        assert_eq!(rt.max_parallel, 2);

        let agent = RuntimeOverrides {
            model_id: Some("agent-model".into()),
            temperature: Some(0.9),
            ..Default::default()
        };
        let rt = resolve(&base(), Some(&agent), &env).unwrap();
        assert_eq!(rt.model_id, "agent-model");
        assert_eq!(rt.temperature, Some(0.9));
    }

    /// **Scenario**: location is region for bedrock, host for ollama.
    #[test]
    fn location_by_provider() {
        let mut spec = base();
        spec.provider = "bedrock".into();
        spec.region = Some("us-east-1".into());
        let rt = resolve(&spec, None, &EnvOverrides::default()).unwrap();
        assert_eq!(rt.location(), Some("us-east-1"));

        let mut spec = base();
        spec.provider = "ollama".into();
        spec.host = Some("http://models.internal:11434".into());
        let rt = resolve(&spec, None, &EnvOverrides::default()).unwrap();
        assert_eq!(rt.location(), Some("http://models.internal:11434"));
    }

    /// **Scenario**: canonical override strings are equal iff the overrides are.
    #[test]
    fn canonical_override_strings() {
        assert_eq!(canonical_overrides(None), "");
        let a = RuntimeOverrides {
            model_id: Some("m".into()),
            ..Default::default()
        };
        let b = RuntimeOverrides {
            model_id: Some("m".into()),
            ..Default::default()
        };
        assert_eq!(canonical_overrides(Some(&a)), canonical_overrides(Some(&b)));
        let c = RuntimeOverrides {
            model_id: Some("other".into()),
            ..Default::default()
        };
        assert_ne!(canonical_overrides(Some(&a)), canonical_overrides(Some(&c)));
    }
}
