//! Routing executor: one router invocation selects a branch, which then runs
//! as a chain.
//!
//! The router must answer with a JSON object carrying at least `route`;
//! `rationale` is captured when present. An unknown route falls back to the
//! declared default, otherwise fails as a routing error.

use serde_json::Value;

use crate::error::EngineError;
use crate::pattern::state::{PatternState, RoutingState};
use crate::pattern::{chain, ExecCtx, StepOutcome};
use crate::spec::RoutingPattern;
use crate::template::render;

pub async fn run(
    ctx: &ExecCtx,
    pattern: &RoutingPattern,
    state: &mut RoutingState,
) -> Result<StepOutcome, EngineError> {
    if state.route.is_none() {
        let scope = ctx.base_scope();
        let prompt = render(&pattern.router.input, &scope)?;
        let handle = ctx.agents.obtain(&pattern.router.agent)?;
        let reply = ctx.invoke_agent(&handle, &prompt).await?;

        let decision = parse_route(&reply.content)?;
        let route = if pattern.routes.contains_key(&decision.route) {
            decision.route
        } else if let Some(default) = &pattern.default_route {
            tracing::debug!(requested = %decision.route, default = %default, "router fell back to default route");
            default.clone()
        } else {
            return Err(EngineError::Routing(format!(
                "router selected unknown route {:?} (declared: {:?})",
                decision.route,
                pattern.routes.keys().collect::<Vec<_>>()
            )));
        };
        state.route = Some(route);
        state.rationale = decision.rationale;
        ctx.checkpoint(&PatternState::Routing(state.clone())).await?;
    }

    let route = state
        .route
        .clone()
        .ok_or_else(|| EngineError::Unexpected("route unset after selection".to_string()))?;
    let steps = pattern.routes.get(&route).ok_or_else(|| {
        EngineError::Routing(format!("selected route {:?} disappeared from spec", route))
    })?;

    let route_for_persist = route.clone();
    let rationale = state.rationale.clone();
    let persist = move |chain_state: &crate::pattern::state::ChainState| {
        PatternState::Routing(RoutingState {
            route: Some(route_for_persist.clone()),
            rationale: rationale.clone(),
            chain: chain_state.clone(),
        })
    };
    let outcome = chain::run(ctx, steps, &mut state.chain, Some(&persist)).await?;
    Ok(outcome)
}

struct RouteDecision {
    route: String,
    rationale: Option<String>,
}

/// Extracts `{route, rationale?}` from the router's reply, tolerating prose
/// around the JSON object.
fn parse_route(content: &str) -> Result<RouteDecision, EngineError> {
    let value = extract_json_object(content)
        .ok_or_else(|| EngineError::Routing(format!("router reply is not JSON: {:?}", content)))?;
    let route = value
        .get("route")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            EngineError::Routing(format!("router reply has no string `route`: {}", value))
        })?
        .to_string();
    let rationale = value
        .get("rationale")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(RouteDecision { route, rationale })
}

/// First JSON object embedded in the text, or the whole text.
pub(crate) fn extract_json_object(content: &str) -> Option<Value> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end])
        .ok()
        .filter(Value::is_object)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: clean and prose-wrapped router replies parse.
    #[test]
    fn parse_route_variants() {
        let d = parse_route(r#"{"route":"faq","rationale":"x"}"#).unwrap();
        assert_eq!(d.route, "faq");
        assert_eq!(d.rationale.as_deref(), Some("x"));

        let d = parse_route("Routing decision: {\"route\": \"billing\"} as requested").unwrap();
        assert_eq!(d.route, "billing");
        assert_eq!(d.rationale, None);
    }

    /// **Scenario**: non-JSON and route-less replies are routing errors.
    #[test]
    fn parse_route_failures() {
        assert!(matches!(
            parse_route("just text"),
            Err(EngineError::Routing(_))
        ));
        assert!(matches!(
            parse_route(r#"{"rationale":"no route"}"#),
            Err(EngineError::Routing(_))
        ));
        assert!(matches!(
            parse_route(r#"{"route": 42}"#),
            Err(EngineError::Routing(_))
        ));
    }

    /// **Scenario**: extract_json_object rejects arrays and scalars.
    #[test]
    fn extract_object_only() {
        assert!(extract_json_object(r#"[1,2]"#).is_none());
        assert!(extract_json_object("42").is_none());
        assert!(extract_json_object(r#"{"a":1}"#).is_some());
    }
}
