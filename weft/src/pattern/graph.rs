//! Graph executor: agent-per-node traversal with conditional edges.
//!
//! Cycles are allowed; the only protections are `max_iterations` and the
//! global budgets. Edge choice is declarative-order first-match with an
//! `else` arm guaranteed by the capability gate. Reaching the iteration cap
//! terminates at the current node without error.

use serde_json::Value;

use crate::error::EngineError;
use crate::events::WorkflowEvent;
use crate::pattern::routing::extract_json_object;
use crate::pattern::state::{GraphState, PatternState};
use crate::pattern::{ExecCtx, StepOutcome};
use crate::scope::Scope;
use crate::spec::{GraphPattern, TERMINAL};
use crate::template::{eval_condition, render};

pub async fn run(
    ctx: &ExecCtx,
    pattern: &GraphPattern,
    state: &mut GraphState,
) -> Result<StepOutcome, EngineError> {
    if state.current_node.is_none() {
        state.current_node = Some(pattern.start_node.clone());
    }

    loop {
        if let Some(terminal) = &state.terminal_node {
            return Ok(StepOutcome::Completed(
                state.node_responses.get(terminal).cloned().unwrap_or_default(),
            ));
        }
        ctx.ensure_live()?;

        let node_id = state
            .current_node
            .clone()
            .ok_or_else(|| EngineError::Unexpected("graph cursor unset".to_string()))?;
        let node = pattern.nodes.get(&node_id).ok_or_else(|| {
            EngineError::Unexpected(format!("graph node {:?} disappeared from spec", node_id))
        })?;

        let scope = graph_scope(ctx, state);
        let prompt = render(&node.input, &scope)?;
        let handle = ctx.agents.obtain(&node.agent)?;
        let reply = ctx.invoke_agent(&handle, &prompt).await?;

        state.node_responses.insert(node_id.clone(), reply.content);
        state.visited.push(node_id.clone());
        state.iteration += 1;
        ctx.emit(WorkflowEvent::StepComplete {
            session_id: ctx.session_id().to_string(),
            step: node_id.clone(),
            agent: node.agent.clone(),
            tokens: u64::from(reply.usage.total_tokens),
        });

        let next = if state.iteration >= pattern.max_iterations {
            tracing::debug!(node = %node_id, iteration = state.iteration, "iteration cap reached");
            None
        } else {
            next_node(pattern, &node_id, &graph_scope(ctx, state))?
        };

        match next {
            Some(next_id) => {
                state.current_node = Some(next_id);
                ctx.checkpoint(&PatternState::Graph(state.clone())).await?;
            }
            None => {
                state.terminal_node = Some(node_id);
                ctx.checkpoint(&PatternState::Graph(state.clone())).await?;
            }
        }
    }
}

/// Resolves the outgoing edge of `from`. `None` means terminate here: no
/// edge entry, the `terminal` sentinel, or the iteration cap upstream.
fn next_node(
    pattern: &GraphPattern,
    from: &str,
    scope: &Scope,
) -> Result<Option<String>, EngineError> {
    let Some(edge) = pattern.edges.iter().find(|e| e.from == from) else {
        return Ok(None);
    };
    if let Some(to) = &edge.to {
        return Ok(if to == TERMINAL { None } else { Some(to.clone()) });
    }
    for arm in &edge.choose {
        if eval_condition(&arm.when, scope)? {
            return Ok(if arm.to == TERMINAL {
                None
            } else {
                Some(arm.to.clone())
            });
        }
    }
    Err(EngineError::Pattern(format!(
        "no choose arm matched for node {:?}",
        from
    )))
}

/// Scope for node inputs and edge conditions: `nodes.<id>.response` for every
/// executed node, `last_response`, `iteration`, `terminal_node` once set, and
/// `evaluation` when the most recent response parses as a JSON object.
fn graph_scope(ctx: &ExecCtx, state: &GraphState) -> Scope {
    let mut scope = ctx.base_scope();
    for (id, response) in &state.node_responses {
        scope.set_nested(&["nodes", id.as_str(), "response"], Value::String(response.clone()));
    }
    if let Some(last_visited) = state.visited.last() {
        if let Some(response) = state.node_responses.get(last_visited) {
            scope.set("last_response", Value::String(response.clone()));
            if let Some(parsed) = extract_json_object(response) {
                scope.set("evaluation", parsed);
            }
        }
    }
    scope.set("iteration", Value::from(state.iteration));
    if let Some(terminal) = &state.terminal_node {
        scope.set("terminal_node", Value::String(terminal.clone()));
    }
    scope
}
