//! Chain executor: ordered steps, manual gates, resume-aware.
//!
//! Also the sub-executor for routing branches and parallel branches, which
//! pass a `persist` closure so mid-branch checkpoints carry their own
//! pattern-state variant.

use chrono::{Duration, Utc};
use serde_json::{json, Value};

use crate::error::EngineError;
use crate::pattern::state::{ChainState, PatternState, StepRecord};
use crate::pattern::{ExecCtx, StepOutcome};
use crate::scope::Scope;
use crate::session::{InterruptKind, InterruptRecord, ResumeDecision};
use crate::spec::{ManualGateStep, Step};
use crate::template::render;
use crate::events::WorkflowEvent;

/// Persist adapter: wraps a chain state into the checkpointed variant.
pub type Persist<'a> = &'a (dyn Fn(&ChainState) -> PatternState + Send + Sync);

/// Runs (or resumes) a step list. Steps before `current_step_index` are
/// skipped and their recorded responses stay visible in scope.
pub async fn run(
    ctx: &ExecCtx,
    steps: &[Step],
    state: &mut ChainState,
    persist: Option<Persist<'_>>,
) -> Result<StepOutcome, EngineError> {
    let snapshot = |s: &ChainState| match persist {
        Some(f) => f(s),
        None => PatternState::Chain(s.clone()),
    };

    while state.current_step_index < steps.len() {
        ctx.ensure_live()?;
        let index = state.current_step_index;
        match &steps[index] {
            Step::ManualGate(gate) => {
                match state.hitl.take() {
                    Some(binding) if binding.gate_id == gate.id => {
                        consume_decision(ctx, state, binding.decision, &snapshot).await?;
                    }
                    other => {
                        state.hitl = other;
                        let record = interrupt_for(gate, state, ctx)?;
                        return ctx.pause(record, &snapshot(state)).await;
                    }
                }
            }
            Step::Agent(step) => {
                let scope = chain_scope(ctx, state);
                let prompt = render(&step.input, &scope)?;
                let handle = ctx.agents.obtain(&step.agent)?;
                let reply = ctx.invoke_agent(&handle, &prompt).await?;

                state.step_history.push(StepRecord {
                    agent_id: step.agent.clone(),
                    input: prompt,
                    response: reply.content.clone(),
                    tokens: u64::from(reply.usage.total_tokens),
                });
                state.current_step_index += 1;
                ctx.emit(WorkflowEvent::StepComplete {
                    session_id: ctx.session_id().to_string(),
                    step: index.to_string(),
                    agent: step.agent.clone(),
                    tokens: u64::from(reply.usage.total_tokens),
                });
                ctx.checkpoint(&snapshot(state)).await?;
            }
        }
    }

    Ok(StepOutcome::Completed(
        state
            .step_history
            .last()
            .map(|r| r.response.clone())
            .unwrap_or_default(),
    ))
}

/// Applies a resume decision at the gate. Approve advances; modify discards
/// the previous step's record and re-executes it with the feedback in scope.
/// Reject never reaches the executor; the engine finalizes it directly.
async fn consume_decision(
    ctx: &ExecCtx,
    state: &mut ChainState,
    decision: ResumeDecision,
    snapshot: &dyn Fn(&ChainState) -> PatternState,
) -> Result<(), EngineError> {
    match decision {
        ResumeDecision::Approve => {
            state.gate_response = Some("approve".to_string());
            state.current_step_index += 1;
        }
        ResumeDecision::Modify { feedback } => {
            state.gate_response = Some("modify".to_string());
            state.gate_feedback = Some(feedback);
            if state.current_step_index > 0 {
                state.current_step_index -= 1;
                state.step_history.pop();
            }
        }
        ResumeDecision::Reject { .. } => {
            return Err(EngineError::Unexpected(
                "reject decision reached the executor".to_string(),
            ));
        }
    }
    ctx.checkpoint(&snapshot(state)).await
}

fn interrupt_for(
    gate: &ManualGateStep,
    state: &ChainState,
    ctx: &ExecCtx,
) -> Result<InterruptRecord, EngineError> {
    let prompt = render(&gate.prompt, &chain_scope(ctx, state))?;
    let created_at = Utc::now();
    Ok(InterruptRecord {
        kind: InterruptKind::ManualGate,
        gate_id: gate.id.clone(),
        prompt,
        created_at,
        timeout_at: gate
            .timeout_s
            .map(|s| created_at + Duration::seconds(s as i64)),
        response: None,
    })
}

/// Scope exposed to chain steps: base + `steps` history + `last_response` +
/// `hitl` bindings.
pub fn chain_scope(ctx: &ExecCtx, state: &ChainState) -> Scope {
    let mut scope = ctx.base_scope();
    let steps: Vec<Value> = state
        .step_history
        .iter()
        .map(|r| {
            json!({
                "agent": r.agent_id,
                "input": r.input,
                "response": r.response,
                "tokens": r.tokens,
            })
        })
        .collect();
    scope.set("steps", Value::Array(steps));
    if let Some(last) = state.step_history.last() {
        scope.set("last_response", Value::String(last.response.clone()));
    }
    if let Some(response) = &state.gate_response {
        scope.set_nested(&["hitl", "response"], Value::String(response.clone()));
    }
    if let Some(feedback) = &state.gate_feedback {
        scope.set_nested(&["hitl", "feedback"], Value::String(feedback.clone()));
    }
    scope
}
