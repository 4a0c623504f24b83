//! Evaluator-Optimizer executor: produce → evaluate → revise until the score
//! threshold (inclusive) or the iteration cap.
//!
//! The evaluator must answer with JSON carrying a numeric `score`; anything
//! else is a non-retryable evaluator-output error. Transient producer or
//! evaluator failures are retried inside the invocation and never consume an
//! iteration. The terminal response is the last draft whether or not the
//! threshold was met.

use serde_json::Value;

use crate::error::EngineError;
use crate::events::WorkflowEvent;
use crate::pattern::routing::extract_json_object;
use crate::pattern::state::{EvaluatorState, PatternState};
use crate::pattern::{ExecCtx, StepOutcome};
use crate::scope::Scope;
use crate::spec::EvaluatorPattern;
use crate::template::render;

/// Used when the spec declares no `revise_prompt`.
const DEFAULT_REVISE_PROMPT: &str = "Revise the draft to address the evaluator feedback.\n\n\
Draft:\n{{ draft }}\n\n\
Issues:\n{{ evaluation.issues | tojson }}\n\n\
Suggested fixes:\n{{ evaluation.fixes | tojson }}";

pub async fn run(
    ctx: &ExecCtx,
    pattern: &EvaluatorPattern,
    state: &mut EvaluatorState,
) -> Result<StepOutcome, EngineError> {
    let producer = ctx.agents.obtain(&pattern.producer.agent)?;
    let evaluator = ctx.agents.obtain(&pattern.evaluator.agent)?;

    while !state.accepted && state.iteration < pattern.accept.max_iters {
        ctx.ensure_live()?;

        let scope = evaluator_scope(ctx, state);
        let producer_prompt = if state.iteration == 0 {
            render(&pattern.producer.input, &scope)?
        } else {
            render(
                pattern
                    .revise_prompt
                    .as_deref()
                    .unwrap_or(DEFAULT_REVISE_PROMPT),
                &scope,
            )?
        };
        let draft = ctx.invoke_agent(&producer, &producer_prompt).await?.content;
        state.drafts.push(draft);

        let scope = evaluator_scope(ctx, state);
        let evaluator_prompt = render(&pattern.evaluator.input, &scope)?;
        let reply = ctx.invoke_agent(&evaluator, &evaluator_prompt).await?;
        let (evaluation, score) = parse_evaluation(&reply.content)?;

        state.last_evaluation = Some(evaluation);
        state.iteration += 1;
        state.accepted = score >= pattern.accept.min_score;
        tracing::debug!(
            iteration = state.iteration,
            score,
            accepted = state.accepted,
            "evaluation round"
        );
        ctx.emit(WorkflowEvent::StepComplete {
            session_id: ctx.session_id().to_string(),
            step: format!("iteration-{}", state.iteration),
            agent: pattern.evaluator.agent.clone(),
            tokens: u64::from(reply.usage.total_tokens),
        });
        ctx.checkpoint(&PatternState::EvaluatorOptimizer(state.clone()))
            .await?;
    }

    Ok(StepOutcome::Completed(
        state.drafts.last().cloned().unwrap_or_default(),
    ))
}

/// Scope for producer and evaluator prompts: `draft` and `last_response` are
/// the latest draft; `evaluation` is the last parsed evaluator output;
/// `iteration` counts completed produce→evaluate cycles.
fn evaluator_scope(ctx: &ExecCtx, state: &EvaluatorState) -> Scope {
    let mut scope = ctx.base_scope();
    if let Some(draft) = state.drafts.last() {
        scope.set("draft", Value::String(draft.clone()));
        scope.set("last_response", Value::String(draft.clone()));
    }
    if let Some(evaluation) = &state.last_evaluation {
        scope.set("evaluation", evaluation.clone());
    }
    scope.set("iteration", Value::from(state.iteration));
    scope
}

/// Parses the evaluator reply: a JSON object with a numeric `score`.
fn parse_evaluation(content: &str) -> Result<(Value, f64), EngineError> {
    let value = extract_json_object(content).ok_or_else(|| {
        EngineError::EvaluatorOutput(format!("evaluator reply is not JSON: {:?}", content))
    })?;
    let score = value
        .get("score")
        .and_then(Value::as_f64)
        .ok_or_else(|| {
            EngineError::EvaluatorOutput(format!(
                "evaluator reply has no numeric `score`: {}",
                value
            ))
        })?;
    Ok((value, score))
}
