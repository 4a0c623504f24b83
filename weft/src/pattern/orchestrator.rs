//! Orchestrator-Workers executor: a planning agent fans work out to workers
//! built from a template, over bounded rounds.
//!
//! Each round the orchestrator answers with a JSON list of worker tasks
//! (id, description, optional tool overrides), capped at `max_workers`.
//! Workers run concurrently under `max_parallel`; their outputs feed the
//! next round's scope. An empty list or the `DONE` token ends the rounds;
//! optional reduce and writeup steps then run in sequence.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::EngineError;
use crate::events::WorkflowEvent;
use crate::pattern::state::{OrchestratorState, PatternState, RoundRecord, WorkerRecord};
use crate::pattern::{ExecCtx, StepOutcome};
use crate::scope::Scope;
use crate::spec::{AgentStep, OrchestratorPattern};
use crate::template::render;

/// Terminal token an orchestrator may answer instead of an empty list.
const DONE_TOKEN: &str = "DONE";

#[derive(Debug, Clone, serde::Deserialize)]
struct WorkerTask {
    id: String,
    description: String,
    #[serde(default)]
    tools: Option<Vec<String>>,
}

pub async fn run(
    ctx: &ExecCtx,
    pattern: &OrchestratorPattern,
    state: &mut OrchestratorState,
) -> Result<StepOutcome, EngineError> {
    let orchestrator = ctx.agents.obtain(&pattern.orchestrator.agent)?;

    while state.round < pattern.orchestrator.max_rounds {
        ctx.ensure_live()?;

        // A partial round survives a crash: its plan is re-parsed and only
        // the missing workers are dispatched.
        let plan = if state.rounds.len() > state.round {
            state.rounds[state.round].plan.clone()
        } else {
            let scope = orchestrator_scope(ctx, state);
            let prompt = render(&pattern.orchestrator.input, &scope)?;
            let reply = ctx.invoke_agent(&orchestrator, &prompt).await?;
            let plan = reply.content;
            if is_terminal_plan(&plan) {
                break;
            }
            state.rounds.push(RoundRecord {
                plan: plan.clone(),
                workers: Default::default(),
            });
            ctx.checkpoint(&PatternState::OrchestratorWorkers(state.clone()))
                .await?;
            plan
        };

        let mut tasks = parse_worker_tasks(&plan)?;
        if tasks.is_empty() {
            // Terminal answer persisted as a round; drop it and stop.
            state.rounds.truncate(state.round);
            break;
        }
        if tasks.len() > pattern.orchestrator.max_workers {
            tracing::warn!(
                requested = tasks.len(),
                cap = pattern.orchestrator.max_workers,
                "worker plan truncated"
            );
            tasks.truncate(pattern.orchestrator.max_workers);
        }

        let round_index = state.round;
        let shared = Arc::new(Mutex::new(state.clone()));
        let semaphore = Arc::new(tokio::sync::Semaphore::new(ctx.max_parallel));
        let pending: Vec<WorkerTask> = tasks
            .into_iter()
            .filter(|t| !state.rounds[round_index].workers.contains_key(&t.id))
            .collect();

        let futures: Vec<_> = pending
            .into_iter()
            .map(|task| {
                let shared = shared.clone();
                let semaphore = semaphore.clone();
                async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .map_err(|_| EngineError::Unexpected("semaphore closed".to_string()))?;
                    let alias = format!("{}/{}", pattern.worker_template.agent, task.id);
                    let tools = task
                        .tools
                        .clone()
                        .unwrap_or_else(|| pattern.worker_template.tools.clone());
                    let worker = ctx.agents.obtain_with(
                        &pattern.worker_template.agent,
                        Some(&alias),
                        Some(&tools),
                    )?;
                    let reply = ctx.invoke_agent(&worker, &task.description).await?;

                    let snapshot = {
                        let mut s = shared.lock().expect("orchestrator state lock");
                        s.rounds[round_index].workers.insert(
                            task.id.clone(),
                            WorkerRecord {
                                description: task.description.clone(),
                                response: reply.content,
                                tokens: u64::from(reply.usage.total_tokens),
                            },
                        );
                        s.clone()
                    };
                    ctx.emit(WorkflowEvent::TaskComplete {
                        session_id: ctx.session_id().to_string(),
                        task: task.id.clone(),
                        status: "completed".to_string(),
                    });
                    ctx.checkpoint(&PatternState::OrchestratorWorkers(snapshot))
                        .await
                }
            })
            .collect();

        for result in futures_util::future::join_all(futures).await {
            result?;
        }

        *state = shared.lock().expect("orchestrator state lock").clone();
        state.round += 1;
        ctx.checkpoint(&PatternState::OrchestratorWorkers(state.clone()))
            .await?;
    }

    if let Some(reduce) = &pattern.reduce {
        if state.reduce_response.is_none() {
            let response = run_closing_step(ctx, state, reduce).await?;
            state.reduce_response = Some(response);
            ctx.checkpoint(&PatternState::OrchestratorWorkers(state.clone()))
                .await?;
        }
    }
    if let Some(writeup) = &pattern.writeup {
        if state.writeup_response.is_none() {
            let response = run_closing_step(ctx, state, writeup).await?;
            state.writeup_response = Some(response);
            ctx.checkpoint(&PatternState::OrchestratorWorkers(state.clone()))
                .await?;
        }
    }

    let terminal = state
        .writeup_response
        .clone()
        .or_else(|| state.reduce_response.clone())
        .or_else(|| {
            state.rounds.last().map(|round| {
                round
                    .workers
                    .values()
                    .map(|w| w.response.clone())
                    .collect::<Vec<_>>()
                    .join("\n\n")
            })
        })
        .unwrap_or_default();
    Ok(StepOutcome::Completed(terminal))
}

async fn run_closing_step(
    ctx: &ExecCtx,
    state: &OrchestratorState,
    step: &AgentStep,
) -> Result<String, EngineError> {
    let scope = orchestrator_scope(ctx, state);
    let prompt = render(&step.input, &scope)?;
    let handle = ctx.agents.obtain(&step.agent)?;
    Ok(ctx.invoke_agent(&handle, &prompt).await?.content)
}

fn is_terminal_plan(plan: &str) -> bool {
    plan.trim() == DONE_TOKEN
}

/// Parses the orchestrator's JSON task list, tolerating prose around the
/// array. A bare `[]` or `DONE` means no further work.
fn parse_worker_tasks(plan: &str) -> Result<Vec<WorkerTask>, EngineError> {
    let trimmed = plan.trim();
    if is_terminal_plan(trimmed) {
        return Ok(Vec::new());
    }
    let candidate = if trimmed.starts_with('[') {
        trimmed.to_string()
    } else {
        let start = trimmed.find('[').ok_or_else(|| {
            EngineError::Pattern(format!("orchestrator plan is not a JSON list: {:?}", plan))
        })?;
        let end = trimmed.rfind(']').ok_or_else(|| {
            EngineError::Pattern(format!("orchestrator plan is not a JSON list: {:?}", plan))
        })?;
        trimmed[start..=end].to_string()
    };
    serde_json::from_str::<Vec<WorkerTask>>(&candidate)
        .map_err(|e| EngineError::Pattern(format!("orchestrator plan does not parse: {}", e)))
}

/// Scope for orchestrator and closing prompts:
/// `rounds.<k>.workers.<id>.response` for every collected output, plus
/// `round`.
fn orchestrator_scope(ctx: &ExecCtx, state: &OrchestratorState) -> Scope {
    let mut scope = ctx.base_scope();
    for (k, round) in state.rounds.iter().enumerate() {
        for (id, worker) in &round.workers {
            scope.set_nested(
                &["rounds", &k.to_string(), "workers", id.as_str(), "response"],
                Value::String(worker.response.clone()),
            );
        }
    }
    scope.set("round", Value::from(state.round));
    scope
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: plans parse from clean arrays and prose-wrapped arrays.
    #[test]
    fn parse_plans() {
        let tasks =
            parse_worker_tasks(r#"[{"id": "t1", "description": "look into caching"}]"#).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "t1");
        assert!(tasks[0].tools.is_none());

        let tasks = parse_worker_tasks(
            "Plan: [{\"id\": \"a\", \"description\": \"d\", \"tools\": [\"grep\"]}] done",
        )
        .unwrap();
        assert_eq!(tasks[0].tools.as_deref(), Some(&["grep".to_string()][..]));
    }

    /// **Scenario**: DONE and [] mean no further work; prose alone fails.
    #[test]
    fn terminal_and_invalid_plans() {
        assert!(parse_worker_tasks("DONE").unwrap().is_empty());
        assert!(parse_worker_tasks("[]").unwrap().is_empty());
        assert!(matches!(
            parse_worker_tasks("I think we are finished here"),
            Err(EngineError::Pattern(_))
        ));
    }
}
