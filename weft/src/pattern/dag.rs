//! Workflow (DAG) executor: ready-set scheduling over task dependencies.
//!
//! A task is ready when every dependency completed. Failures mark the task
//! failed and skip its descendants transitively while other branches
//! continue (the default policy); the workflow fails only when no task
//! completed at all. Cycle detection happened at the capability gate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;

use crate::error::EngineError;
use crate::events::WorkflowEvent;
use crate::pattern::state::{DagState, PatternState, TaskRecord, TaskStatus};
use crate::pattern::{is_containable, ExecCtx, StepOutcome};
use crate::scope::Scope;
use crate::spec::{DagPattern, TaskFailureMode, TaskSpec};
use crate::template::{eval_condition, render};

pub async fn run(
    ctx: &ExecCtx,
    pattern: &DagPattern,
    state: &mut DagState,
) -> Result<StepOutcome, EngineError> {
    let by_id: HashMap<&str, &TaskSpec> =
        pattern.tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let shared = Arc::new(Mutex::new(state.clone()));

    loop {
        ctx.ensure_live()?;
        propagate_skips(ctx, pattern, &shared).await?;

        let ready = ready_tasks(pattern, &shared);
        if ready.is_empty() {
            break;
        }

        // Conditions are evaluated once the task is ready, with dependency
        // outputs visible in scope.
        let mut batch = Vec::new();
        for id in ready {
            let task = by_id[id.as_str()];
            if let Some(condition) = &task.condition {
                let scope = task_scope(ctx, &shared);
                if !eval_condition(condition, &scope)? {
                    record_terminal(
                        ctx,
                        &shared,
                        &task.id,
                        TaskRecord {
                            status: TaskStatus::Skipped,
                            response: None,
                            error: Some("condition was false".to_string()),
                            started_at: Utc::now(),
                            finished_at: Utc::now(),
                            tokens: 0,
                        },
                    )
                    .await?;
                    continue;
                }
            }
            batch.push(task);
            if batch.len() == ctx.max_parallel {
                break;
            }
        }
        if batch.is_empty() {
            continue;
        }

        let futures: Vec<_> = batch
            .iter()
            .map(|task| {
                let shared = shared.clone();
                async move {
                    let scope = task_scope(ctx, &shared);
                    let prompt = render(&task.input, &scope)?;
                    let handle = ctx.agents.obtain(&task.agent)?;
                    let started_at = Utc::now();
                    match ctx.invoke_agent(&handle, &prompt).await {
                        Ok(reply) => {
                            record_terminal(
                                ctx,
                                &shared,
                                &task.id,
                                TaskRecord {
                                    status: TaskStatus::Completed,
                                    response: Some(reply.content),
                                    error: None,
                                    started_at,
                                    finished_at: Utc::now(),
                                    tokens: u64::from(reply.usage.total_tokens),
                                },
                            )
                            .await
                        }
                        Err(e) if is_containable(&e) => {
                            tracing::warn!(task = %task.id, error = %e, "task failed");
                            record_terminal(
                                ctx,
                                &shared,
                                &task.id,
                                TaskRecord {
                                    status: TaskStatus::Failed,
                                    response: None,
                                    error: Some(e.to_string()),
                                    started_at,
                                    finished_at: Utc::now(),
                                    tokens: 0,
                                },
                            )
                            .await?;
                            if pattern.on_task_failure == TaskFailureMode::FailWorkflow {
                                return Err(EngineError::Pattern(format!(
                                    "task {:?} failed: {}",
                                    task.id, e
                                )));
                            }
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                }
            })
            .collect();

        for result in futures_util::future::join_all(futures).await {
            result?;
        }
    }

    *state = shared.lock().expect("dag state lock").clone();

    let mut completed: Vec<(&String, &TaskRecord)> = state
        .records
        .iter()
        .filter(|(_, r)| r.status == TaskStatus::Completed)
        .collect();
    if completed.is_empty() {
        return Err(EngineError::Pattern("no workflow task completed".to_string()));
    }
    completed.sort_by_key(|(_, r)| r.finished_at);
    Ok(StepOutcome::Completed(
        completed
            .last()
            .and_then(|(_, r)| r.response.clone())
            .unwrap_or_default(),
    ))
}

/// Marks every unrecorded task with a failed or skipped dependency as
/// skipped, to the transitive closure.
async fn propagate_skips(
    ctx: &ExecCtx,
    pattern: &DagPattern,
    shared: &Arc<Mutex<DagState>>,
) -> Result<(), EngineError> {
    loop {
        let to_skip: Vec<String> = {
            let s = shared.lock().expect("dag state lock");
            pattern
                .tasks
                .iter()
                .filter(|t| !s.records.contains_key(&t.id))
                .filter(|t| {
                    t.deps.iter().any(|dep| {
                        matches!(
                            s.records.get(dep).map(|r| r.status),
                            Some(TaskStatus::Failed) | Some(TaskStatus::Skipped)
                        )
                    })
                })
                .map(|t| t.id.clone())
                .collect()
        };
        if to_skip.is_empty() {
            return Ok(());
        }
        for id in to_skip {
            record_terminal(
                ctx,
                shared,
                &id,
                TaskRecord {
                    status: TaskStatus::Skipped,
                    response: None,
                    error: Some("dependency failed or skipped".to_string()),
                    started_at: Utc::now(),
                    finished_at: Utc::now(),
                    tokens: 0,
                },
            )
            .await?;
        }
    }
}

/// Tasks with no record whose dependencies all completed.
fn ready_tasks(pattern: &DagPattern, shared: &Arc<Mutex<DagState>>) -> Vec<String> {
    let s = shared.lock().expect("dag state lock");
    pattern
        .tasks
        .iter()
        .filter(|t| !s.records.contains_key(&t.id))
        .filter(|t| {
            t.deps.iter().all(|dep| {
                matches!(
                    s.records.get(dep).map(|r| r.status),
                    Some(TaskStatus::Completed)
                )
            })
        })
        .map(|t| t.id.clone())
        .collect()
}

/// Records a terminal task state, checkpoints, and emits `task_complete`.
async fn record_terminal(
    ctx: &ExecCtx,
    shared: &Arc<Mutex<DagState>>,
    task_id: &str,
    record: TaskRecord,
) -> Result<(), EngineError> {
    let status = record.status;
    let snapshot = {
        let mut s = shared.lock().expect("dag state lock");
        s.records.insert(task_id.to_string(), record);
        s.clone()
    };
    ctx.emit(WorkflowEvent::TaskComplete {
        session_id: ctx.session_id().to_string(),
        task: task_id.to_string(),
        status: match status {
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
        .to_string(),
    });
    ctx.checkpoint(&PatternState::Workflow(snapshot)).await
}

/// Scope exposed to task inputs: base plus `tasks.<id>.response` for every
/// completed task.
fn task_scope(ctx: &ExecCtx, shared: &Arc<Mutex<DagState>>) -> Scope {
    let mut scope = ctx.base_scope();
    let s = shared.lock().expect("dag state lock");
    for (id, record) in &s.records {
        if record.status == TaskStatus::Completed {
            scope.set_nested(
                &["tasks", id.as_str(), "response"],
                Value::String(record.response.clone().unwrap_or_default()),
            );
        }
    }
    scope
}
