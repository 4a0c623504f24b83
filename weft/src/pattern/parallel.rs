//! Parallel executor: concurrent branches bounded by `max_parallel`, then an
//! optional reduce over the completed set.
//!
//! Branch completion order is nondeterministic; outputs are only ever
//! addressed by branch id. A branch that fails after retries is marked
//! failed and excluded from reduce; the workflow proceeds while at least one
//! branch completes.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::EngineError;
use crate::events::WorkflowEvent;
use crate::pattern::state::{BranchState, BranchStatus, ChainState, ParallelState, PatternState};
use crate::pattern::{chain, is_containable, ExecCtx, StepOutcome};
use crate::spec::ParallelPattern;
use crate::template::render;

pub async fn run(
    ctx: &ExecCtx,
    pattern: &ParallelPattern,
    state: &mut ParallelState,
) -> Result<StepOutcome, EngineError> {
    let shared = Arc::new(Mutex::new(state.clone()));
    {
        let mut s = shared.lock().expect("parallel state lock");
        for branch in &pattern.branches {
            s.branches.entry(branch.id.clone()).or_insert(BranchState {
                status: BranchStatus::Pending,
                chain: ChainState::default(),
                response: None,
                error: None,
            });
        }
    }
    let seeded = shared.lock().expect("parallel state lock").clone();
    ctx.checkpoint(&PatternState::Parallel(seeded)).await?;

    let semaphore = Arc::new(tokio::sync::Semaphore::new(ctx.max_parallel));
    let branch_runs = pattern.branches.iter().filter(|branch| {
        let s = shared.lock().expect("parallel state lock");
        !matches!(
            s.branches.get(&branch.id).map(|b| b.status),
            Some(BranchStatus::Completed) | Some(BranchStatus::Failed)
        )
    });

    let futures: Vec<_> = branch_runs
        .map(|branch| {
            let shared = shared.clone();
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| EngineError::Unexpected("semaphore closed".to_string()))?;

                let mut chain_state = {
                    let mut s = shared.lock().expect("parallel state lock");
                    let entry = s
                        .branches
                        .get_mut(&branch.id)
                        .expect("branch entry seeded above");
                    entry.status = BranchStatus::Running;
                    entry.chain.clone()
                };

                let branch_id = branch.id.clone();
                let persist_shared = shared.clone();
                let persist = move |cs: &ChainState| {
                    let mut s = persist_shared.lock().expect("parallel state lock");
                    if let Some(entry) = s.branches.get_mut(&branch_id) {
                        entry.chain = cs.clone();
                    }
                    PatternState::Parallel(s.clone())
                };

                let result = chain::run(ctx, &branch.steps, &mut chain_state, Some(&persist)).await;
                let (status, outcome) = match result {
                    Ok(StepOutcome::Completed(response)) => {
                        let mut s = shared.lock().expect("parallel state lock");
                        let entry = s.branches.get_mut(&branch.id).expect("branch entry");
                        entry.status = BranchStatus::Completed;
                        entry.response = Some(response);
                        entry.chain = chain_state;
                        ("completed", Ok(()))
                    }
                    Ok(StepOutcome::Paused(_)) => {
                        return Err(EngineError::Unexpected(
                            "manual gate inside a parallel branch".to_string(),
                        ))
                    }
                    Err(e) if is_containable(&e) => {
                        tracing::warn!(branch = %branch.id, error = %e, "branch failed");
                        let mut s = shared.lock().expect("parallel state lock");
                        let entry = s.branches.get_mut(&branch.id).expect("branch entry");
                        entry.status = BranchStatus::Failed;
                        entry.error = Some(e.to_string());
                        ("failed", Ok(()))
                    }
                    Err(e) => return Err(e),
                };

                ctx.emit(WorkflowEvent::BranchComplete {
                    session_id: ctx.session_id().to_string(),
                    branch: branch.id.clone(),
                    status: status.to_string(),
                });
                let snapshot = shared.lock().expect("parallel state lock").clone();
                ctx.checkpoint(&PatternState::Parallel(snapshot)).await?;
                outcome
            }
        })
        .collect();

    let results = futures_util::future::join_all(futures).await;
    for result in results {
        result?;
    }

    *state = shared.lock().expect("parallel state lock").clone();

    let completed: Vec<(&String, &BranchState)> = state
        .branches
        .iter()
        .filter(|(_, b)| b.status == BranchStatus::Completed)
        .collect();
    if completed.is_empty() {
        return Err(EngineError::Pattern(
            "all parallel branches failed".to_string(),
        ));
    }

    if let Some(reduce) = &pattern.reduce {
        if state.reduce_response.is_none() {
            let mut scope = ctx.base_scope();
            for (id, branch) in &completed {
                scope.set_nested(
                    &["branches", id.as_str(), "response"],
                    Value::String(branch.response.clone().unwrap_or_default()),
                );
            }
            let prompt = render(&reduce.input, &scope)?;
            let handle = ctx.agents.obtain(&reduce.agent)?;
            let reply = ctx.invoke_agent(&handle, &prompt).await?;
            state.reduce_response = Some(reply.content);
            ctx.checkpoint(&PatternState::Parallel(state.clone())).await?;
        }
        return Ok(StepOutcome::Completed(
            state.reduce_response.clone().unwrap_or_default(),
        ));
    }

    let joined = completed
        .iter()
        .map(|(_, b)| b.response.clone().unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\n\n");
    Ok(StepOutcome::Completed(joined))
}
