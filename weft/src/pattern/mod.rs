//! Pattern executors: the seven orchestration shapes behind one dispatch.
//!
//! All executors share the [`ExecCtx`] protocol: a scope builder over
//! accumulated outputs, a checkpoint boundary after every unit of work, a
//! cancellation token derived from the workflow deadline, and a retry policy
//! around each agent invocation. Dispatch is over the tagged [`Pattern`]
//! variant; there is no executor inheritance.

pub mod chain;
pub mod dag;
pub mod evaluator;
pub mod graph;
pub mod orchestrator;
pub mod parallel;
pub mod retry;
pub mod routing;
pub mod state;

pub use retry::RetryPolicy;
pub use state::PatternState;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentCache, AgentHandle, AgentReply};
use crate::context::TokenMeter;
use crate::error::EngineError;
use crate::events::{EventBus, WorkflowEvent};
use crate::scope::Scope;
use crate::session::{InterruptRecord, Session, SessionStatus, SessionStore};
use crate::spec::{Pattern, WorkflowSpec};
use crate::trace::{RunTrace, TraceSpan};

/// In-flight invocations get this long to return naturally after the
/// deadline fires, then they are abandoned.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

/// How a pattern run ended (short of an error).
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// Terminal response of the workflow.
    Completed(String),
    /// Orderly pause at a manual gate.
    Paused(InterruptRecord),
}

/// Shared execution context handed to every executor.
pub struct ExecCtx {
    pub spec: Arc<WorkflowSpec>,
    pub agents: Arc<AgentCache>,
    pub variables: Map<String, Value>,
    pub session: Arc<Mutex<Session>>,
    pub store: Arc<dyn SessionStore>,
    pub bus: Arc<EventBus>,
    pub cancel: CancellationToken,
    pub meter: Arc<TokenMeter>,
    pub trace: Arc<Mutex<RunTrace>>,
    pub retry: RetryPolicy,
    pub max_parallel: usize,
    pub max_steps: Option<u64>,
    steps_taken: AtomicU64,
    session_id: String,
}

impl ExecCtx {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        spec: Arc<WorkflowSpec>,
        agents: Arc<AgentCache>,
        variables: Map<String, Value>,
        session: Arc<Mutex<Session>>,
        store: Arc<dyn SessionStore>,
        bus: Arc<EventBus>,
        cancel: CancellationToken,
        meter: Arc<TokenMeter>,
        trace: Arc<Mutex<RunTrace>>,
        session_id: String,
        steps_taken: u64,
    ) -> Self {
        let retry = RetryPolicy::from(&spec.runtime.failure_policy);
        let max_parallel = spec.runtime.max_parallel;
        let max_steps = spec.runtime.budgets.max_steps;
        Self {
            spec,
            agents,
            variables,
            session,
            store,
            bus,
            cancel,
            meter,
            trace,
            retry,
            max_parallel,
            max_steps,
            steps_taken: AtomicU64::new(steps_taken),
            session_id,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The read-only base scope: resolved inputs (nested and top-level) plus
    /// the render timestamp.
    pub fn base_scope(&self) -> Scope {
        let mut scope = Scope::new();
        scope.set("inputs", Value::Object(self.variables.clone()));
        for (key, value) in &self.variables {
            scope.set(key.clone(), value.clone());
        }
        scope.set("timestamp", Value::String(Utc::now().to_rfc3339()));
        scope
    }

    /// Fails once the workflow deadline has fired.
    pub fn ensure_live(&self) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::BudgetExceeded(
                "workflow duration budget".to_string(),
            ));
        }
        Ok(())
    }

    /// One agent invocation under the retry policy, the step budget, the
    /// cancellation token, and trace recording.
    pub async fn invoke_agent(
        &self,
        handle: &AgentHandle,
        prompt: &str,
    ) -> Result<AgentReply, EngineError> {
        if let Some(max_steps) = self.max_steps {
            let taken = self.steps_taken.fetch_add(1, Ordering::SeqCst) + 1;
            if taken > max_steps {
                return Err(EngineError::BudgetExceeded(format!(
                    "step budget: {} of {}",
                    taken, max_steps
                )));
            }
        }

        let mut attempt: u32 = 0;
        loop {
            self.ensure_live()?;
            let started_at = Utc::now();
            let result = self.invoke_with_grace(handle, prompt).await;
            match result {
                Ok(reply) => {
                    self.trace.lock().await.record(TraceSpan {
                        name: handle.name().to_string(),
                        kind: "agent".to_string(),
                        started_at,
                        ended_at: Utc::now(),
                        tokens: u64::from(reply.usage.total_tokens),
                    });
                    return Ok(reply);
                }
                Err(e) if e.is_retryable() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        agent = handle.name(),
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "retrying agent invocation"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Runs the cycle; after a cancel signal the in-flight call gets a short
    /// grace window to return naturally before being abandoned.
    async fn invoke_with_grace(
        &self,
        handle: &AgentHandle,
        prompt: &str,
    ) -> Result<AgentReply, EngineError> {
        let fut = handle.invoke(prompt);
        tokio::pin!(fut);
        tokio::select! {
            result = &mut fut => result,
            _ = self.cancel.cancelled() => {
                match tokio::time::timeout(CANCEL_GRACE, &mut fut).await {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::BudgetExceeded(
                        "workflow duration budget".to_string(),
                    )),
                }
            }
        }
    }

    /// Checkpoint boundary: total write of session, pattern state, and the
    /// conversation snapshots of every built agent.
    pub async fn checkpoint(&self, state: &PatternState) -> Result<(), EngineError> {
        {
            let mut session = self.session.lock().await;
            session.touch();
            session.token_usage.total = self.meter.total();
            session.token_usage.by_agent = self
                .agents
                .handles()
                .iter()
                .map(|h| (h.name().to_string(), h.tokens()))
                .collect();
            self.store.save(&session).await?;
        }
        self.store
            .save_pattern_state(&self.session_id, state)
            .await?;
        for handle in self.agents.handles() {
            let snapshot = handle.snapshot().await;
            self.store
                .save_conversation(&self.session_id, handle.name(), &snapshot)
                .await?;
        }
        tracing::debug!(session = %self.session_id, "checkpoint");
        Ok(())
    }

    /// Transitions the session to Paused with the interrupt persisted, then
    /// emits `interrupt_pending`.
    pub async fn pause(
        &self,
        record: InterruptRecord,
        state: &PatternState,
    ) -> Result<StepOutcome, EngineError> {
        {
            let mut session = self.session.lock().await;
            session.metadata.status = SessionStatus::Paused;
            session.metadata.interrupt = Some(record.clone());
        }
        self.checkpoint(state).await?;
        self.bus.emit(WorkflowEvent::InterruptPending {
            session_id: self.session_id.clone(),
            gate_id: record.gate_id.clone(),
            prompt: record.prompt.clone(),
        });
        Ok(StepOutcome::Paused(record))
    }

    pub fn emit(&self, event: WorkflowEvent) {
        self.bus.emit(event);
    }
}

/// Dispatches one run (or resume) of the spec's pattern over its state.
pub async fn run_pattern(
    ctx: &ExecCtx,
    state: &mut PatternState,
) -> Result<StepOutcome, EngineError> {
    match (&ctx.spec.pattern, state) {
        (Pattern::Chain(p), PatternState::Chain(s)) => chain::run(ctx, &p.steps, s, None).await,
        (Pattern::Routing(p), PatternState::Routing(s)) => routing::run(ctx, p, s).await,
        (Pattern::Parallel(p), PatternState::Parallel(s)) => parallel::run(ctx, p, s).await,
        (Pattern::Workflow(p), PatternState::Workflow(s)) => dag::run(ctx, p, s).await,
        (Pattern::EvaluatorOptimizer(p), PatternState::EvaluatorOptimizer(s)) => {
            evaluator::run(ctx, p, s).await
        }
        (Pattern::OrchestratorWorkers(p), PatternState::OrchestratorWorkers(s)) => {
            orchestrator::run(ctx, p, s).await
        }
        (Pattern::Graph(p), PatternState::Graph(s)) => graph::run(ctx, p, s).await,
        (pattern, state) => Err(EngineError::Session(
            crate::session::StoreError::Corrupt(format!(
                "pattern state {:?} does not match pattern {:?}",
                state_kind(state),
                pattern.kind()
            )),
        )),
    }
}

/// Fresh state for a pattern kind.
pub fn initial_state(pattern: &Pattern) -> PatternState {
    match pattern {
        Pattern::Chain(_) => PatternState::Chain(Default::default()),
        Pattern::Routing(_) => PatternState::Routing(Default::default()),
        Pattern::Parallel(_) => PatternState::Parallel(Default::default()),
        Pattern::Workflow(_) => PatternState::Workflow(Default::default()),
        Pattern::EvaluatorOptimizer(_) => PatternState::EvaluatorOptimizer(Default::default()),
        Pattern::OrchestratorWorkers(_) => PatternState::OrchestratorWorkers(Default::default()),
        Pattern::Graph(_) => PatternState::Graph(Default::default()),
    }
}

fn state_kind(state: &PatternState) -> &'static str {
    match state {
        PatternState::Chain(_) => "chain",
        PatternState::Routing(_) => "routing",
        PatternState::Parallel(_) => "parallel",
        PatternState::Workflow(_) => "workflow",
        PatternState::EvaluatorOptimizer(_) => "evaluator_optimizer",
        PatternState::OrchestratorWorkers(_) => "orchestrator_workers",
        PatternState::Graph(_) => "graph",
    }
}

/// Containment policy for concurrent units: provider/tool/pattern failures
/// mark the unit failed and let siblings continue; budget, template, and
/// store failures always unwind to the workflow root.
pub(crate) fn is_containable(error: &EngineError) -> bool {
    matches!(
        error,
        EngineError::Provider { .. }
            | EngineError::Tool(_)
            | EngineError::Routing(_)
            | EngineError::EvaluatorOutput(_)
            | EngineError::Pattern(_)
    )
}
