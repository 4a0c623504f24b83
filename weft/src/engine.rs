//! Engine wiring: registries per instance, frozen environment, run and
//! resume entry points.
//!
//! No global state: every run builds its own tool registry, client pool,
//! agent cache, token meter, and trace. The environment is captured once at
//! engine construction. The workflow deadline is a cancellation token armed
//! by a watchdog task; executors check it at every cycle boundary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use env_config::EnvOverrides;

use crate::agent::runtime::resolve;
use crate::agent::AgentCache;
use crate::artifacts::ArtifactWriter;
use crate::context::{BudgetEnforcer, Compactor, CycleHooks, NotesLedger, TokenMeter};
use crate::error::EngineError;
use crate::events::{EventBus, EventSubscriber, WorkflowEvent};
use crate::llm::{ClientPool, ModelFactory};
use crate::pattern::state::{ChainState, PatternState};
use crate::pattern::{initial_state, run_pattern, ExecCtx, StepOutcome};
use crate::scope::Scope;
use crate::session::{
    FileSessionStore, InterruptRecord, ResumeDecision, Session, SessionStatus, SessionStore,
};
use crate::spec::capability::{self, CapabilityReport};
use crate::spec::{canonical, load, WorkflowSpec};
use crate::tools::{SecurityPolicy, ToolContext, ToolRegistry};
use crate::trace::RunTrace;

/// How a run (or resume) ended, short of an error.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed {
        session_id: String,
        last_response: String,
        artifacts: Vec<PathBuf>,
    },
    /// Orderly HITL pause; maps to the success-adjacent exit code.
    Paused {
        session_id: String,
        interrupt: InterruptRecord,
    },
}

pub struct EngineBuilder {
    model_factory: Option<Arc<dyn ModelFactory>>,
    store: Option<Arc<dyn SessionStore>>,
    session_root: PathBuf,
    output_dir: PathBuf,
    subscribers: Vec<Arc<dyn EventSubscriber>>,
    interactive: bool,
    force_artifacts: bool,
    env: Option<EnvOverrides>,
}

impl EngineBuilder {
    pub fn model_factory(mut self, factory: Arc<dyn ModelFactory>) -> Self {
        self.model_factory = Some(factory);
        self
    }

    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn session_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.session_root = root.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn subscribe(mut self, subscriber: Arc<dyn EventSubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn force_artifacts(mut self, force: bool) -> Self {
        self.force_artifacts = force;
        self
    }

    /// Overrides the captured environment (tests).
    pub fn env(mut self, env: EnvOverrides) -> Self {
        self.env = Some(env);
        self
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        let factory = self.model_factory.ok_or_else(|| {
            EngineError::Usage("engine needs a model factory (provider transports are embedder-supplied)".to_string())
        })?;
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(FileSessionStore::new(self.session_root.clone())),
        };
        let bus = Arc::new(EventBus::new());
        for subscriber in self.subscribers {
            bus.subscribe(subscriber);
        }
        Ok(Engine {
            factory,
            store,
            bus,
            env: self.env.unwrap_or_else(EnvOverrides::capture),
            session_root: self.session_root,
            output_dir: self.output_dir,
            interactive: self.interactive,
            force_artifacts: self.force_artifacts,
        })
    }
}

pub struct Engine {
    factory: Arc<dyn ModelFactory>,
    store: Arc<dyn SessionStore>,
    bus: Arc<EventBus>,
    env: EnvOverrides,
    session_root: PathBuf,
    output_dir: PathBuf,
    interactive: bool,
    force_artifacts: bool,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder {
            model_factory: None,
            store: None,
            session_root: PathBuf::from(".weft"),
            output_dir: PathBuf::from("artifacts"),
            subscribers: Vec::new(),
            interactive: false,
            force_artifacts: false,
            env: None,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Capability gate over a parsed spec, against this engine's builtin
    /// tool set. Empty violations means runnable.
    pub fn validate(&self, spec: &WorkflowSpec) -> CapabilityReport {
        let registry = ToolRegistry::with_builtins();
        capability::check(spec, &registry.names())
    }

    /// Runs a workflow to completion or to a pause point.
    ///
    /// `snapshot` is the verbatim document bytes persisted beside the
    /// session for resume.
    pub async fn run(
        &self,
        spec: WorkflowSpec,
        snapshot: Vec<u8>,
        input_overrides: &[(String, String)],
    ) -> Result<RunOutcome, EngineError> {
        let report = self.validate(&spec);
        for warning in &report.warnings {
            tracing::warn!(pointer = %warning.pointer, "capability warning: {}", warning.message);
        }
        if report.is_fatal() {
            return Err(EngineError::Unsupported(report));
        }

        let variables = load::resolve_inputs(&spec, input_overrides)?;
        let spec_hash = canonical::spec_hash(&spec)?;
        let session = Session::new(
            spec.name.clone(),
            spec.pattern.kind(),
            spec_hash,
            variables.clone().into_iter().collect(),
        );
        let session_id = session.session_id.clone();
        self.store.create(&session, &snapshot).await?;

        let spec = Arc::new(spec);
        let state = initial_state(&spec.pattern);
        self.bus.emit(WorkflowEvent::WorkflowStart {
            session_id: session_id.clone(),
            workflow: spec.name.clone(),
            pattern: spec.pattern.kind().to_string(),
        });

        let meter = Arc::new(TokenMeter::new());
        self.drive(spec, session, state, meter, 0).await
    }

    /// Resumes a paused session with a user decision, or returns the stored
    /// result of a completed one without mutating it.
    pub async fn resume(
        &self,
        session_id: &str,
        decision: ResumeDecision,
    ) -> Result<RunOutcome, EngineError> {
        let mut session = self.store.load(session_id).await?;
        match session.metadata.status {
            SessionStatus::Completed => {
                return Ok(RunOutcome::Completed {
                    session_id: session.session_id.clone(),
                    last_response: session.last_response.clone().unwrap_or_default(),
                    artifacts: session.artifacts_written.iter().map(PathBuf::from).collect(),
                })
            }
            SessionStatus::Failed => {
                return Err(EngineError::Usage(format!(
                    "session {} is failed and cannot be resumed",
                    session_id
                )))
            }
            SessionStatus::Running => {
                return Err(EngineError::Usage(format!(
                    "session {} is running, not paused",
                    session_id
                )))
            }
            SessionStatus::Paused => {}
        }

        let mut interrupt = session.metadata.interrupt.clone().ok_or_else(|| {
            EngineError::Session(crate::session::StoreError::Corrupt(
                "paused session has no interrupt record".to_string(),
            ))
        })?;

        if let Some(timeout_at) = interrupt.timeout_at {
            if chrono::Utc::now() > timeout_at {
                let reason = format!("manual gate {:?} timed out", interrupt.gate_id);
                self.finalize_session(&mut session, &reason).await?;
                return Err(EngineError::Pattern(reason));
            }
        }

        interrupt.response = Some(decision.clone());
        session.metadata.interrupt = Some(interrupt.clone());

        if let ResumeDecision::Reject { feedback } = &decision {
            let reason = match feedback {
                Some(feedback) => {
                    format!("rejected at gate {:?}: {}", interrupt.gate_id, feedback)
                }
                None => format!("rejected at gate {:?}", interrupt.gate_id),
            };
            self.finalize_session(&mut session, &reason).await?;
            return Err(EngineError::Pattern(reason));
        }

        let snapshot = self.store.load_spec_snapshot(session_id).await?;
        let doc = String::from_utf8_lossy(&snapshot).into_owned();
        let spec = load::from_str(&doc)?;
        let stored_hash = canonical::spec_hash(&spec)?;
        if stored_hash != session.spec_hash {
            tracing::warn!(
                session = session_id,
                "spec hash mismatch on resume; continuing with the snapshot"
            );
        }

        let mut state = self.store.load_pattern_state(session_id).await?;
        bind_decision(&mut state, &interrupt.gate_id, decision)?;

        session.metadata.status = SessionStatus::Running;
        self.store.save(&session).await?;

        let meter_seed = session.token_usage.total;
        let spec = Arc::new(spec);
        let meter = Arc::new(TokenMeter::seed(meter_seed));
        self.drive(spec, session, state, meter, 0).await
    }

    /// Shared run/resume core: builds the per-run world, drives the pattern,
    /// finalizes the session.
    async fn drive(
        &self,
        spec: Arc<WorkflowSpec>,
        session: Session,
        mut state: PatternState,
        meter: Arc<TokenMeter>,
        steps_taken: u64,
    ) -> Result<RunOutcome, EngineError> {
        let session_id = session.session_id.clone();
        let registry = Arc::new(ToolRegistry::with_builtins());
        let security = SecurityPolicy::from_spec(&spec.security, self.env.bypass_tool_consent);
        let tool_ctx = ToolContext {
            artifacts_dir: self.output_dir.clone(),
            security,
            interactive: self.interactive,
        };
        let pool = Arc::new(ClientPool::new(self.factory.clone()));
        let hooks = self.build_hooks(&spec, &pool, &meter, &session_id)?;
        let cache = Arc::new(AgentCache::new(
            spec.clone(),
            self.env.clone(),
            pool,
            registry,
            tool_ctx,
            hooks,
            meter.clone(),
        ));

        // Restore persisted conversations for declared agents (resume path;
        // a fresh session has none).
        for agent_id in spec.agents.keys() {
            if let Some(messages) = self.store.load_conversation(&session_id, agent_id).await? {
                cache.obtain(agent_id)?.restore(messages).await;
            }
        }

        let cancel = CancellationToken::new();
        let watchdog = spec.runtime.budgets.max_duration_s.map(|secs| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                cancel.cancel();
            })
        });

        let session = Arc::new(Mutex::new(session));
        let ctx = ExecCtx::new(
            spec.clone(),
            cache,
            session.lock().await.variables.clone(),
            session.clone(),
            self.store.clone(),
            self.bus.clone(),
            cancel,
            meter.clone(),
            Arc::new(Mutex::new(RunTrace::new())),
            session_id.clone(),
            steps_taken,
        );

        let result = self.drive_inner(&ctx, &spec, &mut state).await;
        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                {
                    let mut session = ctx.session.lock().await;
                    session.metadata.status = SessionStatus::Failed;
                    session.metadata.failure_reason = Some(e.to_string());
                }
                // Best-effort finalize; the original error wins.
                if let Err(save_error) = ctx.checkpoint(&state).await {
                    tracing::error!(error = %save_error, "failed to persist failure state");
                }
                self.bus.emit(WorkflowEvent::WorkflowError {
                    session_id: session_id.clone(),
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn drive_inner(
        &self,
        ctx: &ExecCtx,
        spec: &WorkflowSpec,
        state: &mut PatternState,
    ) -> Result<RunOutcome, EngineError> {
        match run_pattern(ctx, state).await? {
            StepOutcome::Paused(interrupt) => Ok(RunOutcome::Paused {
                session_id: ctx.session_id().to_string(),
                interrupt,
            }),
            StepOutcome::Completed(last_response) => {
                let mut scope = final_scope(ctx, state, &last_response);
                scope.set(
                    "$TRACE",
                    ctx.trace.lock().await.to_value(ctx.meter.total()),
                );
                let writer = ArtifactWriter::new(&self.output_dir);
                let written = writer
                    .write_all(&spec.outputs, &scope, self.force_artifacts)
                    .await?;

                {
                    let mut session = ctx.session.lock().await;
                    session.metadata.status = SessionStatus::Completed;
                    session.last_response = Some(last_response.clone());
                    session.artifacts_written = written
                        .iter()
                        .map(|p| p.to_string_lossy().into_owned())
                        .collect();
                }
                ctx.checkpoint(state).await?;
                self.bus.emit(WorkflowEvent::WorkflowComplete {
                    session_id: ctx.session_id().to_string(),
                    total_tokens: ctx.meter.total(),
                });
                Ok(RunOutcome::Completed {
                    session_id: ctx.session_id().to_string(),
                    last_response,
                    artifacts: written,
                })
            }
        }
    }

    fn build_hooks(
        &self,
        spec: &WorkflowSpec,
        pool: &Arc<ClientPool>,
        meter: &Arc<TokenMeter>,
        session_id: &str,
    ) -> Result<CycleHooks, EngineError> {
        let mut hooks = CycleHooks::default();
        if let Some(max_tokens) = spec.runtime.budgets.max_tokens {
            hooks.budget = Some(Arc::new(BudgetEnforcer::new(
                max_tokens,
                spec.context_policy.budget.warn_threshold,
                meter.clone(),
                self.bus.clone(),
                session_id,
            )));
        }
        if let Some(compaction) = &spec.context_policy.compaction {
            let mut runtime = resolve(&spec.runtime, None, &self.env)?;
            if let Some(model_id) = &compaction.model_id {
                runtime.model_id = model_id.clone();
            }
            let client = pool.get(&runtime).map_err(EngineError::from)?;
            hooks.compactor = Some(Arc::new(Compactor::new(
                client,
                compaction.when_tokens_over,
                compaction.summary_ratio,
                compaction.preserve_recent_messages,
            )));
        }
        if let Some(notes) = &spec.context_policy.notes {
            let path = self
                .session_root
                .join("sessions")
                .join(format!("session_{}", session_id))
                .join(&notes.file);
            hooks.notes = Some(Arc::new(NotesLedger::new(path, notes.inject_last)));
        }
        Ok(hooks)
    }

    async fn finalize_session(
        &self,
        session: &mut Session,
        reason: &str,
    ) -> Result<(), EngineError> {
        session.metadata.status = SessionStatus::Failed;
        session.metadata.failure_reason = Some(reason.to_string());
        session.touch();
        self.store.save(session).await?;
        self.bus.emit(WorkflowEvent::WorkflowError {
            session_id: session.session_id.clone(),
            kind: "pattern".to_string(),
            message: reason.to_string(),
        });
        Ok(())
    }
}

/// Binds a resume decision into the pattern state so the gate step can
/// consume it. Only chain-shaped patterns can pause.
fn bind_decision(
    state: &mut PatternState,
    gate_id: &str,
    decision: ResumeDecision,
) -> Result<(), EngineError> {
    let chain: &mut ChainState = match state {
        PatternState::Chain(c) => c,
        PatternState::Routing(r) => &mut r.chain,
        _ => {
            return Err(EngineError::Usage(
                "this pattern has no manual gates to resume".to_string(),
            ))
        }
    };
    chain.hitl = Some(crate::pattern::state::HitlBinding {
        gate_id: gate_id.to_string(),
        decision,
    });
    Ok(())
}

/// Final scope for artifact rendering: base values plus everything the
/// pattern state accumulated.
fn final_scope(ctx: &ExecCtx, state: &PatternState, last_response: &str) -> Scope {
    let mut scope = ctx.base_scope();
    scope.set("last_response", Value::String(last_response.to_string()));
    match state {
        PatternState::Chain(c) | PatternState::Routing(crate::pattern::state::RoutingState { chain: c, .. }) => {
            let steps: Vec<Value> = c
                .step_history
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "agent": r.agent_id,
                        "response": r.response,
                        "tokens": r.tokens,
                    })
                })
                .collect();
            scope.set("steps", Value::Array(steps));
        }
        PatternState::Parallel(p) => {
            for (id, branch) in &p.branches {
                if let Some(response) = &branch.response {
                    scope.set_nested(
                        &["branches", id.as_str(), "response"],
                        Value::String(response.clone()),
                    );
                }
            }
        }
        PatternState::Workflow(dag) => {
            for (id, record) in &dag.records {
                if let Some(response) = &record.response {
                    scope.set_nested(
                        &["tasks", id.as_str(), "response"],
                        Value::String(response.clone()),
                    );
                }
            }
        }
        PatternState::EvaluatorOptimizer(e) => {
            if let Some(evaluation) = &e.last_evaluation {
                scope.set("evaluation", evaluation.clone());
            }
            scope.set("iteration", Value::from(e.iteration));
        }
        PatternState::OrchestratorWorkers(o) => {
            for (k, round) in o.rounds.iter().enumerate() {
                for (id, worker) in &round.workers {
                    scope.set_nested(
                        &["rounds", &k.to_string(), "workers", id.as_str(), "response"],
                        Value::String(worker.response.clone()),
                    );
                }
            }
        }
        PatternState::Graph(g) => {
            for (id, response) in &g.node_responses {
                scope.set_nested(
                    &["nodes", id.as_str(), "response"],
                    Value::String(response.clone()),
                );
            }
            if let Some(terminal) = &g.terminal_node {
                scope.set("terminal_node", Value::String(terminal.clone()));
            }
        }
    }
    scope
}
