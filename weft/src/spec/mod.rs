//! Typed workflow specification: the immutable in-memory form of a workflow
//! document.
//!
//! A document has `version`, `name`, `runtime`, `inputs`, `agents`, `tools`,
//! exactly one `pattern`, `outputs`, `context_policy`, and `security`.
//! Parsing gives structure only; the capability gate (`capability`) decides
//! whether the parsed spec is runnable.

pub mod canonical;
pub mod capability;
pub mod load;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A parsed workflow document. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    /// Spec contract version; `0` is the current contract.
    #[serde(default)]
    pub version: u32,
    pub name: String,
    pub runtime: RuntimeSpec,
    #[serde(default)]
    pub inputs: BTreeMap<String, InputSpec>,
    pub agents: BTreeMap<String, AgentSpec>,
    #[serde(default)]
    pub tools: Vec<ToolDecl>,
    pub pattern: Pattern,
    #[serde(default)]
    pub outputs: Vec<ArtifactSpec>,
    #[serde(default)]
    pub context_policy: ContextPolicySpec,
    #[serde(default)]
    pub security: SecuritySpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<Value>,
    /// Unknown top-level keys; the capability gate turns these into warnings.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Model runtime shared by all agents unless overridden per agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSpec {
    /// One of `bedrock`, `openai`, `ollama`.
    pub provider: String,
    pub model_id: String,
    /// Required when provider is `bedrock`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Required when provider is `ollama`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default)]
    pub budgets: Budgets,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_max_parallel() -> usize {
    4
}

/// Hard caps on a run. Absent means unlimited.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Budgets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_s: Option<u64>,
}

/// Retry policy for transient provider and tool failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePolicy {
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default)]
    pub backoff: Backoff,
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

fn default_retries() -> u32 {
    2
}
fn default_initial_interval_ms() -> u64 {
    500
}
fn default_max_interval_ms() -> u64 {
    10_000
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            backoff: Backoff::default(),
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    Constant,
    #[default]
    Exponential,
    Jittered,
}

/// One agent: system prompt template, tool refs, optional runtime overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub prompt: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeOverrides>,
}

/// Per-agent runtime overrides layered over the spec runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

/// Declared input with type used for CLI `key=value` coercion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    #[serde(rename = "type")]
    pub kind: InputType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    String,
    Integer,
    Number,
    Boolean,
}

/// A tool declaration in the spec: builtin reference, HTTP endpoint, or a
/// host-callable (which must be on the security allow-list).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDecl {
    pub name: String,
    #[serde(default)]
    pub kind: ToolKind,
    /// Base URL for `http` tools; screened for SSRF at the capability gate
    /// and again on every call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    #[default]
    Builtin,
    Http,
    Callable,
}

/// A declared artifact: render `from`, write to `path` under the output dir.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSpec {
    pub path: String,
    pub from: String,
    #[serde(default)]
    pub force: bool,
}

/// Context-management policy: compaction, notes ledger, budget thresholds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextPolicySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compaction: Option<CompactionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<NotesSpec>,
    #[serde(default)]
    pub budget: BudgetPolicySpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionSpec {
    /// Compact once the cumulative conversation estimate exceeds this.
    pub when_tokens_over: u64,
    #[serde(default = "default_summary_ratio")]
    pub summary_ratio: f32,
    #[serde(default = "default_preserve_recent")]
    pub preserve_recent_messages: usize,
    /// Optional distinct (typically cheaper) model for the summarization step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

fn default_summary_ratio() -> f32 {
    0.3
}
fn default_preserve_recent() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotesSpec {
    /// Ledger filename under the session directory.
    #[serde(default = "default_notes_file")]
    pub file: String,
    /// How many trailing records to inject before each cycle.
    #[serde(default = "default_inject_last")]
    pub inject_last: usize,
}

fn default_notes_file() -> String {
    "notes.md".to_string()
}
fn default_inject_last() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetPolicySpec {
    /// Fraction of `budgets.max_tokens` at which a single warning fires.
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold: f32,
}

fn default_warn_threshold() -> f32 {
    0.8
}

impl Default for BudgetPolicySpec {
    fn default() -> Self {
        Self {
            warn_threshold: default_warn_threshold(),
        }
    }
}

/// Security posture for tools and template-reachable outputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecuritySpec {
    /// Hosts exempted from the private-network part of the SSRF screen.
    #[serde(default)]
    pub allow_hosts: Vec<String>,
    #[serde(default)]
    pub allow_private_network: bool,
    #[serde(default)]
    pub bypass_tool_consent: bool,
    /// Names of host-callable tools permitted by this deployment.
    #[serde(default)]
    pub allow_callables: Vec<String>,
}

// ---------------------------------------------------------------------------
// Pattern variants
// ---------------------------------------------------------------------------

/// The orchestration shape of a workflow; exactly one per spec.
///
/// Executors dispatch over this tagged variant; there is no inheritance
/// hierarchy behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Pattern {
    Chain(ChainPattern),
    Routing(RoutingPattern),
    Parallel(ParallelPattern),
    Workflow(DagPattern),
    EvaluatorOptimizer(EvaluatorPattern),
    OrchestratorWorkers(OrchestratorPattern),
    Graph(GraphPattern),
}

impl Pattern {
    /// Stable name used in session metadata and events.
    pub fn kind(&self) -> &'static str {
        match self {
            Pattern::Chain(_) => "chain",
            Pattern::Routing(_) => "routing",
            Pattern::Parallel(_) => "parallel",
            Pattern::Workflow(_) => "workflow",
            Pattern::EvaluatorOptimizer(_) => "evaluator_optimizer",
            Pattern::OrchestratorWorkers(_) => "orchestrator_workers",
            Pattern::Graph(_) => "graph",
        }
    }
}

/// Ordered steps, each an agent invocation or a manual gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainPattern {
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    Agent(AgentStep),
    ManualGate(ManualGateStep),
}

/// One agent invocation: which agent, and the input template it receives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    pub agent: String,
    pub input: String,
}

/// A human-in-the-loop pause point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualGateStep {
    pub id: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_s: Option<u64>,
}

/// Router agent selects one named branch; the branch runs as a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingPattern {
    pub router: AgentStep,
    pub routes: BTreeMap<String, Vec<Step>>,
    /// Fallback route when the router names an unknown one.
    #[serde(rename = "default", default, skip_serializing_if = "Option::is_none")]
    pub default_route: Option<String>,
}

/// Concurrent branches with an optional reduce step over completed outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelPattern {
    pub branches: Vec<BranchSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce: Option<AgentStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchSpec {
    pub id: String,
    pub steps: Vec<Step>,
}

/// Dependency-ordered tasks (a DAG; cycles are rejected at the gate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagPattern {
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub on_task_failure: TaskFailureMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub agent: String,
    pub input: String,
    #[serde(default)]
    pub deps: Vec<String>,
    /// Optional condition; false skips the task without failing it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskFailureMode {
    /// Skip descendants of a failed task; fail only if nothing completed.
    #[default]
    SkipDescendants,
    /// First task failure fails the workflow.
    FailWorkflow,
}

/// Produce → evaluate → revise loop with an inclusive score threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorPattern {
    pub producer: AgentStep,
    pub evaluator: AgentStep,
    pub accept: AcceptSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revise_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptSpec {
    pub min_score: f64,
    pub max_iters: u32,
}

/// Orchestrator agent fans work out to workers over bounded rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorPattern {
    pub orchestrator: OrchestratorSpec,
    pub worker_template: WorkerTemplate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce: Option<AgentStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writeup: Option<AgentStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSpec {
    pub agent: String,
    pub input: String,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

fn default_max_workers() -> usize {
    4
}
fn default_max_rounds() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerTemplate {
    pub agent: String,
    /// Tool overrides applied to every worker built from the template.
    #[serde(default)]
    pub tools: Vec<String>,
}

/// Agent-per-node graph with conditional edges; cycles bounded by
/// `max_iterations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphPattern {
    pub nodes: BTreeMap<String, NodeSpec>,
    pub edges: Vec<EdgeSpec>,
    pub start_node: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_max_iterations() -> u32 {
    25
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub agent: String,
    pub input: String,
}

/// Sentinel edge target: stop and record the source node as terminal.
pub const TERMINAL: &str = "terminal";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub from: String,
    /// Unconditional target; mutually exclusive with `choose`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Conditional arms evaluated in order; requires an `else` arm.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choose: Vec<ChooseArm>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChooseArm {
    pub when: String,
    pub to: String,
}
