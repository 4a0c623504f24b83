//! Durable, variant-tagged pattern state: what a checkpoint persists beside
//! the session record.
//!
//! Between suspension points a unit of work is either fully recorded here or
//! absent; executors update state only at checkpoint boundaries.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::ResumeDecision;

/// Pattern-specific runtime state, tagged by pattern kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "snake_case")]
pub enum PatternState {
    Chain(ChainState),
    Routing(RoutingState),
    Parallel(ParallelState),
    Workflow(DagState),
    EvaluatorOptimizer(EvaluatorState),
    OrchestratorWorkers(OrchestratorState),
    Graph(GraphState),
}

/// One executed step in a chain (or chain-like branch).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub agent_id: String,
    pub input: String,
    pub response: String,
    pub tokens: u64,
}

/// A manual-gate decision bound into the chain before a resume re-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlBinding {
    pub gate_id: String,
    pub decision: ResumeDecision,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainState {
    pub current_step_index: usize,
    pub step_history: Vec<StepRecord>,
    /// Present between resume and the gate step consuming the decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hitl: Option<HitlBinding>,
    /// Last consumed gate decision, exposed as `hitl.response` in scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_response: Option<String>,
    /// Feedback from a modify decision, exposed as `hitl.feedback` in scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_feedback: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    pub chain: ChainState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchState {
    pub status: BranchStatus,
    pub chain: ChainState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParallelState {
    pub branches: BTreeMap<String, BranchState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce_response: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tokens: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DagState {
    /// Task id → terminal record. Absence means pending.
    pub records: BTreeMap<String, TaskRecord>,
}

impl DagState {
    pub fn completed(&self) -> BTreeSet<&str> {
        self.records
            .iter()
            .filter(|(_, r)| r.status == TaskStatus::Completed)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluatorState {
    pub iteration: u32,
    pub drafts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_evaluation: Option<Value>,
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub description: String,
    pub response: String,
    pub tokens: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoundRecord {
    pub plan: String,
    pub workers: BTreeMap<String, WorkerRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorState {
    pub round: usize,
    pub rounds: Vec<RoundRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writeup_response: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node: Option<String>,
    pub iteration: u32,
    pub visited: Vec<String>,
    pub node_responses: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_node: Option<String>,
}
