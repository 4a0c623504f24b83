//! Session model: durable identity, metadata, interrupts, token accounting.
//!
//! A session is created at run start, updated at every checkpoint boundary,
//! and terminal on success or failure. Terminal sessions are immutable except
//! for deletion.

pub mod file;
pub mod store;

pub use file::FileSessionStore;
pub use store::{MemorySessionStore, SessionStore, StoreError};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Session lifecycle states. Transitions in one direction only:
/// Running ↔ Paused, then Completed or Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(SessionStatus::Running),
            "paused" => Some(SessionStatus::Paused),
            "completed" => Some(SessionStatus::Completed),
            "failed" => Some(SessionStatus::Failed),
            _ => None,
        }
    }
}

/// Cumulative token accounting. The per-agent sum equals `total` at every
/// checkpoint boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub total: u64,
    pub by_agent: BTreeMap<String, u64>,
}

/// Why and how a run paused for a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptKind {
    ManualGate,
    BudgetExhaustedAsk,
}

/// The decision a resume carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ResumeDecision {
    Approve,
    Reject { feedback: Option<String> },
    /// Re-execute the previous step with the feedback bound into scope.
    Modify { feedback: String },
}

/// Durable record of a pending (or answered) pause point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptRecord {
    pub kind: InterruptKind,
    pub gate_id: String,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResumeDecision>,
}

/// Session metadata block, listed and filtered by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Display name; defaults to the workflow name.
    pub name: String,
    pub workflow_name: String,
    pub pattern_type: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt: Option<InterruptRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// The whole durable session record (without pattern state and conversation
/// snapshots, which the store keeps beside it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    /// sha256 of the canonicalized spec at creation time.
    pub spec_hash: String,
    pub metadata: SessionMetadata,
    /// Resolved inputs.
    pub variables: Map<String, Value>,
    pub token_usage: TokenUsage,
    pub artifacts_written: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_response: Option<String>,
}

impl Session {
    /// Creates a fresh Running session.
    pub fn new(
        workflow_name: impl Into<String>,
        pattern_type: impl Into<String>,
        spec_hash: String,
        variables: Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        let workflow_name = workflow_name.into();
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            spec_hash,
            metadata: SessionMetadata {
                name: workflow_name.clone(),
                workflow_name,
                pattern_type: pattern_type.into(),
                status: SessionStatus::Running,
                created_at: now,
                updated_at: now,
                interrupt: None,
                failure_reason: None,
            },
            variables,
            token_usage: TokenUsage::default(),
            artifacts_written: Vec::new(),
            last_response: None,
        }
    }

    /// Bumps `updated_at`; every checkpoint goes through here.
    pub fn touch(&mut self) {
        self.metadata.updated_at = Utc::now();
    }

    pub fn is_terminal(&self) -> bool {
        self.metadata.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: a new session is Running with matching names and no usage.
    #[test]
    fn new_session_defaults() {
        let session = Session::new("wf", "chain", "abc".into(), Map::new());
        assert_eq!(session.metadata.status, SessionStatus::Running);
        assert_eq!(session.metadata.name, "wf");
        assert_eq!(session.metadata.workflow_name, "wf");
        assert_eq!(session.token_usage.total, 0);
        assert!(!session.is_terminal());
        assert_eq!(session.session_id.len(), 36);
    }

    /// **Scenario**: status round-trips through its string form.
    #[test]
    fn status_string_round_trip() {
        for status in [
            SessionStatus::Running,
            SessionStatus::Paused,
            SessionStatus::Completed,
            SessionStatus::Failed,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::parse("nope"), None);
        assert!(SessionStatus::Completed.is_terminal());
        assert!(!SessionStatus::Paused.is_terminal());
    }

    /// **Scenario**: resume decisions serialize with a snake_case tag.
    #[test]
    fn decision_serde() {
        let json = serde_json::to_string(&ResumeDecision::Modify {
            feedback: "tighten it".into(),
        })
        .unwrap();
        assert!(json.contains("\"decision\":\"modify\""), "{json}");
        let back: ResumeDecision = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back,
            ResumeDecision::Modify {
                feedback: "tighten it".into()
            }
        );
    }
}
