//! Engine error taxonomy and the deterministic exit-code mapping.
//!
//! Kinds are classes of failure, not provider exception types: usage, schema,
//! unsupported (capability gate), template/expression, provider, tool,
//! session I/O, plain I/O, budget, unexpected. Retryable errors never reach
//! this level; the executor retry loop absorbs them.

use thiserror::Error;

use crate::session::store::StoreError;
use crate::spec::capability::CapabilityReport;
use crate::template::TemplateError;
use crate::tools::ToolError;

/// Process exit code for a successful run.
pub const EXIT_OK: i32 = 0;
/// Process exit code for an orderly HITL pause. Success-adjacent, not a failure.
pub const EXIT_PAUSED: i32 = 20;

/// A terminal engine failure, classified for exit-code mapping.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed invocation: bad `key=value`, missing required input.
    #[error("usage: {0}")]
    Usage(String),

    /// The document did not parse into a workflow spec.
    #[error("spec schema: {0}")]
    Schema(String),

    /// The capability gate rejected the spec.
    #[error("unsupported spec:\n{0}")]
    Unsupported(CapabilityReport),

    /// Sandbox violation or malformed template/expression. Fatal mid-run.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Router selected a route that does not exist.
    #[error("routing: {0}")]
    Routing(String),

    /// Evaluator output was not JSON with a numeric `score`.
    #[error("evaluator output: {0}")]
    EvaluatorOutput(String),

    /// Pattern-level failure: all branches failed, no DAG task completed,
    /// orchestrator emitted an unusable plan, gate timed out or was rejected.
    #[error("pattern: {0}")]
    Pattern(String),

    /// Provider failure that survived the retry loop (or was permanent).
    #[error("provider: {message}")]
    Provider { message: String, retryable: bool },

    /// Tool failure: bad input, SSRF block, path traversal, internal error.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// Session store failure: checkpoint write, corrupt record on resume.
    #[error(transparent)]
    Session(#[from] StoreError),

    /// Artifact or other filesystem failure outside the session store.
    #[error("i/o: {0}")]
    Io(String),

    /// Token, step, or duration budget exhausted.
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    /// Invariant breach; maps to the catch-all exit code.
    #[error("unexpected: {0}")]
    Unexpected(String),
}

impl EngineError {
    /// Deterministic exit code for this error class.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Usage(_) => 2,
            EngineError::Schema(_) => 3,
            EngineError::Template(_)
            | EngineError::Routing(_)
            | EngineError::EvaluatorOutput(_)
            | EngineError::Pattern(_)
            | EngineError::Provider { .. }
            | EngineError::Tool(_) => 10,
            EngineError::Session(_) => 11,
            EngineError::Io(_) => 12,
            EngineError::Unsupported(_) => 18,
            EngineError::BudgetExceeded(_) => 19,
            EngineError::Unexpected(_) => 70,
        }
    }

    /// True when the executor retry loop may re-attempt the failed call.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Provider { retryable, .. } => *retryable,
            EngineError::Tool(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Short class name used in `workflow_error` events and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Usage(_) => "usage",
            EngineError::Schema(_) => "schema",
            EngineError::Unsupported(_) => "unsupported",
            EngineError::Template(_) => "template",
            EngineError::Routing(_) => "routing",
            EngineError::EvaluatorOutput(_) => "evaluator_output",
            EngineError::Pattern(_) => "pattern",
            EngineError::Provider { .. } => "provider",
            EngineError::Tool(_) => "tool",
            EngineError::Session(_) => "session",
            EngineError::Io(_) => "io",
            EngineError::BudgetExceeded(_) => "budget",
            EngineError::Unexpected(_) => "unexpected",
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

impl From<crate::llm::ModelError> for EngineError {
    fn from(e: crate::llm::ModelError) -> Self {
        let retryable = e.is_retryable();
        EngineError::Provider {
            message: e.to_string(),
            retryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: each error class maps to its documented exit code.
    #[test]
    fn exit_codes_are_deterministic() {
        assert_eq!(EngineError::Usage("x".into()).exit_code(), 2);
        assert_eq!(EngineError::Schema("x".into()).exit_code(), 3);
        assert_eq!(EngineError::Routing("x".into()).exit_code(), 10);
        assert_eq!(EngineError::EvaluatorOutput("x".into()).exit_code(), 10);
        assert_eq!(
            EngineError::Provider {
                message: "x".into(),
                retryable: false
            }
            .exit_code(),
            10
        );
        assert_eq!(EngineError::Io("x".into()).exit_code(), 12);
        assert_eq!(EngineError::BudgetExceeded("tokens".into()).exit_code(), 19);
        assert_eq!(EngineError::Unexpected("x".into()).exit_code(), 70);
    }

    /// **Scenario**: retryability follows the provider flag; other kinds are final.
    #[test]
    fn retryability_classification() {
        assert!(EngineError::Provider {
            message: "503".into(),
            retryable: true
        }
        .is_retryable());
        assert!(!EngineError::Provider {
            message: "401".into(),
            retryable: false
        }
        .is_retryable());
        assert!(!EngineError::BudgetExceeded("t".into()).is_retryable());
        assert!(!EngineError::Routing("r".into()).is_retryable());
    }
}
