//! Run trace backing the reserved `$TRACE` template variable.
//!
//! Accumulates one span per agent invocation; renders as a JSON document
//! with trace id, span list, and aggregate token usage.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct TraceSpan {
    pub name: String,
    pub kind: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub tokens: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunTrace {
    pub trace_id: String,
    pub spans: Vec<TraceSpan>,
}

impl RunTrace {
    pub fn new() -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
            spans: Vec::new(),
        }
    }

    pub fn record(&mut self, span: TraceSpan) {
        self.spans.push(span);
    }

    /// The `$TRACE` document: trace id, spans, and aggregate usage.
    pub fn to_value(&self, total_tokens: u64) -> Value {
        serde_json::json!({
            "trace_id": self.trace_id,
            "spans": self.spans,
            "token_usage": { "total": total_tokens },
        })
    }
}

impl Default for RunTrace {
    fn default() -> Self {
        Self::new()
    }
}
