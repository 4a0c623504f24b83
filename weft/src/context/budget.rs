//! Token budget enforcement at cycle boundaries.
//!
//! At `warn_threshold × max_tokens`: emit one `budget_warning` event, inject
//! one model-visible warning message, and request a compaction. At the full
//! budget: fail the workflow with the budget exit class. The warning fires at
//! most once per workflow.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::context::TokenMeter;
use crate::error::EngineError;
use crate::events::{EventBus, WorkflowEvent};
use crate::message::Message;

/// Marker prefix of the injected warning so it is never injected twice.
const WARNING_PREFIX: &str = "[budget warning]";

/// What the caller should do after a budget check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetVerdict {
    Ok,
    /// Warn threshold crossed this cycle: compact now.
    WarnAndCompact,
}

pub struct BudgetEnforcer {
    max_tokens: u64,
    warn_threshold: f32,
    warned: AtomicBool,
    meter: Arc<TokenMeter>,
    bus: Arc<EventBus>,
    session_id: String,
}

impl BudgetEnforcer {
    pub fn new(
        max_tokens: u64,
        warn_threshold: f32,
        meter: Arc<TokenMeter>,
        bus: Arc<EventBus>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            max_tokens,
            warn_threshold,
            warned: AtomicBool::new(false),
            meter,
            bus,
            session_id: session_id.into(),
        }
    }

    /// Compares cumulative usage against the budget.
    pub fn check(&self, conversation: &mut Vec<Message>) -> Result<BudgetVerdict, EngineError> {
        let used = self.meter.total();
        if used >= self.max_tokens {
            return Err(EngineError::BudgetExceeded(format!(
                "token budget: {} used of {}",
                used, self.max_tokens
            )));
        }
        let warn_at = (self.max_tokens as f64 * self.warn_threshold as f64) as u64;
        if used >= warn_at && !self.warned.swap(true, Ordering::SeqCst) {
            self.bus.emit(WorkflowEvent::BudgetWarning {
                session_id: self.session_id.clone(),
                used_tokens: used,
                max_tokens: self.max_tokens,
            });
            conversation.push(Message::system(format!(
                "{} {} of {} tokens used; be brief and conclude soon",
                WARNING_PREFIX, used, self.max_tokens
            )));
            return Ok(BudgetVerdict::WarnAndCompact);
        }
        Ok(BudgetVerdict::Ok)
    }
}
