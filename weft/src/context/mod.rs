//! Context policy hooks installed on every agent handle.
//!
//! Three hooks, composed in a fixed order around each agent cycle:
//! notes-inject → (cycle) → budget-check → compaction → notes-append.
//! The budget check may force a compaction at the warn threshold; the
//! compactor otherwise fires on its own token threshold.

mod budget;
mod compaction;
mod notes;

pub use budget::{BudgetEnforcer, BudgetVerdict};
pub use compaction::Compactor;
pub use notes::{NoteRecord, NotesLedger};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::EngineError;
use crate::message::Message;

/// Workflow-wide token meter shared by every agent and the budget enforcer.
///
/// The sum of per-agent counters equals this total at every checkpoint
/// boundary.
#[derive(Debug, Default)]
pub struct TokenMeter {
    total: AtomicU64,
}

impl TokenMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the meter (resume restores the persisted total).
    pub fn seed(total: u64) -> Self {
        Self {
            total: AtomicU64::new(total),
        }
    }

    pub fn add(&self, tokens: u64) {
        self.total.fetch_add(tokens, Ordering::SeqCst);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }
}

/// The hook bundle cloned into each agent handle. Empty hooks are no-ops.
#[derive(Clone, Default)]
pub struct CycleHooks {
    pub notes: Option<Arc<NotesLedger>>,
    pub budget: Option<Arc<BudgetEnforcer>>,
    pub compactor: Option<Arc<Compactor>>,
}

impl CycleHooks {
    /// Runs before a cycle: injects the trailing notes records.
    pub async fn before_cycle(&self, conversation: &mut Vec<Message>) -> Result<(), EngineError> {
        if let Some(notes) = &self.notes {
            notes.inject(conversation).await?;
        }
        Ok(())
    }

    /// Runs after a cycle in the fixed order budget → compaction → notes.
    pub async fn after_cycle(
        &self,
        conversation: &mut Vec<Message>,
        record: NoteRecord,
    ) -> Result<(), EngineError> {
        let verdict = match &self.budget {
            Some(budget) => budget.check(conversation)?,
            None => BudgetVerdict::Ok,
        };
        if let Some(compactor) = &self.compactor {
            match verdict {
                BudgetVerdict::WarnAndCompact => compactor.compact_now(conversation).await?,
                BudgetVerdict::Ok => {
                    compactor.maybe_compact(conversation).await?;
                }
            }
        }
        if let Some(notes) = &self.notes {
            notes.append(&record).await?;
        }
        Ok(())
    }
}

/// Monotonic per-agent cycle counter feeding the notes ledger step numbers.
#[derive(Debug, Default)]
pub struct CycleCounter(AtomicU64);

impl CycleCounter {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}
