//! Typed workflow events and the in-process event bus.
//!
//! Delivery is synchronous per subscriber and must not affect workflow
//! progress: a subscriber that panics is logged and isolated, and emission
//! never fails. Subscribers receive shared references; they copy what they
//! keep.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;

/// The stable event set. Ordering within one step is start-before-complete;
/// across concurrent branches ordering follows execution, not wall-clock.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowStart {
        session_id: String,
        workflow: String,
        pattern: String,
    },
    WorkflowComplete {
        session_id: String,
        total_tokens: u64,
    },
    WorkflowError {
        session_id: String,
        kind: String,
        message: String,
    },
    StepComplete {
        session_id: String,
        step: String,
        agent: String,
        tokens: u64,
    },
    TaskComplete {
        session_id: String,
        task: String,
        status: String,
    },
    BranchComplete {
        session_id: String,
        branch: String,
        status: String,
    },
    InterruptPending {
        session_id: String,
        gate_id: String,
        prompt: String,
    },
    BudgetWarning {
        session_id: String,
        used_tokens: u64,
        max_tokens: u64,
    },
}

/// A bus subscriber. Callbacks run on the emitting task; keep them short.
pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: &WorkflowEvent);
}

/// In-process fan-out of workflow events.
pub struct EventBus {
    subscribers: RwLock<Vec<Arc<dyn EventSubscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers
            .write()
            .expect("subscriber list poisoned")
            .push(subscriber);
    }

    /// Delivers the event to every subscriber, isolating panics.
    pub fn emit(&self, event: WorkflowEvent) {
        let subscribers = self
            .subscribers
            .read()
            .expect("subscriber list poisoned")
            .clone();
        for subscriber in subscribers {
            let result =
                std::panic::catch_unwind(AssertUnwindSafe(|| subscriber.on_event(&event)));
            if result.is_err() {
                tracing::warn!(event = ?event, "event subscriber panicked; isolated");
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Test/CLI subscriber that records every event it sees.
pub struct CollectingSubscriber {
    events: Mutex<Vec<WorkflowEvent>>,
}

impl CollectingSubscriber {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().expect("events lock").clone()
    }
}

impl Default for CollectingSubscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSubscriber for CollectingSubscriber {
    fn on_event(&self, event: &WorkflowEvent) {
        self.events.lock().expect("events lock").push(event.clone());
    }
}
