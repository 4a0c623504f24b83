//! Event display: human-readable progress lines or JSON lines.
//!
//! Subscribed to the engine's event bus; one line per event, written to
//! stdout as they arrive.

use weft::events::{EventSubscriber, WorkflowEvent};

pub struct EventPrinter {
    json: bool,
}

impl EventPrinter {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    fn human_line(event: &WorkflowEvent) -> String {
        match event {
            WorkflowEvent::WorkflowStart { workflow, pattern, .. } => {
                format!("▶ {} ({})", workflow, pattern)
            }
            WorkflowEvent::WorkflowComplete { total_tokens, .. } => {
                format!("✔ completed ({} tokens)", total_tokens)
            }
            WorkflowEvent::WorkflowError { kind, message, .. } => {
                format!("✖ {}: {}", kind, message)
            }
            WorkflowEvent::StepComplete { step, agent, tokens, .. } => {
                format!("  step {} [{}] done ({} tokens)", step, agent, tokens)
            }
            WorkflowEvent::TaskComplete { task, status, .. } => {
                format!("  task {} {}", task, status)
            }
            WorkflowEvent::BranchComplete { branch, status, .. } => {
                format!("  branch {} {}", branch, status)
            }
            WorkflowEvent::InterruptPending { gate_id, prompt, .. } => {
                format!("⏸ gate {}: {}", gate_id, prompt)
            }
            WorkflowEvent::BudgetWarning {
                used_tokens,
                max_tokens,
                ..
            } => format!("⚠ budget: {} of {} tokens used", used_tokens, max_tokens),
        }
    }
}

impl EventSubscriber for EventPrinter {
    fn on_event(&self, event: &WorkflowEvent) {
        if self.json {
            if let Ok(line) = serde_json::to_string(event) {
                println!("{}", line);
            }
        } else {
            println!("{}", Self::human_line(event));
        }
    }
}
