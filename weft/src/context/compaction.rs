//! Proactive conversation compaction via model summarization.
//!
//! Older messages are summarized into one System message sized at roughly
//! `summary_ratio × original`; the last `preserve_recent` messages stay
//! verbatim, and the split never separates a tool result from the assistant
//! turn that requested it.

use std::sync::Arc;

use crate::error::EngineError;
use crate::llm::ModelClient;
use crate::message::{estimate_tokens, Message};

/// Prefix of the summary message a compaction leaves behind.
pub const SUMMARY_PREFIX: &str = "[Summary of earlier conversation]";

pub struct Compactor {
    client: Arc<dyn ModelClient>,
    when_tokens_over: u64,
    summary_ratio: f32,
    preserve_recent: usize,
}

impl Compactor {
    pub fn new(
        client: Arc<dyn ModelClient>,
        when_tokens_over: u64,
        summary_ratio: f32,
        preserve_recent: usize,
    ) -> Self {
        Self {
            client,
            when_tokens_over,
            summary_ratio,
            preserve_recent,
        }
    }

    /// Compacts when the conversation estimate exceeds the threshold.
    /// Returns true when a compaction ran.
    pub async fn maybe_compact(&self, conversation: &mut Vec<Message>) -> Result<bool, EngineError> {
        if u64::from(estimate_tokens(conversation)) <= self.when_tokens_over {
            return Ok(false);
        }
        self.compact_now(conversation).await?;
        Ok(true)
    }

    /// Unconditional compaction (budget warnings force one).
    pub async fn compact_now(&self, conversation: &mut Vec<Message>) -> Result<(), EngineError> {
        if conversation.len() <= self.preserve_recent + 1 {
            return Ok(());
        }
        let mut split = conversation.len() - self.preserve_recent;
        // Keep tool call/result pairs together: never start the kept tail on
        // a tool result.
        while split > 0 && conversation[split].is_tool_result() {
            split -= 1;
        }
        if split == 0 {
            return Ok(());
        }
        let (older, recent) = conversation.split_at(split);

        let prompt = build_summary_prompt(older, self.summary_ratio);
        let response = self
            .client
            .invoke(&[Message::user(prompt)], &[])
            .await
            .map_err(EngineError::from)?;

        tracing::debug!(
            summarized = older.len(),
            kept = recent.len(),
            "conversation compacted"
        );

        let mut out = Vec::with_capacity(recent.len() + 1);
        out.push(Message::system(format!(
            "{}: {}",
            SUMMARY_PREFIX, response.content
        )));
        out.extend(recent.iter().cloned());
        *conversation = out;
        Ok(())
    }
}

/// The summarization request: focus instructions, size target, then the
/// messages with role prefixes.
fn build_summary_prompt(messages: &[Message], ratio: f32) -> String {
    let original_chars: usize = messages.iter().map(|m| m.content().len()).sum();
    let target_chars = ((original_chars as f32) * ratio) as usize;
    let mut parts = vec![
        "Summarize the following conversation. Focus on:".to_string(),
        "- What was asked and decided".to_string(),
        "- Which tools were used and what they returned".to_string(),
        "- What remains to be done".to_string(),
        format!("Keep the summary under roughly {} characters.", target_chars.max(200)),
        String::new(),
    ];
    for m in messages {
        match m {
            Message::System(s) => parts.push(format!("System: {}", s)),
            Message::User(s) => parts.push(format!("User: {}", s)),
            Message::Assistant(s) => parts.push(format!("Assistant: {}", s)),
        }
    }
    parts.join("\n")
}
