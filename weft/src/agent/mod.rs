//! Agent handles: the model/tool loop behind every pattern step.
//!
//! A handle owns one conversation, a pooled model client, and a resolved tool
//! set. `invoke` runs one cycle (prompt in, assistant text out, tool calls
//! dispatched in between) and is the engine's unit of retry: on failure the
//! conversation rolls back to its pre-cycle state so a retried cycle starts
//! clean.

pub mod builder;
pub mod runtime;

pub use builder::AgentCache;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::context::{CycleCounter, CycleHooks, NoteRecord, TokenMeter};
use crate::error::EngineError;
use crate::llm::{ModelClient, ModelUsage};
use crate::message::Message;
use crate::tools::{ToolContext, ToolRegistry};

/// A misbehaving model cannot loop tools forever inside one cycle.
const MAX_TOOL_ROUNDS: usize = 8;

/// One tool invocation performed during a cycle.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool: String,
    pub input: Value,
    pub output: String,
}

/// The result of one agent cycle.
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub content: String,
    pub invocations: Vec<ToolInvocation>,
    pub usage: ModelUsage,
}

/// A built agent: shared between the executor and the cache for the
/// workflow's lifetime.
pub struct AgentHandle {
    name: String,
    system_prompt: String,
    client: Arc<dyn ModelClient>,
    tools: Vec<String>,
    registry: Arc<ToolRegistry>,
    tool_ctx: ToolContext,
    conversation: Mutex<Vec<Message>>,
    tokens: AtomicU64,
    meter: Arc<TokenMeter>,
    hooks: CycleHooks,
    cycles: CycleCounter,
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("name", &self.name)
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

impl AgentHandle {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        system_prompt: String,
        client: Arc<dyn ModelClient>,
        tools: Vec<String>,
        registry: Arc<ToolRegistry>,
        tool_ctx: ToolContext,
        meter: Arc<TokenMeter>,
        hooks: CycleHooks,
    ) -> Self {
        Self {
            name,
            system_prompt,
            client,
            tools,
            registry,
            tool_ctx,
            conversation: Mutex::new(Vec::new()),
            tokens: AtomicU64::new(0),
            meter,
            hooks,
            cycles: CycleCounter::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cumulative tokens spent by this agent.
    pub fn tokens(&self) -> u64 {
        self.tokens.load(Ordering::SeqCst)
    }

    /// Runs one cycle. Suspends on model and tool I/O only.
    pub async fn invoke(&self, prompt: &str) -> Result<AgentReply, EngineError> {
        let mut conversation = self.conversation.lock().await;
        if conversation.is_empty() && !self.system_prompt.is_empty() {
            conversation.push(Message::system(self.system_prompt.clone()));
        }
        let rollback_len = conversation.len();

        let result = self.run_cycle(&mut conversation, prompt).await;
        if result.is_err() {
            conversation.truncate(rollback_len);
        }
        result
    }

    async fn run_cycle(
        &self,
        conversation: &mut Vec<Message>,
        prompt: &str,
    ) -> Result<AgentReply, EngineError> {
        self.hooks.before_cycle(conversation).await?;
        conversation.push(Message::user(prompt.to_string()));
        let tool_specs = self.registry.specs_for(&self.tools)?;

        let mut usage = ModelUsage::default();
        let mut invocations = Vec::new();
        let mut content = String::new();

        for round in 0..MAX_TOOL_ROUNDS {
            let response = self.client.invoke(conversation, &tool_specs).await?;
            usage.add(&response.usage);
            self.tokens
                .fetch_add(u64::from(response.usage.total_tokens), Ordering::SeqCst);
            self.meter.add(u64::from(response.usage.total_tokens));

            conversation.push(Message::assistant(response.content.clone()));
            content = response.content;

            if response.tool_calls.is_empty() {
                break;
            }
            if round + 1 == MAX_TOOL_ROUNDS {
                tracing::warn!(agent = %self.name, "tool round limit reached");
                break;
            }
            for call in response.tool_calls {
                let output = self
                    .registry
                    .call(&call.name, call.arguments.clone(), &self.tool_ctx)
                    .await?;
                conversation.push(Message::tool_result(&call.name, &output.text));
                invocations.push(ToolInvocation {
                    tool: call.name,
                    input: call.arguments,
                    output: output.text,
                });
            }
        }

        let step = self.cycles.next();
        let record = NoteRecord {
            agent: self.name.clone(),
            step,
            input: prompt.chars().take(200).collect(),
            tools: invocations.iter().map(|i| i.tool.clone()).collect(),
            outcome: content.clone(),
        };
        self.hooks.after_cycle(conversation, record).await?;

        Ok(AgentReply {
            content,
            invocations,
            usage,
        })
    }

    /// Snapshot of the conversation for durable persistence.
    pub async fn snapshot(&self) -> Vec<Message> {
        self.conversation.lock().await.clone()
    }

    /// Restores a persisted conversation (resume path).
    pub async fn restore(&self, messages: Vec<Message>) {
        *self.conversation.lock().await = messages;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockModel, ToolCallRequest};
    use serde_json::json;

    fn handle(client: Arc<dyn ModelClient>, tools: Vec<String>) -> AgentHandle {
        AgentHandle::new(
            "tester".into(),
            "You test.".into(),
            client,
            tools,
            Arc::new(ToolRegistry::with_builtins()),
            ToolContext {
                artifacts_dir: std::env::temp_dir(),
                security: Default::default(),
                interactive: false,
            },
            Arc::new(TokenMeter::new()),
            CycleHooks::default(),
        )
    }

    /// **Scenario**: a plain cycle seeds the system prompt, appends user and
    /// assistant messages, and accounts tokens.
    #[tokio::test]
    async fn plain_cycle() {
        let agent = handle(Arc::new(MockModel::reply("hello")), vec![]);
        let reply = agent.invoke("say hello").await.unwrap();
        assert_eq!(reply.content, "hello");
        assert!(reply.invocations.is_empty());
        assert!(agent.tokens() > 0);

        let snapshot = agent.snapshot().await;
        assert_eq!(snapshot.len(), 3);
        assert!(matches!(&snapshot[0], Message::System(s) if s == "You test."));
        assert!(matches!(&snapshot[1], Message::User(s) if s == "say hello"));
        assert!(matches!(&snapshot[2], Message::Assistant(s) if s == "hello"));
    }

    /// **Scenario**: a tool call round dispatches the tool and feeds the
    /// result back before the final answer.
    #[tokio::test]
    async fn tool_round_trip() {
        let model = MockModel::script_replies(vec![
            crate::llm::MockReply {
                content: "let me compute".into(),
                tool_calls: vec![ToolCallRequest {
                    name: "calculator".into(),
                    arguments: json!({"expression": "6*7"}),
                    id: Some("c1".into()),
                }],
            },
            crate::llm::MockReply::text("the answer is 42"),
        ]);
        let agent = handle(Arc::new(model), vec!["calculator".into()]);
        let reply = agent.invoke("what is 6*7").await.unwrap();
        assert_eq!(reply.content, "the answer is 42");
        assert_eq!(reply.invocations.len(), 1);
        assert_eq!(reply.invocations[0].output, "42");

        let snapshot = agent.snapshot().await;
        assert!(snapshot.iter().any(|m| m.is_tool_result()));
    }

    /// **Scenario**: a failed cycle rolls the conversation back so a retry
    /// starts from the same state.
    #[tokio::test]
    async fn failed_cycle_rolls_back() {
        let model = MockModel::reply("ok").with_transient_failures(1);
        let agent = handle(Arc::new(model), vec![]);
        let err = agent.invoke("first").await.unwrap_err();
        assert!(err.is_retryable(), "{err}");
        // system prompt only; the user turn was rolled back
        assert_eq!(agent.snapshot().await.len(), 1);

        let reply = agent.invoke("first").await.unwrap();
        assert_eq!(reply.content, "ok");
        assert_eq!(agent.snapshot().await.len(), 3);
    }
}
