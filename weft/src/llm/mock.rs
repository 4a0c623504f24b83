//! Deterministic mock model for tests, examples, and the CLI stub mode.
//!
//! Behaviors: fixed reply, echo of the last user message, a scripted
//! sequence consumed call by call, or reply-by-prompt-substring. Transient
//! failures can be injected ahead of the scripted behavior to exercise the
//! retry loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::agent::runtime::ResolvedRuntime;
use crate::message::{estimate_text_tokens, estimate_tokens, Message};
use crate::tools::ToolSpec;

use super::{ModelClient, ModelError, ModelFactory, ModelResponse, ModelUsage, ToolCallRequest};

/// One scripted reply: assistant text plus optional tool calls.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl MockReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

#[derive(Debug)]
enum Mode {
    Reply(MockReply),
    Echo,
    Script(Mutex<VecDeque<MockReply>>),
    ByPrompt(Vec<(String, MockReply)>),
    AlwaysInvalid(String),
}

/// Scripted model client with deterministic usage accounting.
#[derive(Debug)]
pub struct MockModel {
    mode: Mode,
    /// Calls that fail with a retryable server error before the mode applies.
    transient_failures: AtomicUsize,
    calls: AtomicUsize,
}

impl MockModel {
    /// Always returns the same assistant text.
    pub fn reply(content: impl Into<String>) -> Self {
        Self::with_mode(Mode::Reply(MockReply::text(content)))
    }

    /// Always returns the same text and tool calls.
    pub fn reply_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self::with_mode(Mode::Reply(MockReply {
            content: content.into(),
            tool_calls,
        }))
    }

    /// Returns the last User message verbatim. The stub used for data-flow
    /// scenarios: the response is exactly the rendered input.
    pub fn echo() -> Self {
        Self::with_mode(Mode::Echo)
    }

    /// Consumes one reply per call, in order. An exhausted script is an
    /// invalid-request error so tests fail loudly rather than loop.
    pub fn script<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::script_replies(replies.into_iter().map(|s| MockReply::text(s)).collect())
    }

    pub fn script_replies(replies: Vec<MockReply>) -> Self {
        Self::with_mode(Mode::Script(Mutex::new(replies.into_iter().collect())))
    }

    /// Picks the first reply whose needle occurs in the last user message.
    pub fn by_prompt<I, A, B>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<String>,
        B: Into<String>,
    {
        Self::with_mode(Mode::ByPrompt(
            pairs
                .into_iter()
                .map(|(needle, reply)| (needle.into(), MockReply::text(reply)))
                .collect(),
        ))
    }

    /// Always fails with a permanent error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::with_mode(Mode::AlwaysInvalid(message.into()))
    }

    /// Injects `n` retryable failures before the scripted behavior applies.
    pub fn with_transient_failures(self, n: usize) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Number of `invoke` calls made so far, including injected failures.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            transient_failures: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    fn last_user(messages: &[Message]) -> String {
        messages
            .iter()
            .rev()
            .find_map(|m| match m {
                Message::User(s) => Some(s.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModelClient for MockModel {
    async fn invoke(
        &self,
        messages: &[Message],
        _tools: &[ToolSpec],
    ) -> Result<ModelResponse, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ModelError::Server("injected transient failure".into()));
        }

        let reply = match &self.mode {
            Mode::Reply(r) => r.clone(),
            Mode::Echo => MockReply::text(Self::last_user(messages)),
            Mode::Script(queue) => {
                let mut queue = queue.lock().expect("script lock");
                queue.pop_front().ok_or_else(|| {
                    ModelError::InvalidRequest("mock script exhausted".to_string())
                })?
            }
            Mode::ByPrompt(pairs) => {
                let prompt = Self::last_user(messages);
                pairs
                    .iter()
                    .find(|(needle, _)| prompt.contains(needle.as_str()))
                    .map(|(_, reply)| reply.clone())
                    .ok_or_else(|| {
                        ModelError::InvalidRequest(format!(
                            "no mock reply matches prompt {:?}",
                            prompt
                        ))
                    })?
            }
            Mode::AlwaysInvalid(message) => {
                return Err(ModelError::InvalidRequest(message.clone()))
            }
        };

        let input_tokens = estimate_tokens(messages).max(1);
        let output_tokens = estimate_text_tokens(&reply.content).max(1);
        Ok(ModelResponse {
            content: reply.content,
            tool_calls: reply.tool_calls,
            usage: ModelUsage {
                input_tokens,
                output_tokens,
                total_tokens: input_tokens + output_tokens,
            },
        })
    }
}

/// Factory routing by `model_id`: a default client plus per-model overrides.
///
/// Tests give each agent a distinct `runtime.model_id` override to script
/// agents independently.
#[derive(Debug)]
pub struct MockModelFactory {
    default: Arc<MockModel>,
    by_model: Vec<(String, Arc<MockModel>)>,
}

impl MockModelFactory {
    pub fn new(default: Arc<MockModel>) -> Self {
        Self {
            default,
            by_model: Vec::new(),
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>, client: Arc<MockModel>) -> Self {
        self.by_model.push((model_id.into(), client));
        self
    }
}

impl ModelFactory for MockModelFactory {
    fn build(
        &self,
        runtime: &ResolvedRuntime,
    ) -> Result<Arc<dyn ModelClient>, ModelError> {
        let client = self
            .by_model
            .iter()
            .find(|(id, _)| id == &runtime.model_id)
            .map(|(_, c)| c.clone())
            .unwrap_or_else(|| self.default.clone());
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(s: &str) -> Vec<Message> {
        vec![Message::user(s)]
    }

    /// **Scenario**: fixed reply with non-zero usage.
    #[tokio::test]
    async fn fixed_reply() {
        let model = MockModel::reply("hi");
        let response = model.invoke(&user("say hi"), &[]).await.unwrap();
        assert_eq!(response.content, "hi");
        assert!(response.usage.total_tokens > 0);
        assert_eq!(model.calls(), 1);
    }

    /// **Scenario**: echo returns the last user message verbatim.
    #[tokio::test]
    async fn echo_reply() {
        let model = MockModel::echo();
        let response = model
            .invoke(&user("C-out:A-out|B-out"), &[])
            .await
            .unwrap();
        assert_eq!(response.content, "C-out:A-out|B-out");
    }

    /// **Scenario**: scripts consume in order and fail loudly when exhausted.
    #[tokio::test]
    async fn script_consumes_in_order() {
        let model = MockModel::script(["one", "two"]);
        assert_eq!(model.invoke(&user("a"), &[]).await.unwrap().content, "one");
        assert_eq!(model.invoke(&user("b"), &[]).await.unwrap().content, "two");
        let err = model.invoke(&user("c"), &[]).await.unwrap_err();
        assert!(matches!(err, ModelError::InvalidRequest(_)), "{err}");
    }

    /// **Scenario**: transient failures precede the scripted reply and are retryable.
    #[tokio::test]
    async fn transient_failures_first() {
        let model = MockModel::reply("ok").with_transient_failures(2);
        let e1 = model.invoke(&user("x"), &[]).await.unwrap_err();
        assert!(e1.is_retryable());
        let e2 = model.invoke(&user("x"), &[]).await.unwrap_err();
        assert!(e2.is_retryable());
        assert_eq!(model.invoke(&user("x"), &[]).await.unwrap().content, "ok");
        assert_eq!(model.calls(), 3);
    }

    /// **Scenario**: by_prompt routes on substrings of the last user message.
    #[tokio::test]
    async fn by_prompt_routing() {
        let model = MockModel::by_prompt([("weather", "sunny"), ("news", "quiet")]);
        assert_eq!(
            model
                .invoke(&user("what is the weather"), &[])
                .await
                .unwrap()
                .content,
            "sunny"
        );
        assert_eq!(
            model.invoke(&user("any news"), &[]).await.unwrap().content,
            "quiet"
        );
        assert!(model.invoke(&user("other"), &[]).await.is_err());
    }
}
