//! Model client abstraction: invoke, token counting, pooled construction.
//!
//! The engine never talks to a provider directly; it consumes a
//! `ModelClient` built by a `ModelFactory` the embedder supplies. Clients
//! are pooled by `(provider, model_id, region_or_host)` so many agents share
//! one transport. `MockModel` is the deterministic stub used by tests and
//! the CLI's `--stub` mode.

mod mock;

pub use mock::{MockModel, MockModelFactory, MockReply};

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::agent::runtime::ResolvedRuntime;
use crate::message::{estimate_tokens, Message};
use crate::tools::ToolSpec;

/// Supported model providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Bedrock,
    OpenAi,
    Ollama,
}

impl Provider {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bedrock" => Some(Provider::Bedrock),
            "openai" => Some(Provider::OpenAi),
            "ollama" => Some(Provider::Ollama),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Bedrock => "bedrock",
            Provider::OpenAi => "openai",
            Provider::Ollama => "ollama",
        }
    }
}

/// Token usage for one model call.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct ModelUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl ModelUsage {
    pub fn add(&mut self, other: &ModelUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// One tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: serde_json::Value,
    pub id: Option<String>,
}

/// Response from one model call: assistant text plus requested tool calls.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: ModelUsage,
}

/// Provider failure, split into retryable and permanent classes.
#[derive(Debug, Error)]
pub enum ModelError {
    /// 429 and provider-side throttling.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Connection errors and transport timeouts.
    #[error("transport: {0}")]
    Transport(String),
    /// 5xx class responses.
    #[error("server: {0}")]
    Server(String),
    /// 4xx other than 429.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unknown model: {0}")]
    UnknownModel(String),
    /// No transport available for the resolved runtime.
    #[error("no client for {0}")]
    Unavailable(String),
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ModelError::RateLimited(_) | ModelError::Transport(_) | ModelError::Server(_)
        )
    }
}

/// A model client: messages in, assistant text and tool calls out.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelResponse, ModelError>;

    /// Token count for a prompt; default is the chars/4 heuristic.
    fn count_tokens(&self, messages: &[Message]) -> u32 {
        estimate_tokens(messages)
    }
}

/// Builds clients for resolved runtimes. Supplied by the embedder; the
/// engine ships only the mock factory.
pub trait ModelFactory: Send + Sync {
    fn build(&self, runtime: &ResolvedRuntime) -> Result<Arc<dyn ModelClient>, ModelError>;
}

/// Pool key: agents with the same transport coordinates share one client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    provider: Provider,
    model_id: String,
    location: Option<String>,
}

/// Client pool: insert-only within a workflow's life.
pub struct ClientPool {
    factory: Arc<dyn ModelFactory>,
    clients: DashMap<PoolKey, Arc<dyn ModelClient>>,
}

impl ClientPool {
    pub fn new(factory: Arc<dyn ModelFactory>) -> Self {
        Self {
            factory,
            clients: DashMap::new(),
        }
    }

    /// Returns the pooled client for a runtime, building it on first use.
    pub fn get(&self, runtime: &ResolvedRuntime) -> Result<Arc<dyn ModelClient>, ModelError> {
        let key = PoolKey {
            provider: runtime.provider,
            model_id: runtime.model_id.clone(),
            location: runtime.location().map(str::to_string),
        };
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }
        let client = self.factory.build(runtime)?;
        let entry = self.clients.entry(key).or_insert(client);
        Ok(entry.clone())
    }

    /// Number of distinct clients built so far.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
