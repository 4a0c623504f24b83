//! Stub model scripts for offline runs.
//!
//! `weft run --stub stub.yaml` drives workflows with deterministic replies
//! instead of a live provider. One stub describes the default behavior and
//! optional per-model overrides (agents opt in via a `runtime.model_id`
//! override):
//!
//! ```yaml
//! mode: echo            # echo the rendered input back
//! # or:
//! replies: ["one", "two"]
//! # or:
//! by_prompt:
//!   - { contains: "weather", reply: "sunny" }
//! models:
//!   router-model: { replies: ['{"route": "faq"}'] }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use weft::llm::{MockModel, MockModelFactory};

#[derive(Debug, Error)]
pub enum StubError {
    #[error("read stub: {0}")]
    Read(std::io::Error),
    #[error("parse stub: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("stub entry needs mode, replies, or by_prompt")]
    Empty,
}

#[derive(Debug, Clone, Deserialize)]
struct StubEntry {
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    replies: Option<Vec<String>>,
    #[serde(default)]
    by_prompt: Option<Vec<ByPrompt>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ByPrompt {
    contains: String,
    reply: String,
}

#[derive(Debug, Clone, Deserialize)]
struct StubSpec {
    #[serde(flatten)]
    default: StubEntry,
    #[serde(default)]
    models: BTreeMap<String, StubEntry>,
}

fn build_model(entry: &StubEntry) -> Result<Arc<MockModel>, StubError> {
    if entry.mode.as_deref() == Some("echo") {
        return Ok(Arc::new(MockModel::echo()));
    }
    if let Some(replies) = &entry.replies {
        return Ok(Arc::new(MockModel::script(replies.iter().cloned())));
    }
    if let Some(pairs) = &entry.by_prompt {
        return Ok(Arc::new(MockModel::by_prompt(
            pairs.iter().map(|p| (p.contains.clone(), p.reply.clone())),
        )));
    }
    Err(StubError::Empty)
}

/// Loads a stub script into a model factory.
pub fn load_stub_factory(path: &Path) -> Result<MockModelFactory, StubError> {
    let content = std::fs::read_to_string(path).map_err(StubError::Read)?;
    let spec: StubSpec = serde_yaml::from_str(&content)?;
    let mut factory = MockModelFactory::new(build_model(&spec.default)?);
    for (model_id, entry) in &spec.models {
        factory = factory.with_model(model_id.clone(), build_model(entry)?);
    }
    Ok(factory)
}
