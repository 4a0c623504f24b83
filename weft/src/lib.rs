//! Weft: a declarative agentic-workflow orchestration engine.
//!
//! Workflows are declared documents whose nodes are LLM-backed agents,
//! composed under one of seven patterns (chain, routing, parallel,
//! workflow-DAG, evaluator-optimizer, orchestrator-workers, graph), with
//! durable sessions, budget enforcement, retries, context management, and
//! human-in-the-loop pause/resume.
//!
//! The engine is leaves-first: the spec model and capability gate decide
//! whether a document is runnable; the template and expression sandbox
//! renders prompts over a concrete [`scope::Scope`]; pattern executors drive
//! render → invoke → record → checkpoint loops; the session store persists
//! every boundary by atomic replace. Provider transports are supplied by the
//! embedder through [`llm::ModelFactory`]; the crate ships a deterministic
//! [`llm::MockModel`] for tests and stub runs.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use weft::engine::Engine;
//! use weft::llm::{MockModel, MockModelFactory};
//! use weft::spec::load;
//!
//! # async fn run() -> Result<(), weft::error::EngineError> {
//! let doc = std::fs::read_to_string("workflow.yaml")?;
//! let spec = load::from_str(&doc)?;
//! let engine = Engine::builder()
//!     .model_factory(Arc::new(MockModelFactory::new(Arc::new(MockModel::reply("hi")))))
//!     .build()?;
//! let outcome = engine.run(spec, doc.into_bytes(), &[]).await?;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod artifacts;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod llm;
pub mod message;
pub mod pattern;
pub mod scope;
pub mod session;
pub mod spec;
pub mod template;
pub mod tools;
pub mod trace;

pub use engine::{Engine, RunOutcome};
pub use error::{EngineError, EXIT_OK, EXIT_PAUSED};
