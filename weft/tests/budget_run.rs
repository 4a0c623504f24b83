//! Token budget enforcement end-to-end: one warning, then termination.

use std::sync::Arc;

use weft::engine::{Engine, RunOutcome};
use weft::events::{CollectingSubscriber, WorkflowEvent};
use weft::llm::{MockModel, MockModelFactory};
use weft::session::{SessionStatus, SessionStore};
use weft::spec::load;

const CHATTY: &str = r#"
name: chatty
runtime:
  provider: openai
  model_id: stub-model
  budgets: { max_tokens: 400 }
agents:
  talker: { prompt: "You talk." }
pattern:
  type: chain
  steps:
    - { type: agent, agent: talker, input: "one" }
    - { type: agent, agent: talker, input: "two" }
    - { type: agent, agent: talker, input: "three" }
context_policy:
  budget: { warn_threshold: 0.2 }
"#;

fn engine(dir: &std::path::Path, sink: Arc<CollectingSubscriber>) -> Engine {
    // every reply is ~100 output tokens, so usage climbs fast
    let model = Arc::new(MockModel::reply("x".repeat(400)));
    Engine::builder()
        .model_factory(Arc::new(MockModelFactory::new(model)))
        .session_root(dir.join("store"))
        .output_dir(dir.join("artifacts"))
        .subscribe(sink)
        .env(Default::default())
        .build()
        .unwrap()
}

/// **Scenario**: the warn threshold fires exactly once, the hard budget
/// terminates with exit 19, and the session finalizes as failed with the
/// partial step history preserved.
#[tokio::test]
async fn warn_once_then_terminate() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(CollectingSubscriber::new());
    let engine = engine(dir.path(), sink.clone());
    let spec = load::from_str(CHATTY).unwrap();

    let err = engine
        .run(spec, CHATTY.as_bytes().to_vec(), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, weft::EngineError::BudgetExceeded(_)), "{err}");
    assert_eq!(err.exit_code(), 19);

    let warnings = sink
        .events()
        .iter()
        .filter(|e| matches!(e, WorkflowEvent::BudgetWarning { .. }))
        .count();
    assert_eq!(warnings, 1, "warn threshold fires at most once");

    let sessions = engine
        .store()
        .list(Some(SessionStatus::Failed))
        .await
        .unwrap();
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert!(session
        .metadata
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("budget"));
    // partial outputs survive for inspection
    assert!(session.token_usage.total > 0);
    let state = engine
        .store()
        .load_pattern_state(&session.session_id)
        .await
        .unwrap();
    let weft::pattern::state::PatternState::Chain(chain) = state else {
        panic!("expected chain state");
    };
    assert!(!chain.step_history.is_empty());
}

/// **Scenario**: a workflow under budget emits no warning.
#[tokio::test]
async fn under_budget_is_quiet() {
    let doc = r#"
name: quiet
runtime:
  provider: openai
  model_id: stub-model
  budgets: { max_tokens: 100000 }
agents:
  talker: { prompt: "You talk." }
pattern:
  type: chain
  steps:
    - { type: agent, agent: talker, input: "one" }
"#;
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(CollectingSubscriber::new());
    let engine = engine(dir.path(), sink.clone());
    let spec = load::from_str(doc).unwrap();
    let outcome = engine.run(spec, doc.as_bytes().to_vec(), &[]).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert!(sink
        .events()
        .iter()
        .all(|e| !matches!(e, WorkflowEvent::BudgetWarning { .. })));
}

/// **Scenario**: the step budget terminates a runaway loop with exit 19.
#[tokio::test]
async fn step_budget_terminates() {
    let doc = r#"
name: stepper
runtime:
  provider: openai
  model_id: stub-model
  budgets: { max_steps: 2 }
agents:
  spinner: { prompt: "You spin." }
pattern:
  type: graph
  start_node: spin
  max_iterations: 100
  nodes:
    spin: { agent: spinner, input: "go" }
  edges:
    - { from: spin, to: spin }
"#;
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(CollectingSubscriber::new());
    let engine = engine(dir.path(), sink);
    let spec = load::from_str(doc).unwrap();
    let err = engine
        .run(spec, doc.as_bytes().to_vec(), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, weft::EngineError::BudgetExceeded(_)), "{err}");
    assert_eq!(err.exit_code(), 19);
}
