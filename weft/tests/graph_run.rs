//! Graph executor end-to-end: conditional loops and the iteration cap.

use std::sync::Arc;

use weft::engine::{Engine, RunOutcome};
use weft::llm::{MockModel, MockModelFactory};
use weft::pattern::state::PatternState;
use weft::session::{SessionStatus, SessionStore};
use weft::spec::load;

const DRAFT_REVIEW: &str = r#"
name: draft-review
runtime: { provider: openai, model_id: stub-model }
agents:
  drafter:
    prompt: "You draft."
    runtime: { model_id: draft-model }
  reviewer:
    prompt: "You review."
    runtime: { model_id: review-model }
pattern:
  type: graph
  start_node: draft
  max_iterations: 10
  nodes:
    draft: { agent: drafter, input: "write a draft" }
    review: { agent: reviewer, input: "review {{ nodes.draft.response }}" }
  edges:
    - { from: draft, to: review }
    - from: review
      choose:
        - { when: "evaluation.score < 80", to: draft }
        - { when: "else", to: terminal }
"#;

fn engine(
    dir: &std::path::Path,
    drafter: Arc<MockModel>,
    reviewer: Arc<MockModel>,
) -> Engine {
    let factory = MockModelFactory::new(Arc::new(MockModel::echo()))
        .with_model("draft-model", drafter)
        .with_model("review-model", reviewer);
    Engine::builder()
        .model_factory(Arc::new(factory))
        .session_root(dir.join("store"))
        .output_dir(dir.join("artifacts"))
        .env(Default::default())
        .build()
        .unwrap()
}

/// **Scenario**: review scores 70, 70, 85 loop back twice, then the else
/// arm terminates at review after three review invocations.
#[tokio::test]
async fn loops_until_score_passes() {
    let dir = tempfile::tempdir().unwrap();
    let drafter = Arc::new(MockModel::script(["d1", "d2", "d3"]));
    let reviewer = Arc::new(MockModel::script([
        r#"{"score": 70}"#,
        r#"{"score": 70}"#,
        r#"{"score": 85}"#,
    ]));
    let engine = engine(dir.path(), drafter.clone(), reviewer.clone());
    let spec = load::from_str(DRAFT_REVIEW).unwrap();
    let outcome = engine
        .run(spec, DRAFT_REVIEW.as_bytes().to_vec(), &[])
        .await
        .unwrap();
    let RunOutcome::Completed {
        session_id,
        last_response,
        ..
    } = outcome
    else {
        panic!("expected completion");
    };
    assert_eq!(reviewer.calls(), 3);
    assert_eq!(drafter.calls(), 3);
    assert_eq!(last_response, r#"{"score": 85}"#);

    let PatternState::Graph(state) = engine
        .store()
        .load_pattern_state(&session_id)
        .await
        .unwrap()
    else {
        panic!("expected graph state");
    };
    assert_eq!(state.terminal_node.as_deref(), Some("review"));
    assert_eq!(state.iteration, 6); // three drafts + three reviews
    assert_eq!(
        state.visited,
        ["draft", "review", "draft", "review", "draft", "review"]
    );
}

/// **Scenario**: reaching max_iterations terminates cleanly at the current
/// node; the session completes, no error.
#[tokio::test]
async fn iteration_cap_terminates_without_error() {
    let doc = r#"
name: spinner
runtime: { provider: openai, model_id: stub-model }
agents:
  spinner: { prompt: "You spin." }
pattern:
  type: graph
  start_node: spin
  max_iterations: 3
  nodes:
    spin: { agent: spinner, input: "around again" }
  edges:
    - { from: spin, to: spin }
"#;
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(
        dir.path(),
        Arc::new(MockModel::echo()),
        Arc::new(MockModel::echo()),
    );
    let spec = load::from_str(doc).unwrap();
    let outcome = engine.run(spec, doc.as_bytes().to_vec(), &[]).await.unwrap();
    let RunOutcome::Completed { session_id, .. } = outcome else {
        panic!("expected completion");
    };

    let session = engine.store().load(&session_id).await.unwrap();
    assert_eq!(session.metadata.status, SessionStatus::Completed);

    let PatternState::Graph(state) = engine
        .store()
        .load_pattern_state(&session_id)
        .await
        .unwrap()
    else {
        panic!("expected graph state");
    };
    assert_eq!(state.iteration, 3);
    assert_eq!(state.terminal_node.as_deref(), Some("spin"));
}

/// **Scenario**: a node with no outgoing edge is terminal.
#[tokio::test]
async fn missing_edge_is_terminal() {
    let doc = r#"
name: dead-end
runtime: { provider: openai, model_id: stub-model }
agents:
  walker: { prompt: "You walk." }
pattern:
  type: graph
  start_node: only
  nodes:
    only: { agent: walker, input: "step" }
  edges: []
"#;
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(
        dir.path(),
        Arc::new(MockModel::echo()),
        Arc::new(MockModel::echo()),
    );
    let spec = load::from_str(doc).unwrap();
    let outcome = engine.run(spec, doc.as_bytes().to_vec(), &[]).await.unwrap();
    let RunOutcome::Completed {
        session_id,
        last_response,
        ..
    } = outcome
    else {
        panic!("expected completion");
    };
    assert_eq!(last_response, "step");
    let PatternState::Graph(state) = engine
        .store()
        .load_pattern_state(&session_id)
        .await
        .unwrap()
    else {
        panic!("expected graph state");
    };
    assert_eq!(state.terminal_node.as_deref(), Some("only"));
}
