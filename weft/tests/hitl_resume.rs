//! Human-in-the-loop pause and resume: approve, reject, modify, timeout.

use std::sync::Arc;

use weft::engine::{Engine, RunOutcome};
use weft::llm::{MockModel, MockModelFactory};
use weft::session::{ResumeDecision, SessionStatus, SessionStore};
use weft::spec::load;

const GATED: &str = r#"
name: gated
runtime: { provider: openai, model_id: stub-model }
agents:
  worker: { prompt: "You work." }
pattern:
  type: chain
  steps:
    - { type: agent, agent: worker, input: "draft the report" }
    - { type: manual_gate, id: review-gate, prompt: "Publish {{ last_response }}?" }
    - { type: agent, agent: worker, input: "publish ({{ hitl.response }})" }
"#;

fn engine(dir: &std::path::Path, model: Arc<MockModel>) -> Engine {
    Engine::builder()
        .model_factory(Arc::new(MockModelFactory::new(model)))
        .session_root(dir.join("store"))
        .output_dir(dir.join("artifacts"))
        .env(Default::default())
        .build()
        .unwrap()
}

async fn run_to_gate(engine: &Engine) -> String {
    let spec = load::from_str(GATED).unwrap();
    let outcome = engine
        .run(spec, GATED.as_bytes().to_vec(), &[])
        .await
        .unwrap();
    let RunOutcome::Paused {
        session_id,
        interrupt,
    } = outcome
    else {
        panic!("expected pause");
    };
    assert_eq!(interrupt.gate_id, "review-gate");
    assert_eq!(interrupt.prompt, "Publish draft the report?");
    session_id
}

/// **Scenario**: the run pauses at the gate with the session Paused and an
/// interrupt pending; approve resumes past it without re-running step 0.
#[tokio::test]
async fn pause_then_approve() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(MockModel::echo());
    let engine = engine(dir.path(), model.clone());

    let session_id = run_to_gate(&engine).await;
    assert_eq!(model.calls(), 1);

    let paused = engine.store().load(&session_id).await.unwrap();
    assert_eq!(paused.metadata.status, SessionStatus::Paused);
    let interrupt = paused.metadata.interrupt.as_ref().unwrap();
    assert!(interrupt.response.is_none(), "interrupt still pending");

    let outcome = engine
        .resume(&session_id, ResumeDecision::Approve)
        .await
        .unwrap();
    let RunOutcome::Completed { last_response, .. } = outcome else {
        panic!("expected completion");
    };
    assert_eq!(last_response, "publish (approve)");
    // step 0 was not re-executed on resume
    assert_eq!(model.calls(), 2);

    let done = engine.store().load(&session_id).await.unwrap();
    assert_eq!(done.metadata.status, SessionStatus::Completed);
}

/// **Scenario**: reject finalizes the session as failed with the feedback
/// recorded.
#[tokio::test]
async fn reject_finalizes_failed() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path(), Arc::new(MockModel::echo()));
    let session_id = run_to_gate(&engine).await;

    let err = engine
        .resume(
            &session_id,
            ResumeDecision::Reject {
                feedback: Some("not good enough".into()),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, weft::EngineError::Pattern(_)), "{err}");

    let session = engine.store().load(&session_id).await.unwrap();
    assert_eq!(session.metadata.status, SessionStatus::Failed);
    assert!(session
        .metadata
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("not good enough"));
    assert!(session.metadata.interrupt.unwrap().response.is_some());
}

/// **Scenario**: modify re-executes the previous step with the feedback in
/// scope, then pauses at the gate again for a fresh decision.
#[tokio::test]
async fn modify_reexecutes_previous_step() {
    let doc = r#"
name: modifiable
runtime: { provider: openai, model_id: stub-model }
agents:
  worker: { prompt: "You work." }
pattern:
  type: chain
  steps:
    - { type: agent, agent: worker, input: "draft {{ hitl.feedback | default(\"v1\") }}" }
    - { type: manual_gate, id: check, prompt: "Keep {{ last_response }}?" }
"#;
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path(), Arc::new(MockModel::echo()));
    let spec = load::from_str(doc).unwrap();
    let outcome = engine.run(spec, doc.as_bytes().to_vec(), &[]).await.unwrap();
    let RunOutcome::Paused { session_id, .. } = outcome else {
        panic!("expected pause");
    };

    let outcome = engine
        .resume(
            &session_id,
            ResumeDecision::Modify {
                feedback: "with charts".into(),
            },
        )
        .await
        .unwrap();
    let RunOutcome::Paused { interrupt, .. } = outcome else {
        panic!("expected a second pause");
    };
    assert_eq!(interrupt.prompt, "Keep draft with charts?");

    let outcome = engine
        .resume(&session_id, ResumeDecision::Approve)
        .await
        .unwrap();
    let RunOutcome::Completed { last_response, .. } = outcome else {
        panic!("expected completion");
    };
    assert_eq!(last_response, "draft with charts");
}

/// **Scenario**: an expired gate timeout fails the session on resume.
#[tokio::test]
async fn gate_timeout_fails() {
    let doc = r#"
name: timed
runtime: { provider: openai, model_id: stub-model }
agents:
  worker: { prompt: "You work." }
pattern:
  type: chain
  steps:
    - { type: agent, agent: worker, input: "draft" }
    - { type: manual_gate, id: fast-gate, prompt: "Quick?", timeout_s: 0 }
"#;
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path(), Arc::new(MockModel::echo()));
    let spec = load::from_str(doc).unwrap();
    let outcome = engine.run(spec, doc.as_bytes().to_vec(), &[]).await.unwrap();
    let RunOutcome::Paused { session_id, .. } = outcome else {
        panic!("expected pause");
    };

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let err = engine
        .resume(&session_id, ResumeDecision::Approve)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("timed out"), "{err}");

    let session = engine.store().load(&session_id).await.unwrap();
    assert_eq!(session.metadata.status, SessionStatus::Failed);
}

/// **Scenario**: resuming a failed session is a usage error.
#[tokio::test]
async fn resume_failed_is_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path(), Arc::new(MockModel::echo()));
    let session_id = run_to_gate(&engine).await;
    let _ = engine
        .resume(&session_id, ResumeDecision::Reject { feedback: None })
        .await
        .unwrap_err();

    let err = engine
        .resume(&session_id, ResumeDecision::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, weft::EngineError::Usage(_)), "{err}");
    assert_eq!(err.exit_code(), 2);
}
