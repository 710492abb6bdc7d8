//! Integration tests for suspend/resume, watchers and rehydration from the
//! snapshot store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use loom_engine::{ChannelListener, EngineError, TransitionEvent, WorkflowRuntime};
use loom_store::{MemorySnapshotStore, SnapshotStore};
use loom_workflow::{
  Condition, JsonSchema, RunStatus, Step, StepContext, StepResult, StepStatus, Workflow,
};
use serde_json::json;

/// Suspends with a question until resumed, then returns the decision.
fn approval(id: &str) -> Step {
  Step::new(id, |ctx: StepContext| async move {
    if !ctx.is_resuming() {
      ctx.suspend(json!({"question": "publish this draft?"}));
      return Ok(json!(null));
    }
    Ok(json!({"approved": ctx.input()["approved"].clone()}))
  })
}

fn review_workflow() -> Arc<Workflow> {
  Workflow::builder("review")
    .step(Step::new("draft", |_| async { Ok(json!({"text": "hello"})) }))
    .then(approval("approve").with_resume_schema(JsonSchema::new(json!({
      "type": "object",
      "properties": { "approved": { "type": "boolean" } },
      "required": ["approved"]
    }))))
    .then(Step::new("publish", |_| async { Ok(json!("published")) }))
    .when(Condition::reference("approve", "approved").eq(true))
    .commit()
    .unwrap()
}

#[tokio::test]
async fn test_suspend_parks_the_path() {
  let runtime = WorkflowRuntime::new(review_workflow(), Arc::new(MemorySnapshotStore::new()));
  let state = runtime.create_run().start(json!({})).await.unwrap();

  assert_eq!(state.status(), RunStatus::Suspended);
  assert_eq!(state.active_paths, vec!["approve"]);
  assert_eq!(
    state.result("approve"),
    Some(&StepResult::Suspended {
      payload: json!({"question": "publish this draft?"})
    })
  );
  assert_eq!(state.status_of("publish"), None);
}

#[tokio::test]
async fn test_resume_round_trip() {
  let runtime = WorkflowRuntime::new(review_workflow(), Arc::new(MemorySnapshotStore::new()));
  let run = runtime.create_run();
  run.start(json!({})).await.unwrap();

  let state = run
    .resume("approve", json!({"approved": true}))
    .await
    .unwrap();

  assert_eq!(
    state.result("approve").and_then(StepResult::output),
    Some(&json!({"approved": true}))
  );
  assert_eq!(state.status_of("publish"), Some(StepStatus::Success));
  assert_eq!(state.status(), RunStatus::Completed);

  assert!(matches!(
    run.resume("approve", json!({"approved": true})).await,
    Err(EngineError::AlreadyResumed { ref step_id }) if step_id == "approve"
  ));
}

#[tokio::test]
async fn test_rejected_resume_leaves_state_untouched() {
  let runtime = WorkflowRuntime::new(review_workflow(), Arc::new(MemorySnapshotStore::new()));
  let run = runtime.create_run();
  let before = run.start(json!({})).await.unwrap();

  let err = run
    .resume("approve", json!({"approved": "yes"}))
    .await
    .unwrap_err();
  assert!(matches!(err, EngineError::SchemaValidation { .. }));
  assert_eq!(run.state().await, Some(before));

  // A valid resume is still accepted afterwards.
  let state = run
    .resume("approve", json!({"approved": false}))
    .await
    .unwrap();
  assert_eq!(state.result("publish"), Some(&StepResult::Skipped));
}

#[tokio::test]
async fn test_resume_misuse() {
  let runtime = WorkflowRuntime::new(review_workflow(), Arc::new(MemorySnapshotStore::new()));
  let run = runtime.create_run();
  run.start(json!({})).await.unwrap();

  assert!(matches!(
    run.resume("draft", json!({})).await,
    Err(EngineError::NotSuspended {
      status: Some(StepStatus::Success),
      ..
    })
  ));
  assert!(matches!(
    run.resume("publish", json!({})).await,
    Err(EngineError::NotSuspended { status: None, .. })
  ));
  assert!(matches!(
    run.resume("missing", json!({})).await,
    Err(EngineError::StepNotFound { .. })
  ));
  assert!(matches!(
    runtime.resume("no-such-run", "approve", json!({})).await,
    Err(EngineError::RunNotFound { .. })
  ));
}

#[tokio::test]
async fn test_resume_from_another_runtime() {
  let store: Arc<dyn SnapshotStore> = Arc::new(MemorySnapshotStore::new());
  let workflow = review_workflow();

  let first = WorkflowRuntime::new(workflow.clone(), store.clone());
  first.create_run_with_id("run-1").start(json!({})).await.unwrap();

  // A fresh runtime only knows the run through the store.
  let second = WorkflowRuntime::new(workflow, store.clone());
  let suspended = second.snapshot("run-1").await.unwrap();
  assert_eq!(suspended.status(), RunStatus::Suspended);

  let state = second
    .resume("run-1", "approve", json!({"approved": true}))
    .await
    .unwrap();
  assert_eq!(state.status(), RunStatus::Completed);

  let persisted = store.load("workflows", "review", "run-1").await.unwrap();
  assert_eq!(persisted, Some(state));
}

#[tokio::test]
async fn test_parallel_suspensions_resume_independently() {
  let workflow = Workflow::builder("two-approvals")
    .step(approval("legal"))
    .step(approval("editor"))
    .after(["legal", "editor"])
    .step(Step::new("ship", |_| async { Ok(json!("shipped")) }))
    .commit()
    .unwrap();

  let runtime = WorkflowRuntime::new(workflow, Arc::new(MemorySnapshotStore::new()));
  let run = runtime.create_run();

  let state = run.start(json!({})).await.unwrap();
  assert_eq!(state.status(), RunStatus::Suspended);
  assert_eq!(state.active_paths, vec!["legal", "editor"]);

  let state = run
    .resume("editor", json!({"approved": true}))
    .await
    .unwrap();
  assert_eq!(state.status(), RunStatus::Suspended);
  assert_eq!(state.active_paths, vec!["legal"]);
  assert_eq!(state.status_of("ship"), None);

  let state = run
    .resume("legal", json!({"approved": true}))
    .await
    .unwrap();
  assert_eq!(state.status_of("ship"), Some(StepStatus::Success));
  assert_eq!(state.status(), RunStatus::Completed);
}

#[tokio::test]
async fn test_watchers_see_every_settle_in_order() {
  let store = Arc::new(MemorySnapshotStore::new());
  let workflow = Workflow::builder("linear")
    .step(Step::new("a", |_| async { Ok(json!(1)) }))
    .then(Step::new("b", |_| async { Ok(json!(2)) }))
    .then(Step::new("c", |_| async { Ok(json!(3)) }))
    .commit()
    .unwrap();

  let runtime = WorkflowRuntime::new(workflow, store.clone());
  let run = runtime.create_run_with_id("run-1");

  let seen = Arc::new(Mutex::new(Vec::new()));
  let recorder = seen.clone();
  run.watch(move |event: &TransitionEvent<'_>| {
    recorder
      .lock()
      .unwrap()
      .push((event.step_id.to_string(), event.active_paths.to_vec()));
  });
  let (listener, mut transitions) = ChannelListener::channel();
  run.watch(listener);

  let state = run.start(json!({})).await.unwrap();

  assert_eq!(
    *seen.lock().unwrap(),
    vec![
      ("a".to_string(), vec!["b".to_string()]),
      ("b".to_string(), vec!["c".to_string()]),
      ("c".to_string(), vec![]),
    ]
  );

  let mut last = None;
  while let Ok(transition) = transitions.try_recv() {
    assert_eq!(transition.run_id, "run-1");
    assert_eq!(transition.status, StepStatus::Success);
    last = Some(transition);
  }

  // Each event carries the state that was persisted for it.
  let last = last.unwrap();
  assert_eq!(last.state, state);
  let persisted = store.load("workflows", "linear", "run-1").await.unwrap();
  assert_eq!(persisted, Some(last.state));
}

#[tokio::test]
async fn test_watcher_resumes_suspended_step() {
  let runtime = WorkflowRuntime::new(review_workflow(), Arc::new(MemorySnapshotStore::new()));
  let run = runtime.create_run();

  let resumer = run.clone();
  run.watch(move |event: &TransitionEvent<'_>| {
    if event.step_id == "approve" && event.status == StepStatus::Suspended {
      let run = resumer.clone();
      tokio::spawn(async move {
        let _ = run.resume("approve", json!({"approved": true})).await;
      });
    }
  });
  let (listener, mut transitions) = ChannelListener::channel();
  run.watch(listener);

  let state = run.start(json!({})).await.unwrap();
  assert_eq!(state.status(), RunStatus::Suspended);

  let published = tokio::time::timeout(Duration::from_secs(5), async {
    while let Some(transition) = transitions.recv().await {
      if transition.step_id == "publish" {
        return Some(transition);
      }
    }
    None
  })
  .await
  .unwrap()
  .unwrap();

  assert_eq!(published.status, StepStatus::Success);
  assert_eq!(published.state.status(), RunStatus::Completed);
}

#[tokio::test]
async fn test_watch_through_runtime() {
  let runtime = WorkflowRuntime::new(review_workflow(), Arc::new(MemorySnapshotStore::new()));

  assert!(matches!(
    runtime
      .watch("missing", |_: &TransitionEvent<'_>| {})
      .await,
    Err(EngineError::RunNotFound { .. })
  ));

  let run = runtime.create_run_with_id("run-1");
  run.start(json!({})).await.unwrap();

  let (listener, mut transitions) = ChannelListener::channel();
  let handle = runtime.watch("run-1", listener).await.unwrap();
  assert_eq!(handle.run_id(), "run-1");
  assert!(runtime.unwatch(&handle));

  runtime
    .resume("run-1", "approve", json!({"approved": true}))
    .await
    .unwrap();
  assert!(transitions.try_recv().is_err());
}

#[tokio::test]
async fn test_completed_run_drops_its_watchers() {
  let runtime = WorkflowRuntime::new(review_workflow(), Arc::new(MemorySnapshotStore::new()));
  let run = runtime.create_run_with_id("run-1");
  let (listener, mut transitions) = ChannelListener::channel();
  run.watch(listener);

  run.start(json!({})).await.unwrap();
  assert_eq!(runtime.watcher_count("run-1"), 1);

  run
    .resume("approve", json!({"approved": true}))
    .await
    .unwrap();
  assert_eq!(runtime.watcher_count("run-1"), 0);

  // Buffered transitions drain, then the channel reports closed.
  let mut steps = Vec::new();
  while let Some(transition) = transitions.recv().await {
    steps.push(transition.step_id);
  }
  assert_eq!(steps, vec!["draft", "approve", "approve", "publish"]);

  assert!(runtime.release("run-1"));
  assert_eq!(runtime.live_runs(), 0);
  let state = runtime.snapshot("run-1").await.unwrap();
  assert_eq!(state.status(), RunStatus::Completed);
}
