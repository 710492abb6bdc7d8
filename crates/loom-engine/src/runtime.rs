use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use loom_store::SnapshotStore;
use loom_workflow::{Access, RunState, Workflow};
use serde_json::Value;
use tracing::debug;

use crate::config::RuntimeConfig;
use crate::error::EngineError;
use crate::run::{Run, RuntimeShared};
use crate::watch::{TransitionListener, WatchHandle, WatcherRegistry};

/// Entry point for executing a committed workflow.
///
/// Holds the workflow, the snapshot store every run persists to, and the
/// watcher registry. Runs created here stay in memory until released; runs
/// created by another process (or an earlier one) are rehydrated from the
/// store on demand.
pub struct WorkflowRuntime {
  shared: Arc<RuntimeShared>,
  runs: Mutex<HashMap<String, Run>>,
}

impl WorkflowRuntime {
  pub fn new(workflow: Arc<Workflow>, store: Arc<dyn SnapshotStore>) -> Self {
    Self {
      shared: Arc::new(RuntimeShared {
        workflow,
        store,
        config: RuntimeConfig::default(),
        access: Access::new(),
        watchers: Arc::new(WatcherRegistry::new()),
      }),
      runs: Mutex::new(HashMap::new()),
    }
  }

  /// Replace the configuration. Affects runs created afterwards.
  pub fn with_config(mut self, config: RuntimeConfig) -> Self {
    Arc::make_mut(&mut self.shared).config = config;
    self
  }

  /// Capabilities made available to every step through `ctx.access()`.
  pub fn with_access(mut self, access: Access) -> Self {
    Arc::make_mut(&mut self.shared).access = access;
    self
  }

  pub fn workflow(&self) -> &Arc<Workflow> {
    &self.shared.workflow
  }

  pub fn config(&self) -> &RuntimeConfig {
    &self.shared.config
  }

  /// Create a run with a fresh uuid.
  pub fn create_run(&self) -> Run {
    self.create_run_with_id(uuid::Uuid::new_v4().to_string())
  }

  /// Create a run with a caller-chosen id, or return the live run with that id.
  pub fn create_run_with_id(&self, run_id: impl Into<String>) -> Run {
    let run_id = run_id.into();
    let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
    runs
      .entry(run_id.clone())
      .or_insert_with(|| Run::new(run_id, self.shared.clone(), None))
      .clone()
  }

  /// Look up a live run, or rehydrate it from the snapshot store.
  pub async fn run(&self, run_id: &str) -> Result<Run, EngineError> {
    if let Some(run) = self.live(run_id) {
      return Ok(run);
    }

    let Some(state) = self.shared.load(run_id).await? else {
      return Err(EngineError::RunNotFound {
        run_id: run_id.to_string(),
      });
    };
    debug!(run_id, "run rehydrated from snapshot");

    let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
    // Another caller may have rehydrated it meanwhile.
    let run = runs
      .entry(run_id.to_string())
      .or_insert_with(|| Run::new(run_id.to_string(), self.shared.clone(), Some(state)))
      .clone();
    Ok(run)
  }

  /// Register a listener for a run's transitions.
  pub async fn watch(
    &self,
    run_id: &str,
    listener: impl TransitionListener + 'static,
  ) -> Result<WatchHandle, EngineError> {
    let run = self.run(run_id).await?;
    Ok(run.watch(listener))
  }

  pub fn unwatch(&self, handle: &WatchHandle) -> bool {
    self.shared.watchers.unwatch(handle)
  }

  pub fn watcher_count(&self, run_id: &str) -> usize {
    self.shared.watchers.count(run_id)
  }

  /// Forget a run held in memory along with its watchers.
  ///
  /// Persisted snapshots are untouched; a later `run` or `resume` rehydrates
  /// the run from the store. Returns false if the run was not live.
  pub fn release(&self, run_id: &str) -> bool {
    let removed = self
      .runs
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(run_id)
      .is_some();
    let listeners = self.shared.watchers.remove_run(run_id);
    debug!(run_id, removed, listeners, "run released");
    removed
  }

  /// Number of runs held in memory.
  pub fn live_runs(&self) -> usize {
    self
      .runs
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  /// Resume a suspended step of a live or persisted run.
  pub async fn resume(
    &self,
    run_id: &str,
    step_id: &str,
    context: Value,
  ) -> Result<RunState, EngineError> {
    self.run(run_id).await?.resume(step_id, context).await
  }

  /// Continue an interrupted run of a live or persisted run id.
  pub async fn recover(&self, run_id: &str) -> Result<RunState, EngineError> {
    self.run(run_id).await?.recover().await
  }

  /// The current state of a run: in memory if live, otherwise from the store.
  pub async fn snapshot(&self, run_id: &str) -> Result<RunState, EngineError> {
    if let Some(run) = self.live(run_id) {
      if let Some(state) = run.state().await {
        return Ok(state);
      }
    }
    self
      .shared
      .load(run_id)
      .await?
      .ok_or_else(|| EngineError::RunNotFound {
        run_id: run_id.to_string(),
      })
  }

  fn live(&self, run_id: &str) -> Option<Run> {
    self
      .runs
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(run_id)
      .cloned()
  }
}
