use std::sync::Arc;

use loom_store::{SnapshotStore, StoreError};
use loom_workflow::{Access, RunState, RunStatus, StepStatus, Workflow};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::config::RuntimeConfig;
use crate::error::EngineError;
use crate::scheduler::{Resumption, Scheduler};
use crate::watch::{TransitionListener, WatchHandle, WatcherRegistry};

/// State shared by a runtime and every run it hands out.
#[derive(Clone)]
pub(crate) struct RuntimeShared {
  pub workflow: Arc<Workflow>,
  pub store: Arc<dyn SnapshotStore>,
  pub config: RuntimeConfig,
  pub access: Access,
  pub watchers: Arc<WatcherRegistry>,
}

impl RuntimeShared {
  fn scheduler(&self) -> Scheduler<'_> {
    Scheduler {
      workflow: &self.workflow,
      store: self.store.as_ref(),
      namespace: &self.config.namespace,
      access: &self.access,
      watchers: &self.watchers,
    }
  }

  pub async fn load(&self, run_id: &str) -> Result<Option<RunState>, StoreError> {
    self
      .store
      .load(&self.config.namespace, self.workflow.name(), run_id)
      .await
  }

  async fn persist(&self, state: &RunState) -> Result<(), StoreError> {
    self
      .store
      .persist(
        &self.config.namespace,
        self.workflow.name(),
        &state.run_id,
        state,
      )
      .await
  }
}

/// Handle to one execution of a workflow.
///
/// Cloning is cheap; clones control the same run. `start`, `resume` and
/// `recover` are serialized: a call made while the run is being driven waits
/// for it.
///
/// The state is taken out of the run while it is driven. If the driving future
/// is dropped, its step tasks are aborted and the next call reloads the last
/// persisted snapshot.
#[derive(Clone)]
pub struct Run {
  run_id: String,
  shared: Arc<RuntimeShared>,
  state: Arc<Mutex<Option<RunState>>>,
}

impl Run {
  pub(crate) fn new(run_id: String, shared: Arc<RuntimeShared>, state: Option<RunState>) -> Self {
    Self {
      run_id,
      shared,
      state: Arc::new(Mutex::new(state)),
    }
  }

  pub fn run_id(&self) -> &str {
    &self.run_id
  }

  /// Start the run and drive it until it completes or every path is suspended.
  pub async fn start(&self, trigger_data: Value) -> Result<RunState, EngineError> {
    self
      .start_with_cancel(trigger_data, CancellationToken::new())
      .await
  }

  #[instrument(
    name = "run_start",
    skip_all,
    fields(workflow = %self.shared.workflow.name(), run_id = %self.run_id)
  )]
  pub async fn start_with_cancel(
    &self,
    trigger_data: Value,
    cancel: CancellationToken,
  ) -> Result<RunState, EngineError> {
    let mut guard = self.state.lock().await;
    if guard.is_some() || self.shared.load(&self.run_id).await?.is_some() {
      return Err(EngineError::AlreadyStarted {
        run_id: self.run_id.clone(),
      });
    }

    let workflow = &self.shared.workflow;
    let trigger_data = match workflow.trigger_schema() {
      Some(schema) => {
        schema
          .validate(&trigger_data)
          .map_err(|source| EngineError::SchemaValidation {
            target: "trigger data".to_string(),
            source,
          })?
      }
      None => trigger_data,
    };

    let mut state = RunState::new(
      self.run_id.clone(),
      workflow.name(),
      trigger_data,
      workflow.entry_points(),
    );
    self.shared.persist(&state).await?;

    info!(
      run_id = %self.run_id,
      workflow = %workflow.name(),
      entry_points = ?state.active_paths,
      "run_started"
    );

    let result = self.shared.scheduler().drive(&mut state, None, &cancel).await;
    self.finish(&mut guard, state, result)
  }

  /// Register a listener for this run's transitions.
  pub fn watch(&self, listener: impl TransitionListener + 'static) -> WatchHandle {
    self.shared.watchers.watch(&self.run_id, Arc::new(listener))
  }

  /// Resume a suspended step with `context` and continue driving the run.
  ///
  /// The run is loaded from the snapshot store if it is not held in memory.
  /// Misuse (unknown step, step not suspended, rejected resume data) is reported
  /// before anything is mutated.
  pub async fn resume(&self, step_id: &str, context: Value) -> Result<RunState, EngineError> {
    self
      .resume_with_cancel(step_id, context, CancellationToken::new())
      .await
  }

  #[instrument(
    name = "run_resume",
    skip(self, context, cancel),
    fields(workflow = %self.shared.workflow.name(), run_id = %self.run_id)
  )]
  pub async fn resume_with_cancel(
    &self,
    step_id: &str,
    context: Value,
    cancel: CancellationToken,
  ) -> Result<RunState, EngineError> {
    let mut guard = self.state.lock().await;
    if guard.is_none() {
      *guard = self.shared.load(&self.run_id).await?;
    }
    let Some(state) = guard.as_ref() else {
      return Err(self.not_found());
    };
    let context = self.check_resume(state, step_id, context)?;
    let mut state = guard.take().ok_or_else(|| self.not_found())?;

    state.resumed_steps.insert(step_id.to_string());
    let resumption = Resumption {
      step_id: step_id.to_string(),
      data: context,
    };
    let result = self
      .shared
      .scheduler()
      .drive(&mut state, Some(resumption), &cancel)
      .await;
    self.finish(&mut guard, state, result)
  }

  /// Continue a run whose drive was interrupted.
  ///
  /// Active paths that never settled (their drive was dropped or the process
  /// exited) are launched again from the last persisted snapshot. Suspended
  /// and completed runs are returned unchanged.
  pub async fn recover(&self) -> Result<RunState, EngineError> {
    self.recover_with_cancel(CancellationToken::new()).await
  }

  #[instrument(
    name = "run_recover",
    skip_all,
    fields(workflow = %self.shared.workflow.name(), run_id = %self.run_id)
  )]
  pub async fn recover_with_cancel(
    &self,
    cancel: CancellationToken,
  ) -> Result<RunState, EngineError> {
    let mut guard = self.state.lock().await;
    let mut state = match guard.take() {
      Some(state) => state,
      None => self
        .shared
        .load(&self.run_id)
        .await?
        .ok_or_else(|| self.not_found())?,
    };

    if state.status() != RunStatus::Running {
      *guard = Some(state.clone());
      return Ok(state);
    }

    info!(
      run_id = %self.run_id,
      active_paths = ?state.active_paths,
      "run_recovered"
    );
    let result = self.shared.scheduler().drive(&mut state, None, &cancel).await;
    self.finish(&mut guard, state, result)
  }

  /// The in-memory state of the run, if it has started or been loaded.
  pub async fn state(&self) -> Option<RunState> {
    self.state.lock().await.clone()
  }

  /// Reject a resume before anything is mutated, returning the data to resume
  /// with.
  fn check_resume(
    &self,
    state: &RunState,
    step_id: &str,
    context: Value,
  ) -> Result<Value, EngineError> {
    let Some(step) = self.shared.workflow.get_step(step_id) else {
      return Err(EngineError::StepNotFound {
        step_id: step_id.to_string(),
      });
    };

    match state.status_of(step_id) {
      Some(StepStatus::Suspended) => {}
      _ if state.resumed_steps.contains(step_id) => {
        return Err(EngineError::AlreadyResumed {
          step_id: step_id.to_string(),
        });
      }
      status => {
        return Err(EngineError::NotSuspended {
          step_id: step_id.to_string(),
          status,
        });
      }
    }

    match step.resume_schema() {
      Some(schema) => schema
        .validate(&context)
        .map_err(|source| EngineError::SchemaValidation {
          target: format!("resume data for step '{}'", step_id),
          source,
        }),
      None => Ok(context),
    }
  }

  /// Put the driven state back, or leave the run empty on a store failure so
  /// the next call reloads the last durable snapshot.
  ///
  /// A completed run emits no further transitions, so its watchers are dropped.
  fn finish(
    &self,
    guard: &mut Option<RunState>,
    state: RunState,
    result: Result<(), EngineError>,
  ) -> Result<RunState, EngineError> {
    match result {
      Ok(()) => {
        if state.status() == RunStatus::Completed {
          self.shared.watchers.remove_run(&self.run_id);
        }
        *guard = Some(state.clone());
        Ok(state)
      }
      Err(EngineError::Snapshot(e)) => Err(EngineError::Snapshot(e)),
      Err(e) => {
        *guard = Some(state);
        Err(e)
      }
    }
  }

  fn not_found(&self) -> EngineError {
    EngineError::RunNotFound {
      run_id: self.run_id.clone(),
    }
  }
}
