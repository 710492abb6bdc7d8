//! The run engine.
//!
//! The scheduler owns a run's [`RunState`] while it drives it. Ready steps are
//! spawned onto the tokio runtime and run concurrently; each one settles
//! individually, in completion order, through a single writer:
//!
//! ```text
//! launch ready paths ──► step tasks (parallel)
//!        ▲                     │ first to finish
//!        │                     ▼
//!   notify watchers ◄── persist ◄── record result + advance paths
//! ```
//!
//! A step whose snapshot cannot be persisted stops the run: in-flight steps are
//! aborted and the store error is returned, so nothing advances past state that
//! could not be made durable. Step tasks never outlive the drive that spawned
//! them; dropping the drive future aborts them too.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use loom_store::SnapshotStore;
use loom_workflow::input::{coerce_inputs, resolve_inputs};
use loom_workflow::{
  Access, EdgeKind, RunState, Step, StepContext, StepResult, StepStatus, Workflow,
};
use serde_json::Value;
use tokio::task::{AbortHandle, JoinError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::error::EngineError;
use crate::watch::{TransitionEvent, WatcherRegistry};

/// How one attempt of a step ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
  Completed(Value),
  Suspended(Value),
  Failed(String),
  Skipped,
}

/// A suspended step to re-invoke with resume data before scheduling continues.
#[derive(Debug, Clone)]
pub(crate) struct Resumption {
  pub step_id: String,
  pub data: Value,
}

enum Launch {
  /// Settled without running the body (guard false, guard error, bad input).
  Settle(Outcome),
  Spawn(Arc<Step>, StepContext),
}

pub(crate) struct Scheduler<'a> {
  pub workflow: &'a Workflow,
  pub store: &'a dyn SnapshotStore,
  pub namespace: &'a str,
  pub access: &'a Access,
  pub watchers: &'a WatcherRegistry,
}

impl Scheduler<'_> {
  /// Advance the run until no active path is runnable.
  ///
  /// Returns once every active path has finished or is parked on a suspended
  /// step. Step failures are recorded in `state`, not returned.
  #[instrument(
    name = "workflow_drive",
    skip_all,
    fields(workflow = %self.workflow.name(), run_id = %state.run_id)
  )]
  pub async fn drive(
    &self,
    state: &mut RunState,
    resumption: Option<Resumption>,
    cancel: &CancellationToken,
  ) -> Result<(), EngineError> {
    let mut in_flight = FuturesUnordered::new();
    let mut running = Running::default();

    if let Some(Resumption { step_id, data }) = resumption {
      info!(run_id = %state.run_id, step_id = %step_id, "step_resumed");
      match self.prepare(state, &step_id, Some(data)) {
        Launch::Settle(outcome) => self.settle(state, &step_id, outcome).await?,
        Launch::Spawn(step, ctx) => {
          let (abort, task) = spawn_step(step_id.clone(), step, ctx);
          running.insert(step_id, abort);
          in_flight.push(task);
        }
      }
    }

    loop {
      if cancel.is_cancelled() {
        warn!(run_id = %state.run_id, "run cancelled");
        return Err(EngineError::Cancelled);
      }

      let ready: Vec<String> = state
        .runnable_paths()
        .filter(|id| !running.contains(id))
        .map(str::to_string)
        .collect();

      let mut settled_inline = false;
      for step_id in ready {
        if !state.is_active(&step_id) {
          continue;
        }
        match self.prepare(state, &step_id, None) {
          Launch::Settle(outcome) => {
            self.settle(state, &step_id, outcome).await?;
            settled_inline = true;
          }
          Launch::Spawn(step, ctx) => {
            info!(run_id = %state.run_id, step_id = %step_id, "step_started");
            let (abort, task) = spawn_step(step_id.clone(), step, ctx);
            running.insert(step_id, abort);
            in_flight.push(task);
          }
        }
      }

      // Inline settles may have opened new paths.
      if settled_inline {
        continue;
      }

      let (step_id, joined) = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
          warn!(run_id = %state.run_id, "run cancelled during step execution");
          return Err(EngineError::Cancelled);
        }
        next = in_flight.next() => match next {
          Some(next) => next,
          None => break,
        },
      };

      running.remove(&step_id);

      let outcome = joined.unwrap_or_else(|e| Outcome::Failed(join_failure(&e)));
      self.settle(state, &step_id, outcome).await?;
    }

    info!(
      run_id = %state.run_id,
      status = ?state.status(),
      active_paths = ?state.active_paths,
      "run_finished"
    );
    Ok(())
  }

  /// Decide whether a step runs, and build its context if so.
  fn prepare(&self, state: &RunState, step_id: &str, resume: Option<Value>) -> Launch {
    let Some(step) = self.workflow.get_step(step_id) else {
      return Launch::Settle(Outcome::Failed(format!(
        "step '{}' not found in workflow",
        step_id
      )));
    };

    // Guards gate entry into a step; a resumed step already passed its guard.
    if resume.is_none() {
      if let Some(guard) = self.workflow.guard(step_id) {
        match guard.evaluate(state) {
          Ok(true) => {}
          Ok(false) => return Launch::Settle(Outcome::Skipped),
          Err(e) => {
            return Launch::Settle(Outcome::Failed(format!("guard evaluation failed: {:#}", e)));
          }
        }
      }
    }

    let input = match build_input(step, state, resume.as_ref()) {
      Ok(input) => input,
      Err(message) => return Launch::Settle(Outcome::Failed(message)),
    };

    let mut ctx = StepContext::new(step_id, input, Arc::new(state.clone()), self.access.clone());
    if let Some(data) = resume {
      ctx = ctx.with_resume_data(data);
    }
    Launch::Spawn(step.clone(), ctx)
  }

  /// Record an outcome, advance the active paths, persist, then notify.
  async fn settle(
    &self,
    state: &mut RunState,
    step_id: &str,
    outcome: Outcome,
  ) -> Result<(), EngineError> {
    match outcome {
      Outcome::Completed(output) => {
        info!(run_id = %state.run_id, step_id, "step_completed");
        state
          .step_results
          .insert(step_id.to_string(), StepResult::Success { output });
        state.deactivate(step_id);
        self.after_success(state, step_id);
      }
      Outcome::Failed(error) => {
        error!(run_id = %state.run_id, step_id, error = %error, "step_failed");
        self.record_failure(state, step_id, error);
      }
      Outcome::Suspended(payload) => {
        info!(run_id = %state.run_id, step_id, "step_suspended");
        state
          .step_results
          .insert(step_id.to_string(), StepResult::Suspended { payload });
        state.resumed_steps.remove(step_id);
        state.activate(step_id);
      }
      Outcome::Skipped => {
        info!(run_id = %state.run_id, step_id, "step_skipped");
        state
          .step_results
          .insert(step_id.to_string(), StepResult::Skipped);
        state.deactivate(step_id);
        self.advance(state, step_id, false);
      }
    }
    state.touch();

    if let Err(e) = self
      .store
      .persist(self.namespace, self.workflow.name(), &state.run_id, state)
      .await
    {
      error!(run_id = %state.run_id, step_id, error = %e, "snapshot_failed");
      return Err(EngineError::Snapshot(e));
    }

    let status = state
      .status_of(step_id)
      .unwrap_or(StepStatus::Skipped);
    self.watchers.notify(&TransitionEvent {
      run_id: &state.run_id,
      step_id,
      status,
      active_paths: &state.active_paths,
      state,
    });
    Ok(())
  }

  /// Evaluate the step's loop edge, if any, then advance.
  fn after_success(&self, state: &mut RunState, step_id: &str) {
    let Some(loop_edge) = self.workflow.graph().loop_edge(step_id) else {
      self.advance(state, step_id, false);
      return;
    };

    match loop_edge.condition.evaluate(state) {
      Ok(true) => self.advance(state, step_id, false),
      Ok(false) => {
        info!(
          run_id = %state.run_id,
          step_id,
          target = %loop_edge.target,
          "loop_reentered"
        );
        state.activate(&loop_edge.target);
      }
      Err(e) => {
        let error = format!("loop condition evaluation failed: {:#}", e);
        error!(run_id = %state.run_id, step_id, error = %error, "step_failed");
        self.record_failure(state, step_id, error);
      }
    }
  }

  fn record_failure(&self, state: &mut RunState, step_id: &str, error: String) {
    state
      .step_results
      .insert(step_id.to_string(), StepResult::Failed { error });
    state.deactivate(step_id);
    self.advance(state, step_id, true);
  }

  /// Activate successors of a settled step.
  ///
  /// A failed step only counts towards joins; its `then` chain stops.
  fn advance(&self, state: &mut RunState, step_id: &str, joins_only: bool) {
    let graph = self.workflow.graph();
    for edge in graph.outgoing(step_id) {
      match edge.kind {
        EdgeKind::Then if !joins_only => {
          state.activate(&edge.to);
        }
        EdgeKind::After => {
          let ready = graph
            .join_predecessors(&edge.to)
            .iter()
            .all(|p| state.result(p).is_some_and(StepResult::is_terminal));
          if ready {
            state.activate(&edge.to);
          }
        }
        _ => {}
      }
    }
  }
}

/// The value a step receives as `ctx.input()`.
fn build_input(step: &Step, state: &RunState, resume: Option<&Value>) -> Result<Value, String> {
  let base = if step.inputs().is_empty() {
    state.trigger_data.clone()
  } else {
    let types = step
      .input_schema()
      .map(|schema| schema.property_types())
      .unwrap_or_default();
    resolve_inputs(step.inputs(), state)
      .and_then(|resolved| coerce_inputs(&resolved, &types))
      .map_err(|e| e.to_string())?
  };

  let input = match resume {
    Some(data) => merge(base, data),
    None => base,
  };

  match step.input_schema() {
    Some(schema) => schema
      .validate(&input)
      .map_err(|e| format!("input failed validation: {}", e)),
    None => Ok(input),
  }
}

/// Shallow-merge resume data over the step's original input.
fn merge(base: Value, data: &Value) -> Value {
  match (base, data) {
    (Value::Object(mut base), Value::Object(data)) => {
      for (key, value) in data {
        base.insert(key.clone(), value.clone());
      }
      Value::Object(base)
    }
    (_, data) => data.clone(),
  }
}

fn spawn_step(
  step_id: String,
  step: Arc<Step>,
  ctx: StepContext,
) -> (
  AbortHandle,
  impl Future<Output = (String, Result<Outcome, JoinError>)>,
) {
  let handle = tokio::spawn(execute_step(step, ctx));
  let abort = handle.abort_handle();
  (abort, async move { (step_id, handle.await) })
}

/// Run a step body and classify the result.
async fn execute_step(step: Arc<Step>, ctx: StepContext) -> Outcome {
  let result = step.executable().execute(ctx.clone()).await;

  let output = match result {
    Ok(output) => output,
    Err(e) => return Outcome::Failed(format!("{:#}", e)),
  };

  if let Some(payload) = ctx.take_suspension() {
    return match step.suspend_schema() {
      Some(schema) => match schema.validate(&payload) {
        Ok(payload) => Outcome::Suspended(payload),
        Err(e) => Outcome::Failed(format!("suspend payload failed validation: {}", e)),
      },
      None => Outcome::Suspended(payload),
    };
  }

  match step.output_schema() {
    Some(schema) => match schema.validate(&output) {
      Ok(output) => Outcome::Completed(output),
      Err(e) => Outcome::Failed(format!("output failed validation: {}", e)),
    },
    None => Outcome::Completed(output),
  }
}

fn join_failure(e: &JoinError) -> String {
  if e.is_panic() {
    "step panicked".to_string()
  } else {
    format!("step task aborted: {}", e)
  }
}

/// Step tasks spawned by one drive, aborted when the drive returns or is
/// dropped.
#[derive(Default)]
struct Running {
  aborts: HashMap<String, AbortHandle>,
}

impl Running {
  fn insert(&mut self, step_id: String, abort: AbortHandle) {
    self.aborts.insert(step_id, abort);
  }

  fn contains(&self, step_id: &str) -> bool {
    self.aborts.contains_key(step_id)
  }

  fn remove(&mut self, step_id: &str) {
    self.aborts.remove(step_id);
  }
}

impl Drop for Running {
  fn drop(&mut self) {
    for abort in self.aborts.values() {
      abort.abort();
    }
  }
}
