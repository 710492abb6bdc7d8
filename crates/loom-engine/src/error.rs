//! Engine errors.

use loom_store::StoreError;
use loom_workflow::{StepStatus, ValidationError};

/// Errors surfaced to callers of `start`, `resume` and `watch`.
///
/// Failures inside step bodies are not errors here; they are recorded as
/// `failed` step results in the run state.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// Trigger or resume data failed its schema.
  #[error("{target} failed validation: {source}")]
  SchemaValidation {
    target: String,
    #[source]
    source: ValidationError,
  },

  /// Resume targeted a step that is not suspended.
  #[error("step '{step_id}' is not suspended (status: {})", .status.map(|s| s.as_str()).unwrap_or("not run"))]
  NotSuspended {
    step_id: String,
    status: Option<StepStatus>,
  },

  /// Resume targeted a step that an earlier resume already settled.
  #[error("step '{step_id}' was already resumed")]
  AlreadyResumed { step_id: String },

  /// Step id is not part of the workflow.
  #[error("step '{step_id}' not found in workflow")]
  StepNotFound { step_id: String },

  /// No live or persisted run with this id.
  #[error("run '{run_id}' not found")]
  RunNotFound { run_id: String },

  /// `start` called on a run that already started.
  #[error("run '{run_id}' has already started")]
  AlreadyStarted { run_id: String },

  /// Persisting or loading a snapshot failed. Scheduling stops at this point.
  #[error("snapshot store error")]
  Snapshot(#[from] StoreError),

  /// Execution was cancelled.
  #[error("execution cancelled")]
  Cancelled,
}
