//! What a step body sees while it executes.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::state::{RunState, StepResult};

/// Opaque capabilities of the surrounding application (agents, clients, ...).
///
/// The engine passes this through to every step without interpreting it.
#[derive(Clone, Default)]
pub struct Access {
  capabilities: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Access {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a capability under `name`.
  pub fn with<T: Any + Send + Sync>(mut self, name: impl Into<String>, capability: T) -> Self {
    self.capabilities.insert(name.into(), Arc::new(capability));
    self
  }

  /// Fetch a capability by name, if it was registered with type `T`.
  pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
    self
      .capabilities
      .get(name)
      .cloned()
      .and_then(|capability| capability.downcast::<T>().ok())
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.capabilities.keys().map(String::as_str)
  }
}

impl fmt::Debug for Access {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Access")
      .field("capabilities", &self.capabilities.keys().collect::<Vec<_>>())
      .finish()
  }
}

/// Execution context handed to a step body.
///
/// Holds a frozen view of the run as it was when the step was launched; results
/// settled concurrently by sibling paths are not visible.
#[derive(Clone)]
pub struct StepContext {
  step_id: String,
  input: Value,
  resume_data: Option<Value>,
  state: Arc<RunState>,
  access: Access,
  suspension: Arc<Mutex<Option<Value>>>,
}

impl StepContext {
  pub fn new(step_id: impl Into<String>, input: Value, state: Arc<RunState>, access: Access) -> Self {
    Self {
      step_id: step_id.into(),
      input,
      resume_data: None,
      state,
      access,
      suspension: Arc::new(Mutex::new(None)),
    }
  }

  /// Mark this invocation as a resume carrying `data`.
  pub fn with_resume_data(mut self, data: Value) -> Self {
    self.resume_data = Some(data);
    self
  }

  pub fn step_id(&self) -> &str {
    &self.step_id
  }

  pub fn run_id(&self) -> &str {
    &self.state.run_id
  }

  /// The step's input: trigger data or rendered input templates, with resume
  /// data merged in when resuming.
  pub fn input(&self) -> &Value {
    &self.input
  }

  pub fn trigger_data(&self) -> &Value {
    &self.state.trigger_data
  }

  /// Data supplied by the resume call, if this invocation is a resume.
  pub fn resume_data(&self) -> Option<&Value> {
    self.resume_data.as_ref()
  }

  pub fn is_resuming(&self) -> bool {
    self.resume_data.is_some()
  }

  pub fn step_result(&self, step_id: &str) -> Option<&StepResult> {
    self.state.result(step_id)
  }

  /// Success output of another step.
  pub fn output(&self, step_id: &str) -> Option<&Value> {
    self.step_result(step_id).and_then(StepResult::output)
  }

  /// This step's result from the previous loop iteration or suspension.
  pub fn previous(&self) -> Option<&StepResult> {
    self.state.result(&self.step_id)
  }

  pub fn state(&self) -> &RunState {
    &self.state
  }

  pub fn access(&self) -> &Access {
    &self.access
  }

  /// Park this path once the body returns. The last payload supplied wins.
  pub fn suspend(&self, payload: Value) {
    if let Ok(mut slot) = self.suspension.lock() {
      *slot = Some(payload);
    }
  }

  /// The suspend payload requested by the body, if any.
  pub fn take_suspension(&self) -> Option<Value> {
    self.suspension.lock().ok().and_then(|mut slot| slot.take())
  }
}

impl fmt::Debug for StepContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StepContext")
      .field("step_id", &self.step_id)
      .field("run_id", &self.state.run_id)
      .field("input", &self.input)
      .field("resume_data", &self.resume_data)
      .finish()
  }
}
