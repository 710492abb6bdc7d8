//! Mutable record of one workflow execution.
//!
//! A `RunState` is owned by the scheduler for the lifetime of a run. Everything
//! else (watchers, snapshot adapters, step contexts) sees it read-only.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of the latest attempt of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepResult {
  Success { output: Value },
  Failed { error: String },
  Suspended { payload: Value },
  Skipped,
}

impl StepResult {
  pub fn status(&self) -> StepStatus {
    match self {
      StepResult::Success { .. } => StepStatus::Success,
      StepResult::Failed { .. } => StepStatus::Failed,
      StepResult::Suspended { .. } => StepStatus::Suspended,
      StepResult::Skipped => StepStatus::Skipped,
    }
  }

  /// Output value on success, suspend payload on suspension.
  pub fn payload(&self) -> Option<&Value> {
    match self {
      StepResult::Success { output } => Some(output),
      StepResult::Suspended { payload } => Some(payload),
      StepResult::Failed { .. } | StepResult::Skipped => None,
    }
  }

  pub fn output(&self) -> Option<&Value> {
    match self {
      StepResult::Success { output } => Some(output),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      StepResult::Failed { error } => Some(error),
      _ => None,
    }
  }

  /// `success`, `failed` and `skipped` are terminal; a suspended step is not.
  pub fn is_terminal(&self) -> bool {
    !matches!(self, StepResult::Suspended { .. })
  }
}

/// Status tag of a [`StepResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
  Success,
  Failed,
  Suspended,
  Skipped,
}

impl StepStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      StepStatus::Success => "success",
      StepStatus::Failed => "failed",
      StepStatus::Suspended => "suspended",
      StepStatus::Skipped => "skipped",
    }
  }
}

impl fmt::Display for StepStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Coarse status of a run, derived from its active paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  /// At least one active path can still execute.
  Running,
  /// Every remaining active path is parked on a suspended step.
  Suspended,
  /// No active paths remain.
  Completed,
}

/// The persisted record of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
  pub run_id: String,
  pub workflow_name: String,
  pub trigger_data: Value,
  pub step_results: BTreeMap<String, StepResult>,
  /// Ordered set of step ids eligible to execute next.
  pub active_paths: Vec<String>,
  /// Steps resumed since they last suspended.
  #[serde(default)]
  pub resumed_steps: BTreeSet<String>,
  pub timestamp: DateTime<Utc>,
}

impl RunState {
  pub fn new(
    run_id: impl Into<String>,
    workflow_name: impl Into<String>,
    trigger_data: Value,
    entry_points: &[String],
  ) -> Self {
    let mut state = Self {
      run_id: run_id.into(),
      workflow_name: workflow_name.into(),
      trigger_data,
      step_results: BTreeMap::new(),
      active_paths: Vec::with_capacity(entry_points.len()),
      resumed_steps: BTreeSet::new(),
      timestamp: Utc::now(),
    };
    for id in entry_points {
      state.activate(id);
    }
    state
  }

  pub fn result(&self, step_id: &str) -> Option<&StepResult> {
    self.step_results.get(step_id)
  }

  pub fn status_of(&self, step_id: &str) -> Option<StepStatus> {
    self.result(step_id).map(StepResult::status)
  }

  /// Add a step to the active path set, keeping insertion order and uniqueness.
  pub fn activate(&mut self, step_id: &str) -> bool {
    if self.active_paths.iter().any(|id| id == step_id) {
      return false;
    }
    self.active_paths.push(step_id.to_string());
    true
  }

  pub fn deactivate(&mut self, step_id: &str) {
    self.active_paths.retain(|id| id != step_id);
  }

  pub fn is_active(&self, step_id: &str) -> bool {
    self.active_paths.iter().any(|id| id == step_id)
  }

  /// Active paths not parked on a suspended step.
  pub fn runnable_paths(&self) -> impl Iterator<Item = &str> {
    self
      .active_paths
      .iter()
      .filter(|id| self.status_of(id) != Some(StepStatus::Suspended))
      .map(String::as_str)
  }

  pub fn suspended_paths(&self) -> impl Iterator<Item = &str> {
    self
      .active_paths
      .iter()
      .filter(|id| self.status_of(id) == Some(StepStatus::Suspended))
      .map(String::as_str)
  }

  pub fn status(&self) -> RunStatus {
    if self.active_paths.is_empty() {
      RunStatus::Completed
    } else if self.runnable_paths().next().is_none() {
      RunStatus::Suspended
    } else {
      RunStatus::Running
    }
  }

  pub fn touch(&mut self) {
    self.timestamp = Utc::now();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn entries(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn test_step_result_serializes_as_tagged_union() {
    let result = StepResult::Success {
      output: json!({"facts": ["a"]}),
    };
    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value, json!({"status": "success", "output": {"facts": ["a"]}}));

    let skipped: StepResult = serde_json::from_value(json!({"status": "skipped"})).unwrap();
    assert_eq!(skipped, StepResult::Skipped);
  }

  #[test]
  fn test_active_paths_are_an_ordered_set() {
    let mut state = RunState::new("run-1", "wf", json!({}), &entries(&["a", "b"]));
    assert!(!state.activate("a"));
    assert!(state.activate("c"));
    assert_eq!(state.active_paths, vec!["a", "b", "c"]);

    state.deactivate("b");
    assert_eq!(state.active_paths, vec!["a", "c"]);
  }

  #[test]
  fn test_status_derives_from_active_paths() {
    let mut state = RunState::new("run-1", "wf", json!({}), &entries(&["a"]));
    assert_eq!(state.status(), RunStatus::Running);

    state.step_results.insert(
      "a".to_string(),
      StepResult::Suspended {
        payload: json!({"reason": "approval"}),
      },
    );
    assert_eq!(state.status(), RunStatus::Suspended);
    assert_eq!(state.suspended_paths().collect::<Vec<_>>(), vec!["a"]);

    state.deactivate("a");
    assert_eq!(state.status(), RunStatus::Completed);
  }

  #[test]
  fn test_resumed_steps_default_when_missing() {
    let state = RunState::new("run-1", "wf", json!({"topic": "x"}), &entries(&["a"]));
    let mut value = serde_json::to_value(&state).unwrap();
    value.as_object_mut().unwrap().remove("resumed_steps");

    let restored: RunState = serde_json::from_value(value).unwrap();
    assert_eq!(restored, state);
  }
}
