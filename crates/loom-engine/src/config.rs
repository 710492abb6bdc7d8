use serde::{Deserialize, Serialize};

/// Configuration for a [`WorkflowRuntime`](crate::WorkflowRuntime).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
  /// Snapshot namespace runs are persisted under.
  pub namespace: String,
}

impl Default for RuntimeConfig {
  fn default() -> Self {
    Self {
      namespace: "workflows".to_string(),
    }
  }
}

impl RuntimeConfig {
  pub fn with_namespace(namespace: impl Into<String>) -> Self {
    Self {
      namespace: namespace.into(),
    }
  }
}
