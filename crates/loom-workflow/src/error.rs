use thiserror::Error;

use crate::graph::Edge;

/// Errors raised by `WorkflowBuilder::commit` when the graph is malformed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphValidationError {
  #[error("workflow has no entry steps")]
  NoEntryPoints,

  #[error("step '{0}' is declared more than once")]
  DuplicateStep(String),

  #[error("step id '{0}' is reserved for trigger data")]
  ReservedStepId(String),

  #[error("'{operation}' called before any step was added")]
  MissingPredecessor { operation: &'static str },

  #[error("after({steps:?}) is not followed by a step")]
  DanglingJoin { steps: Vec<String> },

  #[error("after() called with no steps")]
  EmptyJoin,

  #[error("edge {edge} references unknown step '{step}'")]
  UnknownStep { edge: Edge, step: String },

  #[error("join edge {edge} references step '{step}' before it is declared")]
  JoinBeforeDeclaration { edge: Edge, step: String },

  #[error("loop edge {edge} targets step '{target}' which is not declared before it")]
  DanglingLoopTarget { edge: Edge, target: String },

  #[error("step '{step}' already has a loop edge; second loop edge {edge} rejected")]
  DuplicateLoop { edge: Edge, step: String },

  #[error("step '{step}' is not reachable from any entry step")]
  Unreachable { step: String },

  #[error("{condition} condition on step '{step}' references unknown step '{referenced}'")]
  UnknownConditionStep {
    /// `when` or `until`.
    condition: &'static str,
    step: String,
    referenced: String,
  },

  #[error("edge {edge} closes a cycle; only until edges may loop back")]
  Cycle { edge: Edge },
}

/// A value failed structural validation.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{path}: {message}")]
pub struct ValidationError {
  /// JSON-pointer-ish location of the failure, `$` for the root.
  pub path: String,
  pub message: String,
}

impl ValidationError {
  pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      path: path.into(),
      message: message.into(),
    }
  }

  /// A failure at the root of the value.
  pub fn root(message: impl Into<String>) -> Self {
    Self::new("$", message)
  }
}

/// Input template resolution failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
  #[error("failed to resolve input '{key}': {message}")]
  Template { key: String, message: String },

  #[error("input '{key}' expected {expected}, got '{value}'")]
  Coercion {
    key: String,
    expected: &'static str,
    value: String,
  },
}
