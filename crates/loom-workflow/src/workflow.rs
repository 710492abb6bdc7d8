use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::builder::WorkflowBuilder;
use crate::condition::Condition;
use crate::graph::{Edge, Graph};
use crate::schema::Schema;
use crate::step::Step;

/// A committed, immutable workflow graph.
///
/// Produced by [`WorkflowBuilder::commit`] and shared as `Arc<Workflow>` by every
/// run that executes it.
pub struct Workflow {
  pub(crate) name: String,
  pub(crate) trigger_schema: Option<Arc<dyn Schema>>,
  pub(crate) steps: HashMap<String, Arc<Step>>,
  /// Step ids in declaration order.
  pub(crate) order: Vec<String>,
  pub(crate) edges: Vec<Edge>,
  pub(crate) guards: HashMap<String, Condition>,
  pub(crate) graph: Graph,
}

impl Workflow {
  pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
    WorkflowBuilder::new(name)
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn trigger_schema(&self) -> Option<&dyn Schema> {
    self.trigger_schema.as_deref()
  }

  pub fn get_step(&self, step_id: &str) -> Option<&Arc<Step>> {
    self.steps.get(step_id)
  }

  /// Step ids in declaration order.
  pub fn step_ids(&self) -> &[String] {
    &self.order
  }

  /// All declared edges, including loop edges.
  pub fn edges(&self) -> &[Edge] {
    &self.edges
  }

  /// The `when` guard gating a step, if any.
  pub fn guard(&self, step_id: &str) -> Option<&Condition> {
    self.guards.get(step_id)
  }

  pub fn graph(&self) -> &Graph {
    &self.graph
  }

  pub fn entry_points(&self) -> &[String] {
    self.graph.entry_points()
  }
}

impl fmt::Debug for Workflow {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Workflow")
      .field("name", &self.name)
      .field("steps", &self.order)
      .field("edges", &self.edges)
      .field("guards", &self.guards)
      .finish_non_exhaustive()
  }
}
