//! Fluent construction of workflow graphs.
//!
//! ```ignore
//! let workflow = Workflow::builder("research")
//!   .step(start)
//!   .then(research)
//!   .then(write)
//!   .commit()?;
//! ```
//!
//! The builder owns everything it accumulates. Misuse (a `then` with no preceding
//! step, a duplicate id, ...) is recorded and reported by [`WorkflowBuilder::commit`],
//! so chains never need intermediate `?`s.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::condition::{Condition, TRIGGER_REF};
use crate::error::GraphValidationError;
use crate::graph::{Edge, EdgeKind, Graph, LoopEdge};
use crate::schema::Schema;
use crate::step::Step;
use crate::workflow::Workflow;

pub struct WorkflowBuilder {
  name: String,
  trigger_schema: Option<Arc<dyn Schema>>,
  steps: HashMap<String, Arc<Step>>,
  order: Vec<String>,
  edges: Vec<Edge>,
  loops: Vec<LoopEdge>,
  guards: HashMap<String, Condition>,
  entry_points: Vec<String>,
  /// Most recently added step.
  tail: Option<String>,
  /// Predecessors recorded by `after`, consumed by the next `step`/`then`.
  pending_join: Option<Vec<String>>,
  errors: Vec<GraphValidationError>,
}

impl WorkflowBuilder {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      trigger_schema: None,
      steps: HashMap::new(),
      order: Vec::new(),
      edges: Vec::new(),
      loops: Vec::new(),
      guards: HashMap::new(),
      entry_points: Vec::new(),
      tail: None,
      pending_join: None,
      errors: Vec::new(),
    }
  }

  /// Validate trigger data against `schema` when a run starts.
  pub fn trigger_schema(mut self, schema: impl Schema + 'static) -> Self {
    self.trigger_schema = Some(Arc::new(schema));
    self
  }

  /// Add an entry step, or a parallel branch start if one already exists.
  ///
  /// After `after([..])`, the step is instead gated on the join.
  pub fn step(mut self, step: Step) -> Self {
    let id = step.id().to_string();
    if !self.register(step) {
      return self;
    }

    match self.pending_join.take() {
      Some(predecessors) => self.add_join(&predecessors, &id),
      None => self.entry_points.push(id.clone()),
    }
    self.tail = Some(id);
    self
  }

  /// Add a step that runs after the most recently added one.
  pub fn then(mut self, step: Step) -> Self {
    let id = step.id().to_string();

    let predecessor = match (&self.pending_join, &self.tail) {
      (None, None) => {
        self
          .errors
          .push(GraphValidationError::MissingPredecessor { operation: "then" });
        return self;
      }
      (_, tail) => tail.clone(),
    };

    if !self.register(step) {
      return self;
    }

    match self.pending_join.take() {
      Some(predecessors) => self.add_join(&predecessors, &id),
      None => {
        if let Some(from) = predecessor {
          self.edges.push(Edge::new(from, id.clone(), EdgeKind::Then));
        }
      }
    }
    self.tail = Some(id);
    self
  }

  /// Gate the next `step`/`then` on every listed step having settled.
  pub fn after<I, S>(mut self, steps: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    if let Some(previous) = self.pending_join.take() {
      self
        .errors
        .push(GraphValidationError::DanglingJoin { steps: previous });
    }

    let steps: Vec<String> = steps.into_iter().map(Into::into).collect();
    if steps.is_empty() {
      self.errors.push(GraphValidationError::EmptyJoin);
    } else {
      self.pending_join = Some(steps);
    }
    self
  }

  /// Guard the most recently added step. Repeated calls conjoin.
  pub fn when(mut self, condition: Condition) -> Self {
    let Some(tail) = self.tail.clone() else {
      self
        .errors
        .push(GraphValidationError::MissingPredecessor { operation: "when" });
      return self;
    };

    let guard = match self.guards.remove(&tail) {
      Some(existing) => existing.and(condition),
      None => condition,
    };
    self.guards.insert(tail, guard);
    self
  }

  /// After the most recently added step settles, re-enter `target` while
  /// `condition` is false.
  pub fn until(mut self, condition: Condition, target: impl Into<String>) -> Self {
    let target = target.into();
    let Some(tail) = self.tail.clone() else {
      self
        .errors
        .push(GraphValidationError::MissingPredecessor { operation: "until" });
      return self;
    };

    let edge = Edge::new(tail.clone(), target.clone(), EdgeKind::Until);
    if self.loops.iter().any(|l| l.tail == tail) {
      self
        .errors
        .push(GraphValidationError::DuplicateLoop { edge, step: tail });
      return self;
    }

    self.edges.push(edge);
    self.loops.push(LoopEdge {
      tail,
      target,
      condition,
    });
    self
  }

  /// Freeze and validate the graph.
  pub fn commit(mut self) -> Result<Arc<Workflow>, GraphValidationError> {
    if let Some(steps) = self.pending_join.take() {
      self.errors.push(GraphValidationError::DanglingJoin { steps });
    }
    if let Some(error) = self.errors.into_iter().next() {
      return Err(error);
    }
    if self.entry_points.is_empty() {
      return Err(GraphValidationError::NoEntryPoints);
    }

    let position: HashMap<&str, usize> = self
      .order
      .iter()
      .enumerate()
      .map(|(i, id)| (id.as_str(), i))
      .collect();

    for edge in &self.edges {
      for end in [&edge.from, &edge.to] {
        if !position.contains_key(end.as_str()) {
          return Err(match edge.kind {
            EdgeKind::Until if end == &edge.to => GraphValidationError::DanglingLoopTarget {
              edge: edge.clone(),
              target: end.clone(),
            },
            _ => GraphValidationError::UnknownStep {
              edge: edge.clone(),
              step: end.clone(),
            },
          });
        }
      }

      let (from, to) = (position[edge.from.as_str()], position[edge.to.as_str()]);
      match edge.kind {
        EdgeKind::After if from >= to => {
          return Err(GraphValidationError::JoinBeforeDeclaration {
            edge: edge.clone(),
            step: edge.from.clone(),
          });
        }
        EdgeKind::Until if to > from => {
          return Err(GraphValidationError::DanglingLoopTarget {
            edge: edge.clone(),
            target: edge.to.clone(),
          });
        }
        _ => {}
      }
    }

    let guards = self
      .order
      .iter()
      .filter_map(|id| self.guards.get(id).map(|guard| ("when", id, guard)));
    let loops = self.loops.iter().map(|l| ("until", &l.tail, &l.condition));
    for (condition, step, predicate) in guards.chain(loops) {
      if let Some(referenced) = predicate
        .referenced_steps()
        .into_iter()
        .find(|id| !position.contains_key(id))
      {
        return Err(GraphValidationError::UnknownConditionStep {
          condition,
          step: step.clone(),
          referenced: referenced.to_string(),
        });
      }
    }

    let graph = Graph::new(&self.order, &self.edges, self.loops, self.entry_points);

    if let Some(edge) = graph.find_cycle() {
      return Err(GraphValidationError::Cycle { edge: edge.clone() });
    }

    let reachable = graph.reachable();
    if let Some(step) = self.order.iter().find(|id| !reachable.contains(id.as_str())) {
      return Err(GraphValidationError::Unreachable { step: step.clone() });
    }

    Ok(Arc::new(Workflow {
      name: self.name,
      trigger_schema: self.trigger_schema,
      steps: self.steps,
      order: self.order,
      edges: self.edges,
      guards: self.guards,
      graph,
    }))
  }

  fn register(&mut self, step: Step) -> bool {
    let id = step.id().to_string();
    if id == TRIGGER_REF {
      self.errors.push(GraphValidationError::ReservedStepId(id));
      return false;
    }
    if self.steps.contains_key(&id) {
      self.errors.push(GraphValidationError::DuplicateStep(id));
      return false;
    }
    self.order.push(id.clone());
    self.steps.insert(id, Arc::new(step));
    true
  }

  fn add_join(&mut self, predecessors: &[String], to: &str) {
    let mut seen = HashSet::new();
    for from in predecessors.iter().filter(|p| seen.insert(p.as_str())) {
      self.edges.push(Edge::new(from.clone(), to, EdgeKind::After));
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::state::StepStatus;
  use serde_json::json;

  fn noop(id: &str) -> Step {
    Step::new(id, |_| async { Ok(json!({})) })
  }

  #[test]
  fn test_linear_chain() {
    let workflow = Workflow::builder("linear")
      .step(noop("a"))
      .then(noop("b"))
      .then(noop("c"))
      .commit()
      .unwrap();

    assert_eq!(workflow.entry_points(), ["a"]);
    assert_eq!(workflow.step_ids(), ["a", "b", "c"]);
    assert_eq!(
      workflow.edges(),
      [
        Edge::new("a", "b", EdgeKind::Then),
        Edge::new("b", "c", EdgeKind::Then)
      ]
    );
  }

  #[test]
  fn test_parallel_branches_and_join() {
    let workflow = Workflow::builder("fan-in")
      .step(noop("a"))
      .step(noop("b"))
      .after(["a", "b"])
      .step(noop("c"))
      .then(noop("d"))
      .commit()
      .unwrap();

    assert_eq!(workflow.entry_points(), ["a", "b"]);
    assert_eq!(workflow.graph().join_predecessors("c"), ["a", "b"]);
    assert_eq!(workflow.graph().outgoing("c")[0].to, "d");
  }

  #[test]
  fn test_after_then_is_a_join() {
    let workflow = Workflow::builder("branch")
      .step(noop("a"))
      .then(noop("b"))
      .after(["a"])
      .then(noop("c"))
      .commit()
      .unwrap();

    assert_eq!(workflow.graph().join_predecessors("c"), ["a"]);
    assert!(workflow.graph().outgoing("b").is_empty());
  }

  #[test]
  fn test_when_attaches_to_latest_step() {
    let workflow = Workflow::builder("guarded")
      .step(noop("a"))
      .then(noop("b"))
      .when(Condition::reference("a", "count").gt(0))
      .when(Condition::status("a", StepStatus::Success))
      .commit()
      .unwrap();

    assert!(workflow.guard("a").is_none());
    match workflow.guard("b") {
      Some(Condition::All(conditions)) => assert_eq!(conditions.len(), 2),
      other => panic!("unexpected guard: {:?}", other),
    }
  }

  #[test]
  fn test_until_records_loop_edge() {
    let workflow = Workflow::builder("loop")
      .step(noop("a"))
      .then(noop("b"))
      .until(Condition::reference("b", "done").eq(true), "a")
      .then(noop("c"))
      .commit()
      .unwrap();

    let edge = workflow.graph().loop_edge("b").unwrap();
    assert_eq!(edge.target, "a");
    assert!(workflow.edges().contains(&Edge::new("b", "a", EdgeKind::Until)));
    assert_eq!(workflow.graph().outgoing("b")[0].to, "c");
  }

  #[test]
  fn test_self_loop_is_allowed() {
    let workflow = Workflow::builder("self")
      .step(noop("inc"))
      .until(Condition::reference("inc", "n").gte(3), "inc")
      .commit()
      .unwrap();
    assert!(workflow.graph().loop_edge("inc").is_some());
  }

  #[test]
  fn test_duplicate_step() {
    let err = Workflow::builder("dup")
      .step(noop("a"))
      .then(noop("a"))
      .commit()
      .unwrap_err();
    assert_eq!(err, GraphValidationError::DuplicateStep("a".to_string()));
  }

  #[test]
  fn test_trigger_is_a_reserved_step_id() {
    let err = Workflow::builder("reserved")
      .step(noop("trigger"))
      .then(noop("b"))
      .commit()
      .unwrap_err();
    assert_eq!(
      err,
      GraphValidationError::ReservedStepId("trigger".to_string())
    );
  }

  #[test]
  fn test_guard_on_unknown_step() {
    let err = Workflow::builder("typo")
      .step(noop("score"))
      .then(noop("publish"))
      .when(Condition::reference("scroe", "value").gt(0))
      .commit()
      .unwrap_err();
    assert_eq!(
      err,
      GraphValidationError::UnknownConditionStep {
        condition: "when",
        step: "publish".to_string(),
        referenced: "scroe".to_string(),
      }
    );
  }

  #[test]
  fn test_loop_condition_on_unknown_step() {
    let err = Workflow::builder("ghost-loop")
      .step(noop("score"))
      .then(noop("publish"))
      .until(
        Condition::any([
          Condition::reference("trigger", "force").eq(true),
          Condition::not(Condition::status("ghost", StepStatus::Success)),
        ]),
        "score",
      )
      .commit()
      .unwrap_err();
    assert_eq!(
      err,
      GraphValidationError::UnknownConditionStep {
        condition: "until",
        step: "publish".to_string(),
        referenced: "ghost".to_string(),
      }
    );
  }

  #[test]
  fn test_conditions_may_read_trigger_and_later_steps() {
    let workflow = Workflow::builder("refs")
      .step(noop("a"))
      .when(Condition::reference("trigger", "enabled").eq(true))
      .then(noop("b"))
      .until(Condition::status("b", StepStatus::Success), "a")
      .step(noop("c"))
      .when(Condition::func(|_| true))
      .commit();
    assert!(workflow.is_ok());
  }

  #[test]
  fn test_then_without_step() {
    let err = Workflow::builder("bad").then(noop("a")).commit().unwrap_err();
    assert_eq!(
      err,
      GraphValidationError::MissingPredecessor { operation: "then" }
    );
  }

  #[test]
  fn test_no_entry_points() {
    let err = Workflow::builder("empty").commit().unwrap_err();
    assert_eq!(err, GraphValidationError::NoEntryPoints);
  }

  #[test]
  fn test_join_on_unknown_step() {
    let err = Workflow::builder("bad-join")
      .step(noop("a"))
      .after(["a", "ghost"])
      .step(noop("c"))
      .commit()
      .unwrap_err();
    assert_eq!(
      err,
      GraphValidationError::UnknownStep {
        edge: Edge::new("ghost", "c", EdgeKind::After),
        step: "ghost".to_string(),
      }
    );
    assert_eq!(err.to_string(), "edge 'ghost' -after-> 'c' references unknown step 'ghost'");
  }

  #[test]
  fn test_join_on_later_step() {
    let err = Workflow::builder("forward-join")
      .step(noop("a"))
      .after(["b"])
      .step(noop("c"))
      .step(noop("b"))
      .commit()
      .unwrap_err();
    assert!(matches!(err, GraphValidationError::JoinBeforeDeclaration { ref step, .. } if step == "b"));
  }

  #[test]
  fn test_dangling_join() {
    let err = Workflow::builder("dangling")
      .step(noop("a"))
      .after(["a"])
      .commit()
      .unwrap_err();
    assert_eq!(
      err,
      GraphValidationError::DanglingJoin {
        steps: vec!["a".to_string()]
      }
    );
  }

  #[test]
  fn test_loop_target_must_exist() {
    let err = Workflow::builder("bad-loop")
      .step(noop("a"))
      .until(Condition::func(|_| true), "nowhere")
      .commit()
      .unwrap_err();
    assert_eq!(
      err,
      GraphValidationError::DanglingLoopTarget {
        edge: Edge::new("a", "nowhere", EdgeKind::Until),
        target: "nowhere".to_string(),
      }
    );
  }

  #[test]
  fn test_loop_target_must_precede_tail() {
    let err = Workflow::builder("forward-loop")
      .step(noop("a"))
      .until(Condition::func(|_| true), "b")
      .then(noop("b"))
      .commit()
      .unwrap_err();
    assert!(matches!(err, GraphValidationError::DanglingLoopTarget { ref target, .. } if target == "b"));
  }

  #[test]
  fn test_second_loop_on_tail() {
    let err = Workflow::builder("double-loop")
      .step(noop("a"))
      .until(Condition::func(|_| true), "a")
      .until(Condition::func(|_| false), "a")
      .commit()
      .unwrap_err();
    assert!(matches!(err, GraphValidationError::DuplicateLoop { ref step, .. } if step == "a"));
  }

  #[test]
  fn test_first_error_wins() {
    let err = Workflow::builder("many")
      .when(Condition::func(|_| true))
      .step(noop("a"))
      .step(noop("a"))
      .commit()
      .unwrap_err();
    assert_eq!(
      err,
      GraphValidationError::MissingPredecessor { operation: "when" }
    );
  }
}
