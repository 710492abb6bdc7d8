use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::condition::Condition;

/// Kind of a transition between two steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
  /// Strict sequence.
  Then,
  /// One leg of a join: `to` waits for every `after` predecessor.
  After,
  /// Loop-back from the tail `from` to the earlier step `to`.
  Until,
}

impl EdgeKind {
  fn arrow(&self) -> &'static str {
    match self {
      EdgeKind::Then => "-then->",
      EdgeKind::After => "-after->",
      EdgeKind::Until => "-until->",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
  pub from: String,
  pub to: String,
  pub kind: EdgeKind,
}

impl Edge {
  pub fn new(from: impl Into<String>, to: impl Into<String>, kind: EdgeKind) -> Self {
    Self {
      from: from.into(),
      to: to.into(),
      kind,
    }
  }
}

impl fmt::Display for Edge {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "'{}' {} '{}'", self.from, self.kind.arrow(), self.to)
  }
}

/// A loop-back edge: after `tail` settles, re-enter `target` while `condition`
/// is false.
#[derive(Debug, Clone)]
pub struct LoopEdge {
  pub tail: String,
  pub target: String,
  pub condition: Condition,
}

/// Graph structure for traversal, built once at commit.
#[derive(Debug, Clone, Default)]
pub struct Graph {
  /// Forward (`then`/`after`) edges: step_id -> outgoing edges.
  outgoing: HashMap<String, Vec<Edge>>,
  /// Join predecessors: step_id -> steps listed in its `after`.
  joins: HashMap<String, Vec<String>>,
  /// Loop edges keyed by their tail step.
  loops: HashMap<String, LoopEdge>,
  entry_points: Vec<String>,
}

impl Graph {
  pub(crate) fn new(
    step_ids: &[String],
    edges: &[Edge],
    loops: Vec<LoopEdge>,
    entry_points: Vec<String>,
  ) -> Self {
    let mut outgoing: HashMap<String, Vec<Edge>> = HashMap::new();
    let mut joins: HashMap<String, Vec<String>> = HashMap::new();

    for id in step_ids {
      outgoing.entry(id.clone()).or_default();
    }

    for edge in edges {
      match edge.kind {
        EdgeKind::Then => outgoing.entry(edge.from.clone()).or_default().push(edge.clone()),
        EdgeKind::After => {
          outgoing.entry(edge.from.clone()).or_default().push(edge.clone());
          joins.entry(edge.to.clone()).or_default().push(edge.from.clone());
        }
        EdgeKind::Until => {}
      }
    }

    let loops = loops
      .into_iter()
      .map(|edge| (edge.tail.clone(), edge))
      .collect();

    Self {
      outgoing,
      joins,
      loops,
      entry_points,
    }
  }

  pub fn entry_points(&self) -> &[String] {
    &self.entry_points
  }

  /// Forward edges leaving a step.
  pub fn outgoing(&self, step_id: &str) -> &[Edge] {
    self
      .outgoing
      .get(step_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Steps a join waits on, or empty if `step_id` is not a join target.
  pub fn join_predecessors(&self, step_id: &str) -> &[String] {
    self.joins.get(step_id).map(|v| v.as_slice()).unwrap_or(&[])
  }

  pub fn is_join_point(&self, step_id: &str) -> bool {
    self.joins.contains_key(step_id)
  }

  pub fn loop_edge(&self, tail: &str) -> Option<&LoopEdge> {
    self.loops.get(tail)
  }

  /// Steps reachable from the entry points over forward edges.
  pub fn reachable(&self) -> HashSet<&str> {
    let mut seen: HashSet<&str> = self.entry_points.iter().map(String::as_str).collect();
    let mut queue: VecDeque<&str> = seen.iter().copied().collect();

    while let Some(id) = queue.pop_front() {
      for edge in self.outgoing(id) {
        if seen.insert(edge.to.as_str()) {
          queue.push_back(edge.to.as_str());
        }
      }
    }

    seen
  }

  /// The first forward edge found on a cycle, if any (Kahn's algorithm).
  pub fn find_cycle(&self) -> Option<&Edge> {
    let mut in_degree: HashMap<&str, usize> =
      self.outgoing.keys().map(|id| (id.as_str(), 0)).collect();
    for edges in self.outgoing.values() {
      for edge in edges {
        *in_degree.entry(edge.to.as_str()).or_default() += 1;
      }
    }

    let mut queue: VecDeque<&str> = in_degree
      .iter()
      .filter(|(_, degree)| **degree == 0)
      .map(|(id, _)| *id)
      .collect();
    let mut removed: HashSet<&str> = HashSet::new();

    while let Some(id) = queue.pop_front() {
      removed.insert(id);
      for edge in self.outgoing(id) {
        if let Some(degree) = in_degree.get_mut(edge.to.as_str()) {
          *degree -= 1;
          if *degree == 0 {
            queue.push_back(edge.to.as_str());
          }
        }
      }
    }

    self
      .outgoing
      .iter()
      .filter(|(id, _)| !removed.contains(id.as_str()))
      .flat_map(|(_, edges)| edges)
      .find(|edge| !removed.contains(edge.to.as_str()))
  }
}
