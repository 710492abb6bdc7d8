//! Predicates over a run's accumulated state, used by `when` guards and
//! `until` loop edges.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde_json::{Number, Value};

use crate::state::{RunState, StepStatus};

/// Reference id that resolves to the run's trigger data instead of a step.
pub const TRIGGER_REF: &str = "trigger";

type ConditionFn = dyn Fn(&RunState) -> anyhow::Result<bool> + Send + Sync;

/// Comparison operators for declarative conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
  Eq,
  Ne,
  Gt,
  Gte,
  Lt,
  Lte,
  Exists,
  NotExists,
}

/// A predicate over a [`RunState`].
#[derive(Clone)]
pub enum Condition {
  /// Compare the value at `path` inside a step's output (or the trigger data).
  Compare {
    step: String,
    path: String,
    op: Comparison,
    value: Value,
  },
  /// Check the status of a step's latest result.
  Status { step: String, status: StepStatus },
  All(Vec<Condition>),
  Any(Vec<Condition>),
  Not(Box<Condition>),
  Func(Arc<ConditionFn>),
}

impl Condition {
  /// Start a declarative comparison against `path` in `step`'s output.
  ///
  /// ```ignore
  /// Condition::reference("research", "count").gt(0)
  /// ```
  pub fn reference(step: impl Into<String>, path: impl Into<String>) -> Reference {
    Reference {
      step: step.into(),
      path: path.into(),
    }
  }

  /// Start a comparison against a path in the trigger data.
  pub fn trigger(path: impl Into<String>) -> Reference {
    Self::reference(TRIGGER_REF, path)
  }

  pub fn status(step: impl Into<String>, status: StepStatus) -> Self {
    Condition::Status {
      step: step.into(),
      status,
    }
  }

  pub fn all(conditions: impl IntoIterator<Item = Condition>) -> Self {
    Condition::All(conditions.into_iter().collect())
  }

  pub fn any(conditions: impl IntoIterator<Item = Condition>) -> Self {
    Condition::Any(conditions.into_iter().collect())
  }

  #[allow(clippy::should_implement_trait)]
  pub fn not(condition: Condition) -> Self {
    Condition::Not(Box::new(condition))
  }

  /// An arbitrary predicate over the run state.
  pub fn func<F>(f: F) -> Self
  where
    F: Fn(&RunState) -> bool + Send + Sync + 'static,
  {
    Condition::Func(Arc::new(move |state| Ok(f(state))))
  }

  /// A predicate that may fail. Failures mark the owning step as failed.
  pub fn try_func<F>(f: F) -> Self
  where
    F: Fn(&RunState) -> anyhow::Result<bool> + Send + Sync + 'static,
  {
    Condition::Func(Arc::new(f))
  }

  /// Conjoin with another condition, flattening nested `All`s.
  pub fn and(self, other: Condition) -> Self {
    match self {
      Condition::All(mut conditions) => {
        conditions.push(other);
        Condition::All(conditions)
      }
      first => Condition::All(vec![first, other]),
    }
  }

  pub fn evaluate(&self, state: &RunState) -> anyhow::Result<bool> {
    match self {
      Condition::Compare {
        step,
        path,
        op,
        value,
      } => Ok(compare(resolve(state, step, path), *op, value)),
      Condition::Status { step, status } => Ok(state.status_of(step) == Some(*status)),
      Condition::All(conditions) => {
        for condition in conditions {
          if !condition.evaluate(state)? {
            return Ok(false);
          }
        }
        Ok(true)
      }
      Condition::Any(conditions) => {
        for condition in conditions {
          if condition.evaluate(state)? {
            return Ok(true);
          }
        }
        Ok(false)
      }
      Condition::Not(inner) => Ok(!inner.evaluate(state)?),
      Condition::Func(f) => f(state),
    }
  }

  /// Step ids this condition reads declaratively.
  pub fn referenced_steps(&self) -> Vec<&str> {
    let mut steps = Vec::new();
    self.collect_references(&mut steps);
    steps
  }

  fn collect_references<'a>(&'a self, out: &mut Vec<&'a str>) {
    match self {
      Condition::Compare { step, .. } | Condition::Status { step, .. } => {
        if step != TRIGGER_REF {
          out.push(step);
        }
      }
      Condition::All(conditions) | Condition::Any(conditions) => {
        for condition in conditions {
          condition.collect_references(out);
        }
      }
      Condition::Not(inner) => inner.collect_references(out),
      Condition::Func(_) => {}
    }
  }
}

impl fmt::Debug for Condition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Condition::Compare {
        step,
        path,
        op,
        value,
      } => write!(f, "{}.{} {:?} {}", step, path, op, value),
      Condition::Status { step, status } => write!(f, "{}.status == {}", step, status),
      Condition::All(conditions) => f.debug_tuple("All").field(conditions).finish(),
      Condition::Any(conditions) => f.debug_tuple("Any").field(conditions).finish(),
      Condition::Not(inner) => f.debug_tuple("Not").field(inner).finish(),
      Condition::Func(_) => f.write_str("Func(..)"),
    }
  }
}

/// Builder half of a declarative comparison.
#[derive(Debug, Clone)]
pub struct Reference {
  step: String,
  path: String,
}

impl Reference {
  fn op(self, op: Comparison, value: Value) -> Condition {
    Condition::Compare {
      step: self.step,
      path: self.path,
      op,
      value,
    }
  }

  pub fn eq(self, value: impl Into<Value>) -> Condition {
    self.op(Comparison::Eq, value.into())
  }

  pub fn ne(self, value: impl Into<Value>) -> Condition {
    self.op(Comparison::Ne, value.into())
  }

  pub fn gt(self, value: impl Into<Value>) -> Condition {
    self.op(Comparison::Gt, value.into())
  }

  pub fn gte(self, value: impl Into<Value>) -> Condition {
    self.op(Comparison::Gte, value.into())
  }

  pub fn lt(self, value: impl Into<Value>) -> Condition {
    self.op(Comparison::Lt, value.into())
  }

  pub fn lte(self, value: impl Into<Value>) -> Condition {
    self.op(Comparison::Lte, value.into())
  }

  pub fn exists(self) -> Condition {
    self.op(Comparison::Exists, Value::Null)
  }

  pub fn not_exists(self) -> Condition {
    self.op(Comparison::NotExists, Value::Null)
  }
}

/// Look up `path` in a step's success output, or in the trigger data.
fn resolve<'a>(state: &'a RunState, step: &str, path: &str) -> Option<&'a Value> {
  let root = if step == TRIGGER_REF {
    Some(&state.trigger_data)
  } else {
    state.result(step).and_then(|r| r.output())
  }?;
  lookup(root, path)
}

/// Walk a dotted path (`facts.0.name`) through objects and arrays.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
  if path.is_empty() {
    return Some(root);
  }
  path.split('.').try_fold(root, |value, segment| match value {
    Value::Object(map) => map.get(segment),
    Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
    _ => None,
  })
}

fn compare(actual: Option<&Value>, op: Comparison, expected: &Value) -> bool {
  let Some(actual) = actual else {
    return op == Comparison::NotExists;
  };
  match op {
    Comparison::Exists => true,
    Comparison::NotExists => false,
    Comparison::Eq => values_equal(actual, expected),
    Comparison::Ne => !values_equal(actual, expected),
    Comparison::Gt => order(actual, expected) == Some(Ordering::Greater),
    Comparison::Gte => matches!(
      order(actual, expected),
      Some(Ordering::Greater | Ordering::Equal)
    ),
    Comparison::Lt => order(actual, expected) == Some(Ordering::Less),
    Comparison::Lte => matches!(
      order(actual, expected),
      Some(Ordering::Less | Ordering::Equal)
    ),
  }
}

// 1 and 1.0 are equal here, unlike `Value`'s PartialEq.
fn values_equal(a: &Value, b: &Value) -> bool {
  match (a, b) {
    (Value::Number(x), Value::Number(y)) => number_order(x, y) == Some(Ordering::Equal),
    _ => a == b,
  }
}

fn order(a: &Value, b: &Value) -> Option<Ordering> {
  match (a, b) {
    (Value::Number(x), Value::Number(y)) => number_order(x, y),
    (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
    _ => None,
  }
}

/// Integers compare exactly; floats (or a float and an integer) go through f64.
fn number_order(x: &Number, y: &Number) -> Option<Ordering> {
  fn integer(n: &Number) -> Option<i128> {
    n.as_i64()
      .map(i128::from)
      .or_else(|| n.as_u64().map(i128::from))
  }

  match (integer(x), integer(y)) {
    (Some(x), Some(y)) => Some(x.cmp(&y)),
    _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
  }
}
