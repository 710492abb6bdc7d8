//! Step input templates.
//!
//! A step may map its input from earlier results with minijinja templates. The
//! render context exposes the trigger data and the success outputs of settled
//! steps:
//!
//! ```json
//! { "topic": "{{ trigger.topic }}", "first_fact": "{{ steps.research.facts[0] }}" }
//! ```
//!
//! Rendered strings are then coerced to the property types declared by the
//! step's input schema; properties without a declared type stay strings.

use std::collections::{BTreeMap, HashMap};

use minijinja::Environment;
use serde_json::{Map, Value, json};

use crate::error::InputError;
use crate::schema::SchemaType;
use crate::state::RunState;

/// Render every template against the run state.
pub fn resolve_inputs(
  templates: &BTreeMap<String, String>,
  state: &RunState,
) -> Result<BTreeMap<String, String>, InputError> {
  let env = Environment::new();

  let steps: Map<String, Value> = state
    .step_results
    .iter()
    .filter_map(|(id, result)| result.output().map(|output| (id.clone(), output.clone())))
    .collect();
  let context = minijinja::Value::from_serialize(json!({
    "trigger": state.trigger_data,
    "steps": steps,
  }));

  let mut resolved = BTreeMap::new();
  for (key, template) in templates {
    let rendered = env
      .render_str(template, context.clone())
      .map_err(|e| InputError::Template {
        key: key.clone(),
        message: e.to_string(),
      })?;
    resolved.insert(key.clone(), rendered);
  }

  Ok(resolved)
}

/// Coerce rendered strings to typed JSON values.
pub fn coerce_inputs(
  resolved: &BTreeMap<String, String>,
  types: &HashMap<String, SchemaType>,
) -> Result<Value, InputError> {
  let mut result = Map::new();

  for (key, value) in resolved {
    let schema_type = types.get(key).unwrap_or(&SchemaType::String);
    result.insert(key.clone(), coerce_value(key, value, *schema_type)?);
  }

  Ok(Value::Object(result))
}

fn coerce_value(key: &str, value: &str, schema_type: SchemaType) -> Result<Value, InputError> {
  let mismatch = || InputError::Coercion {
    key: key.to_string(),
    expected: schema_type.name(),
    value: value.to_string(),
  };

  match schema_type {
    SchemaType::String => Ok(Value::String(value.to_string())),

    SchemaType::Number => value
      .trim()
      .parse::<f64>()
      .ok()
      .and_then(serde_json::Number::from_f64)
      .map(Value::Number)
      .ok_or_else(mismatch),

    SchemaType::Integer => value
      .trim()
      .parse::<i64>()
      .map(|n| Value::Number(n.into()))
      .map_err(|_| mismatch()),

    SchemaType::Boolean => match value.trim().to_lowercase().as_str() {
      "true" => Ok(Value::Bool(true)),
      "false" => Ok(Value::Bool(false)),
      _ => Err(mismatch()),
    },

    SchemaType::Null => match value.trim() {
      "" | "null" | "none" => Ok(Value::Null),
      _ => Err(mismatch()),
    },

    // Composite values arrive as JSON text, e.g. `{{ steps.a.items | tojson }}`.
    SchemaType::Array => match serde_json::from_str::<Value>(value) {
      Ok(parsed @ Value::Array(_)) => Ok(parsed),
      _ => Err(mismatch()),
    },

    SchemaType::Object => match serde_json::from_str::<Value>(value) {
      Ok(parsed @ Value::Object(_)) => Ok(parsed),
      _ => Err(mismatch()),
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::state::StepResult;

  fn state() -> RunState {
    let mut state = RunState::new("run-1", "wf", json!({"topic": "rust", "depth": 2}), &[]);
    state.step_results.insert(
      "research".to_string(),
      StepResult::Success {
        output: json!({"facts": ["a", "b"], "count": 2}),
      },
    );
    state.step_results.insert(
      "broken".to_string(),
      StepResult::Failed {
        error: "boom".to_string(),
      },
    );
    state
  }

  fn templates(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  #[test]
  fn test_resolves_trigger_and_step_outputs() {
    let resolved = resolve_inputs(
      &templates(&[
        ("topic", "{{ trigger.topic }}"),
        ("first", "{{ steps.research.facts[0] }}"),
        ("summary", "{{ trigger.topic | upper }} has {{ steps.research.count }} facts"),
      ]),
      &state(),
    )
    .unwrap();

    assert_eq!(resolved["topic"], "rust");
    assert_eq!(resolved["first"], "a");
    assert_eq!(resolved["summary"], "RUST has 2 facts");
  }

  #[test]
  fn test_failed_steps_are_not_in_context() {
    let resolved = resolve_inputs(&templates(&[("x", "{{ steps.broken }}")]), &state()).unwrap();
    assert_eq!(resolved["x"], "");
  }

  #[test]
  fn test_template_syntax_errors() {
    let err = resolve_inputs(&templates(&[("x", "{{ trigger.topic ")]), &state()).unwrap_err();
    assert!(matches!(err, InputError::Template { ref key, .. } if key == "x"));
  }

  #[test]
  fn test_coerces_to_schema_types() {
    let resolved = templates(&[
      ("depth", "2"),
      ("ratio", "0.5"),
      ("deep", "True"),
      ("facts", "[\"a\",\"b\"]"),
      ("topic", "rust"),
    ]);
    let types = HashMap::from([
      ("depth".to_string(), SchemaType::Integer),
      ("ratio".to_string(), SchemaType::Number),
      ("deep".to_string(), SchemaType::Boolean),
      ("facts".to_string(), SchemaType::Array),
    ]);

    let value = coerce_inputs(&resolved, &types).unwrap();
    assert_eq!(
      value,
      json!({"depth": 2, "ratio": 0.5, "deep": true, "facts": ["a", "b"], "topic": "rust"})
    );
  }

  #[test]
  fn test_coercion_mismatch() {
    let resolved = templates(&[("depth", "deep")]);
    let types = HashMap::from([("depth".to_string(), SchemaType::Integer)]);

    let err = coerce_inputs(&resolved, &types).unwrap_err();
    assert_eq!(
      err,
      InputError::Coercion {
        key: "depth".to_string(),
        expected: "integer",
        value: "deep".to_string(),
      }
    );
  }
}
