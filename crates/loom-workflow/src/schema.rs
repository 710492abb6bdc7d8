//! Structural validators for values crossing step boundaries.
//!
//! The engine only needs `validate`. [`JsonSchema`] is a small validator for the
//! JSON Schema subset workflows actually use (`type`, `properties`, `required`,
//! `items`, `enum`); anything else can implement [`Schema`] directly or be a closure.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::ValidationError;

/// A structural validator. The returned value replaces the validated one.
pub trait Schema: Send + Sync {
  fn validate(&self, value: &Value) -> Result<Value, ValidationError>;

  /// Declared property types, used to coerce rendered input templates.
  fn property_types(&self) -> HashMap<String, SchemaType> {
    HashMap::new()
  }
}

impl<F> Schema for F
where
  F: Fn(&Value) -> Result<Value, ValidationError> + Send + Sync,
{
  fn validate(&self, value: &Value) -> Result<Value, ValidationError> {
    self(value)
  }
}

/// JSON Schema primitive types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
  String,
  Number,
  Integer,
  Boolean,
  Null,
  Array,
  Object,
}

impl SchemaType {
  fn parse(name: &str) -> Option<Self> {
    match name {
      "string" => Some(SchemaType::String),
      "number" => Some(SchemaType::Number),
      "integer" => Some(SchemaType::Integer),
      "boolean" => Some(SchemaType::Boolean),
      "null" => Some(SchemaType::Null),
      "array" => Some(SchemaType::Array),
      "object" => Some(SchemaType::Object),
      _ => None,
    }
  }

  pub fn name(&self) -> &'static str {
    match self {
      SchemaType::String => "string",
      SchemaType::Number => "number",
      SchemaType::Integer => "integer",
      SchemaType::Boolean => "boolean",
      SchemaType::Null => "null",
      SchemaType::Array => "array",
      SchemaType::Object => "object",
    }
  }

  fn matches(&self, value: &Value) -> bool {
    match self {
      SchemaType::String => value.is_string(),
      SchemaType::Number => value.is_number(),
      SchemaType::Integer => value.is_i64() || value.is_u64(),
      SchemaType::Boolean => value.is_boolean(),
      SchemaType::Null => value.is_null(),
      SchemaType::Array => value.is_array(),
      SchemaType::Object => value.is_object(),
    }
  }
}

/// Validator backed by a JSON Schema document.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonSchema {
  document: Value,
}

impl JsonSchema {
  pub fn new(document: Value) -> Self {
    Self { document }
  }

  pub fn document(&self) -> &Value {
    &self.document
  }
}

impl Schema for JsonSchema {
  fn validate(&self, value: &Value) -> Result<Value, ValidationError> {
    check(&self.document, value, "$")?;
    Ok(value.clone())
  }

  fn property_types(&self) -> HashMap<String, SchemaType> {
    extract_property_types(&self.document)
  }
}

/// Extract top-level property types from a JSON Schema object.
///
/// Only simple object schemas with `properties` are understood; unknown type
/// names are left out so their inputs stay strings.
pub fn extract_property_types(document: &Value) -> HashMap<String, SchemaType> {
  let mut types = HashMap::new();

  if let Some(properties) = document.get("properties").and_then(Value::as_object) {
    for (name, property) in properties {
      if let Some(schema_type) = property
        .get("type")
        .and_then(Value::as_str)
        .and_then(SchemaType::parse)
      {
        types.insert(name.clone(), schema_type);
      }
    }
  }

  types
}

fn check(schema: &Value, value: &Value, path: &str) -> Result<(), ValidationError> {
  if let Some(type_name) = schema.get("type").and_then(Value::as_str) {
    let expected = SchemaType::parse(type_name).ok_or_else(|| {
      ValidationError::new(path, format!("unsupported schema type '{}'", type_name))
    })?;
    if !expected.matches(value) {
      return Err(ValidationError::new(
        path,
        format!("expected {}, got {}", expected.name(), describe(value)),
      ));
    }
  }

  if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
    if !allowed.contains(value) {
      return Err(ValidationError::new(
        path,
        format!("{} is not one of {}", value, Value::Array(allowed.clone())),
      ));
    }
  }

  if let Some(object) = value.as_object() {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
      for name in required.iter().filter_map(Value::as_str) {
        if !object.contains_key(name) {
          return Err(ValidationError::new(
            path,
            format!("missing required property '{}'", name),
          ));
        }
      }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
      for (name, property_schema) in properties {
        if let Some(property) = object.get(name) {
          check(property_schema, property, &format!("{}.{}", path, name))?;
        }
      }
    }
  }

  if let (Some(items), Some(array)) = (schema.get("items"), value.as_array()) {
    for (index, item) in array.iter().enumerate() {
      check(items, item, &format!("{}[{}]", path, index))?;
    }
  }

  Ok(())
}

fn describe(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn topic_schema() -> JsonSchema {
    JsonSchema::new(json!({
      "type": "object",
      "required": ["topic"],
      "properties": {
        "topic": { "type": "string" },
        "depth": { "type": "integer" },
        "tags": { "type": "array", "items": { "type": "string" } },
        "mode": { "enum": ["fast", "thorough"] }
      }
    }))
  }

  #[test]
  fn test_valid_object_passes_through() {
    let value = json!({"topic": "x", "depth": 2, "tags": ["a"], "mode": "fast"});
    assert_eq!(topic_schema().validate(&value).unwrap(), value);
  }

  #[test]
  fn test_missing_required_property() {
    let err = topic_schema().validate(&json!({"depth": 1})).unwrap_err();
    assert_eq!(err.path, "$");
    assert!(err.message.contains("topic"));
  }

  #[test]
  fn test_nested_errors_carry_a_path() {
    let err = topic_schema()
      .validate(&json!({"topic": "x", "tags": ["a", 3]}))
      .unwrap_err();
    assert_eq!(err.path, "$.tags[1]");
    assert_eq!(err.message, "expected string, got number");
  }

  #[test]
  fn test_integer_rejects_floats() {
    let err = topic_schema()
      .validate(&json!({"topic": "x", "depth": 1.5}))
      .unwrap_err();
    assert_eq!(err.path, "$.depth");
  }

  #[test]
  fn test_enum_membership() {
    let err = topic_schema()
      .validate(&json!({"topic": "x", "mode": "slow"}))
      .unwrap_err();
    assert_eq!(err.path, "$.mode");
  }

  #[test]
  fn test_closures_are_schemas() {
    let non_empty = |value: &Value| {
      if value.as_str().is_some_and(|s| !s.is_empty()) {
        Ok(value.clone())
      } else {
        Err(ValidationError::root("must be a non-empty string"))
      }
    };
    assert!(non_empty.validate(&json!("x")).is_ok());
    assert!(non_empty.validate(&json!("")).is_err());
  }

  #[test]
  fn test_extract_property_types() {
    let types = topic_schema().property_types();
    assert_eq!(types.get("topic"), Some(&SchemaType::String));
    assert_eq!(types.get("depth"), Some(&SchemaType::Integer));
    assert_eq!(types.get("tags"), Some(&SchemaType::Array));
    assert!(!types.contains_key("mode"));
  }
}
