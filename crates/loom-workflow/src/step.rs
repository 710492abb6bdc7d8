use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::StepContext;
use crate::schema::Schema;

/// The body of a step.
///
/// Return `Ok(output)` on success. To pause the path, call
/// [`StepContext::suspend`] and return; the returned value is then ignored.
#[async_trait]
pub trait Executable: Send + Sync {
  async fn execute(&self, ctx: StepContext) -> anyhow::Result<Value>;
}

#[async_trait]
impl<F, Fut> Executable for F
where
  F: Fn(StepContext) -> Fut + Send + Sync,
  Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
  async fn execute(&self, ctx: StepContext) -> anyhow::Result<Value> {
    self(ctx).await
  }
}

/// An immutable unit of work.
#[derive(Clone)]
pub struct Step {
  id: String,
  description: Option<String>,
  input_schema: Option<Arc<dyn Schema>>,
  output_schema: Option<Arc<dyn Schema>>,
  resume_schema: Option<Arc<dyn Schema>>,
  suspend_schema: Option<Arc<dyn Schema>>,
  inputs: BTreeMap<String, String>,
  executable: Arc<dyn Executable>,
}

impl Step {
  /// A step whose body is an async closure.
  pub fn new<F, Fut>(id: impl Into<String>, f: F) -> Self
  where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
  {
    Self::from_executable(id, f)
  }

  pub fn from_executable(id: impl Into<String>, executable: impl Executable + 'static) -> Self {
    Self {
      id: id.into(),
      description: None,
      input_schema: None,
      output_schema: None,
      resume_schema: None,
      suspend_schema: None,
      inputs: BTreeMap::new(),
      executable: Arc::new(executable),
    }
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }

  pub fn with_input_schema(mut self, schema: impl Schema + 'static) -> Self {
    self.input_schema = Some(Arc::new(schema));
    self
  }

  pub fn with_output_schema(mut self, schema: impl Schema + 'static) -> Self {
    self.output_schema = Some(Arc::new(schema));
    self
  }

  pub fn with_resume_schema(mut self, schema: impl Schema + 'static) -> Self {
    self.resume_schema = Some(Arc::new(schema));
    self
  }

  pub fn with_suspend_schema(mut self, schema: impl Schema + 'static) -> Self {
    self.suspend_schema = Some(Arc::new(schema));
    self
  }

  /// Map input property `key` from a template over earlier results.
  pub fn with_input(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
    self.inputs.insert(key.into(), template.into());
    self
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn description(&self) -> Option<&str> {
    self.description.as_deref()
  }

  pub fn input_schema(&self) -> Option<&dyn Schema> {
    self.input_schema.as_deref()
  }

  pub fn output_schema(&self) -> Option<&dyn Schema> {
    self.output_schema.as_deref()
  }

  pub fn resume_schema(&self) -> Option<&dyn Schema> {
    self.resume_schema.as_deref()
  }

  pub fn suspend_schema(&self) -> Option<&dyn Schema> {
    self.suspend_schema.as_deref()
  }

  pub fn inputs(&self) -> &BTreeMap<String, String> {
    &self.inputs
  }

  pub fn executable(&self) -> Arc<dyn Executable> {
    self.executable.clone()
  }
}

impl fmt::Debug for Step {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Step")
      .field("id", &self.id)
      .field("description", &self.description)
      .field("inputs", &self.inputs)
      .finish_non_exhaustive()
  }
}
