//! Loom Workflow
//!
//! This crate provides the declarative side of loom: steps, the fluent graph
//! builder, the immutable committed [`Workflow`], and the [`RunState`] record the
//! engine mutates while executing it.
//!
//! Key pieces:
//! - [`Step`]: an id, optional schemas and input templates, and an async body
//! - [`WorkflowBuilder`]: `step`/`then`/`after`/`when`/`until`, validated by `commit`
//! - [`Condition`]: declarative or functional predicates for guards and loops
//! - [`StepContext`]: what a step body sees (trigger data, prior results, `suspend`)
//!
//! Nothing here executes anything; see `loom-engine` for the scheduler.

mod builder;
mod condition;
mod context;
mod error;
mod graph;
pub mod input;
mod schema;
mod state;
mod step;
mod workflow;

pub use builder::WorkflowBuilder;
pub use condition::{Comparison, Condition, Reference, TRIGGER_REF, lookup};
pub use context::{Access, StepContext};
pub use error::{GraphValidationError, InputError, ValidationError};
pub use graph::{Edge, EdgeKind, Graph, LoopEdge};
pub use schema::{JsonSchema, Schema, SchemaType, extract_property_types};
pub use state::{RunState, RunStatus, StepResult, StepStatus};
pub use step::{Executable, Step};
pub use workflow::Workflow;

// Re-exported so step bodies can `#[async_trait]` without a direct dependency.
pub use async_trait::async_trait;
