//! Loom Workflow Engine
//!
//! This crate executes committed [`loom_workflow::Workflow`]s: it schedules
//! ready steps in parallel, evaluates guards and loop edges, parks suspended
//! paths until they are resumed, persists the run after every settled step and
//! notifies watchers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     WorkflowRuntime                         │
//! │  - create_run() / run(id) → Run (live or from the store)    │
//! │  - watch / unwatch / resume / snapshot by run id            │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                           Run                               │
//! │  - start(trigger) / resume(step, context)                   │
//! │  - serializes access to its RunState                        │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Scheduler                            │
//! │  - spawns ready steps, settles them one at a time           │
//! │  - persist → SnapshotStore, then notify → watchers          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use loom_engine::WorkflowRuntime;
//! use loom_store::MemorySnapshotStore;
//!
//! let runtime = WorkflowRuntime::new(workflow, Arc::new(MemorySnapshotStore::new()));
//! let run = runtime.create_run();
//!
//! run.watch(|event: &TransitionEvent<'_>| println!("{} -> {}", event.step_id, event.status));
//! let state = run.start(json!({ "topic": "rust" })).await?;
//!
//! if state.status() == RunStatus::Suspended {
//!     run.resume("approve", json!({ "approved": true })).await?;
//! }
//! ```

mod config;
mod error;
mod run;
mod runtime;
mod scheduler;
mod watch;

pub use config::RuntimeConfig;
pub use error::EngineError;
pub use run::Run;
pub use runtime::WorkflowRuntime;
pub use watch::{
  ChannelListener, Transition, TransitionEvent, TransitionListener, WatchHandle, WatcherRegistry,
};

pub use tokio_util::sync::CancellationToken;
