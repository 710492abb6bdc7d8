//! Loom Store
//!
//! This crate provides the snapshot store the engine persists run state to
//! after every settled step, and reloads it from for late resume or watch.
//!
//! The [`SnapshotStore`] trait defines operations for:
//! - Persisting the latest [`RunState`] of a run
//! - Loading it back, with any adapter metadata stripped
//! - Listing and clearing stored runs
//!
//! Two adapters are provided: [`MemorySnapshotStore`] for tests and single-process
//! use, and [`SqliteSnapshotStore`] for durable storage.

mod memory;
mod sqlite;

pub use memory::MemorySnapshotStore;
pub use sqlite::SqliteSnapshotStore;

use async_trait::async_trait;
use loom_workflow::RunState;

/// Error type for snapshot operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Running schema migrations failed.
  #[error("migration error: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),

  /// A snapshot could not be encoded or decoded.
  #[error("snapshot serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// The backend refused the operation.
  #[error("snapshot store unavailable: {0}")]
  Unavailable(String),
}

/// Durable storage for run state.
///
/// `persist` overwrites the previous snapshot of the same run. `load` must return
/// a state equal to the last persisted one; adapters may keep extra metadata but
/// never leak it into the returned state.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
  async fn persist(
    &self,
    namespace: &str,
    workflow_name: &str,
    run_id: &str,
    state: &RunState,
  ) -> Result<(), StoreError>;

  async fn load(
    &self,
    namespace: &str,
    workflow_name: &str,
    run_id: &str,
  ) -> Result<Option<RunState>, StoreError>;

  /// Remove every snapshot in `namespace`.
  async fn clear(&self, namespace: &str) -> Result<(), StoreError>;

  /// Run ids stored for a workflow, most recently updated first.
  async fn list_runs(&self, namespace: &str, workflow_name: &str)
  -> Result<Vec<String>, StoreError>;
}
