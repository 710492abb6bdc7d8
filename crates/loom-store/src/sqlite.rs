use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use loom_workflow::RunState;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use tracing::debug;

use crate::{SnapshotStore, StoreError};

/// SQLite-based snapshot store.
///
/// One row per run; `updated_at` is adapter metadata and never part of the
/// loaded state.
pub struct SqliteSnapshotStore {
  pool: SqlitePool,
}

impl SqliteSnapshotStore {
  /// Create a store over an existing pool. Call [`migrate`](Self::migrate) once.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if needed) a database file and run migrations.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
    let options = SqliteConnectOptions::new()
      .filename(path.as_ref())
      .create_if_missing(true);
    let store = Self::new(SqlitePool::connect_with(options).await?);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(&self.pool).await?;
    Ok(())
  }

  pub fn pool(&self) -> &SqlitePool {
    &self.pool
  }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
  async fn persist(
    &self,
    namespace: &str,
    workflow_name: &str,
    run_id: &str,
    state: &RunState,
  ) -> Result<(), StoreError> {
    let snapshot = serde_json::to_string(state)?;

    sqlx::query(
      r#"
            INSERT INTO workflow_snapshots (namespace, workflow_name, run_id, snapshot, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (namespace, workflow_name, run_id)
            DO UPDATE SET snapshot = excluded.snapshot, updated_at = excluded.updated_at
            "#,
    )
    .bind(namespace)
    .bind(workflow_name)
    .bind(run_id)
    .bind(&snapshot)
    .bind(Utc::now())
    .execute(&self.pool)
    .await?;

    debug!(namespace, workflow_name, run_id, "snapshot_persisted");
    Ok(())
  }

  async fn load(
    &self,
    namespace: &str,
    workflow_name: &str,
    run_id: &str,
  ) -> Result<Option<RunState>, StoreError> {
    let snapshot: Option<String> = sqlx::query_scalar(
      r#"
            SELECT snapshot
            FROM workflow_snapshots
            WHERE namespace = ? AND workflow_name = ? AND run_id = ?
            "#,
    )
    .bind(namespace)
    .bind(workflow_name)
    .bind(run_id)
    .fetch_optional(&self.pool)
    .await?;

    match snapshot {
      Some(snapshot) => Ok(Some(serde_json::from_str(&snapshot)?)),
      None => Ok(None),
    }
  }

  async fn clear(&self, namespace: &str) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM workflow_snapshots WHERE namespace = ?")
      .bind(namespace)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  async fn list_runs(
    &self,
    namespace: &str,
    workflow_name: &str,
  ) -> Result<Vec<String>, StoreError> {
    let runs = sqlx::query_scalar(
      r#"
            SELECT run_id
            FROM workflow_snapshots
            WHERE namespace = ? AND workflow_name = ?
            ORDER BY updated_at DESC, run_id ASC
            "#,
    )
    .bind(namespace)
    .bind(workflow_name)
    .fetch_all(&self.pool)
    .await?;
    Ok(runs)
  }
}
