use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loom_workflow::RunState;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{SnapshotStore, StoreError};

type SnapshotKey = (String, String, String);

/// What the memory store actually keeps: the encoded state plus a write timestamp.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
  snapshot: serde_json::Value,
  saved_at: DateTime<Utc>,
}

/// In-memory snapshot store.
///
/// Snapshots are kept encoded, so a load goes through the same serialization
/// path a durable adapter would.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
  snapshots: RwLock<HashMap<SnapshotKey, Envelope>>,
}

impl MemorySnapshotStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// When a run was last persisted.
  pub async fn saved_at(
    &self,
    namespace: &str,
    workflow_name: &str,
    run_id: &str,
  ) -> Option<DateTime<Utc>> {
    self
      .snapshots
      .read()
      .await
      .get(&key(namespace, workflow_name, run_id))
      .map(|envelope| envelope.saved_at)
  }

  pub async fn len(&self) -> usize {
    self.snapshots.read().await.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.snapshots.read().await.is_empty()
  }
}

fn key(namespace: &str, workflow_name: &str, run_id: &str) -> SnapshotKey {
  (
    namespace.to_string(),
    workflow_name.to_string(),
    run_id.to_string(),
  )
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
  async fn persist(
    &self,
    namespace: &str,
    workflow_name: &str,
    run_id: &str,
    state: &RunState,
  ) -> Result<(), StoreError> {
    let envelope = Envelope {
      snapshot: serde_json::to_value(state)?,
      saved_at: Utc::now(),
    };
    self
      .snapshots
      .write()
      .await
      .insert(key(namespace, workflow_name, run_id), envelope);
    Ok(())
  }

  async fn load(
    &self,
    namespace: &str,
    workflow_name: &str,
    run_id: &str,
  ) -> Result<Option<RunState>, StoreError> {
    let snapshots = self.snapshots.read().await;
    match snapshots.get(&key(namespace, workflow_name, run_id)) {
      Some(envelope) => Ok(Some(serde_json::from_value(envelope.snapshot.clone())?)),
      None => Ok(None),
    }
  }

  async fn clear(&self, namespace: &str) -> Result<(), StoreError> {
    self
      .snapshots
      .write()
      .await
      .retain(|(ns, _, _), _| ns != namespace);
    Ok(())
  }

  async fn list_runs(
    &self,
    namespace: &str,
    workflow_name: &str,
  ) -> Result<Vec<String>, StoreError> {
    let snapshots = self.snapshots.read().await;
    let mut runs: Vec<(&String, DateTime<Utc>)> = snapshots
      .iter()
      .filter(|((ns, wf, _), _)| ns == namespace && wf == workflow_name)
      .map(|((_, _, run_id), envelope)| (run_id, envelope.saved_at))
      .collect();
    runs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    Ok(runs.into_iter().map(|(run_id, _)| run_id.clone()).collect())
  }
}
