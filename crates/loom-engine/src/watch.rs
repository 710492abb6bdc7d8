//! Transition events and watchers for live observation of runs.
//!
//! After every step settles (and its snapshot is persisted) the scheduler
//! notifies each watcher registered for the run, synchronously and in
//! registration order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use loom_workflow::{RunState, StepStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A settled step, borrowed from the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct TransitionEvent<'a> {
  pub run_id: &'a str,
  pub step_id: &'a str,
  pub status: StepStatus,
  pub active_paths: &'a [String],
  pub state: &'a RunState,
}

impl TransitionEvent<'_> {
  pub fn to_transition(&self) -> Transition {
    Transition {
      run_id: self.run_id.to_string(),
      step_id: self.step_id.to_string(),
      status: self.status,
      active_paths: self.active_paths.to_vec(),
      state: self.state.clone(),
    }
  }
}

/// Owned, serializable copy of a [`TransitionEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
  pub run_id: String,
  pub step_id: String,
  pub status: StepStatus,
  pub active_paths: Vec<String>,
  pub state: RunState,
}

/// Trait for receiving transition events.
///
/// Implementations must not block; to react asynchronously (for example,
/// resuming a suspended step) spawn a task.
pub trait TransitionListener: Send + Sync {
  fn on_transition(&self, event: &TransitionEvent<'_>);
}

impl<F> TransitionListener for F
where
  F: Fn(&TransitionEvent<'_>) + Send + Sync,
{
  fn on_transition(&self, event: &TransitionEvent<'_>) {
    self(event)
  }
}

/// A listener that forwards owned transitions to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelListener {
  // Unbounded so a slow consumer never stalls the settle cycle.
  sender: mpsc::UnboundedSender<Transition>,
}

impl ChannelListener {
  pub fn new(sender: mpsc::UnboundedSender<Transition>) -> Self {
    Self { sender }
  }

  /// Create a listener together with its receiving end.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<Transition>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self::new(sender), receiver)
  }
}

impl TransitionListener for ChannelListener {
  fn on_transition(&self, event: &TransitionEvent<'_>) {
    // Receiver may have been dropped
    let _ = self.sender.send(event.to_transition());
  }
}

/// Identifies one registration, for [`WatcherRegistry::unwatch`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchHandle {
  run_id: String,
  id: u64,
}

impl WatchHandle {
  pub fn run_id(&self) -> &str {
    &self.run_id
  }
}

type Listeners = Vec<(u64, Arc<dyn TransitionListener>)>;

/// Watchers keyed by run id.
#[derive(Default)]
pub struct WatcherRegistry {
  next_id: AtomicU64,
  listeners: RwLock<HashMap<String, Listeners>>,
}

impl WatcherRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn watch(&self, run_id: &str, listener: Arc<dyn TransitionListener>) -> WatchHandle {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    if let Ok(mut listeners) = self.listeners.write() {
      listeners
        .entry(run_id.to_string())
        .or_default()
        .push((id, listener));
    }
    WatchHandle {
      run_id: run_id.to_string(),
      id,
    }
  }

  /// Remove a registration. Returns false if it was already gone.
  pub fn unwatch(&self, handle: &WatchHandle) -> bool {
    let Ok(mut listeners) = self.listeners.write() else {
      return false;
    };
    let Some(run_listeners) = listeners.get_mut(&handle.run_id) else {
      return false;
    };
    let before = run_listeners.len();
    run_listeners.retain(|(id, _)| *id != handle.id);
    let removed = run_listeners.len() != before;
    if run_listeners.is_empty() {
      listeners.remove(&handle.run_id);
    }
    removed
  }

  /// Drop every listener of a run. Returns how many were removed.
  pub fn remove_run(&self, run_id: &str) -> usize {
    self
      .listeners
      .write()
      .ok()
      .and_then(|mut listeners| listeners.remove(run_id))
      .map_or(0, |removed| removed.len())
  }

  pub fn count(&self, run_id: &str) -> usize {
    self
      .listeners
      .read()
      .ok()
      .and_then(|listeners| listeners.get(run_id).map(Vec::len))
      .unwrap_or(0)
  }

  /// Notify every watcher of the event's run.
  ///
  /// The registry lock is released before listeners run, so a listener may
  /// itself watch or unwatch.
  pub fn notify(&self, event: &TransitionEvent<'_>) {
    let listeners: Vec<Arc<dyn TransitionListener>> = match self.listeners.read() {
      Ok(listeners) => listeners
        .get(event.run_id)
        .map(|l| l.iter().map(|(_, listener)| listener.clone()).collect())
        .unwrap_or_default(),
      Err(_) => return,
    };

    for listener in listeners {
      listener.on_transition(event);
    }
  }
}
