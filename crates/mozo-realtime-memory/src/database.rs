//! [`MemoryDatabase`]: the in-memory implementation of [`RealtimeTransport`].

use std::{
  collections::{BTreeMap, HashMap},
  sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use mozo_core::realtime::{
  RealtimeTransport, Snapshot, SnapshotListener, Subscription,
};
use serde_json::Value;

use crate::{Error, Result};

// ─── Database ────────────────────────────────────────────────────────────────

type Listeners = Vec<(u64, Arc<dyn SnapshotListener>)>;

#[derive(Default)]
struct Inner {
  nodes:     BTreeMap<String, Value>,
  listeners: HashMap<String, Listeners>,
  /// Remaining number of subscribe calls to reject, per path.
  rejects:   HashMap<String, usize>,
  next_id:   u64,
}

/// A realtime database held entirely in memory.
///
/// Cloning is cheap; clones share the same nodes and listeners.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
  inner: Arc<Mutex<Inner>>,
}

impl MemoryDatabase {
  pub fn new() -> Self { Self::default() }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Write `value` at `path` and notify its listeners. Writing `null` removes
  /// the node.
  pub fn set(&self, path: &str, value: Value) -> Result<()> {
    validate(path)?;
    let listeners = {
      let mut inner = self.lock();
      if value.is_null() {
        inner.nodes.remove(path);
      } else {
        inner.nodes.insert(path.to_owned(), value.clone());
      }
      inner.listeners_of(path)
    };
    tracing::trace!(path, listeners = listeners.len(), "node written");
    let snapshot = Snapshot::new(path, Some(value));
    for listener in listeners {
      listener.on_value(snapshot.clone());
    }
    Ok(())
  }

  /// Remove the node at `path` and notify its listeners.
  pub fn remove(&self, path: &str) -> Result<()> { self.set(path, Value::Null) }

  pub fn get(&self, path: &str) -> Option<Value> {
    self.lock().nodes.get(path).cloned()
  }

  /// Reject the next `times` subscribe calls for `path`.
  pub fn reject_subscribe(&self, path: &str, times: usize) {
    self.lock().rejects.insert(path.to_owned(), times);
  }

  /// Fail every live subscription on `path`: each listener receives
  /// `on_error` and is detached.
  pub fn fail_listeners(&self, path: &str, error: &str) {
    let listeners = self.lock().listeners.remove(path).unwrap_or_default();
    for (_, listener) in listeners {
      listener.on_error(error.to_owned());
    }
  }

  /// Number of live listeners attached to `path`.
  pub fn listener_count(&self, path: &str) -> usize {
    self.lock().listeners.get(path).map_or(0, Vec::len)
  }
}

impl Inner {
  fn listeners_of(&self, path: &str) -> Vec<Arc<dyn SnapshotListener>> {
    self
      .listeners
      .get(path)
      .map(|ls| ls.iter().map(|(_, l)| Arc::clone(l)).collect())
      .unwrap_or_default()
  }

  fn take_reject(&mut self, path: &str) -> bool {
    match self.rejects.get_mut(path) {
      Some(n) if *n > 0 => {
        *n -= 1;
        true
      }
      _ => false,
    }
  }
}

fn validate(path: &str) -> Result<()> {
  if path.is_empty() || path.starts_with('/') || path.ends_with('/') {
    return Err(Error::InvalidPath(path.to_owned()));
  }
  Ok(())
}

// ─── Transport ───────────────────────────────────────────────────────────────

impl RealtimeTransport for MemoryDatabase {
  type Error = Error;
  type Subscription = MemorySubscription;

  fn subscribe(
    &self,
    path: &str,
    listener: Arc<dyn SnapshotListener>,
  ) -> Result<MemorySubscription> {
    validate(path)?;
    let (id, current) = {
      let mut inner = self.lock();
      if inner.take_reject(path) {
        return Err(Error::SubscribeRejected(path.to_owned()));
      }
      let id = inner.next_id;
      inner.next_id += 1;
      inner
        .listeners
        .entry(path.to_owned())
        .or_default()
        .push((id, Arc::clone(&listener)));
      (id, inner.nodes.get(path).cloned())
    };

    // Late subscribers converge immediately instead of waiting for a write.
    listener.on_value(Snapshot::new(path, current));

    Ok(MemorySubscription {
      inner: Arc::downgrade(&self.inner),
      path: path.to_owned(),
      id,
    })
  }
}

// ─── Subscription ────────────────────────────────────────────────────────────

/// Handle to one listener registered on a [`MemoryDatabase`].
pub struct MemorySubscription {
  inner: Weak<Mutex<Inner>>,
  path:  String,
  id:    u64,
}

impl MemorySubscription {
  pub fn path(&self) -> &str { &self.path }
}

impl Subscription for MemorySubscription {
  fn close(self) {
    let Some(inner) = self.inner.upgrade() else { return };
    let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(listeners) = inner.listeners.get_mut(&self.path) {
      listeners.retain(|(id, _)| *id != self.id);
      if listeners.is_empty() {
        inner.listeners.remove(&self.path);
      }
    }
  }
}
