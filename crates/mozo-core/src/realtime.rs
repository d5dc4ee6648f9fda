//! The `RealtimeTransport` trait and the snapshot value it delivers.
//!
//! The trait is implemented by realtime database backends (e.g.
//! `mozo-realtime-memory`). The reconciliation engine depends on this
//! abstraction, not on any concrete backend.

use std::sync::Arc;

use serde_json::Value;

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// The state of one realtime node at the moment of delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
  path:  String,
  value: Option<Value>,
}

impl Snapshot {
  /// A `null` value is the same as a missing node.
  pub fn new(path: impl Into<String>, value: Option<Value>) -> Self {
    Self {
      path:  path.into(),
      value: value.filter(|v| !v.is_null()),
    }
  }

  pub fn path(&self) -> &str { &self.path }

  pub fn exists(&self) -> bool { self.value.is_some() }

  pub fn value(&self) -> Option<&Value> { self.value.as_ref() }

  pub fn into_value(self) -> Option<Value> { self.value }
}

// ─── Listener ────────────────────────────────────────────────────────────────

/// Receives deliveries for a single subscription.
///
/// Backends must call [`SnapshotListener::on_value`] once with the current
/// state as soon as the subscription is attached, then again after every
/// change.
pub trait SnapshotListener: Send + Sync {
  fn on_value(&self, snapshot: Snapshot);

  /// The subscription failed after it was attached (e.g. permission revoked).
  fn on_error(&self, error: String);
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// An open subscription. Closing it guarantees no further deliveries from the
/// backend to its listener.
pub trait Subscription: Send {
  fn close(self);
}

/// Abstraction over a realtime database that pushes node snapshots.
pub trait RealtimeTransport {
  type Subscription: Subscription;
  type Error: std::error::Error + Send + Sync + 'static;

  /// Attach `listener` to the node at `path`.
  ///
  /// Returns an error if the subscription could not be established (transport
  /// or authorisation failure). No delivery happens in that case.
  fn subscribe(
    &self,
    path: &str,
    listener: Arc<dyn SnapshotListener>,
  ) -> Result<Self::Subscription, Self::Error>;
}
