//! Entities: the locally reconstructed view of a call or staff request.
//!
//! An entity is only ever created or changed by the reconciler. Everything
//! else reads it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque domain fields carried alongside the status (table number, urgency,
/// requester name, ...). The reconciler never interprets them.
pub type Payload = serde_json::Map<String, serde_json::Value>;

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Stable identifier of a call or staff request.
#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for EntityId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for EntityId {
  fn from(s: &str) -> Self { Self(s.to_owned()) }
}

impl From<String> for EntityId {
  fn from(s: String) -> Self { Self(s) }
}

/// The owner of a roster, e.g. a waiter or a business.
#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for SubjectId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for SubjectId {
  fn from(s: &str) -> Self { Self(s.to_owned()) }
}

// ─── Channels ────────────────────────────────────────────────────────────────

/// The transport an event arrived on.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Channel {
  /// A backgrounded push relayed by the service worker.
  ServiceWorker,
  /// A push delivered directly to the foreground page.
  Foreground,
  /// The realtime database subscription.
  Realtime,
}

impl Channel {
  /// Push channels only ever carry deltas.
  pub fn is_push(self) -> bool { !matches!(self, Self::Realtime) }
}

// ─── Entity ──────────────────────────────────────────────────────────────────

/// A reconstructed call or staff request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity<S> {
  pub id:           EntityId,
  pub status:       S,
  pub payload:      Payload,
  /// Local application time of the most recent accepted mutation, not the
  /// event's origin time.
  pub last_updated: DateTime<Utc>,
  /// Channel of the most recent accepted mutation. Diagnostic only.
  pub source:       Channel,
}

impl<S> Entity<S> {
  /// Milliseconds since the epoch at which the entity was raised, if the
  /// payload carries a `called_at` (or `created_at`) number.
  pub fn called_at(&self) -> Option<i64> {
    ["called_at", "created_at"]
      .iter()
      .find_map(|k| self.payload.get(*k).and_then(serde_json::Value::as_i64))
  }
}
