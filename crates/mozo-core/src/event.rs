//! The canonical event every transport message is normalised into.

use serde::Serialize;

use crate::entity::{Channel, EntityId, Payload};

/// One normalised change to one entity.
///
/// The three variants are applied under different rules, so the reconciler
/// matches on them exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CanonicalEvent<S> {
  /// A partial hint from a push channel. May be stale, duplicated or lost.
  Delta {
    id:               EntityId,
    status:           S,
    payload:          Payload,
    channel:          Channel,
    /// Sender-side timestamp in epoch milliseconds, when the push had one.
    origin_timestamp: Option<i64>,
  },
  /// The full current record read from the realtime database.
  Snapshot {
    id:      EntityId,
    status:  S,
    payload: Payload,
  },
  /// The realtime node no longer exists.
  Delete { id: EntityId },
}

impl<S> CanonicalEvent<S> {
  pub fn id(&self) -> &EntityId {
    match self {
      Self::Delta { id, .. } | Self::Snapshot { id, .. } | Self::Delete { id } => {
        id
      }
    }
  }

  pub fn channel(&self) -> Channel {
    match self {
      Self::Delta { channel, .. } => *channel,
      Self::Snapshot { .. } | Self::Delete { .. } => Channel::Realtime,
    }
  }

  pub fn label(&self) -> &'static str {
    match self {
      Self::Delta { .. } => "delta",
      Self::Snapshot { .. } => "snapshot",
      Self::Delete { .. } => "delete",
    }
  }
}
