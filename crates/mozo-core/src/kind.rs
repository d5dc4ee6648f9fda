//! Entity kinds and their status orderings.
//!
//! A kind ties together everything the pipeline needs to know about one
//! family of entities: how its statuses rank, which push `type` tags map to
//! which status, where the entity id hides in a push payload, and where its
//! nodes live in the realtime database.

use std::{fmt, hash::Hash, str::FromStr};

use serde::{Serialize, de::DeserializeOwned};

/// A family of reconcilable entities.
///
/// Implemented by uninhabited marker types; the kind is only ever used as a
/// type parameter.
pub trait EntityKind: Send + Sync + 'static {
  type Status: Copy
    + Eq
    + Hash
    + fmt::Debug
    + fmt::Display
    + FromStr
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static;

  /// Human-readable name used in logs and errors.
  const NAME: &'static str;

  /// Candidate push-data keys holding the entity id, in lookup order.
  const ID_KEYS: &'static [&'static str];

  /// Default realtime path of one entity; `{id}` is substituted. `None` for
  /// kinds whose entities have no node of their own.
  const ENTITY_PATH: Option<&'static str>;

  /// Default realtime path of a subject's roster; `{subject}` is substituted.
  const ROSTER_PATH: &'static str;

  /// Field of the roster node listing the ids of interest, if it has one.
  const ROSTER_IDS_FIELD: Option<&'static str>;

  /// Default path of a subject's feed node, which carries statistics and
  /// embedded records but no ids.
  const FEED_PATH: Option<&'static str> = None;

  /// Entity records that subject nodes carry inline.
  const EMBEDDED: &'static [EmbeddedRecord] = &[];

  /// Status of a freshly raised entity.
  fn initial() -> Self::Status;

  /// Ordinal rank. Deltas may never lower it.
  fn rank(status: Self::Status) -> u8;

  /// Whether the entity is finished (it may still exist server-side).
  fn is_terminal(status: Self::Status) -> bool;

  /// Status implied by a push message `type` tag.
  fn status_for_push_type(push_type: Option<&str>) -> Self::Status;

  /// Parse a status string, `None` if it is not one of this kind's statuses.
  fn parse_status(raw: &str) -> Option<Self::Status> {
    Self::Status::from_str(raw).ok()
  }
}

/// An entity record nested in a subject node, e.g.
/// `{"recent_activity": {"last_request_id": "r1", "last_request_status": "pending"}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedRecord {
  pub field:      &'static str,
  pub id_key:     &'static str,
  pub status_key: &'static str,
}

// ─── Calls ───────────────────────────────────────────────────────────────────

/// A table calling for a waiter.
#[derive(Debug)]
pub enum Call {}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  serde::Serialize,
  serde::Deserialize,
  strum::Display,
  strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CallStatus {
  Pending,
  Acknowledged,
  Completed,
}

impl EntityKind for Call {
  type Status = CallStatus;

  const ENTITY_PATH: Option<&'static str> = Some("active_calls/{id}");
  const FEED_PATH: Option<&'static str> = Some("businesses/{subject}");
  const ID_KEYS: &'static [&'static str] = &["call_id", "callId", "callID"];
  const NAME: &'static str = "call";
  const ROSTER_IDS_FIELD: Option<&'static str> = Some("active_calls");
  const ROSTER_PATH: &'static str = "waiters/{subject}";

  fn initial() -> CallStatus { CallStatus::Pending }

  fn rank(status: CallStatus) -> u8 {
    match status {
      CallStatus::Pending => 1,
      CallStatus::Acknowledged => 2,
      CallStatus::Completed => 3,
    }
  }

  fn is_terminal(status: CallStatus) -> bool {
    status == CallStatus::Completed
  }

  fn status_for_push_type(push_type: Option<&str>) -> CallStatus {
    match push_type {
      Some("acknowledged") => CallStatus::Acknowledged,
      Some("completed") => CallStatus::Completed,
      _ => CallStatus::Pending,
    }
  }
}

// ─── Staff requests ──────────────────────────────────────────────────────────

/// A request to join (or an invitation into) a business's staff.
#[derive(Debug)]
pub enum StaffRequest {}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  serde::Serialize,
  serde::Deserialize,
  strum::Display,
  strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StaffRequestStatus {
  Pending,
  Confirmed,
  Rejected,
  Invited,
}

impl EntityKind for StaffRequest {
  type Status = StaffRequestStatus;

  // An admin follows the business node, a staff member their own node. The
  // backend keeps no per-request node; requests arrive as embedded records.
  const EMBEDDED: &'static [EmbeddedRecord] = &[
    EmbeddedRecord {
      field:      "recent_activity",
      id_key:     "last_request_id",
      status_key: "last_request_status",
    },
    EmbeddedRecord {
      field:      "current_request",
      id_key:     "id",
      status_key: "status",
    },
  ];
  const ENTITY_PATH: Option<&'static str> = None;
  const FEED_PATH: Option<&'static str> = Some("users_staff/{subject}");
  const ID_KEYS: &'static [&'static str] = &[
    "staff_request_id",
    "staffRequestId",
    "request_id",
    "last_request_id",
  ];
  const NAME: &'static str = "staff request";
  const ROSTER_IDS_FIELD: Option<&'static str> = None;
  const ROSTER_PATH: &'static str = "businesses_staff/{subject}";

  fn initial() -> StaffRequestStatus { StaffRequestStatus::Pending }

  // Every outcome of a pending request ranks the same: once decided, a push
  // cannot flip it to a different decision.
  fn rank(status: StaffRequestStatus) -> u8 {
    match status {
      StaffRequestStatus::Pending => 1,
      StaffRequestStatus::Confirmed
      | StaffRequestStatus::Rejected
      | StaffRequestStatus::Invited => 2,
    }
  }

  fn is_terminal(status: StaffRequestStatus) -> bool {
    matches!(
      status,
      StaffRequestStatus::Confirmed | StaffRequestStatus::Rejected
    )
  }

  fn status_for_push_type(push_type: Option<&str>) -> StaffRequestStatus {
    match push_type {
      Some("staff_request_approved") => StaffRequestStatus::Confirmed,
      Some("staff_request_rejected") => StaffRequestStatus::Rejected,
      Some("staff_invitation") => StaffRequestStatus::Invited,
      _ => StaffRequestStatus::Pending,
    }
  }
}
