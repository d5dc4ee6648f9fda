//! Event normalisation: raw transport messages → [`CanonicalEvent`].
//!
//! Both push channels go through [`delta_from_push`]; realtime deliveries go
//! through [`event_from_snapshot`] and [`subject_node_from_snapshot`].

use std::collections::BTreeSet;

use mozo_core::{
  Error, Result,
  entity::{Channel, EntityId, Payload},
  event::CanonicalEvent,
  kind::{EmbeddedRecord, EntityKind},
  realtime::Snapshot,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Push wire shape ─────────────────────────────────────────────────────────

/// The `{ data, notification }` body shared by both push channels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
  #[serde(default)]
  pub data:         Payload,
  #[serde(default)]
  pub notification: Option<Notification>,
}

/// The display block of a push message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notification {
  pub title: Option<String>,
  pub body:  Option<String>,
}

// ─── Field aliasing ──────────────────────────────────────────────────────────

/// Look up the entity id under each of `keys` in order and return the first
/// present, non-empty value. Numeric ids are accepted and stringified.
pub fn resolve_id(data: &Payload, keys: &[&str]) -> Option<EntityId> {
  keys.iter().find_map(|key| match data.get(*key)? {
    Value::String(s) if !s.trim().is_empty() => Some(EntityId::new(s.trim())),
    Value::Number(n) => Some(EntityId::new(n.to_string())),
    _ => None,
  })
}

fn as_millis(value: &Value) -> Option<i64> {
  match value {
    Value::Number(n) => n.as_i64(),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

// ─── Push → delta ────────────────────────────────────────────────────────────

/// Normalise a push message from either push channel into a delta.
///
/// An explicit, recognised `status` in `data` wins over the status implied by
/// the `type` tag.
pub fn delta_from_push<K: EntityKind>(
  push: &PushPayload,
  channel: Channel,
) -> Result<CanonicalEvent<K::Status>> {
  let data = &push.data;
  let id = resolve_id(data, K::ID_KEYS).ok_or(Error::MissingEntityId {
    kind: K::NAME,
    keys: K::ID_KEYS,
  })?;

  let status = data
    .get("status")
    .and_then(Value::as_str)
    .and_then(K::parse_status)
    .unwrap_or_else(|| {
      K::status_for_push_type(data.get("type").and_then(Value::as_str))
    });

  let mut payload: Payload = data
    .iter()
    .filter(|(k, _)| {
      !K::ID_KEYS.contains(&k.as_str()) && k.as_str() != "type" && k.as_str() != "status"
    })
    .map(|(k, v)| (k.clone(), v.clone()))
    .collect();

  if let Some(notification) = &push.notification {
    for (key, text) in [
      ("notification_title", &notification.title),
      ("notification_body", &notification.body),
    ] {
      if let Some(text) = text
        && !payload.contains_key(key)
      {
        payload.insert(key.to_owned(), Value::String(text.clone()));
      }
    }
  }

  Ok(CanonicalEvent::Delta {
    id,
    status,
    payload,
    channel,
    origin_timestamp: data.get("timestamp").and_then(as_millis),
  })
}

// ─── Realtime → snapshot / delete ────────────────────────────────────────────

/// Normalise a delivery from an entity's realtime subscription.
///
/// The id comes from the subscription, not the record. A missing node is a
/// delete; otherwise the record (minus `status`) becomes the snapshot payload.
pub fn event_from_snapshot<K: EntityKind>(
  id: EntityId,
  snapshot: Snapshot,
) -> Result<CanonicalEvent<K::Status>> {
  let path = snapshot.path().to_owned();
  let Some(value) = snapshot.into_value() else {
    return Ok(CanonicalEvent::Delete { id });
  };
  let Value::Object(mut payload) = value else {
    return Err(Error::MalformedRecord {
      path,
      reason: "record is not an object".into(),
    });
  };

  let status = take_status::<K>(&mut payload, "status")?;
  Ok(CanonicalEvent::Snapshot { id, status, payload })
}

/// Remove `key` from `record` and parse it; absent means the initial status.
fn take_status<K: EntityKind>(record: &mut Payload, key: &str) -> Result<K::Status> {
  match record.remove(key) {
    None | Some(Value::Null) => Ok(K::initial()),
    Some(Value::String(raw)) => {
      K::parse_status(&raw).ok_or(Error::UnknownStatus {
        kind:  K::NAME,
        value: raw,
      })
    }
    Some(other) => Err(Error::UnknownStatus {
      kind:  K::NAME,
      value: other.to_string(),
    }),
  }
}

/// A roster or feed node as read from the realtime database.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectNode<S> {
  /// Ids of interest; empty when no ids field is configured.
  pub ids:     BTreeSet<EntityId>,
  pub stats:   Payload,
  /// Snapshots of the entity records the node carries inline.
  pub records: Vec<CanonicalEvent<S>>,
}

/// Parse a roster or feed node. Returns `None` when the node does not exist.
///
/// The ids field may be an array or an object keyed by anything (its values
/// are the ids). Entries that are neither strings nor numbers are skipped, and
/// so are embedded records without an id or with an unknown status.
pub fn subject_node_from_snapshot<K: EntityKind>(
  snapshot: &Snapshot,
  ids_field: Option<&str>,
  stats_field: &str,
) -> Result<Option<SubjectNode<K::Status>>> {
  let Some(value) = snapshot.value() else { return Ok(None) };
  let Value::Object(node) = value else {
    return Err(Error::MalformedRecord {
      path:   snapshot.path().to_owned(),
      reason: "subject node is not an object".into(),
    });
  };

  let entries: Vec<&Value> = match ids_field.and_then(|f| node.get(f)) {
    None | Some(Value::Null) => Vec::new(),
    Some(Value::Array(items)) => items.iter().collect(),
    Some(Value::Object(items)) => items.values().collect(),
    Some(_) => {
      return Err(Error::MalformedRecord {
        path:   snapshot.path().to_owned(),
        reason: format!(
          "`{}` is neither a list nor a map",
          ids_field.unwrap_or_default()
        ),
      });
    }
  };

  let ids = entries
    .into_iter()
    .filter_map(|v| match v {
      Value::String(s) if !s.is_empty() => Some(EntityId::new(s.as_str())),
      Value::Number(n) => Some(EntityId::new(n.to_string())),
      _ => None,
    })
    .collect();

  let stats = match node.get(stats_field) {
    Some(Value::Object(stats)) => stats.clone(),
    _ => Payload::new(),
  };

  let records = K::EMBEDDED
    .iter()
    .filter_map(|embedded| match embedded_record::<K>(node, embedded) {
      Ok(event) => event,
      Err(e) => {
        tracing::warn!(
          path = snapshot.path(),
          field = embedded.field,
          "embedded record dropped: {e}"
        );
        None
      }
    })
    .collect();

  Ok(Some(SubjectNode { ids, stats, records }))
}

/// Turn one inline record into a snapshot of the entity it names.
fn embedded_record<K: EntityKind>(
  node: &Payload,
  embedded: &'static EmbeddedRecord,
) -> Result<Option<CanonicalEvent<K::Status>>> {
  let mut record = match node.get(embedded.field) {
    None | Some(Value::Null) => return Ok(None),
    Some(Value::Object(record)) => record.clone(),
    Some(_) => {
      return Err(Error::MalformedRecord {
        path:   embedded.field.to_owned(),
        reason: "embedded record is not an object".into(),
      });
    }
  };
  let Some(id) = resolve_id(&record, &[embedded.id_key]) else {
    return Err(Error::MissingEntityId {
      kind: K::NAME,
      keys: std::slice::from_ref(&embedded.id_key),
    });
  };
  record.remove(embedded.id_key);
  let status = take_status::<K>(&mut record, embedded.status_key)?;
  Ok(Some(CanonicalEvent::Snapshot {
    id,
    status,
    payload: record,
  }))
}

#[cfg(test)]
mod tests {
  use mozo_core::kind::{Call, CallStatus, StaffRequest, StaffRequestStatus};
  use serde_json::json;

  use super::*;

  fn push(data: Value) -> PushPayload {
    PushPayload {
      data:         data.as_object().cloned().unwrap(),
      notification: None,
    }
  }

  // ── Field aliasing ──────────────────────────────────────────────────────

  #[test]
  fn resolve_id_uses_first_present_key() {
    let data = json!({"callId": "b", "call_id": "a"});
    let id = resolve_id(data.as_object().unwrap(), Call::ID_KEYS);
    assert_eq!(id, Some(EntityId::new("a")));
  }

  #[test]
  fn resolve_id_skips_empty_and_null_values() {
    let data = json!({"call_id": "  ", "callId": null, "callID": 42});
    let id = resolve_id(data.as_object().unwrap(), Call::ID_KEYS);
    assert_eq!(id, Some(EntityId::new("42")));
  }

  #[test]
  fn missing_id_is_an_error() {
    let err = delta_from_push::<Call>(&push(json!({"type": "new_call"})), Channel::Foreground)
      .unwrap_err();
    assert!(matches!(err, Error::MissingEntityId { kind: "call", .. }));
  }

  // ── Deltas ──────────────────────────────────────────────────────────────

  #[test]
  fn delta_status_comes_from_type_tag() {
    let ev = delta_from_push::<Call>(
      &push(json!({"call_id": "c1", "type": "acknowledged", "table_number": "4"})),
      Channel::ServiceWorker,
    )
    .unwrap();
    let CanonicalEvent::Delta { id, status, payload, channel, .. } = ev else {
      panic!("expected a delta");
    };
    assert_eq!(id, EntityId::new("c1"));
    assert_eq!(status, CallStatus::Acknowledged);
    assert_eq!(channel, Channel::ServiceWorker);
    assert_eq!(payload.get("table_number"), Some(&json!("4")));
    assert!(!payload.contains_key("call_id"));
    assert!(!payload.contains_key("type"));
  }

  #[test]
  fn explicit_status_overrides_type_tag() {
    let ev = delta_from_push::<Call>(
      &push(json!({"call_id": "c1", "type": "new_call", "status": "completed"})),
      Channel::Foreground,
    )
    .unwrap();
    assert!(matches!(
      ev,
      CanonicalEvent::Delta { status: CallStatus::Completed, .. }
    ));
  }

  #[test]
  fn unparseable_status_falls_back_to_type_tag() {
    let ev = delta_from_push::<Call>(
      &push(json!({"call_id": "c1", "type": "acknowledged", "status": "weird"})),
      Channel::Foreground,
    )
    .unwrap();
    assert!(matches!(
      ev,
      CanonicalEvent::Delta { status: CallStatus::Acknowledged, .. }
    ));
  }

  #[test]
  fn staff_request_types_map_to_statuses() {
    let ev = delta_from_push::<StaffRequest>(
      &push(json!({"staff_request_id": "r1", "type": "staff_request_rejected"})),
      Channel::Foreground,
    )
    .unwrap();
    assert!(matches!(
      ev,
      CanonicalEvent::Delta { status: StaffRequestStatus::Rejected, .. }
    ));
  }

  #[test]
  fn notification_text_and_timestamp_are_carried() {
    let mut p = push(json!({"call_id": "c1", "timestamp": "1700000000000"}));
    p.notification = Some(Notification {
      title: Some("Mesa 4".into()),
      body:  None,
    });
    let CanonicalEvent::Delta { payload, origin_timestamp, .. } =
      delta_from_push::<Call>(&p, Channel::ServiceWorker).unwrap()
    else {
      panic!("expected a delta");
    };
    assert_eq!(payload.get("notification_title"), Some(&json!("Mesa 4")));
    assert!(!payload.contains_key("notification_body"));
    assert_eq!(origin_timestamp, Some(1_700_000_000_000));
  }

  // ── Snapshots ───────────────────────────────────────────────────────────

  #[test]
  fn missing_node_is_a_delete() {
    let ev = event_from_snapshot::<Call>(
      EntityId::new("c1"),
      Snapshot::new("active_calls/c1", None),
    )
    .unwrap();
    assert_eq!(ev, CanonicalEvent::Delete { id: EntityId::new("c1") });
  }

  #[test]
  fn snapshot_strips_status_from_payload() {
    let ev = event_from_snapshot::<Call>(
      EntityId::new("c1"),
      Snapshot::new(
        "active_calls/c1",
        Some(json!({"status": "acknowledged", "table_id": 3})),
      ),
    )
    .unwrap();
    let CanonicalEvent::Snapshot { status, payload, .. } = ev else {
      panic!("expected a snapshot");
    };
    assert_eq!(status, CallStatus::Acknowledged);
    assert_eq!(Value::Object(payload), json!({"table_id": 3}));
  }

  #[test]
  fn snapshot_without_status_is_initial() {
    let ev = event_from_snapshot::<Call>(
      EntityId::new("c1"),
      Snapshot::new("active_calls/c1", Some(json!({"table_id": 3}))),
    )
    .unwrap();
    assert!(matches!(
      ev,
      CanonicalEvent::Snapshot { status: CallStatus::Pending, .. }
    ));
  }

  #[test]
  fn malformed_snapshots_are_errors() {
    let id = EntityId::new("c1");
    let scalar = Snapshot::new("active_calls/c1", Some(json!(7)));
    assert!(matches!(
      event_from_snapshot::<Call>(id.clone(), scalar),
      Err(Error::MalformedRecord { .. })
    ));
    let unknown = Snapshot::new("active_calls/c1", Some(json!({"status": "lost"})));
    assert!(matches!(
      event_from_snapshot::<Call>(id, unknown),
      Err(Error::UnknownStatus { .. })
    ));
  }

  // ── Subject nodes ───────────────────────────────────────────────────────

  fn call_node(snapshot: &Snapshot) -> Option<SubjectNode<CallStatus>> {
    subject_node_from_snapshot::<Call>(snapshot, Some("active_calls"), "stats")
      .unwrap()
  }

  #[test]
  fn roster_accepts_lists_and_maps() {
    let list = Snapshot::new(
      "waiters/w1",
      Some(json!({"active_calls": ["c1", 2, null], "stats": {"pending_count": 1}})),
    );
    let node = call_node(&list).unwrap();
    assert_eq!(
      node.ids,
      [EntityId::new("c1"), EntityId::new("2")]
        .into_iter()
        .collect::<BTreeSet<_>>()
    );
    assert_eq!(node.stats.get("pending_count"), Some(&json!(1)));
    assert!(node.records.is_empty());

    let map = Snapshot::new(
      "waiters/w1",
      Some(json!({"active_calls": {"-Nx1": "c7"}})),
    );
    let node = call_node(&map).unwrap();
    assert!(node.ids.contains(&EntityId::new("c7")));
    assert!(node.stats.is_empty());
  }

  #[test]
  fn missing_subject_node_is_none() {
    let snap = Snapshot::new("waiters/w1", None);
    assert_eq!(call_node(&snap), None);
  }

  #[test]
  fn roster_without_ids_field_is_empty() {
    let snap = Snapshot::new("waiters/w1", Some(json!({"stats": {}})));
    assert!(call_node(&snap).unwrap().ids.is_empty());
  }

  #[test]
  fn unconfigured_ids_field_yields_no_ids() {
    let snap = Snapshot::new(
      "businesses/b1",
      Some(json!({"active_calls": ["c1"], "stats": {"open_tables": 3}})),
    );
    let node = subject_node_from_snapshot::<Call>(&snap, None, "stats")
      .unwrap()
      .unwrap();
    assert!(node.ids.is_empty());
    assert_eq!(node.stats.get("open_tables"), Some(&json!(3)));
  }

  #[test]
  fn business_staff_activity_becomes_a_snapshot() {
    let snap = Snapshot::new(
      "businesses_staff/b1",
      Some(json!({
        "stats": {"pending_count": 1},
        "recent_activity": {
          "last_request_id": 17,
          "last_request_name": "Ana",
          "last_request_status": "pending",
          "last_update": 1_700_000_000_000_i64,
        },
      })),
    );
    let node = subject_node_from_snapshot::<StaffRequest>(&snap, None, "stats")
      .unwrap()
      .unwrap();
    assert_eq!(node.records, vec![CanonicalEvent::Snapshot {
      id:      EntityId::new("17"),
      status:  StaffRequestStatus::Pending,
      payload: json!({"last_request_name": "Ana", "last_update": 1_700_000_000_000_i64})
        .as_object()
        .cloned()
        .unwrap(),
    }]);
  }

  #[test]
  fn user_staff_current_request_becomes_a_snapshot() {
    let snap = Snapshot::new(
      "users_staff/u4",
      Some(json!({
        "current_request": {"id": "r9", "status": "confirmed", "business_name": "Bar Sur"},
      })),
    );
    let node = subject_node_from_snapshot::<StaffRequest>(&snap, None, "stats")
      .unwrap()
      .unwrap();
    let [CanonicalEvent::Snapshot { id, status, payload }] = node.records.as_slice()
    else {
      panic!("expected one snapshot, got {:?}", node.records);
    };
    assert_eq!(id, &EntityId::new("r9"));
    assert_eq!(*status, StaffRequestStatus::Confirmed);
    assert_eq!(Value::Object(payload.clone()), json!({"business_name": "Bar Sur"}));
  }

  #[test]
  fn broken_embedded_records_are_skipped() {
    let snap = Snapshot::new(
      "businesses_staff/b1",
      Some(json!({
        "recent_activity": {"last_request_status": "pending"},
        "current_request": {"id": "r9", "status": "archived"},
      })),
    );
    let node = subject_node_from_snapshot::<StaffRequest>(&snap, None, "stats")
      .unwrap()
      .unwrap();
    assert!(node.records.is_empty());
  }
}
