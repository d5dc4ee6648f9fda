//! The reconciler: the single mutation gateway for the [`EntityStore`].
//!
//! Rules, per event kind:
//!
//! - `Delete` removes the entity (no-op if absent).
//! - `Snapshot` replaces the entity wholesale, whatever its current status.
//! - `Delta` creates the entity if absent. Otherwise it is discarded if its
//!   status ranks below the stored one, and merged if not. An equal-rank
//!   delta refreshes payload fields but never changes the status.
//!
//! Every rule is idempotent, so at-least-once delivery is harmless.

use std::sync::Arc;

use mozo_core::{
  entity::{Channel, Entity, EntityId, Payload},
  event::CanonicalEvent,
  kind::EntityKind,
};

use crate::{
  clock::{Clock, SystemClock},
  store::{EntityStore, StoreChange},
};

/// What [`Reconciler::apply`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  /// A delta created an entity that did not exist yet.
  Created,
  /// A delta raised the entity's status.
  Advanced,
  /// A delta at the current rank merged its payload.
  Refreshed,
  /// A snapshot replaced the entity.
  Replaced,
  /// A delete removed the entity.
  Removed,
  Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
  /// The delta would have lowered the status rank.
  Regression,
  /// The delete targeted an entity that is not in the store.
  Absent,
}

pub struct Reconciler<K: EntityKind> {
  store: EntityStore<K>,
  clock: Arc<dyn Clock>,
}

impl<K: EntityKind> Reconciler<K> {
  pub fn new(store: EntityStore<K>, clock: Arc<dyn Clock>) -> Self {
    Self { store, clock }
  }

  pub fn store(&self) -> &EntityStore<K> { &self.store }

  /// Apply one canonical event to the store.
  pub fn apply(&mut self, event: CanonicalEvent<K::Status>) -> Outcome {
    match event {
      CanonicalEvent::Delete { id } => self.delete(id),
      CanonicalEvent::Snapshot {
        id,
        status,
        payload,
      } => self.replace(id, status, payload),
      CanonicalEvent::Delta {
        id,
        status,
        payload,
        channel,
        origin_timestamp,
      } => {
        tracing::trace!(%id, %status, %channel, ?origin_timestamp, "applying delta");
        self.merge(id, status, payload, channel)
      }
    }
  }

  fn delete(&mut self, id: EntityId) -> Outcome {
    if self.store.remove(&id).is_none() {
      tracing::trace!(%id, "delete for absent {}", K::NAME);
      return Outcome::Ignored(IgnoreReason::Absent);
    }
    tracing::debug!(%id, "{} removed", K::NAME);
    self.store.publish(StoreChange::Removed { id });
    Outcome::Removed
  }

  fn replace(
    &mut self,
    id: EntityId,
    status: K::Status,
    payload: Payload,
  ) -> Outcome {
    let last_updated = self.store.tick(self.clock.now());
    self.store.insert(Entity {
      id: id.clone(),
      status,
      payload,
      last_updated,
      source: Channel::Realtime,
    });
    self.store.publish(StoreChange::Upserted { id, status });
    Outcome::Replaced
  }

  fn merge(
    &mut self,
    id: EntityId,
    status: K::Status,
    payload: Payload,
    channel: Channel,
  ) -> Outcome {
    let now = self.store.tick(self.clock.now());

    let Some(existing) = self.store.get_mut(&id) else {
      self.store.insert(Entity {
        id: id.clone(),
        status,
        payload,
        last_updated: now,
        source: channel,
      });
      self.store.publish(StoreChange::Upserted { id, status });
      return Outcome::Created;
    };

    let (old, new) = (K::rank(existing.status), K::rank(status));
    if new < old {
      tracing::debug!(
        %id,
        current = %existing.status,
        incoming = %status,
        %channel,
        "stale {} delta rejected",
        K::NAME,
      );
      return Outcome::Ignored(IgnoreReason::Regression);
    }

    let outcome = if new > old {
      existing.status = status;
      Outcome::Advanced
    } else {
      Outcome::Refreshed
    };
    existing.payload.extend(payload);
    existing.last_updated = now;
    existing.source = channel;
    let status = existing.status;
    self.store.publish(StoreChange::Upserted { id, status });
    outcome
  }
}

impl<K: EntityKind> Default for Reconciler<K> {
  fn default() -> Self {
    Self::new(EntityStore::default(), Arc::new(SystemClock))
  }
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, TimeZone, Utc};
  use mozo_core::kind::{Call, CallStatus, StaffRequest, StaffRequestStatus};
  use serde_json::{Value, json};

  use super::*;
  use crate::clock::FixedClock;

  fn reconciler<K: EntityKind>() -> (Reconciler<K>, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(Utc.timestamp_opt(1_000, 0).unwrap()));
    (Reconciler::new(EntityStore::new(16), clock.clone()), clock)
  }

  fn fields(v: Value) -> Payload { v.as_object().cloned().unwrap() }

  fn delta(id: &str, status: CallStatus, payload: Value) -> CanonicalEvent<CallStatus> {
    CanonicalEvent::Delta {
      id: EntityId::new(id),
      status,
      payload: fields(payload),
      channel: Channel::Foreground,
      origin_timestamp: None,
    }
  }

  fn snapshot(id: &str, status: CallStatus, payload: Value) -> CanonicalEvent<CallStatus> {
    CanonicalEvent::Snapshot {
      id: EntityId::new(id),
      status,
      payload: fields(payload),
    }
  }

  fn status_of(r: &Reconciler<Call>, id: &str) -> Option<CallStatus> {
    r.store().get(&EntityId::new(id)).map(|e| e.status)
  }

  // ── Deltas ──────────────────────────────────────────────────────────────

  #[test]
  fn delta_creates_missing_entity() {
    let (mut r, _) = reconciler::<Call>();
    let out = r.apply(delta("c1", CallStatus::Pending, json!({"table_id": 4})));
    assert_eq!(out, Outcome::Created);
    let c1 = r.store().get(&EntityId::new("c1")).unwrap();
    assert_eq!(c1.status, CallStatus::Pending);
    assert_eq!(c1.source, Channel::Foreground);
    assert_eq!(c1.payload.get("table_id"), Some(&json!(4)));
  }

  #[test]
  fn late_duplicate_does_not_regress_status() {
    let (mut r, _) = reconciler::<Call>();
    r.apply(delta("c1", CallStatus::Acknowledged, json!({})));
    let out = r.apply(delta("c1", CallStatus::Pending, json!({"urgency": "high"})));
    assert_eq!(out, Outcome::Ignored(IgnoreReason::Regression));
    assert_eq!(status_of(&r, "c1"), Some(CallStatus::Acknowledged));
    // A rejected delta merges nothing either.
    assert!(
      !r.store()
        .get(&EntityId::new("c1"))
        .unwrap()
        .payload
        .contains_key("urgency")
    );
  }

  #[test]
  fn higher_rank_delta_advances_and_merges() {
    let (mut r, clock) = reconciler::<Call>();
    r.apply(delta("c1", CallStatus::Pending, json!({"table_id": 4, "urgency": "low"})));
    clock.advance(Duration::seconds(5));
    let out = r.apply(delta("c1", CallStatus::Completed, json!({"urgency": "high"})));
    assert_eq!(out, Outcome::Advanced);
    let c1 = r.store().get(&EntityId::new("c1")).unwrap();
    assert_eq!(c1.status, CallStatus::Completed);
    assert_eq!(Value::Object(c1.payload.clone()), json!({"table_id": 4, "urgency": "high"}));
    assert_eq!(c1.last_updated, Utc.timestamp_opt(1_005, 0).unwrap());
  }

  #[test]
  fn equal_rank_refreshes_payload_but_keeps_status() {
    let (mut r, _) = reconciler::<StaffRequest>();
    let id = EntityId::new("r1");
    let ev = |status, payload: Value| CanonicalEvent::Delta {
      id: id.clone(),
      status,
      payload: fields(payload),
      channel: Channel::ServiceWorker,
      origin_timestamp: None,
    };
    r.apply(ev(StaffRequestStatus::Confirmed, json!({"name": "Ana"})));
    let out = r.apply(ev(StaffRequestStatus::Rejected, json!({"business_name": "Bar"})));
    assert_eq!(out, Outcome::Refreshed);
    let r1 = r.store().get(&id).unwrap();
    assert_eq!(r1.status, StaffRequestStatus::Confirmed);
    assert_eq!(r1.payload.get("business_name"), Some(&json!("Bar")));
  }

  #[test]
  fn delta_sequences_never_lower_rank() {
    use CallStatus::*;
    let (mut r, _) = reconciler::<Call>();
    let mut high = 0;
    for status in [Acknowledged, Pending, Completed, Pending, Acknowledged, Completed] {
      r.apply(delta("c1", status, json!({})));
      let rank = Call::rank(status_of(&r, "c1").unwrap());
      assert!(rank >= high);
      high = rank;
    }
    assert_eq!(status_of(&r, "c1"), Some(Completed));
  }

  // ── Snapshots ───────────────────────────────────────────────────────────

  #[test]
  fn snapshot_always_wins_even_backwards() {
    let (mut r, _) = reconciler::<Call>();
    r.apply(snapshot("c1", CallStatus::Pending, json!({"table_id": 1})));
    r.apply(delta("c1", CallStatus::Acknowledged, json!({"waiter": "w1"})));
    assert_eq!(status_of(&r, "c1"), Some(CallStatus::Acknowledged));

    let out = r.apply(snapshot("c1", CallStatus::Pending, json!({"table_id": 1})));
    assert_eq!(out, Outcome::Replaced);
    let c1 = r.store().get(&EntityId::new("c1")).unwrap();
    assert_eq!(c1.status, CallStatus::Pending);
    assert_eq!(c1.source, Channel::Realtime);
    // Replacement, not merge: the delta's field is gone.
    assert_eq!(Value::Object(c1.payload.clone()), json!({"table_id": 1}));
  }

  // ── Deletes ─────────────────────────────────────────────────────────────

  #[test]
  fn delete_of_absent_entity_is_a_noop() {
    let (mut r, _) = reconciler::<Call>();
    let out = r.apply(CanonicalEvent::Delete { id: EntityId::new("c9") });
    assert_eq!(out, Outcome::Ignored(IgnoreReason::Absent));
    assert!(r.store().is_empty());
  }

  #[test]
  fn delete_removes_and_publishes() {
    let (mut r, _) = reconciler::<Call>();
    let mut feed = r.store().subscribe();
    r.apply(delta("c1", CallStatus::Pending, json!({})));
    r.apply(CanonicalEvent::Delete { id: EntityId::new("c1") });
    assert!(r.store().get(&EntityId::new("c1")).is_none());
    assert_eq!(
      feed.try_recv().unwrap(),
      StoreChange::Upserted { id: EntityId::new("c1"), status: CallStatus::Pending }
    );
    assert_eq!(feed.try_recv().unwrap(), StoreChange::Removed { id: EntityId::new("c1") });
  }

  // ── Idempotence ─────────────────────────────────────────────────────────

  #[test]
  fn applying_an_event_twice_equals_applying_it_once() {
    let events = [
      delta("c1", CallStatus::Pending, json!({"table_id": 2})),
      delta("c1", CallStatus::Acknowledged, json!({"urgency": "high"})),
      snapshot("c1", CallStatus::Completed, json!({"table_id": 2})),
      CanonicalEvent::Delete { id: EntityId::new("c1") },
    ];
    for (n, event) in events.iter().enumerate() {
      let (mut once, _) = reconciler::<Call>();
      let (mut twice, _) = reconciler::<Call>();
      for prior in &events[..n] {
        once.apply(prior.clone());
        twice.apply(prior.clone());
      }
      once.apply(event.clone());
      twice.apply(event.clone());
      twice.apply(event.clone());
      assert_eq!(
        once.store().get(&EntityId::new("c1")),
        twice.store().get(&EntityId::new("c1")),
        "event #{n} is not idempotent"
      );
    }
  }

  #[test]
  fn last_updated_never_goes_backwards() {
    let (mut r, clock) = reconciler::<Call>();
    r.apply(delta("c1", CallStatus::Pending, json!({})));
    clock.advance(Duration::seconds(-30));
    r.apply(delta("c1", CallStatus::Acknowledged, json!({})));
    assert_eq!(
      r.store().get(&EntityId::new("c1")).unwrap().last_updated,
      Utc.timestamp_opt(1_000, 0).unwrap()
    );
  }
}
