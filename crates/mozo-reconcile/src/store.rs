//! [`EntityStore`]: the in-memory map of reconstructed entities.
//!
//! Readers get shared references and a change feed. Every mutator is
//! crate-private: the only writer is the [`crate::Reconciler`] that owns the
//! store.

use std::{cmp::Reverse, collections::HashMap};

use chrono::{DateTime, Utc};
use mozo_core::{
  entity::{Entity, EntityId},
  kind::EntityKind,
};
use tokio::sync::broadcast;

/// A change published after every accepted mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange<S> {
  Upserted { id: EntityId, status: S },
  Removed { id: EntityId },
}

pub struct EntityStore<K: EntityKind> {
  entities:  HashMap<EntityId, Entity<K::Status>>,
  /// Highest `last_updated` handed out so far.
  last_tick: Option<DateTime<Utc>>,
  changes:   broadcast::Sender<StoreChange<K::Status>>,
}

impl<K: EntityKind> EntityStore<K> {
  pub fn new(change_buffer: usize) -> Self {
    let (changes, _) = broadcast::channel(change_buffer.max(1));
    Self {
      entities: HashMap::new(),
      last_tick: None,
      changes,
    }
  }

  // ── Reads ─────────────────────────────────────────────────────────────

  pub fn get(&self, id: &EntityId) -> Option<&Entity<K::Status>> {
    self.entities.get(id)
  }

  pub fn contains(&self, id: &EntityId) -> bool { self.entities.contains_key(id) }

  pub fn len(&self) -> usize { self.entities.len() }

  pub fn is_empty(&self) -> bool { self.entities.is_empty() }

  pub fn iter(&self) -> impl Iterator<Item = &Entity<K::Status>> {
    self.entities.values()
  }

  pub fn with_status(
    &self,
    status: K::Status,
  ) -> impl Iterator<Item = &Entity<K::Status>> {
    self.iter().filter(move |e| e.status == status)
  }

  /// Entities whose status is not terminal.
  pub fn active(&self) -> impl Iterator<Item = &Entity<K::Status>> {
    self.iter().filter(|e| !K::is_terminal(e.status))
  }

  /// All entities, most recently raised first. Entities without a
  /// `called_at` sort by their local `last_updated`.
  pub fn list_recent(&self) -> Vec<&Entity<K::Status>> {
    let mut all: Vec<_> = self.iter().collect();
    all.sort_by_key(|e| {
      let raised = e.called_at().unwrap_or_else(|| e.last_updated.timestamp_millis());
      (Reverse(raised), e.id.clone())
    });
    all
  }

  /// Subscribe to the change feed.
  pub fn subscribe(&self) -> broadcast::Receiver<StoreChange<K::Status>> {
    self.changes.subscribe()
  }

  // ── Writes (reconciler only) ──────────────────────────────────────────

  /// Next `last_updated` value: `now`, but never earlier than one already
  /// handed out.
  pub(crate) fn tick(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
    let tick = match self.last_tick {
      Some(last) if last > now => last,
      _ => now,
    };
    self.last_tick = Some(tick);
    tick
  }

  pub(crate) fn get_mut(
    &mut self,
    id: &EntityId,
  ) -> Option<&mut Entity<K::Status>> {
    self.entities.get_mut(id)
  }

  pub(crate) fn insert(&mut self, entity: Entity<K::Status>) {
    self.entities.insert(entity.id.clone(), entity);
  }

  pub(crate) fn remove(&mut self, id: &EntityId) -> Option<Entity<K::Status>> {
    self.entities.remove(id)
  }

  pub(crate) fn publish(&self, change: StoreChange<K::Status>) {
    // No receivers is fine; the change is simply unobserved.
    let _ = self.changes.send(change);
  }
}

impl<K: EntityKind> Default for EntityStore<K> {
  fn default() -> Self { Self::new(256) }
}
