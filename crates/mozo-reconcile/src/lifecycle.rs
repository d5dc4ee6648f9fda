//! Subscription lifecycle: which realtime nodes are open, and for whom.
//!
//! An entity id is *desired* while at least one attached roster lists it or
//! it is explicitly watched. [`SubscriptionManager::sync`] makes the open set
//! equal the desired set by set difference, so ids present before and after a
//! roster replacement keep their subscription untouched. Ids that stop being
//! desired are reported whether or not their subscription was open, so the
//! caller can evict them either way.
//!
//! Feeds are subject nodes followed for their statistics and embedded records
//! only; they never contribute ids.
//!
//! Every subscription gets a fresh generation number. Its listener tags each
//! delivery with that generation, and deliveries whose generation is no
//! longer the open one for their target are rejected by
//! [`SubscriptionManager::is_current`]. A callback that fires after close can
//! therefore never reach the reconciler.

use std::{
  collections::{BTreeSet, HashMap},
  sync::Arc,
};

use mozo_core::{
  entity::{EntityId, SubjectId},
  realtime::{RealtimeTransport, Snapshot, SnapshotListener, Subscription},
};
use tokio::sync::mpsc;

use crate::{Error, Result, config::EngineConfig};

// ─── Deliveries ──────────────────────────────────────────────────────────────

/// What a subscription was opened for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
  Entity(EntityId),
  Roster(SubjectId),
  Feed(SubjectId),
}

#[derive(Debug)]
pub enum Signal {
  Value(Snapshot),
  Error(String),
}

/// One callback invocation, queued for the engine.
#[derive(Debug)]
pub struct Delivery {
  pub target:     Target,
  pub generation: u64,
  pub signal:     Signal,
}

/// The listener handed to the transport: forwards into the engine's queue.
struct Sink {
  tx:         mpsc::UnboundedSender<Delivery>,
  target:     Target,
  generation: u64,
}

impl Sink {
  fn send(&self, signal: Signal) {
    let delivery = Delivery {
      target: self.target.clone(),
      generation: self.generation,
      signal,
    };
    // The engine is gone; nothing left to reconcile.
    let _ = self.tx.send(delivery);
  }
}

impl SnapshotListener for Sink {
  fn on_value(&self, snapshot: Snapshot) { self.send(Signal::Value(snapshot)) }

  fn on_error(&self, error: String) { self.send(Signal::Error(error)) }
}

// ─── Bookkeeping ─────────────────────────────────────────────────────────────

struct Open<S> {
  generation: u64,
  handle:     S,
}

struct Roster<S> {
  /// `None` after the roster subscription failed; reopened by `sync`.
  open: Option<Open<S>>,
  ids:  BTreeSet<EntityId>,
}

/// The result of one [`SubscriptionManager::sync`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
  pub opened:  Vec<EntityId>,
  /// No roster or watch wants them any more; any open subscription was
  /// closed. The caller removes these entities from the store.
  pub removed: Vec<EntityId>,
  /// Desired but the transport refused; retried on the next pass.
  pub failed:  Vec<EntityId>,
}

// ─── Manager ─────────────────────────────────────────────────────────────────

pub struct SubscriptionManager<T: RealtimeTransport> {
  transport:       T,
  config:          EngineConfig,
  tx:              mpsc::UnboundedSender<Delivery>,
  next_generation: u64,
  entities:        HashMap<EntityId, Open<T::Subscription>>,
  rosters:         HashMap<SubjectId, Roster<T::Subscription>>,
  /// `None` after the feed subscription failed; reopened by `sync`.
  feeds:           HashMap<SubjectId, Option<Open<T::Subscription>>>,
  watched:         BTreeSet<EntityId>,
  /// The desired set as of the last `sync`.
  desired:         BTreeSet<EntityId>,
}

impl<T: RealtimeTransport> SubscriptionManager<T> {
  pub fn new(
    transport: T,
    config: EngineConfig,
    tx: mpsc::UnboundedSender<Delivery>,
  ) -> Self {
    Self {
      transport,
      config,
      tx,
      next_generation: 0,
      entities: HashMap::new(),
      rosters: HashMap::new(),
      feeds: HashMap::new(),
      watched: BTreeSet::new(),
      desired: BTreeSet::new(),
    }
  }

  fn open(&mut self, path: &str, target: Target) -> Result<Open<T::Subscription>> {
    let generation = self.next_generation;
    self.next_generation += 1;
    let sink = Arc::new(Sink {
      tx: self.tx.clone(),
      target,
      generation,
    });
    let handle = self.transport.subscribe(path, sink).map_err(|e| {
      Error::Subscribe {
        path:   path.to_owned(),
        source: Box::new(e),
      }
    })?;
    tracing::info!(path, generation, "subscribed");
    Ok(Open { generation, handle })
  }

  // ── Queries ───────────────────────────────────────────────────────────

  /// Whether `generation` is the open subscription for `target`.
  pub fn is_current(&self, target: &Target, generation: u64) -> bool {
    let open = match target {
      Target::Entity(id) => self.entities.get(id),
      Target::Roster(subject) => {
        self.rosters.get(subject).and_then(|r| r.open.as_ref())
      }
      Target::Feed(subject) => self.feeds.get(subject).and_then(Option::as_ref),
    };
    open.is_some_and(|o| o.generation == generation)
  }

  pub fn is_subscribed(&self, id: &EntityId) -> bool {
    self.entities.contains_key(id)
  }

  pub fn subscribed(&self) -> impl Iterator<Item = &EntityId> {
    self.entities.keys()
  }

  pub fn roster(&self, subject: &SubjectId) -> Option<&BTreeSet<EntityId>> {
    self.rosters.get(subject).map(|r| &r.ids)
  }

  fn wanted(&self) -> BTreeSet<EntityId> {
    self
      .rosters
      .values()
      .flat_map(|r| r.ids.iter())
      .chain(self.watched.iter())
      .cloned()
      .collect()
  }

  // ── Rosters ───────────────────────────────────────────────────────────

  /// Open the roster subscription for `subject`. Attaching twice is a no-op.
  pub fn attach(&mut self, subject: SubjectId) -> Result<()> {
    if self.rosters.contains_key(&subject) {
      return Ok(());
    }
    let path = self.config.roster_path_of(&subject);
    let open = self.open(&path, Target::Roster(subject.clone()))?;
    self.rosters.insert(subject, Roster {
      open: Some(open),
      ids:  BTreeSet::new(),
    });
    Ok(())
  }

  /// Close the roster subscription for `subject` and drop the ids only it
  /// wanted.
  pub fn detach(&mut self, subject: &SubjectId) -> SyncReport {
    if let Some(roster) = self.rosters.remove(subject)
      && let Some(open) = roster.open
    {
      open.handle.close();
      tracing::info!(%subject, "roster unsubscribed");
    }
    self.sync()
  }

  /// Replace `subject`'s roster wholesale and resync.
  pub fn set_roster(
    &mut self,
    subject: &SubjectId,
    ids: BTreeSet<EntityId>,
  ) -> SyncReport {
    match self.rosters.get_mut(subject) {
      Some(roster) => roster.ids = ids,
      None => {
        tracing::debug!(%subject, "roster update for detached subject");
        return SyncReport::default();
      }
    }
    self.sync()
  }

  /// The roster subscription failed; it is reopened on the next pass. The
  /// last known ids stay in force meanwhile.
  pub fn roster_failed(&mut self, subject: &SubjectId) {
    if let Some(roster) = self.rosters.get_mut(subject)
      && let Some(open) = roster.open.take()
    {
      open.handle.close();
    }
  }

  // ── Feeds ─────────────────────────────────────────────────────────────

  /// Open the feed subscription for `subject`. Attaching twice is a no-op.
  pub fn attach_feed(&mut self, subject: SubjectId) -> Result<()> {
    if self.feeds.contains_key(&subject) {
      return Ok(());
    }
    let path = self
      .config
      .feed_path_of(&subject)
      .ok_or(Error::Unconfigured("feed_path"))?;
    let open = self.open(&path, Target::Feed(subject.clone()))?;
    self.feeds.insert(subject, Some(open));
    Ok(())
  }

  pub fn detach_feed(&mut self, subject: &SubjectId) {
    if let Some(Some(open)) = self.feeds.remove(subject) {
      open.handle.close();
      tracing::info!(%subject, "feed unsubscribed");
    }
  }

  /// The feed subscription failed; it is reopened on the next pass.
  pub fn feed_failed(&mut self, subject: &SubjectId) {
    if let Some(feed) = self.feeds.get_mut(subject)
      && let Some(open) = feed.take()
    {
      open.handle.close();
    }
  }

  // ── Explicit watches ──────────────────────────────────────────────────

  pub fn watch(&mut self, id: EntityId) -> SyncReport {
    self.watched.insert(id);
    self.sync()
  }

  pub fn unwatch(&mut self, id: &EntityId) -> SyncReport {
    self.watched.remove(id);
    self.sync()
  }

  // ── Entities ──────────────────────────────────────────────────────────

  /// The node for `id` is gone: close its subscription and end any explicit
  /// watch. Roster membership is left to the roster's next update.
  pub fn entity_deleted(&mut self, id: &EntityId) {
    self.watched.remove(id);
    self.close_entity(id);
  }

  /// The subscription for `id` failed; it is reopened on the next pass.
  pub fn entity_failed(&mut self, id: &EntityId) { self.close_entity(id); }

  fn close_entity(&mut self, id: &EntityId) -> bool {
    let Some(open) = self.entities.remove(id) else { return false };
    open.handle.close();
    tracing::info!(%id, generation = open.generation, "unsubscribed");
    true
  }

  /// Make the open set equal the desired set, and reopen failed rosters and
  /// feeds.
  pub fn sync(&mut self) -> SyncReport {
    let mut report = SyncReport::default();

    let dead: Vec<SubjectId> = self
      .rosters
      .iter()
      .filter(|(_, r)| r.open.is_none())
      .map(|(s, _)| s.clone())
      .collect();
    for subject in dead {
      let path = self.config.roster_path_of(&subject);
      match self.open(&path, Target::Roster(subject.clone())) {
        Ok(open) => {
          if let Some(roster) = self.rosters.get_mut(&subject) {
            roster.open = Some(open);
          }
        }
        Err(e) => tracing::warn!(%subject, "roster resubscribe failed: {e}"),
      }
    }

    let dead: Vec<SubjectId> = self
      .feeds
      .iter()
      .filter(|(_, f)| f.is_none())
      .map(|(s, _)| s.clone())
      .collect();
    for subject in dead {
      let Some(path) = self.config.feed_path_of(&subject) else { continue };
      match self.open(&path, Target::Feed(subject.clone())) {
        Ok(open) => {
          self.feeds.insert(subject, Some(open));
        }
        Err(e) => tracing::warn!(%subject, "feed resubscribe failed: {e}"),
      }
    }

    let desired = self.wanted();

    let dropped: Vec<EntityId> =
      self.desired.difference(&desired).cloned().collect();
    for id in dropped {
      self.close_entity(&id);
      report.removed.push(id);
    }

    for id in &desired {
      if self.entities.contains_key(id) {
        continue;
      }
      let Some(path) = self.config.entity_path_of(id) else { continue };
      match self.open(&path, Target::Entity(id.clone())) {
        Ok(open) => {
          self.entities.insert(id.clone(), open);
          report.opened.push(id.clone());
        }
        Err(e) => {
          tracing::warn!(%id, "subscribe failed, retrying on next pass: {e}");
          report.failed.push(id.clone());
        }
      }
    }

    self.desired = desired;
    report
  }

  /// Close every subscription.
  pub fn shutdown(&mut self) {
    let ids: Vec<EntityId> = self.entities.keys().cloned().collect();
    for id in ids {
      self.close_entity(&id);
    }
    for (subject, roster) in self.rosters.drain() {
      if let Some(open) = roster.open {
        open.handle.close();
        tracing::info!(%subject, "roster unsubscribed");
      }
    }
    for (subject, feed) in self.feeds.drain() {
      if let Some(open) = feed {
        open.handle.close();
        tracing::info!(%subject, "feed unsubscribed");
      }
    }
    self.watched.clear();
    self.desired.clear();
  }
}
