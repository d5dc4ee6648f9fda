//! [`ReconciliationEngine`]: the owned pipeline from transports to store.
//!
//! Each engine owns its store, reconciler, subscriptions and delivery queue,
//! so any number of engines can coexist (one per entity kind, one per test).

use std::{collections::BTreeSet, sync::Arc};

use mozo_core::{
  entity::{Channel, EntityId, Payload, SubjectId},
  event::CanonicalEvent,
  kind::EntityKind,
  realtime::{RealtimeTransport, Snapshot},
};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::{
  Result,
  adapters::{Inputs, WorkerMessage},
  clock::{Clock, SystemClock},
  config::EngineConfig,
  lifecycle::{Delivery, Signal, SubscriptionManager, SyncReport, Target},
  normalize::{self, PushPayload, SubjectNode},
  reconciler::{Outcome, Reconciler},
  store::{EntityStore, StoreChange},
};

pub struct ReconciliationEngine<K: EntityKind, T: RealtimeTransport> {
  reconciler:    Reconciler<K>,
  subscriptions: SubscriptionManager<T>,
  deliveries:    mpsc::UnboundedReceiver<Delivery>,
  /// Statistics from every roster and feed, shallow-merged in arrival order.
  stats:         Payload,
  config:        EngineConfig,
}

impl<K: EntityKind, T: RealtimeTransport> ReconciliationEngine<K, T> {
  pub fn new(transport: T, config: EngineConfig) -> Self {
    Self::with_clock(transport, config, Arc::new(SystemClock))
  }

  pub fn with_clock(
    transport: T,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
  ) -> Self {
    let (tx, deliveries) = mpsc::unbounded_channel();
    let store = EntityStore::new(config.change_buffer);
    Self {
      reconciler: Reconciler::new(store, clock),
      subscriptions: SubscriptionManager::new(transport, config.clone(), tx),
      deliveries,
      stats: Payload::new(),
      config,
    }
  }

  // ── Reads ─────────────────────────────────────────────────────────────

  pub fn store(&self) -> &EntityStore<K> { self.reconciler.store() }

  pub fn changes(&self) -> broadcast::Receiver<StoreChange<K::Status>> {
    self.reconciler.store().subscribe()
  }

  pub fn config(&self) -> &EngineConfig { &self.config }

  pub fn roster(&self, subject: &SubjectId) -> Option<&BTreeSet<EntityId>> {
    self.subscriptions.roster(subject)
  }

  pub fn stats(&self) -> &Payload { &self.stats }

  pub fn is_subscribed(&self, id: &EntityId) -> bool {
    self.subscriptions.is_subscribed(id)
  }

  pub fn subscribed(&self) -> BTreeSet<EntityId> {
    self.subscriptions.subscribed().cloned().collect()
  }

  // ── Interest ──────────────────────────────────────────────────────────

  /// Start following `subject`'s roster. Its first delivery is queued
  /// immediately; call [`Self::drain`] or [`Self::run`] to process it.
  pub fn attach_subject(&mut self, subject: SubjectId) -> Result<()> {
    self.subscriptions.attach(subject)
  }

  pub fn detach_subject(&mut self, subject: &SubjectId) {
    let report = self.subscriptions.detach(subject);
    self.settle(report);
  }

  /// Follow `subject`'s feed node for statistics and embedded records.
  pub fn attach_feed(&mut self, subject: SubjectId) -> Result<()> {
    self.subscriptions.attach_feed(subject)
  }

  pub fn detach_feed(&mut self, subject: &SubjectId) {
    self.subscriptions.detach_feed(subject);
  }

  /// Follow one entity regardless of any roster.
  pub fn watch(&mut self, id: EntityId) {
    let report = self.subscriptions.watch(id);
    self.settle(report);
  }

  pub fn unwatch(&mut self, id: &EntityId) {
    let report = self.subscriptions.unwatch(id);
    self.settle(report);
  }

  /// Retry failed subscriptions without waiting for a roster update.
  pub fn resync(&mut self) {
    let report = self.subscriptions.sync();
    self.settle(report);
  }

  /// Entities no longer of interest leave the store through the reconciler.
  fn settle(&mut self, report: SyncReport) {
    if !report.failed.is_empty() {
      tracing::debug!(failed = report.failed.len(), "subscriptions pending retry");
    }
    for id in report.removed {
      self.reconciler.apply(CanonicalEvent::Delete { id });
    }
  }

  // ── Push channels ─────────────────────────────────────────────────────

  /// Service-worker bridge entry point. Only `fcm_event` messages are
  /// reconciled.
  pub fn on_worker_message(&mut self, raw: Value) -> Option<Outcome> {
    match WorkerMessage::parse(raw) {
      Ok(WorkerMessage::FcmEvent { payload }) => {
        self.apply_push(&payload, Channel::ServiceWorker)
      }
      Ok(WorkerMessage::NotificationClick { .. }) => {
        tracing::trace!("notification click ignored");
        None
      }
      Ok(WorkerMessage::Other) => {
        tracing::debug!("worker message with unknown type ignored");
        None
      }
      Err(e) => {
        tracing::warn!("unreadable worker message dropped: {e}");
        None
      }
    }
  }

  /// Foreground push listener entry point.
  pub fn on_foreground_push(&mut self, payload: PushPayload) -> Option<Outcome> {
    self.apply_push(&payload, Channel::Foreground)
  }

  fn apply_push(
    &mut self,
    payload: &PushPayload,
    channel: Channel,
  ) -> Option<Outcome> {
    match normalize::delta_from_push::<K>(payload, channel) {
      Ok(event) => Some(self.reconciler.apply(event)),
      Err(e) => {
        tracing::warn!(%channel, "push dropped: {e}");
        None
      }
    }
  }

  // ── Realtime channel ──────────────────────────────────────────────────

  /// Process every queued realtime delivery, including those queued while
  /// processing.
  pub fn drain(&mut self) -> usize {
    let mut n = 0;
    while let Ok(delivery) = self.deliveries.try_recv() {
      self.handle_delivery(delivery);
      n += 1;
    }
    n
  }

  fn handle_delivery(&mut self, delivery: Delivery) {
    let Delivery {
      target,
      generation,
      signal,
    } = delivery;
    if !self.subscriptions.is_current(&target, generation) {
      tracing::debug!(?target, generation, "stale delivery dropped");
      return;
    }

    match (target, signal) {
      (Target::Entity(id), Signal::Value(snapshot)) => {
        match normalize::event_from_snapshot::<K>(id.clone(), snapshot) {
          Ok(event) => {
            let deleted = matches!(event, CanonicalEvent::Delete { .. });
            self.reconciler.apply(event);
            if deleted {
              self.subscriptions.entity_deleted(&id);
            }
          }
          Err(e) => tracing::warn!(%id, "realtime record dropped: {e}"),
        }
      }
      (Target::Entity(id), Signal::Error(e)) => {
        tracing::warn!(%id, "subscription failed, retrying on next pass: {e}");
        self.subscriptions.entity_failed(&id);
      }
      (Target::Roster(subject), Signal::Value(snapshot)) => {
        let ids_field = self.config.roster_ids_field.clone();
        let Some(node) = self.subject_node(&snapshot, ids_field.as_deref()) else {
          return;
        };
        tracing::debug!(%subject, ids = node.ids.len(), "roster replaced");
        let report = self.subscriptions.set_roster(&subject, node.ids);
        self.settle(report);
      }
      (Target::Roster(subject), Signal::Error(e)) => {
        tracing::warn!(%subject, "roster subscription failed: {e}");
        self.subscriptions.roster_failed(&subject);
      }
      (Target::Feed(subject), Signal::Value(snapshot)) => {
        if self.subject_node(&snapshot, None).is_some() {
          tracing::debug!(%subject, "feed updated");
        }
      }
      (Target::Feed(subject), Signal::Error(e)) => {
        tracing::warn!(%subject, "feed subscription failed: {e}");
        self.subscriptions.feed_failed(&subject);
      }
    }
  }

  /// Parse a roster or feed node, merge its statistics and apply the records
  /// it embeds. `None` if the node is missing or malformed.
  fn subject_node(
    &mut self,
    snapshot: &Snapshot,
    ids_field: Option<&str>,
  ) -> Option<SubjectNode<K::Status>> {
    let mut node = match normalize::subject_node_from_snapshot::<K>(
      snapshot,
      ids_field,
      &self.config.stats_field,
    ) {
      Ok(Some(node)) => node,
      Ok(None) => {
        tracing::debug!(path = snapshot.path(), "subject node missing; ignored");
        return None;
      }
      Err(e) => {
        tracing::warn!("subject node dropped: {e}");
        return None;
      }
    };
    self.stats.extend(std::mem::take(&mut node.stats));
    for event in node.records.drain(..) {
      self.reconciler.apply(event);
    }
    Some(node)
  }

  // ── Driver ────────────────────────────────────────────────────────────

  /// Drive the engine until both push inputs are closed.
  ///
  /// All three sources are polled on one task, so each event is fully
  /// applied before the next is looked at.
  pub async fn run(&mut self, mut inputs: Inputs) {
    let mut worker_open = true;
    let mut foreground_open = true;

    while worker_open || foreground_open {
      tokio::select! {
        msg = inputs.worker.recv(), if worker_open => match msg {
          Some(raw) => { self.on_worker_message(raw); }
          None => worker_open = false,
        },
        msg = inputs.foreground.recv(), if foreground_open => match msg {
          Some(payload) => { self.on_foreground_push(payload); }
          None => foreground_open = false,
        },
        Some(delivery) = self.deliveries.recv() => self.handle_delivery(delivery),
      }
    }

    self.drain();
  }

  /// Close every subscription. The store keeps its last state.
  pub fn shutdown(&mut self) { self.subscriptions.shutdown(); }
}
