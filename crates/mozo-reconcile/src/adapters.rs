//! Push transport adapters: the fan-in contract of the two push channels.
//!
//! The service-worker bridge receives raw `postMessage` values tagged by
//! `type`; only `fcm_event` messages carry pushes to reconcile. The
//! foreground listener receives push payloads directly.

use mozo_core::entity::Payload;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::normalize::PushPayload;

/// A message posted by the service worker to the page.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
  /// A push received while the page was in the background.
  FcmEvent { payload: PushPayload },
  /// The user clicked a notification. Navigation only; not reconciled.
  NotificationClick {
    #[serde(default)]
    data: Payload,
  },
  #[serde(other)]
  Other,
}

impl WorkerMessage {
  pub fn parse(raw: Value) -> serde_json::Result<Self> {
    serde_json::from_value(raw)
  }
}

/// Receiving ends of both push channels, consumed by
/// [`crate::ReconciliationEngine::run`].
pub struct Inputs {
  pub worker:     mpsc::UnboundedReceiver<Value>,
  pub foreground: mpsc::UnboundedReceiver<PushPayload>,
}

/// Sending ends handed to the platform glue.
#[derive(Clone)]
pub struct InputSenders {
  pub worker:     mpsc::UnboundedSender<Value>,
  pub foreground: mpsc::UnboundedSender<PushPayload>,
}

impl Inputs {
  pub fn channel() -> (InputSenders, Inputs) {
    let (worker_tx, worker_rx) = mpsc::unbounded_channel();
    let (foreground_tx, foreground_rx) = mpsc::unbounded_channel();
    (
      InputSenders {
        worker:     worker_tx,
        foreground: foreground_tx,
      },
      Inputs {
        worker:     worker_rx,
        foreground: foreground_rx,
      },
    )
  }
}
