//! Client-side realtime reconciliation for calls and staff requests.
//!
//! Three independently ordered sources describe the same entities: pushes
//! relayed by the service worker, pushes delivered to the foreground page and
//! the realtime database. [`ReconciliationEngine`] normalises all of them into
//! [`mozo_core::event::CanonicalEvent`]s and applies them through a single
//! [`Reconciler`], which guarantees per-entity status monotonicity for push
//! deltas, idempotent application and convergence to realtime snapshots.
//!
//! # Wiring
//!
//! ```rust,ignore
//! let mut engine = ReconciliationEngine::<Call, _>::new(database, config);
//! engine.attach_subject(SubjectId::new("waiter-7"))?;
//! let (senders, inputs) = Inputs::channel();
//! engine.run(inputs).await;
//! ```

pub mod adapters;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod normalize;
pub mod reconciler;
pub mod store;

pub use adapters::{InputSenders, Inputs, WorkerMessage};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::EngineConfig;
pub use engine::ReconciliationEngine;
pub use error::{Error, Result};
pub use normalize::{Notification, PushPayload};
pub use reconciler::{IgnoreReason, Outcome, Reconciler};
pub use store::{EntityStore, StoreChange};
