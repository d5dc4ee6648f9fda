//! In-process realtime database for the Mozo pipeline.
//!
//! Implements [`mozo_core::realtime::RealtimeTransport`] over a flat map of
//! paths to JSON values. Listeners see the current value on attach and every
//! later write to their exact path. Subscribe failures can be injected to
//! exercise retry paths.

mod database;

pub mod error;

pub use database::{MemoryDatabase, MemorySubscription};
pub use error::{Error, Result};
