//! Error type for `mozo-reconcile`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] mozo_core::Error),

  /// The realtime backend refused or failed to open a subscription.
  #[error("subscription to {path} failed: {source}")]
  Subscribe {
    path:   String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  /// An operation needs a path template that the configuration leaves unset.
  #[error("`{0}` is not configured")]
  Unconfigured(&'static str),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
