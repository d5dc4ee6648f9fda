//! Error type for `mozo-realtime-memory`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("subscription to {0} rejected")]
  SubscribeRejected(String),

  #[error("invalid path: {0:?}")]
  InvalidPath(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
