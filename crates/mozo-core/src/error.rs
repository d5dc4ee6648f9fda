//! Error types for `mozo-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("no {kind} id under any of the keys {keys:?}")]
  MissingEntityId {
    kind: &'static str,
    keys: &'static [&'static str],
  },

  #[error("unknown {kind} status: {value:?}")]
  UnknownStatus { kind: &'static str, value: String },

  #[error("malformed record at {path}: {reason}")]
  MalformedRecord { path: String, reason: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
