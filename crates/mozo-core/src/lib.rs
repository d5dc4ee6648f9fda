//! Core types and trait definitions for the Mozo realtime call pipeline.
//!
//! This crate is deliberately free of any async runtime. It describes the
//! entities being reconciled, the canonical event shape every transport is
//! normalised into, and the trait a realtime database backend implements.

pub mod entity;
pub mod error;
pub mod event;
pub mod kind;
pub mod realtime;

pub use error::{Error, Result};
