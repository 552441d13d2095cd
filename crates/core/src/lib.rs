//! `orderflow-core`: shared identifiers and the domain error model.
//!
//! This crate holds **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{EventId, OrderId, OwnerId, QueueItemId};
