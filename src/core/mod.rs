//! Core abstractions for routerflow
//!
//! Error type, collaborator traits and per-key locking shared by the
//! handlers and the store/bus implementations.

pub mod error;
pub mod locks;
pub mod traits;

pub use error::{CoordinatorError, CoordinatorResult};
pub use locks::KeyedLocks;
pub use traits::{AggregateStore, EventBus, Revision, Versioned};
