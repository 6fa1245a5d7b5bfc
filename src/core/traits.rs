//! Core traits for routerflow components
//!
//! These are the seams to the external collaborators: the key-value store
//! holding aggregates and the publish/subscribe bus carrying events.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use super::error::CoordinatorResult;

/// Store-assigned version of a key. Bumped on every write.
pub type Revision = i64;

/// A stored value together with the revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub revision: Revision,
}

/// Durable key-value store for serialized aggregates
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Read the raw value stored under `key`
    async fn get(&self, key: &str) -> CoordinatorResult<Option<Versioned<Vec<u8>>>>;

    /// Unconditionally overwrite `key`
    async fn put(&self, key: &str, value: Vec<u8>) -> CoordinatorResult<Revision>;

    /// Overwrite `key` only if it is still at `expected`.
    ///
    /// Returns `false` when another writer got there first.
    async fn compare_and_put(
        &self,
        key: &str,
        expected: Revision,
        value: Vec<u8>,
    ) -> CoordinatorResult<bool>;
}

/// Publish/subscribe transport carrying JSON payloads on named subjects
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, subject: &str, payload: Bytes) -> CoordinatorResult<()>;

    /// Stream of payloads published on `subject` from now on
    async fn subscribe(&self, subject: &str) -> CoordinatorResult<BoxStream<'static, Bytes>>;

    /// Send a request and wait for a single reply
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> CoordinatorResult<Bytes>;
}
