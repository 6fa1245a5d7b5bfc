use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::core::{AggregateStore, CoordinatorResult, Revision, Versioned};

/// Process-local store with etcd-like revision semantics
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Versioned<Vec<u8>>>,
    revision: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_revision(&self) -> Revision {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Raw value under `key`, mostly for assertions
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).map(|entry| entry.value.clone())
    }
}

#[async_trait]
impl AggregateStore for MemoryStore {
    async fn get(&self, key: &str) -> CoordinatorResult<Option<Versioned<Vec<u8>>>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> CoordinatorResult<Revision> {
        let revision = self.next_revision();
        self.entries
            .insert(key.to_string(), Versioned { value, revision });
        Ok(revision)
    }

    async fn compare_and_put(
        &self,
        key: &str,
        expected: Revision,
        value: Vec<u8>,
    ) -> CoordinatorResult<bool> {
        // the shard lock held by get_mut makes check-and-set atomic
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.revision == expected => {
                *entry = Versioned {
                    value,
                    revision: self.next_revision(),
                };
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
