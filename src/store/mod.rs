//! Aggregate persistence.
//!
//! [`Repository`] owns key derivation and JSON encoding so every read and
//! write for a service goes through the same cache key.

pub mod etcd;
pub mod memory;

use std::sync::Arc;

use log::trace;

use crate::{
    core::{AggregateStore, CoordinatorError, CoordinatorResult, Revision, Versioned},
    model::{cache_key, Aggregate},
};

pub use etcd::EtcdAggregateStore;
pub use memory::MemoryStore;

#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn AggregateStore>,
    namespace: String,
}

impl Repository {
    pub fn new(store: Arc<dyn AggregateStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    pub fn key(&self, service: &str) -> String {
        cache_key(&self.namespace, service)
    }

    fn encode(aggregate: &Aggregate) -> CoordinatorResult<Vec<u8>> {
        if aggregate.service.is_empty() {
            return Err(CoordinatorError::EmptyServiceId);
        }
        aggregate.to_json()
    }

    pub async fn load(&self, service: &str) -> CoordinatorResult<Option<Versioned<Aggregate>>> {
        let key = self.key(service);
        let Some(stored) = self.store.get(&key).await? else {
            return Ok(None);
        };

        trace!("Loaded {key} at revision {}", stored.revision);
        Ok(Some(Versioned {
            value: Aggregate::from_json(&stored.value)?,
            revision: stored.revision,
        }))
    }

    pub async fn save(&self, aggregate: &Aggregate) -> CoordinatorResult<Revision> {
        let value = Self::encode(aggregate)?;
        self.store.put(&self.key(&aggregate.service), value).await
    }

    /// Save only if nobody wrote the aggregate since `expected`
    pub async fn save_if(&self, aggregate: &Aggregate, expected: Revision) -> CoordinatorResult<bool> {
        let value = Self::encode(aggregate)?;
        self.store
            .compare_and_put(&self.key(&aggregate.service), expected, value)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{status::RouterStatus, tests::aggregate, DEFAULT_NAMESPACE};

    fn repository() -> (Arc<MemoryStore>, Repository) {
        let store = Arc::new(MemoryStore::new());
        let repo = Repository::new(store.clone(), DEFAULT_NAMESPACE);
        (store, repo)
    }

    #[tokio::test]
    async fn test_save_then_load_is_lossless() {
        let (store, repo) = repository();
        let mut agg = aggregate("svc", &["b", "a"], true);
        agg.routers[0].status = RouterStatus::Processing;
        agg.routers[1].ip = "10.0.0.2".to_string();

        repo.save(&agg).await.unwrap();
        assert!(store.raw("GPBRouters_svc").is_some());

        let loaded = repo.load("svc").await.unwrap().unwrap();
        assert_eq!(loaded.value, agg);
    }

    #[tokio::test]
    async fn test_empty_service_is_refused() {
        let (_, repo) = repository();
        let agg = aggregate("", &["a"], false);
        assert!(matches!(
            repo.save(&agg).await,
            Err(CoordinatorError::EmptyServiceId)
        ));
    }

    #[tokio::test]
    async fn test_undecodable_value_is_an_error() {
        let (store, repo) = repository();
        store.put("GPBRouters_svc", b"not json".to_vec()).await.unwrap();
        assert!(matches!(
            repo.load("svc").await,
            Err(CoordinatorError::Serialization(_))
        ));
        assert!(repo.load("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_if_detects_concurrent_write() {
        let (_, repo) = repository();
        let agg = aggregate("svc", &["a"], false);
        let rev = repo.save(&agg).await.unwrap();

        repo.save(&agg).await.unwrap();
        assert!(!repo.save_if(&agg, rev).await.unwrap());

        let current = repo.load("svc").await.unwrap().unwrap();
        assert!(repo.save_if(&agg, current.revision).await.unwrap());
    }
}
