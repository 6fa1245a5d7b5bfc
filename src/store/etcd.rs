use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, ConnectOptions, PutOptions, Txn, TxnOp};
use log::{info, warn};
use tokio::sync::Mutex;

use crate::{
    config::Etcd,
    core::{error::ErrorContext, AggregateStore, CoordinatorError, CoordinatorResult, Revision, Versioned},
};

/// Aggregate store backed by etcd.
///
/// Writes use the key's `mod_revision` for compare-and-put, so
/// coordinators running in separate processes cannot lose each other's
/// updates.
pub struct EtcdAggregateStore {
    config: Etcd,
    client: Arc<Mutex<Option<Client>>>,
}

impl EtcdAggregateStore {
    pub fn new(config: Etcd) -> Self {
        Self {
            config,
            client: Arc::new(Mutex::new(None)),
        }
    }

    /// Connect eagerly so configuration mistakes show up at startup
    pub async fn connect(config: Etcd) -> CoordinatorResult<Self> {
        let store = Self::new(config);
        store.ensure_client().await?;
        Ok(store)
    }

    async fn create_client(&self) -> CoordinatorResult<Client> {
        let mut options = ConnectOptions::default();
        if let Some(timeout) = self.config.timeout {
            options = options.with_timeout(Duration::from_secs(timeout as u64));
        };
        if let Some(connect_timeout) = self.config.connect_timeout {
            options = options.with_connect_timeout(Duration::from_secs(connect_timeout as u64));
        };
        if let (Some(user), Some(password)) = (&self.config.user, &self.config.password) {
            options = options.with_user(user.clone(), password.clone());
        };

        Client::connect(self.config.host.clone(), Some(options))
            .await
            .store_context("failed to connect to etcd")
    }

    async fn ensure_client(&self) -> CoordinatorResult<Client> {
        let mut client_guard = self.client.lock().await;

        if client_guard.is_none() {
            info!("Creating new etcd client...");
            *client_guard = Some(self.create_client().await?);
        }
        client_guard
            .clone()
            .ok_or_else(|| CoordinatorError::Store("Etcd client is not initialized".into()))
    }

    /// Drop the cached client so the next call reconnects
    async fn reset_client(&self, err: &etcd_client::Error) {
        warn!("Etcd operation failed, resetting client: {err}");
        *self.client.lock().await = None;
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.config.prefix, key)
    }
}

#[async_trait]
impl AggregateStore for EtcdAggregateStore {
    async fn get(&self, key: &str) -> CoordinatorResult<Option<Versioned<Vec<u8>>>> {
        let mut client = self.ensure_client().await?;
        let response = match client.get(self.prefixed(key), None).await {
            Ok(response) => response,
            Err(e) => {
                self.reset_client(&e).await;
                return Err(e.into());
            }
        };

        Ok(response.kvs().first().map(|kv| Versioned {
            value: kv.value().to_vec(),
            revision: kv.mod_revision(),
        }))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> CoordinatorResult<Revision> {
        let mut client = self.ensure_client().await?;
        let response = match client
            .put(self.prefixed(key), value, Some(PutOptions::new()))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.reset_client(&e).await;
                return Err(e.into());
            }
        };

        response
            .header()
            .map(|header| header.revision())
            .ok_or_else(|| CoordinatorError::Store(format!("put {key}: missing response header")))
    }

    async fn compare_and_put(
        &self,
        key: &str,
        expected: Revision,
        value: Vec<u8>,
    ) -> CoordinatorResult<bool> {
        let key = self.prefixed(key);
        let txn = Txn::new()
            .when(vec![Compare::mod_revision(
                key.clone(),
                CompareOp::Equal,
                expected,
            )])
            .and_then(vec![TxnOp::put(key, value, None)]);

        let mut client = self.ensure_client().await?;
        match client.txn(txn).await {
            Ok(response) => Ok(response.succeeded()),
            Err(e) => {
                self.reset_client(&e).await;
                Err(e.into())
            }
        }
    }
}
