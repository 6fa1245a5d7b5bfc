use std::time::Duration;

use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt};
use log::info;

use crate::{
    config::Nats,
    core::{error::ErrorContext, CoordinatorError, CoordinatorResult, EventBus},
};

/// NATS core pub/sub. Payloads are sent as-is, without an envelope, so
/// existing workers can read them.
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
}

impl NatsBus {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn connect(config: &Nats) -> CoordinatorResult<Self> {
        info!("Connecting to NATS at {}", config.url);
        let client = async_nats::connect(config.url.as_str())
            .await
            .bus_context("failed to connect to NATS server")?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl EventBus for NatsBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> CoordinatorResult<()> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .bus_context(subject)
    }

    async fn subscribe(&self, subject: &str) -> CoordinatorResult<BoxStream<'static, Bytes>> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .bus_context(subject)?;
        Ok(subscriber.map(|message| message.payload).boxed())
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> CoordinatorResult<Bytes> {
        let response = tokio::time::timeout(timeout, self.client.request(subject.to_string(), payload))
            .await
            .map_err(|_| CoordinatorError::Bus(format!("request on {subject} timed out")))?
            .bus_context(subject)?;
        Ok(response.payload)
    }
}
