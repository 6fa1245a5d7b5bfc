use std::{sync::Mutex, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::{stream::BoxStream, StreamExt};
use log::trace;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

use crate::core::{CoordinatorError, CoordinatorResult, EventBus};

/// In-process bus with exact subject matching.
///
/// Every published message is also recorded so callers can inspect what
/// went out on a subject.
#[derive(Default)]
pub struct MemoryBus {
    subscribers: DashMap<String, Vec<UnboundedSender<Bytes>>>,
    replies: DashMap<String, Bytes>,
    published: Mutex<Vec<(String, Bytes)>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request on `subject` with `payload`
    pub fn reply_with(&self, subject: &str, payload: impl Into<Bytes>) {
        self.replies.insert(subject.to_string(), payload.into());
    }

    /// Payloads published on `subject`, oldest first
    pub fn published(&self, subject: &str) -> Vec<Bytes> {
        self.published
            .lock()
            .map(|log| {
                log.iter()
                    .filter(|(s, _)| s == subject)
                    .map(|(_, payload)| payload.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every subject published to, in publish order
    pub fn subjects(&self) -> Vec<String> {
        self.published
            .lock()
            .map(|log| log.iter().map(|(s, _)| s.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> CoordinatorResult<()> {
        trace!("Publishing {} bytes on {subject}", payload.len());
        self.published
            .lock()
            .map_err(|_| CoordinatorError::Bus("publish log poisoned".into()))?
            .push((subject.to_string(), payload.clone()));

        if let Some(mut senders) = self.subscribers.get_mut(subject) {
            senders.retain(|tx| tx.send(payload.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> CoordinatorResult<BoxStream<'static, Bytes>> {
        let (tx, rx) = unbounded_channel();
        self.subscribers
            .entry(subject.to_string())
            .or_default()
            .push(tx);

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|payload| (payload, rx))
        });
        Ok(stream.boxed())
    }

    async fn request(
        &self,
        subject: &str,
        _payload: Bytes,
        _timeout: Duration,
    ) -> CoordinatorResult<Bytes> {
        self.replies
            .get(subject)
            .map(|reply| reply.value().clone())
            .ok_or_else(|| CoordinatorError::Bus(format!("no responders on {subject}")))
    }
}
