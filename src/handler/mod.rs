//! Request and response handlers.
//!
//! A [`FlowHandler`] is built once per flow (create, delete, ...) from its
//! subjects; both verbs share every code path.

mod request;
mod response;


use std::sync::Arc;

use bytes::Bytes;
use log::debug;
use serde::Serialize;

use crate::{
    config::Flow,
    core::{CoordinatorResult, EventBus, KeyedLocks},
    metrics,
    model::{event::DispatchEvent, RouterSpec},
    store::Repository,
};

pub use request::RequestOutcome;
pub use response::ResponseOutcome;

pub struct FlowHandler {
    flow: Flow,
    repository: Repository,
    bus: Arc<dyn EventBus>,
    locks: Arc<KeyedLocks>,
    max_merge_attempts: u32,
}

impl FlowHandler {
    pub fn new(
        flow: Flow,
        repository: Repository,
        bus: Arc<dyn EventBus>,
        locks: Arc<KeyedLocks>,
    ) -> Self {
        Self {
            flow,
            repository,
            bus,
            locks,
            max_merge_attempts: 5,
        }
    }

    pub fn with_max_merge_attempts(mut self, attempts: u32) -> Self {
        self.max_merge_attempts = attempts.max(1);
        self
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    async fn publish_json<T: Serialize>(&self, subject: &str, message: &T) -> CoordinatorResult<()> {
        let payload = serde_json::to_vec(message)?;
        self.bus.publish(subject, Bytes::from(payload)).await
    }

    /// Send one router to the provisioning workers
    async fn dispatch(&self, service: &str, router: &RouterSpec) -> CoordinatorResult<()> {
        let event = DispatchEvent::new(service, &self.flow.dispatch_subject, router);
        self.publish_json(&self.flow.dispatch_subject, &event).await?;

        debug!("Dispatched router {} of service {service}", router.name);
        metrics::record_dispatch(&self.flow.verb);
        Ok(())
    }
}
