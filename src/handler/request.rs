use log::{info, warn};

use crate::{
    core::{CoordinatorError, CoordinatorResult},
    metrics,
    model::{schedule::initial_dispatch, status::AggregateStatus, Aggregate, VALIDATION_ERROR_CODE},
};

use super::FlowHandler;

/// What a request invocation ended up doing
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// Nothing left to provision; `.done` published
    Done,
    /// A router failed validation; `.error` published
    Rejected(String),
    /// Routers dispatched, completion is driven by worker replies
    Dispatched(Vec<String>),
}

impl FlowHandler {
    /// Handle a creation/deletion request for the routers of a service.
    pub async fn handle_request(&self, payload: &[u8]) -> CoordinatorResult<RequestOutcome> {
        let mut aggregate = Aggregate::from_json(payload).inspect_err(|_| {
            metrics::record_dropped(&self.flow.verb, "malformed_request");
        })?;
        if aggregate.service.is_empty() {
            metrics::record_dropped(&self.flow.verb, "empty_service");
            return Err(CoordinatorError::EmptyServiceId);
        }

        let _guard = self
            .locks
            .lock(&self.repository.key(&aggregate.service))
            .await;

        // persisted before any dispatch so early replies find state
        self.repository.save(&aggregate).await?;

        if aggregate.routers.is_empty() || aggregate.status == AggregateStatus::Completed {
            return self.request_done(aggregate).await;
        }

        if let Err(err) = aggregate.validate_routers() {
            let reason = match err {
                CoordinatorError::Validation(reason) => reason,
                other => other.to_string(),
            };
            return self.request_rejected(aggregate, reason).await;
        }

        aggregate.restart();
        let selected = initial_dispatch(&aggregate.routers, aggregate.sequential_processing);
        if selected.is_empty() {
            return self.request_done(aggregate).await;
        }
        for &idx in &selected {
            aggregate.routers[idx].mark_processing()?;
        }

        self.repository.save(&aggregate).await?;

        let mut dispatched = Vec::with_capacity(selected.len());
        for idx in selected {
            let router = &aggregate.routers[idx];
            self.dispatch(&aggregate.service, router).await?;
            dispatched.push(router.name.clone());
        }

        info!(
            service = aggregate.service.as_str(),
            flow = self.flow.verb.as_str(),
            count = dispatched.len();
            "Routers dispatched"
        );
        Ok(RequestOutcome::Dispatched(dispatched))
    }

    async fn request_done(&self, mut aggregate: Aggregate) -> CoordinatorResult<RequestOutcome> {
        aggregate.mark_completed();
        self.repository.save(&aggregate).await?;

        let subject = format!("{}.done", self.flow.request_subject);
        self.publish_json(&subject, &aggregate).await?;
        metrics::record_terminal(&self.flow.verb, "done");

        info!("Request for service {} needs no provisioning", aggregate.service);
        Ok(RequestOutcome::Done)
    }

    async fn request_rejected(
        &self,
        mut aggregate: Aggregate,
        reason: String,
    ) -> CoordinatorResult<RequestOutcome> {
        aggregate.mark_errored(VALIDATION_ERROR_CODE, &reason);
        self.repository.save(&aggregate).await?;

        let subject = format!("{}.error", self.flow.request_subject);
        self.publish_json(&subject, &aggregate).await?;
        metrics::record_terminal(&self.flow.verb, "error");

        warn!("Rejected request for service {}: {reason}", aggregate.service);
        Ok(RequestOutcome::Rejected(reason))
    }
}
