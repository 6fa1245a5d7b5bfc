use log::{debug, info, warn};

use crate::{
    core::{CoordinatorError, CoordinatorResult, Versioned},
    metrics,
    model::{event::RouterOutcomeEvent, status::RouterStatus, Outcome},
};

use super::FlowHandler;

/// What a response invocation ended up doing
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    /// No aggregate stored for the service
    Dropped,
    Merged {
        /// Routers whose status took the reported outcome
        updated: usize,
        /// Router dispatched to advance the pipeline
        dispatched: Option<String>,
        /// Aggregate outcome published by this invocation
        terminal: Option<Outcome>,
    },
}

impl FlowHandler {
    /// Merge a worker outcome for one router into the stored aggregate.
    ///
    /// `label` is `Completed` on the completion subject and `Errored` on the
    /// failure subject.
    pub async fn handle_response(
        &self,
        payload: &[u8],
        label: RouterStatus,
    ) -> CoordinatorResult<ResponseOutcome> {
        let event: RouterOutcomeEvent = serde_json::from_slice(payload).inspect_err(|_| {
            metrics::record_dropped(&self.flow.verb, "malformed_response");
        })?;
        if event.service_id.is_empty() {
            metrics::record_dropped(&self.flow.verb, "empty_service");
            return Err(CoordinatorError::EmptyServiceId);
        }

        let key = self.repository.key(&event.service_id);
        let _guard = self.locks.lock(&key).await;

        for attempt in 1..=self.max_merge_attempts {
            let Some(Versioned {
                value: mut aggregate,
                revision,
            }) = self.repository.load(&event.service_id).await?
            else {
                warn!(
                    "No aggregate stored under {key}, dropping {label} for router {}",
                    event.router_name
                );
                metrics::record_dropped(&self.flow.verb, "unknown_service");
                return Ok(ResponseOutcome::Dropped);
            };

            // a finished aggregate is left as published
            if aggregate.status.is_terminal() {
                debug!(
                    "Aggregate {key} already {:?}, ignoring {label} for router {}",
                    aggregate.status, event.router_name
                );
                return Ok(ResponseOutcome::Merged {
                    updated: 0,
                    dispatched: None,
                    terminal: None,
                });
            }

            let updated = aggregate.merge_outcome(
                &event.router_name,
                label,
                &event.router_ip,
                &event.error.code,
                &event.error.message,
            );
            let step = aggregate.advance()?;

            let terminal = if step.all_terminal {
                aggregate.outcome()
            } else {
                None
            };
            if let Some(outcome) = terminal {
                aggregate.finish(outcome);
            }

            if !self.repository.save_if(&aggregate, revision).await? {
                debug!("Conflict on {key} (attempt {attempt}), merging again");
                metrics::record_merge_conflict(&self.flow.verb);
                continue;
            }

            if let Some(router) = &step.dispatch {
                self.dispatch(&aggregate.service, router).await?;
            }

            if let Some(outcome) = terminal {
                let suffix = match outcome {
                    Outcome::Completed => "done",
                    Outcome::Errored => "error",
                };
                let subject = format!("{}{}", self.flow.response_prefix, suffix);
                self.publish_json(&subject, &aggregate).await?;
                metrics::record_terminal(&self.flow.verb, suffix);

                info!(
                    service = aggregate.service.as_str(),
                    outcome = outcome.as_str();
                    "Aggregate finished"
                );
            }

            return Ok(ResponseOutcome::Merged {
                updated,
                dispatched: step.dispatch.map(|router| router.name),
                terminal,
            });
        }

        Err(CoordinatorError::Conflict(key))
    }
}
