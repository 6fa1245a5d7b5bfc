//! Message loops wiring the bus to the handlers.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{future::join_all, StreamExt};
use log::{error, info, warn};
use pingora_core::{server::ShutdownWatch, services::background::BackgroundService};
use tokio::time::sleep;

use crate::{
    bus::NatsBus,
    config::Coordinator,
    core::{AggregateStore, CoordinatorResult, EventBus, KeyedLocks},
    handler::FlowHandler,
    model::status::RouterStatus,
    store::{EtcdAggregateStore, Repository},
};

/// Subscribes to the inbound subjects of one flow.
///
/// Every message runs in its own task so a slow store or bus call never
/// holds up delivery of the next message.
pub struct FlowService {
    handler: Arc<FlowHandler>,
}

impl FlowService {
    pub fn new(handler: FlowHandler) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Run until shutdown is signalled or a subscription closes
    pub async fn run(
        &self,
        bus: Arc<dyn EventBus>,
        mut shutdown: ShutdownWatch,
    ) -> CoordinatorResult<()> {
        let flow = self.handler.flow().clone();
        let mut requests = bus.subscribe(&flow.request_subject).await?;
        let mut completions = bus.subscribe(&flow.completion_subject).await?;
        let mut failures = bus.subscribe(&flow.failure_subject).await?;
        info!(
            "Flow {} listening on {}, {}, {}",
            flow.verb, flow.request_subject, flow.completion_subject, flow.failure_subject
        );

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received, stopping flow {}", flow.verb);
                        return Ok(());
                    }
                },
                payload = requests.next() => match payload {
                    Some(payload) => self.spawn_request(payload),
                    None => break,
                },
                payload = completions.next() => match payload {
                    Some(payload) => self.spawn_response(payload, RouterStatus::Completed),
                    None => break,
                },
                payload = failures.next() => match payload {
                    Some(payload) => self.spawn_response(payload, RouterStatus::Errored),
                    None => break,
                },
            }
        }

        warn!("Subscriptions of flow {} closed", flow.verb);
        Ok(())
    }

    fn spawn_request(&self, payload: Bytes) {
        let handler = self.handler.clone();
        tokio::spawn(async move {
            if let Err(e) = handler.handle_request(&payload).await {
                error!("Request on {} failed: {e}", handler.flow().request_subject);
            }
        });
    }

    fn spawn_response(&self, payload: Bytes, label: RouterStatus) {
        let handler = self.handler.clone();
        tokio::spawn(async move {
            if let Err(e) = handler.handle_response(&payload, label).await {
                error!("Merging {label} reply for flow {} failed: {e}", handler.flow().verb);
            }
        });
    }
}

/// Background service connecting the bus and the store, then running
/// every configured flow until shutdown.
pub struct CoordinatorService {
    config: Coordinator,
}

impl CoordinatorService {
    pub fn new(config: Coordinator) -> Self {
        Self { config }
    }

    async fn connect(&self) -> CoordinatorResult<(Arc<dyn EventBus>, Arc<dyn AggregateStore>)> {
        let bus = NatsBus::connect(&self.config.nats).await?;
        let etcd = self.config.resolve_etcd(&bus).await?;
        let store = EtcdAggregateStore::connect(etcd).await?;
        Ok((Arc::new(bus), Arc::new(store)))
    }

    /// Build one service per configured flow over shared collaborators
    pub fn flows(&self, bus: Arc<dyn EventBus>, store: Arc<dyn AggregateStore>) -> Vec<FlowService> {
        let repository = Repository::new(store, self.config.namespace.clone());
        let locks = Arc::new(KeyedLocks::new());

        self.config
            .flows
            .iter()
            .map(|flow| {
                FlowService::new(
                    FlowHandler::new(flow.clone(), repository.clone(), bus.clone(), locks.clone())
                        .with_max_merge_attempts(self.config.max_merge_attempts),
                )
            })
            .collect()
    }
}

#[async_trait]
impl BackgroundService for CoordinatorService {
    async fn start(&self, shutdown: ShutdownWatch) {
        loop {
            if *shutdown.borrow() {
                return;
            }

            info!("Connecting coordinator collaborators...");
            let (bus, store) = match self.connect().await {
                Ok(connected) => connected,
                Err(err) => {
                    error!("Failed to connect collaborators: {err}");
                    sleep(Duration::from_secs(3)).await;
                    continue;
                }
            };

            let flows = self.flows(bus.clone(), store);
            let results = join_all(
                flows
                    .iter()
                    .map(|flow| flow.run(bus.clone(), shutdown.clone())),
            )
            .await;
            for err in results.into_iter().filter_map(Result::err) {
                error!("Flow stopped: {err}");
            }

            if *shutdown.borrow() {
                return;
            }
            warn!("Flows stopped without shutdown, reconnecting...");
            sleep(Duration::from_secs(1)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::watch;

    use super::*;
    use crate::{
        bus::MemoryBus,
        config::Flow,
        model::{status::AggregateStatus, Aggregate},
        store::MemoryStore,
    };

    async fn wait_for(bus: &MemoryBus, subject: &str, count: usize) -> bool {
        for _ in 0..100 {
            if bus.published(subject).len() >= count {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_flow_service_drives_saga_end_to_end() {
        let _ = env_logger::builder().is_test(true).try_init();
        let bus = Arc::new(MemoryBus::new());
        let store: Arc<dyn AggregateStore> = Arc::new(MemoryStore::new());
        let service = CoordinatorService::new(Coordinator::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let flows = service.flows(bus.clone(), store);
        assert_eq!(flows.len(), 2);

        let runners: Vec<_> = flows
            .into_iter()
            .map(|flow| {
                let bus: Arc<dyn EventBus> = bus.clone();
                let shutdown = shutdown_rx.clone();
                tokio::spawn(async move { flow.run(bus, shutdown).await })
            })
            .collect();
        // let the subscriptions register
        sleep(Duration::from_millis(20)).await;

        let request = json!({
            "service": "svc",
            "sequential_processing": true,
            "routers": [
                { "name": "a", "datacenter_name": "dc1" },
                { "name": "b", "datacenter_name": "dc1" },
            ],
        });
        bus.publish("routers.create", Bytes::from(request.to_string()))
            .await
            .unwrap();
        assert!(wait_for(&bus, "router.create", 1).await);

        let reply = json!({ "service_id": "svc", "router_name": "a", "router_ip": "10.0.0.1" });
        bus.publish("router.create.done", Bytes::from(reply.to_string()))
            .await
            .unwrap();
        assert!(wait_for(&bus, "router.create", 2).await);

        let reply = json!({ "service_id": "svc", "router_name": "b", "error": { "code": 1, "message": "no quota" } });
        bus.publish("router.create.error", Bytes::from(reply.to_string()))
            .await
            .unwrap();
        assert!(wait_for(&bus, "routers.create.error", 1).await);

        let outcome = Aggregate::from_json(&bus.published("routers.create.error")[0]).unwrap();
        assert_eq!(outcome.status, AggregateStatus::Error);
        assert_eq!(outcome.error_code, "0002");
        assert!(bus.published("routers.delete.done").is_empty());

        shutdown_tx.send(true).unwrap();
        for runner in runners {
            runner.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_flow_service_survives_bad_messages() {
        let bus = Arc::new(MemoryBus::new());
        let store = Arc::new(MemoryStore::new());
        let handler = FlowHandler::new(
            Flow::for_verb("delete"),
            Repository::new(store, "GPBRouters"),
            bus.clone(),
            Arc::new(KeyedLocks::new()),
        );
        let service = FlowService::new(handler);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runner = {
            let bus: Arc<dyn EventBus> = bus.clone();
            tokio::spawn(async move { service.run(bus, shutdown_rx).await })
        };
        sleep(Duration::from_millis(20)).await;

        bus.publish("routers.delete", Bytes::from_static(b"garbage"))
            .await
            .unwrap();
        bus.publish("routers.delete", Bytes::from(json!({ "service": "svc" }).to_string()))
            .await
            .unwrap();
        assert!(wait_for(&bus, "routers.delete.done", 1).await);

        shutdown_tx.send(true).unwrap();
        runner.await.unwrap().unwrap();
    }
}
