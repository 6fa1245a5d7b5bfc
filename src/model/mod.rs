//! Router and aggregate model shared by the request and response handlers.

pub mod event;
pub mod schedule;
pub mod status;

use std::borrow::Cow;

use log::debug;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::core::{CoordinatorError, CoordinatorResult};

use schedule::next_schedulable;
use status::{AggregateStatus, RouterStatus};

pub const DEFAULT_NAMESPACE: &str = "GPBRouters";

/// Aggregate code for a request rejected by validation
pub const VALIDATION_ERROR_CODE: &str = "0001";
/// Aggregate code when at least one router errored
pub const PROVISIONING_ERROR_CODE: &str = "0002";
pub const PROVISIONING_ERROR_MESSAGE: &str = "some routers could not be processed";

/// Key under which the aggregate of `service` is stored.
pub fn cache_key(namespace: &str, service: &str) -> String {
    format!("{namespace}_{service}")
}

/// One router of a service: provisioning parameters plus runtime state.
///
/// The datacenter fields are handed to the worker untouched.
#[derive(Clone, Default, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "RouterSpec::validate_identity"))]
#[serde(default)]
pub struct RouterSpec {
    pub name: String,
    pub r#type: String,
    pub client_name: String,
    pub datacenter_name: String,
    pub datacenter_password: String,
    pub datacenter_region: String,
    pub datacenter_type: String,
    pub datacenter_username: String,
    pub external_network: String,
    pub vcloud_url: String,
    pub vse_url: String,
    pub ip: String,
    pub created: bool,
    pub status: RouterStatus,
    pub error_code: String,
    pub error_message: String,
}

impl RouterSpec {
    fn validate_identity(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::new("router_name_required")
                .with_message(Cow::Borrowed("Router name can not be empty")));
        }
        if self.datacenter_name.is_empty() {
            return Err(
                ValidationError::new("datacenter_required").with_message(Cow::Borrowed(
                    "Specifying a datacenter is necessary when creating a router",
                )),
            );
        }
        Ok(())
    }

    /// Validate and flatten the failure into its human readable reason
    pub fn check(&self) -> CoordinatorResult<()> {
        self.validate().map_err(|errors| {
            let reason = errors
                .field_errors()
                .values()
                .flat_map(|errs| errs.iter())
                .find_map(|err| err.message.as_ref().map(|m| m.to_string()))
                .unwrap_or_else(|| errors.to_string());
            CoordinatorError::Validation(reason)
        })
    }

    pub fn mark_processing(&mut self) -> CoordinatorResult<()> {
        self.status = self.status.transition(RouterStatus::Processing)?;
        Ok(())
    }
}

/// Final result of an aggregate once every router is terminal
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Errored,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Errored => "errored",
        }
    }
}

/// Result of one scan over the router sequence
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Advance {
    pub all_terminal: bool,
    /// Router newly marked `processing` that still has to be dispatched
    pub dispatch: Option<RouterSpec>,
}

/// Persisted record tracking the full router set of a service.
#[derive(Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Aggregate {
    pub service: String,
    pub status: AggregateStatus,
    pub error_code: String,
    pub error_message: String,
    pub routers: Vec<RouterSpec>,
    pub sequential_processing: bool,
}

impl Aggregate {
    pub fn cache_key(&self, namespace: &str) -> String {
        cache_key(namespace, &self.service)
    }

    pub fn from_json(payload: &[u8]) -> CoordinatorResult<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn to_json(&self) -> CoordinatorResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Validate every router in order; the first failure wins.
    pub fn validate_routers(&self) -> CoordinatorResult<()> {
        self.routers.iter().try_for_each(RouterSpec::check)
    }

    pub fn mark_completed(&mut self) {
        self.status = AggregateStatus::Completed;
        self.error_code.clear();
        self.error_message.clear();
    }

    pub fn mark_errored(&mut self, code: &str, message: &str) {
        self.status = AggregateStatus::Error;
        self.error_code = code.to_string();
        self.error_message = message.to_string();
    }

    /// Reset a resubmitted aggregate so a new run can start.
    ///
    /// Every router not yet completed goes back to pending, including
    /// ones left in flight, so the request dispatches them again.
    pub fn restart(&mut self) {
        self.status = AggregateStatus::InProgress;
        self.error_code.clear();
        self.error_message.clear();
        for router in self
            .routers
            .iter_mut()
            .filter(|r| r.status != RouterStatus::Completed)
        {
            router.status = RouterStatus::Pending;
            router.error_code.clear();
            router.error_message.clear();
        }
    }

    /// Apply a worker outcome to every router called `router_name`.
    ///
    /// Routers that cannot take the transition (already terminal) are left
    /// untouched. Returns the number of routers updated.
    pub fn merge_outcome(
        &mut self,
        router_name: &str,
        label: RouterStatus,
        ip: &str,
        error_code: &str,
        error_message: &str,
    ) -> usize {
        let mut merged = 0;
        for router in self.routers.iter_mut().filter(|r| r.name == router_name) {
            match router.status.transition(label) {
                Ok(status) => {
                    router.status = status;
                    router.ip = ip.to_string();
                    router.error_code = error_code.to_string();
                    router.error_message = error_message.to_string();
                    merged += 1;
                }
                Err(e) => debug!("Ignoring outcome for router {router_name}: {e}"),
            }
        }
        merged
    }

    /// Scan the routers once and schedule at most one pending router.
    ///
    /// Nothing is scheduled once the aggregate itself is terminal.
    pub fn advance(&mut self) -> CoordinatorResult<Advance> {
        let mut all_terminal = self.routers.iter().all(|r| r.status.is_terminal());

        let mut dispatch = None;
        if !self.status.is_terminal() {
            if let Some(idx) = next_schedulable(&self.routers) {
                let router = &mut self.routers[idx];
                router.mark_processing()?;
                dispatch = Some(router.clone());
                all_terminal = false;
            }
        }

        Ok(Advance {
            all_terminal,
            dispatch,
        })
    }

    /// Outcome of the aggregate, `None` while any router is in flight
    pub fn outcome(&self) -> Option<Outcome> {
        if !self.routers.iter().all(|r| r.status.is_terminal()) {
            return None;
        }
        if self.routers.iter().any(|r| r.status == RouterStatus::Errored) {
            Some(Outcome::Errored)
        } else {
            Some(Outcome::Completed)
        }
    }

    /// Record `outcome` on the aggregate fields
    pub fn finish(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Completed => self.mark_completed(),
            Outcome::Errored => {
                self.mark_errored(PROVISIONING_ERROR_CODE, PROVISIONING_ERROR_MESSAGE)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn router(name: &str) -> RouterSpec {
        RouterSpec {
            name: name.to_string(),
            client_name: "acme".to_string(),
            datacenter_name: "dc1".to_string(),
            datacenter_region: "eu-west".to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn aggregate(service: &str, names: &[&str], sequential: bool) -> Aggregate {
        Aggregate {
            service: service.to_string(),
            routers: names.iter().map(|n| router(n)).collect(),
            sequential_processing: sequential,
            ..Default::default()
        }
    }

    #[test]
    fn test_cache_key() {
        let agg = aggregate("svc-1", &[], false);
        assert_eq!(agg.cache_key(DEFAULT_NAMESPACE), "GPBRouters_svc-1");
        assert_eq!(cache_key("ns", "svc-1"), "ns_svc-1");
    }

    #[test]
    fn test_validation_order() {
        let mut r = router("");
        r.datacenter_name.clear();
        let err = r.check().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: Router name can not be empty"
        );

        let mut r = router("r1");
        r.datacenter_name.clear();
        match r.check() {
            Err(CoordinatorError::Validation(reason)) => assert_eq!(
                reason,
                "Specifying a datacenter is necessary when creating a router"
            ),
            other => panic!("unexpected {other:?}"),
        }

        assert!(router("r1").check().is_ok());
    }

    #[test]
    fn test_validate_routers_checks_every_router() {
        let mut agg = aggregate("svc", &["a", "b", "c"], false);
        agg.routers[2].datacenter_name.clear();
        assert!(agg.validate_routers().is_err());
    }

    #[test]
    fn test_deserialize_worker_payload() {
        let payload = br#"{"service":"service","routers":[{"name":"supu","client":"supu","datacenter_name":"name","datacenter_password":"password","datacenter_region":"region","datacenter_type":"type","status":"processed"}]}"#;
        let agg = Aggregate::from_json(payload).unwrap();
        assert_eq!(agg.service, "service");
        assert!(!agg.sequential_processing);
        assert_eq!(agg.status, AggregateStatus::InProgress);
        assert_eq!(agg.routers[0].datacenter_password, "password");
        assert_eq!(agg.routers[0].status, RouterStatus::Processing);
    }

    #[test]
    fn test_json_round_trip_preserves_order() {
        let mut agg = aggregate("svc", &["c", "a", "b"], true);
        agg.routers[1].status = RouterStatus::Errored;
        agg.routers[1].error_code = "42".to_string();
        agg.routers[0].ip = "10.0.0.1".to_string();

        let restored = Aggregate::from_json(&agg.to_json().unwrap()).unwrap();
        assert_eq!(restored, agg);
    }

    #[test]
    fn test_merge_outcome_never_overwrites_terminal() {
        let mut agg = aggregate("svc", &["a", "b"], false);
        agg.routers[0].status = RouterStatus::Processing;

        assert_eq!(agg.merge_outcome("a", RouterStatus::Completed, "1.1.1.1", "", ""), 1);
        assert_eq!(agg.routers[0].status, RouterStatus::Completed);
        assert_eq!(agg.routers[0].ip, "1.1.1.1");

        assert_eq!(agg.merge_outcome("a", RouterStatus::Errored, "", "7", "boom"), 0);
        assert_eq!(agg.routers[0].status, RouterStatus::Completed);
        assert_eq!(agg.routers[0].ip, "1.1.1.1");

        assert_eq!(agg.merge_outcome("missing", RouterStatus::Completed, "", "", ""), 0);
        assert_eq!(agg.routers[1].status, RouterStatus::Pending);
    }

    #[test]
    fn test_advance_schedules_one_pending() {
        let mut agg = aggregate("svc", &["a", "b", "c"], false);
        agg.routers[0].status = RouterStatus::Completed;

        let step = agg.advance().unwrap();
        assert!(!step.all_terminal);
        assert_eq!(step.dispatch.unwrap().name, "b");
        assert_eq!(agg.routers[1].status, RouterStatus::Processing);
        assert_eq!(agg.routers[2].status, RouterStatus::Pending);
    }

    #[test]
    fn test_advance_skips_terminal_aggregate() {
        let mut agg = aggregate("svc", &["a"], false);
        agg.mark_errored(VALIDATION_ERROR_CODE, "bad");

        let step = agg.advance().unwrap();
        assert!(step.dispatch.is_none());
        assert!(!step.all_terminal);
        assert_eq!(agg.routers[0].status, RouterStatus::Pending);
    }

    #[test]
    fn test_outcome() {
        let mut agg = aggregate("svc", &["a", "b"], false);
        assert_eq!(agg.outcome(), None);

        agg.routers[0].status = RouterStatus::Completed;
        agg.routers[1].status = RouterStatus::Processing;
        assert_eq!(agg.outcome(), None);

        agg.routers[1].status = RouterStatus::Completed;
        assert_eq!(agg.outcome(), Some(Outcome::Completed));

        agg.routers[1].status = RouterStatus::Errored;
        assert_eq!(agg.outcome(), Some(Outcome::Errored));

        agg.finish(Outcome::Errored);
        assert_eq!(agg.status, AggregateStatus::Error);
        assert_eq!(agg.error_code, PROVISIONING_ERROR_CODE);
        assert_eq!(agg.error_message, PROVISIONING_ERROR_MESSAGE);
    }

    #[test]
    fn test_restart_resets_errored_routers() {
        let mut agg = aggregate("svc", &["a", "b"], false);
        agg.routers[0].status = RouterStatus::Completed;
        agg.routers[1].status = RouterStatus::Errored;
        agg.routers[1].error_message = "timeout".to_string();
        agg.finish(Outcome::Errored);

        agg.restart();
        assert_eq!(agg.status, AggregateStatus::InProgress);
        assert!(agg.error_code.is_empty());
        assert_eq!(agg.routers[0].status, RouterStatus::Completed);
        assert_eq!(agg.routers[1].status, RouterStatus::Pending);
        assert!(agg.routers[1].error_message.is_empty());
    }

    #[test]
    fn test_restart_resets_routers_left_in_flight() {
        let mut agg = aggregate("svc", &["a", "b", "c"], true);
        agg.routers[0].status = RouterStatus::Completed;
        agg.routers[1].status = RouterStatus::Processing;

        agg.restart();
        assert_eq!(agg.routers[0].status, RouterStatus::Completed);
        assert_eq!(agg.routers[1].status, RouterStatus::Pending);
        assert_eq!(agg.routers[2].status, RouterStatus::Pending);
        assert!(agg.routers[1].mark_processing().is_ok());
    }
}
