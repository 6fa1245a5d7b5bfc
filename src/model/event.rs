//! Messages exchanged with the provisioning workers.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use super::{status::RouterStatus, RouterSpec};

/// Request for a worker to provision one router
#[derive(Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchEvent {
    pub service_id: String,
    /// Dispatch subject the event was published on
    pub r#type: String,
    pub router_name: String,
    pub router_type: String,
    pub client_name: String,
    pub datacenter_name: String,
    pub datacenter_username: String,
    pub datacenter_password: String,
    pub datacenter_region: String,
    pub datacenter_type: String,
    pub external_network: String,
    pub vcloud_url: String,
    pub vse_url: String,
    pub status: RouterStatus,
}

impl DispatchEvent {
    pub fn new(service: &str, verb: &str, router: &RouterSpec) -> Self {
        Self {
            service_id: service.to_string(),
            r#type: verb.to_string(),
            router_name: router.name.clone(),
            router_type: router.r#type.clone(),
            client_name: router.client_name.clone(),
            datacenter_name: router.datacenter_name.clone(),
            datacenter_username: router.datacenter_username.clone(),
            datacenter_password: router.datacenter_password.clone(),
            datacenter_region: router.datacenter_region.clone(),
            datacenter_type: router.datacenter_type.clone(),
            external_network: router.external_network.clone(),
            vcloud_url: router.vcloud_url.clone(),
            vse_url: router.vse_url.clone(),
            status: router.status,
        }
    }
}

/// Error reported by a worker. `code` arrives as a number or a string.
#[derive(Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionError {
    #[serde(deserialize_with = "string_or_number")]
    pub code: String,
    pub message: String,
}

/// Completion or failure report for one router
#[derive(Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterOutcomeEvent {
    pub r#type: String,
    pub service_id: String,
    pub router_id: String,
    pub router_name: String,
    pub router_ip: String,
    pub error: ProvisionError,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match JsonValue::deserialize(deserializer)? {
        JsonValue::Null => Ok(String::new()),
        JsonValue::String(s) => Ok(s),
        JsonValue::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected error code as string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::router;

    #[test]
    fn test_dispatch_event_wire_names() {
        let mut r = router("supu");
        r.r#type = "edge".to_string();
        r.status = RouterStatus::Processing;

        let event = DispatchEvent::new("service", "router.create", &r);
        let json: JsonValue = serde_json::to_value(&event).unwrap();
        assert_eq!(json["service_id"], "service");
        assert_eq!(json["type"], "router.create");
        assert_eq!(json["router_name"], "supu");
        assert_eq!(json["router_type"], "edge");
        assert_eq!(json["datacenter_name"], "dc1");
        assert_eq!(json["status"], "processing");
    }

    #[test]
    fn test_outcome_event_error_code_forms() {
        let numeric: RouterOutcomeEvent = serde_json::from_str(
            r#"{"type":"router.create.error","service_id":"sss","router_name":"a","error":{"code":12,"message":"quota"}}"#,
        )
        .unwrap();
        assert_eq!(numeric.error.code, "12");
        assert_eq!(numeric.error.message, "quota");

        let text: RouterOutcomeEvent =
            serde_json::from_str(r#"{"service_id":"sss","router_name":"a","error":{"code":"0003"}}"#)
                .unwrap();
        assert_eq!(text.error.code, "0003");

        let bare: RouterOutcomeEvent =
            serde_json::from_str(r#"{"service_id":"sss","router_name":"a","router_ip":"10.1.1.1"}"#)
                .unwrap();
        assert!(bare.error.code.is_empty());
        assert_eq!(bare.router_ip, "10.1.1.1");

        assert!(serde_json::from_str::<RouterOutcomeEvent>(
            r#"{"service_id":"sss","error":{"code":[1]}}"#
        )
        .is_err());
    }
}
