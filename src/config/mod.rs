use std::{collections::HashSet, env, fs, net::SocketAddr, time::Duration};

use bytes::Bytes;
use log::{debug, info, trace};
use pingora::server::configuration::{Opt, ServerConf};
use pingora_error::{ErrorType::*, OrErr, Result};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::{
    core::{CoordinatorError, CoordinatorResult, EventBus},
    model::DEFAULT_NAMESPACE,
};

/// Subject the store settings are requested on when none are configured
pub const ETCD_CONFIG_SUBJECT: &str = "config.get.etcd";
const ETCD_CONFIG_TIMEOUT: Duration = Duration::from_secs(1);

const NATS_URI_ENV: &str = "NATS_URI";
const ETCD_HOST_ENV: &str = "ETCD_HOST";

#[derive(Default, Debug, Serialize, Deserialize, Validate)]
pub struct Config {
    #[serde(default)]
    pub pingora: ServerConf,

    #[serde(default)]
    #[validate(nested)]
    pub coordinator: Coordinator,
}

// Config file load and validation
impl Config {
    pub fn load_from_yaml<P>(path: P) -> Result<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path).or_err_with(ReadError, || {
            format!("Unable to read conf file from {path}")
        })?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    // config file load entry point
    pub fn load_yaml_with_opt_override(opt: &Opt) -> Result<Self> {
        let mut conf = match &opt.conf {
            Some(path) => Self::load_from_yaml(path)?,
            None => {
                info!("No conf file given, using defaults");
                Self::default()
            }
        };
        conf.merge_with_opt(opt);
        conf.merge_with_env();
        Ok(conf)
    }

    pub fn from_yaml(conf_str: &str) -> Result<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config = serde_yaml::from_str(conf_str).or_err_with(ReadError, || {
            format!("Unable to parse yaml conf {conf_str}")
        })?;

        trace!("Loaded conf: {conf:?}");

        conf.validate()
            .or_err_with(FileReadError, || "Conf file valid failed")?;

        Ok(conf)
    }

    #[allow(dead_code)]
    pub fn to_yaml(&self) -> String {
        serde_yaml::to_string(self).unwrap_or_default()
    }

    pub fn merge_with_opt(&mut self, opt: &Opt) {
        if opt.daemon {
            self.pingora.daemon = true;
        }
    }

    /// Environment wins over the file for connection endpoints
    pub fn merge_with_env(&mut self) {
        self.coordinator
            .apply_overrides(env::var(NATS_URI_ENV).ok(), env::var(ETCD_HOST_ENV).ok());
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Coordinator::validate_unique_verbs"))]
pub struct Coordinator {
    #[serde(default = "Coordinator::default_namespace")]
    #[validate(length(min = 1))]
    pub namespace: String,

    #[serde(default = "Coordinator::default_max_merge_attempts")]
    #[validate(range(min = 1))]
    pub max_merge_attempts: u32,

    #[serde(default)]
    #[validate(nested)]
    pub nats: Nats,
    #[validate(nested)]
    pub etcd: Option<Etcd>,
    pub log: Option<Log>,
    pub prometheus: Option<Prometheus>,

    #[serde(default = "Coordinator::default_flows")]
    #[validate(length(min = 1))]
    #[validate(nested)]
    pub flows: Vec<Flow>,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self {
            namespace: Self::default_namespace(),
            max_merge_attempts: Self::default_max_merge_attempts(),
            nats: Nats::default(),
            etcd: None,
            log: None,
            prometheus: None,
            flows: Self::default_flows(),
        }
    }
}

impl Coordinator {
    fn default_namespace() -> String {
        DEFAULT_NAMESPACE.to_string()
    }

    fn default_max_merge_attempts() -> u32 {
        5
    }

    fn default_flows() -> Vec<Flow> {
        vec![Flow::for_verb("create"), Flow::for_verb("delete")]
    }

    fn validate_unique_verbs(&self) -> Result<(), ValidationError> {
        let mut seen = HashSet::new();
        for flow in &self.flows {
            if !seen.insert(flow.verb.as_str()) {
                let mut err = ValidationError::new("duplicate_flow_verb");
                err.add_param("verb".into(), &flow.verb);
                return Err(err);
            }
        }
        Ok(())
    }

    fn apply_overrides(&mut self, nats_uri: Option<String>, etcd_host: Option<String>) {
        if let Some(url) = nats_uri.filter(|u| !u.is_empty()) {
            debug!("NATS url overridden from environment");
            self.nats.url = url;
        }
        if let Some(hosts) = etcd_host.filter(|h| !h.is_empty()) {
            debug!("Etcd hosts overridden from environment");
            let host = hosts.split(',').map(|h| h.trim().to_string()).collect();
            match &mut self.etcd {
                Some(etcd) => etcd.host = host,
                None => {
                    self.etcd = Some(Etcd {
                        host,
                        ..Default::default()
                    })
                }
            }
        }
    }

    /// Store settings from the file, or else asked for over the bus.
    pub async fn resolve_etcd(&self, bus: &dyn EventBus) -> CoordinatorResult<Etcd> {
        if let Some(etcd) = &self.etcd {
            return Ok(etcd.clone());
        }

        info!("No etcd settings configured, requesting {ETCD_CONFIG_SUBJECT}");
        let reply = bus
            .request(ETCD_CONFIG_SUBJECT, Bytes::new(), ETCD_CONFIG_TIMEOUT)
            .await?;
        let etcd: Etcd = serde_json::from_slice(&reply)?;
        etcd.validate()
            .map_err(|e| CoordinatorError::Configuration(e.to_string()))?;
        Ok(etcd)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Nats {
    #[validate(length(min = 1))]
    pub url: String,
}

impl Default for Nats {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
        }
    }
}

#[derive(Clone, Default, Debug, Serialize, Deserialize, Validate)]
pub struct Etcd {
    #[validate(length(min = 1))]
    pub host: Vec<String>,
    #[serde(default)]
    pub prefix: String,
    pub timeout: Option<u32>,
    pub connect_timeout: Option<u32>,
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Log {
    pub path: String,
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "Log::default_level")]
    pub level: String,
}

impl Log {
    fn default_level() -> String {
        "info".to_string()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Prometheus {
    pub address: SocketAddr,
}

/// Subjects wiring one verb (create, delete, ...) to the handlers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
pub struct Flow {
    #[validate(length(min = 1))]
    pub verb: String,
    /// Inbound requests; terminal replies go to `<request_subject>.done|.error`
    #[validate(length(min = 1))]
    pub request_subject: String,
    /// Per-router events for the provisioning workers
    #[validate(length(min = 1))]
    pub dispatch_subject: String,
    #[validate(length(min = 1))]
    pub completion_subject: String,
    #[validate(length(min = 1))]
    pub failure_subject: String,
    /// Aggregate outcome goes to `<response_prefix>done|error`
    #[validate(length(min = 1))]
    pub response_prefix: String,
}

impl Flow {
    pub fn for_verb(verb: &str) -> Self {
        Self {
            verb: verb.to_string(),
            request_subject: format!("routers.{verb}"),
            dispatch_subject: format!("router.{verb}"),
            completion_subject: format!("router.{verb}.done"),
            failure_subject: format!("router.{verb}.error"),
            response_prefix: format!("routers.{verb}."),
        }
    }
}
