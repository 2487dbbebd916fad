//! Services and their materialized endpoints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::pod::Protocol;
use super::IntOrString;
use crate::meta::{ListMeta, ObjectMeta};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Virtual port the service is reachable on.
    #[serde(default)]
    pub port: i32,

    #[serde(default)]
    pub protocol: Protocol,

    /// Pods carrying these labels back the service. Must be non-empty.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,

    /// Port on the backing pods, by number or by port name. Defaults to
    /// `port`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_port: Option<IntOrString>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub create_external_load_balancer: bool,

    /// Stable virtual IP assigned from the configured pool on create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portal_ip: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: ServiceSpec,

    #[serde(default)]
    pub status: ServiceStatus,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServiceList {
    #[serde(default)]
    pub metadata: ListMeta,

    #[serde(default)]
    pub items: Vec<Service>,
}

/// `host:port` strings backing one service, maintained by the endpoints
/// reconciler.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Endpoints {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EndpointsList {
    #[serde(default)]
    pub metadata: ListMeta,

    #[serde(default)]
    pub items: Vec<Endpoints>,
}
