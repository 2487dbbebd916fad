//! Replication controllers: a desired count of identical pods selected by
//! labels.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::pod::PodTemplateSpec;
use crate::meta::{ListMeta, ObjectMeta};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationControllerSpec {
    #[serde(default)]
    pub replicas: i32,

    /// Pods carrying these labels are counted toward `replicas`. Must be
    /// non-empty.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PodTemplateSpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationControllerStatus {
    /// Most recently observed count of matching active pods.
    #[serde(default)]
    pub replicas: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationController {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: ReplicationControllerSpec,

    #[serde(default)]
    pub status: ReplicationControllerStatus,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationControllerList {
    #[serde(default)]
    pub metadata: ListMeta,

    #[serde(default)]
    pub items: Vec<ReplicationController>,
}
