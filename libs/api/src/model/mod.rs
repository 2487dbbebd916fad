//! Canonical in-memory object model.
//!
//! These types mirror the newer (`v1`) wire shape; the codec serializes them
//! directly for `v1` and converts through [`crate::v1alpha1`] for the older
//! flat representation. Every kind implements [`Object`] by hand; there is
//! no reflection anywhere in the dispatch path.

mod controller;
mod event;
mod node;
mod pod;
mod service;

pub use controller::{
    ReplicationController, ReplicationControllerList, ReplicationControllerSpec,
    ReplicationControllerStatus,
};
pub use event::{Event, EventList, ObjectReference};
pub use node::{Node, NodeList, NodePhase, NodeSpec, NodeStatus, RESOURCE_CPU, RESOURCE_MEMORY};
pub use pod::{
    Binding, Container, ContainerManifest, ContainerManifestList, ContainerState,
    ContainerStateRunning, ContainerStateTerminated, ContainerStateWaiting, ContainerStatus,
    EmptyDir, EnvVar, ExecAction, Handler, HostDir, HttpGetAction, Lifecycle, LivenessProbe, Pod,
    PodList,
    PodPhase, PodSpec, PodStatus, PodTemplateSpec, Port, Protocol, PullPolicy, RestartPolicy,
    TcpSocketAction, Volume, VolumeMount, VolumeSource,
};
pub use service::{Endpoints, EndpointsList, Service, ServiceList, ServiceSpec, ServiceStatus};

use serde::{Deserialize, Serialize};

use crate::meta::{ListMeta, Object, ObjectMeta};
use crate::status::Status;

/// A value that may be written as an integer or as a string, e.g. a target
/// port referenced by number or by name.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum IntOrString {
    Int(i32),
    String(String),
}

impl Default for IntOrString {
    fn default() -> Self {
        IntOrString::Int(0)
    }
}

/// Handle for polling a long-running request.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(default)]
    pub metadata: ObjectMeta,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OperationList {
    #[serde(default)]
    pub metadata: ListMeta,
    #[serde(default)]
    pub items: Vec<Operation>,
}

macro_rules! impl_object {
    ($type:ty, $kind:literal) => {
        impl Object for $type {
            fn kind(&self) -> &'static str {
                $kind
            }

            fn metadata(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn metadata_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

impl_object!(Pod, "Pod");
impl_object!(ReplicationController, "ReplicationController");
impl_object!(Service, "Service");
impl_object!(Endpoints, "Endpoints");
impl_object!(Node, "Node");
impl_object!(Binding, "Binding");
impl_object!(Event, "Event");
impl_object!(ContainerManifestList, "ContainerManifestList");
impl_object!(Operation, "Operation");

/// Tagged union over every kind the codec can carry, including list kinds
/// and the `Status` envelope. The tag is `(apiVersion, kind)` on the wire;
/// the codec performs the branch once at decode time.
#[derive(Clone, Debug, PartialEq)]
pub enum ApiObject {
    Pod(Pod),
    PodList(PodList),
    ReplicationController(ReplicationController),
    ReplicationControllerList(ReplicationControllerList),
    Service(Service),
    ServiceList(ServiceList),
    Endpoints(Endpoints),
    EndpointsList(EndpointsList),
    Node(Node),
    NodeList(NodeList),
    Binding(Binding),
    Event(Event),
    EventList(EventList),
    ContainerManifestList(ContainerManifestList),
    Operation(Operation),
    OperationList(OperationList),
    Status(Status),
}

macro_rules! api_object_dispatch {
    ($self:ident, $obj:ident => $single:expr, $list:ident => $on_list:expr, $status:ident => $on_status:expr) => {
        match $self {
            ApiObject::Pod($obj) => $single,
            ApiObject::ReplicationController($obj) => $single,
            ApiObject::Service($obj) => $single,
            ApiObject::Endpoints($obj) => $single,
            ApiObject::Node($obj) => $single,
            ApiObject::Binding($obj) => $single,
            ApiObject::Event($obj) => $single,
            ApiObject::ContainerManifestList($obj) => $single,
            ApiObject::Operation($obj) => $single,
            ApiObject::PodList($list) => $on_list,
            ApiObject::ReplicationControllerList($list) => $on_list,
            ApiObject::ServiceList($list) => $on_list,
            ApiObject::EndpointsList($list) => $on_list,
            ApiObject::NodeList($list) => $on_list,
            ApiObject::EventList($list) => $on_list,
            ApiObject::OperationList($list) => $on_list,
            ApiObject::Status($status) => $on_status,
        }
    };
}

impl ApiObject {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiObject::Pod(_) => "Pod",
            ApiObject::PodList(_) => "PodList",
            ApiObject::ReplicationController(_) => "ReplicationController",
            ApiObject::ReplicationControllerList(_) => "ReplicationControllerList",
            ApiObject::Service(_) => "Service",
            ApiObject::ServiceList(_) => "ServiceList",
            ApiObject::Endpoints(_) => "Endpoints",
            ApiObject::EndpointsList(_) => "EndpointsList",
            ApiObject::Node(_) => "Node",
            ApiObject::NodeList(_) => "NodeList",
            ApiObject::Binding(_) => "Binding",
            ApiObject::Event(_) => "Event",
            ApiObject::EventList(_) => "EventList",
            ApiObject::ContainerManifestList(_) => "ContainerManifestList",
            ApiObject::Operation(_) => "Operation",
            ApiObject::OperationList(_) => "OperationList",
            ApiObject::Status(_) => "Status",
        }
    }

    /// Object metadata when the variant carries it (lists and `Status` do
    /// not).
    pub fn object_meta(&self) -> Option<&ObjectMeta> {
        api_object_dispatch!(self, o => Some(o.metadata()), _l => None, _s => None)
    }

    pub fn object_meta_mut(&mut self) -> Option<&mut ObjectMeta> {
        api_object_dispatch!(self, o => Some(o.metadata_mut()), _l => None, _s => None)
    }

    /// Labels used by watch filters; empty for kinds without metadata.
    pub fn labels(&self) -> std::collections::BTreeMap<String, String> {
        self.object_meta().map(|m| m.labels.clone()).unwrap_or_default()
    }
}

macro_rules! impl_api_object_from {
    ($type:ident) => {
        impl From<$type> for ApiObject {
            fn from(obj: $type) -> ApiObject {
                ApiObject::$type(obj)
            }
        }

        impl TryFrom<ApiObject> for $type {
            type Error = crate::error::Error;

            fn try_from(obj: ApiObject) -> crate::error::Result<$type> {
                match obj {
                    ApiObject::$type(inner) => Ok(inner),
                    other => Err(crate::error::Error::Decode(format!(
                        "expected {}, got {}",
                        stringify!($type),
                        other.kind()
                    ))),
                }
            }
        }
    };
}

impl_api_object_from!(Pod);
impl_api_object_from!(PodList);
impl_api_object_from!(ReplicationController);
impl_api_object_from!(ReplicationControllerList);
impl_api_object_from!(Service);
impl_api_object_from!(ServiceList);
impl_api_object_from!(Endpoints);
impl_api_object_from!(EndpointsList);
impl_api_object_from!(Node);
impl_api_object_from!(NodeList);
impl_api_object_from!(Binding);
impl_api_object_from!(Event);
impl_api_object_from!(EventList);
impl_api_object_from!(ContainerManifestList);
impl_api_object_from!(Operation);
impl_api_object_from!(OperationList);

impl From<Status> for ApiObject {
    fn from(status: Status) -> ApiObject {
        ApiObject::Status(status)
    }
}

impl TryFrom<ApiObject> for Status {
    type Error = crate::error::Error;

    fn try_from(obj: ApiObject) -> crate::error::Result<Status> {
        match obj {
            ApiObject::Status(status) => Ok(status),
            other => Err(crate::error::Error::Decode(format!(
                "expected Status, got {}",
                other.kind()
            ))),
        }
    }
}
