//! Versioned wire codec.
//!
//! The codec is the single place where `(apiVersion, kind)` is mapped to a
//! concrete type: [`decode`] reads the pair out of the blob and branches
//! once, [`encode`] renders a canonical object for the requested version.
//! The kind table is process-wide and immutable.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::{self, ApiObject};
use crate::status::Status;
use crate::v1alpha1::{self, convert};

pub const V1: &str = "v1";
pub const V1ALPHA1: &str = "v1alpha1";
pub const LATEST_VERSION: &str = V1;
pub const SUPPORTED_VERSIONS: [&str; 2] = [V1, V1ALPHA1];

pub fn is_supported_version(version: &str) -> bool {
    SUPPORTED_VERSIONS.contains(&version)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypeMetaProbe {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    api_version: String,
}

/// Report the `(kind, apiVersion)` of a serialized blob without a full
/// decode.
pub fn recognize(data: &[u8]) -> Result<(String, String)> {
    let probe: TypeMetaProbe = serde_json::from_slice(data)
        .map_err(|e| Error::Decode(format!("malformed object: {e}")))?;
    Ok((probe.kind, probe.api_version))
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::Decode(format!("decode error: {e}")))
}

fn to_value<T: Serialize>(obj: &T) -> Result<Value> {
    serde_json::to_value(obj).map_err(|e| Error::Serialization("encode error".to_string(), e))
}

/// Decode a byte sequence into a canonical object. The wire version is read
/// from the blob itself; an empty `apiVersion` is treated as the latest.
pub fn decode(data: &[u8]) -> Result<ApiObject> {
    let value: Value = serde_json::from_slice(data)
        .map_err(|e| Error::Decode(format!("malformed object: {e}")))?;
    decode_value(value)
}

pub fn decode_value(value: Value) -> Result<ApiObject> {
    let kind = value
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let version = value
        .get("apiVersion")
        .and_then(Value::as_str)
        .unwrap_or(LATEST_VERSION)
        .to_string();
    if kind.is_empty() {
        return Err(Error::Decode("object has no kind".to_string()));
    }
    match version.as_str() {
        V1 => decode_v1(&kind, value),
        V1ALPHA1 => decode_v1alpha1(&kind, value),
        _ => Err(Error::NotSupported(format!(
            "api version {version:?} is not supported",
        ))),
    }
}

fn decode_v1(kind: &str, value: Value) -> Result<ApiObject> {
    Ok(match kind {
        "Pod" => ApiObject::Pod(from_value(value)?),
        "PodList" => ApiObject::PodList(from_value(value)?),
        "ReplicationController" => ApiObject::ReplicationController(from_value(value)?),
        "ReplicationControllerList" => ApiObject::ReplicationControllerList(from_value(value)?),
        "Service" => ApiObject::Service(from_value(value)?),
        "ServiceList" => ApiObject::ServiceList(from_value(value)?),
        "Endpoints" => ApiObject::Endpoints(from_value(value)?),
        "EndpointsList" => ApiObject::EndpointsList(from_value(value)?),
        "Node" => ApiObject::Node(from_value(value)?),
        "NodeList" => ApiObject::NodeList(from_value(value)?),
        "Binding" => ApiObject::Binding(from_value(value)?),
        "Event" => ApiObject::Event(from_value(value)?),
        "EventList" => ApiObject::EventList(from_value(value)?),
        "ContainerManifestList" => ApiObject::ContainerManifestList(from_value(value)?),
        "Operation" => ApiObject::Operation(from_value(value)?),
        "OperationList" => ApiObject::OperationList(from_value(value)?),
        "Status" => ApiObject::Status(from_value::<Status>(value)?),
        _ => return Err(Error::NotRecognized(kind.to_string())),
    })
}

fn decode_v1alpha1(kind: &str, value: Value) -> Result<ApiObject> {
    Ok(match kind {
        "Pod" => ApiObject::Pod(convert::pod_from_old(&from_value::<v1alpha1::Pod>(value)?)),
        "PodList" => ApiObject::PodList(convert::pod_list_from_old(&from_value(value)?)),
        "ReplicationController" => {
            ApiObject::ReplicationController(convert::controller_from_old(&from_value(value)?))
        }
        "ReplicationControllerList" => ApiObject::ReplicationControllerList(
            convert::controller_list_from_old(&from_value(value)?),
        ),
        "Service" => ApiObject::Service(convert::service_from_old(&from_value(value)?)),
        "ServiceList" => ApiObject::ServiceList(convert::service_list_from_old(&from_value(value)?)),
        "Endpoints" => ApiObject::Endpoints(convert::endpoints_from_old(&from_value(value)?)),
        "EndpointsList" => {
            ApiObject::EndpointsList(convert::endpoints_list_from_old(&from_value(value)?))
        }
        "Minion" => ApiObject::Node(convert::node_from_old(&from_value(value)?)),
        "MinionList" => ApiObject::NodeList(convert::node_list_from_old(&from_value(value)?)),
        "Binding" => ApiObject::Binding(convert::binding_from_old(&from_value(value)?)),
        "Event" => ApiObject::Event(convert::event_from_old(&from_value(value)?)),
        "EventList" => ApiObject::EventList(convert::event_list_from_old(&from_value(value)?)),
        "ContainerManifestList" => {
            ApiObject::ContainerManifestList(convert::manifest_list_from_old(&from_value(value)?))
        }
        "Operation" => ApiObject::Operation(from_value(value)?),
        "OperationList" => ApiObject::OperationList(from_value(value)?),
        "Status" => ApiObject::Status(from_value::<Status>(value)?),
        _ => return Err(Error::NotRecognized(kind.to_string())),
    })
}

/// Wire kind name for an object in a given version: `Node` is `Minion` on
/// the old wire.
fn wire_kind(obj: &ApiObject, version: &str) -> &'static str {
    if version == V1ALPHA1 {
        match obj {
            ApiObject::Node(_) => return "Minion",
            ApiObject::NodeList(_) => return "MinionList",
            _ => {}
        }
    }
    obj.kind()
}

/// Encode a canonical object for a wire version as a JSON value with `kind`
/// and `apiVersion` stamped in.
pub fn encode_value(obj: &ApiObject, version: &str) -> Result<Value> {
    let mut value = match version {
        V1 => match obj {
            ApiObject::Pod(o) => to_value(o)?,
            ApiObject::PodList(o) => to_value(o)?,
            ApiObject::ReplicationController(o) => to_value(o)?,
            ApiObject::ReplicationControllerList(o) => to_value(o)?,
            ApiObject::Service(o) => to_value(o)?,
            ApiObject::ServiceList(o) => to_value(o)?,
            ApiObject::Endpoints(o) => to_value(o)?,
            ApiObject::EndpointsList(o) => to_value(o)?,
            ApiObject::Node(o) => to_value(o)?,
            ApiObject::NodeList(o) => to_value(o)?,
            ApiObject::Binding(o) => to_value(o)?,
            ApiObject::Event(o) => to_value(o)?,
            ApiObject::EventList(o) => to_value(o)?,
            ApiObject::ContainerManifestList(o) => to_value(o)?,
            ApiObject::Operation(o) => to_value(o)?,
            ApiObject::OperationList(o) => to_value(o)?,
            ApiObject::Status(o) => to_value(o)?,
        },
        V1ALPHA1 => match obj {
            ApiObject::Pod(o) => to_value(&convert::pod_to_old(o)?)?,
            ApiObject::PodList(o) => to_value(&convert::pod_list_to_old(o)?)?,
            ApiObject::ReplicationController(o) => to_value(&convert::controller_to_old(o)?)?,
            ApiObject::ReplicationControllerList(o) => {
                to_value(&convert::controller_list_to_old(o)?)?
            }
            ApiObject::Service(o) => to_value(&convert::service_to_old(o)?)?,
            ApiObject::ServiceList(o) => to_value(&convert::service_list_to_old(o)?)?,
            ApiObject::Endpoints(o) => to_value(&convert::endpoints_to_old(o)?)?,
            ApiObject::EndpointsList(o) => to_value(&convert::endpoints_list_to_old(o)?)?,
            ApiObject::Node(o) => to_value(&convert::node_to_old(o)?)?,
            ApiObject::NodeList(o) => to_value(&convert::node_list_to_old(o)?)?,
            ApiObject::Binding(o) => to_value(&convert::binding_to_old(o)?)?,
            ApiObject::Event(o) => to_value(&convert::event_to_old(o)?)?,
            ApiObject::EventList(o) => to_value(&convert::event_list_to_old(o)?)?,
            ApiObject::ContainerManifestList(o) => to_value(&convert::manifest_list_to_old(o)?)?,
            ApiObject::Operation(o) => to_value(o)?,
            ApiObject::OperationList(o) => to_value(o)?,
            ApiObject::Status(o) => to_value(o)?,
        },
        _ => {
            return Err(Error::NotSupported(format!(
                "api version {version:?} is not supported",
            )))
        }
    };

    if let Value::Object(map) = &mut value {
        map.insert("kind".to_string(), Value::from(wire_kind(obj, version)));
        map.insert("apiVersion".to_string(), Value::from(version));
    }
    Ok(value)
}

/// Encode a canonical object into bytes for a wire version.
pub fn encode(obj: &ApiObject, version: &str) -> Result<Vec<u8>> {
    let value = encode_value(obj, version)?;
    serde_json::to_vec(&value).map_err(|e| Error::Serialization("encode error".to_string(), e))
}

/// Decode directly into a concrete kind, used by the typed store adapter
/// where the expected type is known from the key space.
pub fn decode_into<T>(data: &[u8]) -> Result<T>
where
    T: TryFrom<ApiObject, Error = Error>,
{
    T::try_from(decode(data)?)
}

/// Encode a concrete kind at the latest version, the storage
/// representation.
pub fn encode_latest<T>(obj: T) -> Result<Vec<u8>>
where
    T: Into<ApiObject>,
{
    encode(&obj.into(), LATEST_VERSION)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::meta::ObjectMeta;
    use crate::model::{Container, Pod, PodSpec, Service, ServiceSpec};
    use crate::quantity::Quantity;

    fn sample_pod() -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("p1".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("u-1".to_string()),
                resource_version: Some("3".to_string()),
                labels: [("app".to_string(), "web".to_string())].into(),
                ..ObjectMeta::default()
            },
            spec: PodSpec {
                containers: vec![Container {
                    name: "c".to_string(),
                    image: "i".to_string(),
                    cpu: Some(Quantity::from_milli(100)),
                    ..Container::default()
                }],
                ..PodSpec::default()
            },
            ..Pod::default()
        }
    }

    #[test]
    fn test_round_trip_v1() {
        let pod = sample_pod();
        let data = encode(&ApiObject::Pod(pod.clone()), V1).unwrap();
        let decoded = decode(&data).unwrap();
        assert_eq!(decoded, ApiObject::Pod(pod));
    }

    #[test]
    fn test_round_trip_v1alpha1() {
        let pod = sample_pod();
        let data = encode(&ApiObject::Pod(pod.clone()), V1ALPHA1).unwrap();
        let (kind, version) = recognize(&data).unwrap();
        assert_eq!(kind, "Pod");
        assert_eq!(version, "v1alpha1");

        let decoded: Pod = decode_into(&data).unwrap();
        assert_eq!(decoded.metadata.name, pod.metadata.name);
        assert_eq!(decoded.spec.containers, pod.spec.containers);
    }

    #[test]
    fn test_minion_kind_on_old_wire() {
        let node = crate::model::Node {
            metadata: ObjectMeta {
                name: Some("n1".to_string()),
                ..ObjectMeta::default()
            },
            ..crate::model::Node::default()
        };
        let data = encode(&ApiObject::Node(node), V1ALPHA1).unwrap();
        let (kind, _) = recognize(&data).unwrap();
        assert_eq!(kind, "Minion");

        let decoded = decode(&data).unwrap();
        assert_eq!(decoded.kind(), "Node");
        assert_eq!(decoded.object_meta().unwrap().name_str(), "n1");
    }

    #[test]
    fn test_unknown_kind_is_not_recognized() {
        let err = decode(br#"{"kind":"Gizmo","apiVersion":"v1"}"#).unwrap_err();
        assert!(matches!(err, Error::NotRecognized(_)), "{err:?}");
    }

    #[test]
    fn test_unknown_version_is_not_supported() {
        let err = decode(br#"{"kind":"Pod","apiVersion":"v9"}"#).unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)), "{err:?}");

        let pod = sample_pod();
        let err = encode(&ApiObject::Pod(pod), "v9").unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)), "{err:?}");
    }

    #[test]
    fn test_missing_kind_is_a_decode_error() {
        let err = decode(br#"{"apiVersion":"v1"}"#).unwrap_err();
        assert!(matches!(err, Error::Decode(_)), "{err:?}");
    }

    #[test]
    fn test_service_round_trip_both_versions() {
        let svc = Service {
            metadata: ObjectMeta {
                name: Some("s1".to_string()),
                ..ObjectMeta::default()
            },
            spec: ServiceSpec {
                port: 80,
                selector: [("app".to_string(), "web".to_string())].into(),
                portal_ip: Some("10.0.0.7".to_string()),
                ..ServiceSpec::default()
            },
            ..Service::default()
        };
        for version in SUPPORTED_VERSIONS {
            let data = encode(&ApiObject::Service(svc.clone()), version).unwrap();
            let decoded: Service = decode_into(&data).unwrap();
            assert_eq!(decoded, svc, "round trip through {version}");
        }
    }
}
