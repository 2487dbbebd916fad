//! Metadata carried by every persisted object.

use std::collections::BTreeMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// Kind and version of an object as it appears on the wire.
///
/// Servers infer both from the endpoint a request addresses; the codec fills
/// them in on encode and strips them on decode.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
}

/// Metadata all persisted resources must have.
///
/// `name` is unique within a namespace; `uid` is server-assigned and unique
/// in time and space; `resource_version` is the opaque, totally ordered
/// version string handed out by the store and used for optimistic
/// concurrency and watch resume.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Optional prefix used by the server to generate a unique name when
    /// `name` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<Timestamp>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,

    /// Queryable key/value organization of objects.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Opaque key/value data stored with the object.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Name, or empty string when unset.
    pub fn name_str(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    /// Namespace, defaulted to `"default"` when unset.
    pub fn namespace_or_default(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }
}

pub const DEFAULT_NAMESPACE: &str = "default";

/// Metadata for list responses.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
}

/// Uniform metadata access over every concrete kind.
///
/// Implemented by hand for each type so that the codec and the registries
/// never need reflection to reach a name or resource version.
pub trait Object {
    fn kind(&self) -> &'static str;
    fn metadata(&self) -> &ObjectMeta;
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    fn name(&self) -> &str {
        self.metadata().name_str()
    }

    fn namespace(&self) -> &str {
        self.metadata().namespace_or_default()
    }

    fn uid(&self) -> Option<&str> {
        self.metadata().uid.as_deref()
    }

    fn resource_version(&self) -> Option<&str> {
        self.metadata().resource_version.as_deref()
    }

    fn labels(&self) -> &BTreeMap<String, String> {
        &self.metadata().labels
    }

    fn set_resource_version(&mut self, version: String) {
        self.metadata_mut().resource_version = Some(version);
    }

    fn set_self_link(&mut self, link: String) {
        self.metadata_mut().self_link = Some(link);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_namespace_defaulting() {
        let meta = ObjectMeta::default();
        assert_eq!(meta.namespace_or_default(), "default");

        let meta = ObjectMeta {
            namespace: Some("kube-system".to_string()),
            ..ObjectMeta::default()
        };
        assert_eq!(meta.namespace_or_default(), "kube-system");
    }

    #[test]
    fn test_empty_fields_are_not_serialized() {
        let meta = ObjectMeta {
            name: Some("p1".to_string()),
            ..ObjectMeta::default()
        };
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value, serde_json::json!({"name": "p1"}));
    }
}
