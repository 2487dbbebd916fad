//! Per-kind storage wrappers enforcing the invariants the raw store cannot.

pub mod controller;
pub mod event;
pub mod minion;
pub mod pod;
pub mod service;

pub use controller::ControllerRegistry;
pub use event::EventRegistry;
pub use minion::{HealthyMinionRegistry, MinionRegistry};
pub use pod::{BindingHandler, PodRegistry};
pub use service::{EndpointsRegistry, PortalIpPool, ServiceRegistry};

use jiff::Timestamp;
use rand::Rng;
use uuid::Uuid;

use regatta_api::error::{FieldError, FieldErrorKind};
use regatta_api::meta::ObjectMeta;
use regatta_api::{Error, Object, Result};
use regatta_store::{Store, StoredObject};

/// Persisted key layout under `/registry`.
pub mod keys {
    pub const PODS: &str = "/registry/pods";
    pub const CONTROLLERS: &str = "/registry/controllers";
    pub const SERVICE_SPECS: &str = "/registry/services/specs";
    pub const SERVICE_ENDPOINTS: &str = "/registry/services/endpoints";
    pub const MINIONS: &str = "/registry/minions";
    pub const EVENTS: &str = "/registry/events";
    pub const ELECTIONS: &str = "/registry/elections";

    pub fn pod(name: &str) -> String {
        format!("{PODS}/{name}")
    }

    pub fn controller(name: &str) -> String {
        format!("{CONTROLLERS}/{name}")
    }

    pub fn service_spec(name: &str) -> String {
        format!("{SERVICE_SPECS}/{name}")
    }

    pub fn service_endpoints(name: &str) -> String {
        format!("{SERVICE_ENDPOINTS}/{name}")
    }

    pub fn minion(name: &str) -> String {
        format!("{MINIONS}/{name}")
    }

    pub fn event(source: &str, sequence: u64) -> String {
        format!("{EVENTS}/{source}/{sequence}")
    }

    pub fn election(name: &str) -> String {
        format!("{ELECTIONS}/{name}")
    }

    /// Per-host bound-pod manifest list consumed by the node agent.
    pub fn host_manifests(host: &str) -> String {
        format!("/registry/hosts/{host}/kubelet")
    }
}

const GENERATE_NAME_RETRIES: usize = 5;
const GENERATED_SUFFIX_LEN: usize = 5;

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..GENERATED_SUFFIX_LEN)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect()
}

/// Server-side metadata on create: UID, creation timestamp, defaulted
/// namespace. The object must not claim a resource version, and a namespace
/// it does claim must agree with the request's.
pub(crate) fn prepare_for_create(
    meta: &mut ObjectMeta,
    kind: &str,
    namespace: &str,
) -> Result<()> {
    let mut errors = Vec::new();
    if meta.resource_version.is_some() {
        errors.push(FieldError::new(
            FieldErrorKind::Invalid,
            "metadata.resourceVersion",
            "must be empty on create",
        ));
    }
    match meta.namespace.as_deref() {
        None | Some("") => meta.namespace = Some(namespace.to_string()),
        Some(ns) if ns != namespace => errors.push(FieldError::invalid(
            "metadata.namespace",
            format!("{ns:?} does not match the request namespace {namespace:?}"),
        )),
        _ => {}
    }
    if !errors.is_empty() {
        return Err(Error::invalid(kind, meta.name_str(), errors));
    }
    meta.uid = Some(Uuid::new_v4().to_string());
    meta.creation_timestamp = Some(Timestamp::now());
    Ok(())
}

/// Create under `key_for(name)`, appending a random suffix and retrying a
/// bounded number of times when the client asked for a generated name.
pub(crate) async fn create_with_generated_name<T, F>(
    store: &Store,
    obj: &T,
    key_for: F,
) -> Result<T>
where
    T: StoredObject,
    F: Fn(&str) -> String,
{
    let meta = obj.metadata();
    let generate = meta.name_str().is_empty() && meta.generate_name.is_some();
    if !generate {
        return store.create_object(&key_for(obj.name()), obj).await;
    }

    let prefix = meta.generate_name.clone().unwrap_or_default();
    let mut last_err = None;
    for _ in 0..GENERATE_NAME_RETRIES {
        let name = format!("{prefix}{}", random_suffix());
        let mut candidate = obj.clone();
        candidate.metadata_mut().name = Some(name.clone());
        match store.create_object(&key_for(&name), &candidate).await {
            Ok(stored) => return Ok(stored),
            Err(err) if err.is_already_exists() => last_err = Some(err),
            Err(err) => return Err(err),
        }
    }
    Err(last_err.unwrap_or_else(|| Error::already_exists(obj.kind(), &prefix)))
}
