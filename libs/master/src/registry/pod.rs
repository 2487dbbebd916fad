//! Pod storage: creation, deletion and binding keep the pod object and the
//! per-host manifest list in agreement.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use regatta_api::labels::Selector;
use regatta_api::meta::ListMeta;
use regatta_api::model::{
    ApiObject, Binding, ContainerManifest, ContainerManifestList, Pod, PodList, PodPhase,
};
use regatta_api::validation::{default_pod_spec, validate_binding, validate_pod};
use regatta_api::{Error, Object, Result};
use regatta_store::{watch_prefix, Store, Watcher};

use super::{create_with_generated_name, keys, prepare_for_create};
use crate::rest::{RequestContext, RestHandler, WatchStream};

const KIND: &str = "Pod";

#[derive(Clone)]
pub struct PodRegistry {
    store: Store,
}

impl PodRegistry {
    pub fn new(store: Store) -> PodRegistry {
        PodRegistry { store }
    }

    pub async fn list_pods(&self, label: &Selector, field: &Selector) -> Result<PodList> {
        let (pods, index): (Vec<Pod>, u64) = self.store.extract_list(keys::PODS).await?;
        let items = pods
            .into_iter()
            .filter(|p| label.matches(&p.metadata.labels) && field.matches(&p.field_set()))
            .collect();
        Ok(PodList {
            metadata: ListMeta {
                resource_version: Some(index.to_string()),
                ..ListMeta::default()
            },
            items,
        })
    }

    pub async fn get_pod(&self, name: &str) -> Result<Pod> {
        self.store
            .get_object(&keys::pod(name), false)
            .await?
            .ok_or_else(|| Error::not_found(KIND, name))
    }

    pub async fn create_pod(&self, ctx: &RequestContext, mut pod: Pod) -> Result<Pod> {
        default_pod_spec(&mut pod.spec);
        let errors = validate_pod(&pod);
        if !errors.is_empty() {
            return Err(Error::invalid(KIND, pod.metadata.name_str(), errors));
        }
        prepare_for_create(&mut pod.metadata, KIND, &ctx.namespace)?;
        pod.status = Default::default();
        pod.status.phase = PodPhase::Pending;
        pod.status.host = pod.spec.host.clone();

        let stored = create_with_generated_name(&self.store, &pod, keys::pod).await?;

        // A pod created already bound lands on the host's manifest list in
        // the same request; the pod rolls back if the append fails.
        if let Some(host) = stored.spec.host.clone() {
            if let Err(err) = self.append_manifest(&host, &stored).await {
                warn!(msg = "rolling back pod create after manifest append failure",
                      name = %stored.name(), %host, error = %err);
                if let Err(rollback) = self.store.delete(&keys::pod(stored.name()), false).await {
                    warn!(msg = "pod create rollback failed", name = %stored.name(), error = %rollback);
                }
                return Err(err);
            }
        }
        info!(msg = "created pod", name = %stored.name());
        Ok(stored)
    }

    pub async fn update_pod(&self, pod: Pod) -> Result<Pod> {
        let errors = validate_pod(&pod);
        if !errors.is_empty() {
            return Err(Error::invalid(KIND, pod.metadata.name_str(), errors));
        }
        if pod.metadata.resource_version.is_none() {
            return Err(Error::invalid(
                KIND,
                pod.metadata.name_str(),
                vec![regatta_api::error::FieldError::required(
                    "metadata.resourceVersion",
                )],
            ));
        }
        self.store.set_object(&keys::pod(pod.name()), &pod).await
    }

    /// Delete the pod and, when it is bound, its entry on the host's
    /// manifest list. The manifest entry comes off first; if the pod
    /// delete then fails the entry is restored, so either both writes land
    /// or neither does.
    pub async fn delete_pod(&self, name: &str) -> Result<()> {
        let pod = self.get_pod(name).await?;
        match pod.spec.host.clone() {
            Some(host) if !host.is_empty() => {
                self.remove_manifest(&host, name).await?;
                if let Err(err) = self.store.delete(&keys::pod(name), false).await {
                    warn!(msg = "restoring manifest after pod delete failure",
                          %name, %host, error = %err);
                    if let Err(rollback) = self.append_manifest(&host, &pod).await {
                        warn!(msg = "manifest restore failed", %name, %host,
                              error = %rollback);
                    }
                    return Err(err);
                }
            }
            _ => self.store.delete(&keys::pod(name), false).await?,
        }
        info!(msg = "deleted pod", %name);
        Ok(())
    }

    /// Consume a binding: compare-and-swap the pod onto the host, then
    /// append its manifest to the host's list. If the append fails the pod
    /// assignment is undone, so either both writes land or neither does.
    pub async fn bind(&self, binding: &Binding) -> Result<()> {
        let errors = validate_binding(binding);
        if !errors.is_empty() {
            return Err(Error::invalid("Binding", &binding.pod_id, errors));
        }

        let pod = self.get_pod(&binding.pod_id).await?;
        if let Some(current) = pod.spec.host.as_deref() {
            if !current.is_empty() {
                return Err(Error::conflict(
                    KIND,
                    &binding.pod_id,
                    format!("pod is already bound to {current:?}"),
                ));
            }
        }

        let mut bound = pod;
        bound.spec.host = Some(binding.host.clone());
        bound.status.host = Some(binding.host.clone());
        bound.status.phase = PodPhase::Pending;
        let stored = self
            .store
            .set_object(&keys::pod(&binding.pod_id), &bound)
            .await?;

        if let Err(err) = self.append_manifest(&binding.host, &stored).await {
            warn!(msg = "undoing pod assignment after manifest append failure",
                  pod = %binding.pod_id, host = %binding.host, error = %err);
            let unbind = self
                .store
                .atomic_update::<Pod, _>(&keys::pod(&binding.pod_id), |current| {
                    let mut pod = current
                        .ok_or_else(|| Error::not_found(KIND, &binding.pod_id))?;
                    if pod.spec.host.as_deref() == Some(binding.host.as_str()) {
                        pod.spec.host = None;
                        pod.status.host = None;
                    }
                    Ok(pod)
                })
                .await;
            if let Err(rollback) = unbind {
                warn!(msg = "binding rollback failed", pod = %binding.pod_id, error = %rollback);
            }
            return Err(err);
        }
        info!(msg = "bound pod", pod = %binding.pod_id, host = %binding.host);
        Ok(())
    }

    pub async fn watch_pods(
        &self,
        label: Selector,
        field: Selector,
        from_version: u64,
    ) -> Result<Watcher<Pod>> {
        watch_prefix(
            self.store.backend(),
            keys::PODS,
            from_version,
            move |pod: &Pod| label.matches(&pod.metadata.labels) && field.matches(&pod.field_set()),
        )
        .await
    }

    async fn append_manifest(&self, host: &str, pod: &Pod) -> Result<()> {
        let manifest = ContainerManifest::from_pod(pod);
        self.store
            .atomic_update::<ContainerManifestList, _>(&keys::host_manifests(host), |current| {
                let mut list = current.unwrap_or_default();
                if !list.items.iter().any(|m| m.id == manifest.id) {
                    list.items.push(manifest.clone());
                }
                Ok(list)
            })
            .await?;
        Ok(())
    }

    async fn remove_manifest(&self, host: &str, pod_name: &str) -> Result<()> {
        debug!(msg = "removing manifest", %pod_name, %host);
        self.store
            .atomic_update::<ContainerManifestList, _>(&keys::host_manifests(host), |current| {
                let mut list = current.unwrap_or_default();
                list.items.retain(|m| m.id != pod_name);
                Ok(list)
            })
            .await?;
        Ok(())
    }

    /// The bound-pod manifest list for a host, as the node agent sees it.
    pub async fn host_manifests(&self, host: &str) -> Result<ContainerManifestList> {
        Ok(self
            .store
            .get_object(&keys::host_manifests(host), true)
            .await?
            .unwrap_or_default())
    }
}

#[async_trait]
impl RestHandler for PodRegistry {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn list(
        &self,
        _ctx: &RequestContext,
        label: &Selector,
        field: &Selector,
    ) -> Result<ApiObject> {
        Ok(ApiObject::PodList(self.list_pods(label, field).await?))
    }

    async fn get(&self, _ctx: &RequestContext, name: &str) -> Result<ApiObject> {
        Ok(ApiObject::Pod(self.get_pod(name).await?))
    }

    async fn create(&self, ctx: &RequestContext, obj: ApiObject) -> Result<ApiObject> {
        let pod: Pod = obj.try_into()?;
        Ok(ApiObject::Pod(self.create_pod(ctx, pod).await?))
    }

    async fn update(&self, _ctx: &RequestContext, obj: ApiObject) -> Result<ApiObject> {
        let pod: Pod = obj.try_into()?;
        Ok(ApiObject::Pod(self.update_pod(pod).await?))
    }

    async fn delete(&self, _ctx: &RequestContext, name: &str) -> Result<ApiObject> {
        self.delete_pod(name).await?;
        Ok(ApiObject::Status(regatta_api::status::Status::success()))
    }

    async fn watch(
        &self,
        _ctx: &RequestContext,
        label: Selector,
        field: Selector,
        from_version: u64,
    ) -> Result<WatchStream> {
        let watcher = self.watch_pods(label, field, from_version).await?;
        Ok(WatchStream::from_watcher(watcher))
    }
}

/// Bindings are write-only directives; creating one performs the atomic
/// pod/host commit and nothing is ever stored under a bindings key.
pub struct BindingHandler {
    pods: PodRegistry,
}

impl BindingHandler {
    pub fn new(pods: PodRegistry) -> BindingHandler {
        BindingHandler { pods }
    }
}

#[async_trait]
impl RestHandler for BindingHandler {
    fn kind(&self) -> &'static str {
        "Binding"
    }

    async fn create(&self, _ctx: &RequestContext, obj: ApiObject) -> Result<ApiObject> {
        let binding: Binding = obj.try_into()?;
        self.pods.bind(&binding).await?;
        Ok(ApiObject::Status(regatta_api::status::Status::success()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    use regatta_api::meta::ObjectMeta;
    use regatta_api::model::{Container, PodSpec};
    use regatta_store::{Backend, MemoryBackend};

    fn registry() -> PodRegistry {
        PodRegistry::new(Store::new(Arc::new(MemoryBackend::new())))
    }

    fn pod(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: [("app".to_string(), "web".to_string())].into(),
                ..ObjectMeta::default()
            },
            spec: PodSpec {
                containers: vec![Container {
                    name: "c".to_string(),
                    image: "i".to_string(),
                    ..Container::default()
                }],
                ..PodSpec::default()
            },
            ..Pod::default()
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::default()
    }

    #[tokio::test]
    async fn test_create_fills_server_fields() {
        let registry = registry();
        let created = registry.create_pod(&ctx(), pod("p1")).await.unwrap();
        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.resource_version.is_some());
        assert_eq!(created.status.phase, PodPhase::Pending);

        let got = registry.get_pod("p1").await.unwrap();
        assert_eq!(got.metadata.uid, created.metadata.uid);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_pod() {
        let registry = registry();
        let mut bad = pod("p1");
        bad.spec.containers[0].image.clear();
        let err = registry.create_pod(&ctx(), bad).await.unwrap_err();
        assert_eq!(err.http_code(), 422);
    }

    #[tokio::test]
    async fn test_bind_updates_pod_and_host_list() {
        let registry = registry();
        registry.create_pod(&ctx(), pod("p1")).await.unwrap();

        registry
            .bind(&Binding {
                pod_id: "p1".to_string(),
                host: "n1".to_string(),
                ..Binding::default()
            })
            .await
            .unwrap();

        let bound = registry.get_pod("p1").await.unwrap();
        assert_eq!(bound.spec.host.as_deref(), Some("n1"));

        let manifests = registry.host_manifests("n1").await.unwrap();
        assert_eq!(manifests.items.len(), 1);
        assert_eq!(manifests.items[0].id, "p1");
    }

    #[tokio::test]
    async fn test_double_bind_conflicts() {
        let registry = registry();
        registry.create_pod(&ctx(), pod("p1")).await.unwrap();
        let binding = Binding {
            pod_id: "p1".to_string(),
            host: "n1".to_string(),
            ..Binding::default()
        };
        registry.bind(&binding).await.unwrap();

        let err = registry
            .bind(&Binding {
                host: "n2".to_string(),
                ..binding
            })
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        // The losing bind must not have touched the other host's list.
        assert!(registry.host_manifests("n2").await.unwrap().items.is_empty());
    }

    /// Backend that fails the next delete of one configured key, for
    /// exercising the compensation paths.
    struct FlakyBackend {
        inner: MemoryBackend,
        fail_delete: parking_lot::Mutex<Option<String>>,
    }

    #[async_trait]
    impl Backend for FlakyBackend {
        async fn index(&self) -> Result<u64> {
            self.inner.index().await
        }

        async fn get(&self, key: &str) -> Result<regatta_store::KeyNode> {
            self.inner.get(key).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<regatta_store::KeyNode>> {
            self.inner.list(prefix).await
        }

        async fn create(
            &self,
            key: &str,
            value: Vec<u8>,
            ttl: Option<std::time::Duration>,
        ) -> Result<regatta_store::KeyNode> {
            self.inner.create(key, value, ttl).await
        }

        async fn set(
            &self,
            key: &str,
            value: Vec<u8>,
            expected_index: Option<u64>,
        ) -> Result<regatta_store::KeyNode> {
            self.inner.set(key, value, expected_index).await
        }

        async fn delete(&self, key: &str, recursive: bool) -> Result<()> {
            if self.fail_delete.lock().take_if(|k| k.as_str() == key).is_some() {
                return Err(Error::Unknown("injected delete failure".to_string()));
            }
            self.inner.delete(key, recursive).await
        }

        async fn watch(
            &self,
            prefix: &str,
            from_index: u64,
            cancel: tokio_util::sync::CancellationToken,
        ) -> Result<tokio::sync::mpsc::Receiver<regatta_store::RawEvent>> {
            self.inner.watch(prefix, from_index, cancel).await
        }
    }

    #[tokio::test]
    async fn test_failed_delete_leaves_both_writes_visible() {
        let backend = Arc::new(FlakyBackend {
            inner: MemoryBackend::new(),
            fail_delete: parking_lot::Mutex::new(None),
        });
        let registry = PodRegistry::new(Store::new(backend.clone()));
        registry.create_pod(&ctx(), pod("p1")).await.unwrap();
        registry
            .bind(&Binding {
                pod_id: "p1".to_string(),
                host: "n1".to_string(),
                ..Binding::default()
            })
            .await
            .unwrap();

        *backend.fail_delete.lock() = Some(keys::pod("p1"));
        registry.delete_pod("p1").await.unwrap_err();

        // Neither write is half-applied: the pod survives and its manifest
        // entry was put back.
        assert!(registry.get_pod("p1").await.is_ok());
        assert_eq!(registry.host_manifests("n1").await.unwrap().items.len(), 1);

        // A retry completes both writes.
        registry.delete_pod("p1").await.unwrap();
        assert!(registry.get_pod("p1").await.unwrap_err().is_not_found());
        assert!(registry.host_manifests("n1").await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_manifest() {
        let registry = registry();
        registry.create_pod(&ctx(), pod("p1")).await.unwrap();
        registry
            .bind(&Binding {
                pod_id: "p1".to_string(),
                host: "n1".to_string(),
                ..Binding::default()
            })
            .await
            .unwrap();

        registry.delete_pod("p1").await.unwrap();
        assert!(registry.get_pod("p1").await.unwrap_err().is_not_found());
        assert!(registry.host_manifests("n1").await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn test_pre_bound_create_lands_on_host_list() {
        let registry = registry();
        let mut p = pod("p1");
        p.spec.host = Some("n1".to_string());
        registry.create_pod(&ctx(), p).await.unwrap();
        let manifests = registry.host_manifests("n1").await.unwrap();
        assert_eq!(manifests.items.len(), 1);
    }

    #[tokio::test]
    async fn test_list_filters_by_selector() {
        let registry = registry();
        registry.create_pod(&ctx(), pod("p1")).await.unwrap();
        let mut other = pod("p2");
        other.metadata.labels.insert("app".to_string(), "db".to_string());
        registry.create_pod(&ctx(), other).await.unwrap();

        let selector: Selector = "app=web".parse().unwrap();
        let list = registry
            .list_pods(&selector, &Selector::everything())
            .await
            .unwrap();
        assert_eq!(list.items.len(), 1);
        assert_eq!(list.items[0].metadata.name.as_deref(), Some("p1"));

        let field: Selector = "spec.host=n1".parse().unwrap();
        let list = registry
            .list_pods(&Selector::everything(), &field)
            .await
            .unwrap();
        assert!(list.items.is_empty());
    }
}
