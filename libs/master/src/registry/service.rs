//! Service storage with portal IP assignment, and the endpoints records the
//! reconciler maintains for each service.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use tracing::info;

use regatta_api::labels::Selector;
use regatta_api::meta::ListMeta;
use regatta_api::model::{ApiObject, Endpoints, EndpointsList, Service, ServiceList};
use regatta_api::validation::validate_service;
use regatta_api::{Error, Object, Result};
use regatta_store::{watch_prefix, Store, Watcher};

use super::{create_with_generated_name, keys, prepare_for_create};
use crate::rest::{RequestContext, RestHandler, WatchStream};

const KIND: &str = "Service";

/// Contiguous block of virtual IPs services are assigned from.
#[derive(Clone, Debug)]
pub struct PortalIpPool {
    base: Ipv4Addr,
    size: u32,
}

impl PortalIpPool {
    pub fn new(base: Ipv4Addr, size: u32) -> PortalIpPool {
        PortalIpPool { base, size }
    }

    fn nth(&self, n: u32) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.base) + n)
    }

    /// First address of the block not in `used`.
    fn allocate(&self, used: &BTreeSet<Ipv4Addr>) -> Option<Ipv4Addr> {
        (0..self.size).map(|n| self.nth(n)).find(|ip| !used.contains(ip))
    }
}

impl Default for PortalIpPool {
    fn default() -> Self {
        PortalIpPool::new(Ipv4Addr::new(10, 0, 0, 1), 254)
    }
}

#[derive(Clone)]
pub struct ServiceRegistry {
    store: Store,
    pool: PortalIpPool,
}

impl ServiceRegistry {
    pub fn new(store: Store, pool: PortalIpPool) -> ServiceRegistry {
        ServiceRegistry { store, pool }
    }

    pub async fn list_services(&self, label: &Selector) -> Result<ServiceList> {
        let (services, index): (Vec<Service>, u64) =
            self.store.extract_list(keys::SERVICE_SPECS).await?;
        Ok(ServiceList {
            metadata: ListMeta {
                resource_version: Some(index.to_string()),
                ..ListMeta::default()
            },
            items: services
                .into_iter()
                .filter(|s| label.matches(&s.metadata.labels))
                .collect(),
        })
    }

    pub async fn get_service(&self, name: &str) -> Result<Service> {
        self.store
            .get_object(&keys::service_spec(name), false)
            .await?
            .ok_or_else(|| Error::not_found(KIND, name))
    }

    pub async fn create_service(&self, ctx: &RequestContext, mut svc: Service) -> Result<Service> {
        let errors = validate_service(&svc);
        if !errors.is_empty() {
            return Err(Error::invalid(KIND, svc.metadata.name_str(), errors));
        }
        prepare_for_create(&mut svc.metadata, KIND, &ctx.namespace)?;

        if svc.spec.portal_ip.is_none() {
            let used: BTreeSet<Ipv4Addr> = self
                .list_services(&Selector::everything())
                .await?
                .items
                .iter()
                .filter_map(|s| s.spec.portal_ip.as_deref())
                .filter_map(|ip| ip.parse().ok())
                .collect();
            let ip = self.pool.allocate(&used).ok_or_else(|| {
                Error::Unknown("portal IP pool is exhausted".to_string())
            })?;
            svc.spec.portal_ip = Some(ip.to_string());
        }

        let stored = create_with_generated_name(&self.store, &svc, keys::service_spec).await?;
        info!(msg = "created service", name = %stored.name(),
              portal_ip = stored.spec.portal_ip.as_deref().unwrap_or(""));
        Ok(stored)
    }

    /// Updates keep the portal IP stable across spec changes.
    pub async fn update_service(&self, mut svc: Service) -> Result<Service> {
        let errors = validate_service(&svc);
        if !errors.is_empty() {
            return Err(Error::invalid(KIND, svc.metadata.name_str(), errors));
        }
        if svc.spec.portal_ip.is_none() {
            let current = self.get_service(svc.name()).await?;
            svc.spec.portal_ip = current.spec.portal_ip;
        }
        self.store
            .set_object(&keys::service_spec(svc.name()), &svc)
            .await
    }

    /// Removes both the spec and the endpoints record.
    pub async fn delete_service(&self, name: &str) -> Result<()> {
        self.store.delete(&keys::service_spec(name), false).await?;
        match self.store.delete(&keys::service_endpoints(name), false).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
        info!(msg = "deleted service", %name);
        Ok(())
    }

    pub async fn watch_services(
        &self,
        label: Selector,
        from_version: u64,
    ) -> Result<Watcher<Service>> {
        watch_prefix(
            self.store.backend(),
            keys::SERVICE_SPECS,
            from_version,
            move |svc: &Service| label.matches(&svc.metadata.labels),
        )
        .await
    }
}

#[async_trait]
impl RestHandler for ServiceRegistry {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn list(
        &self,
        _ctx: &RequestContext,
        label: &Selector,
        _field: &Selector,
    ) -> Result<ApiObject> {
        Ok(ApiObject::ServiceList(self.list_services(label).await?))
    }

    async fn get(&self, _ctx: &RequestContext, name: &str) -> Result<ApiObject> {
        Ok(ApiObject::Service(self.get_service(name).await?))
    }

    async fn create(&self, ctx: &RequestContext, obj: ApiObject) -> Result<ApiObject> {
        let svc: Service = obj.try_into()?;
        Ok(ApiObject::Service(self.create_service(ctx, svc).await?))
    }

    async fn update(&self, _ctx: &RequestContext, obj: ApiObject) -> Result<ApiObject> {
        let svc: Service = obj.try_into()?;
        Ok(ApiObject::Service(self.update_service(svc).await?))
    }

    async fn delete(&self, _ctx: &RequestContext, name: &str) -> Result<ApiObject> {
        self.delete_service(name).await?;
        Ok(ApiObject::Status(regatta_api::status::Status::success()))
    }

    async fn watch(
        &self,
        _ctx: &RequestContext,
        label: Selector,
        _field: Selector,
        from_version: u64,
    ) -> Result<WatchStream> {
        let watcher = self.watch_services(label, from_version).await?;
        Ok(WatchStream::from_watcher(watcher))
    }
}

/// Endpoints records are written only by the endpoints reconciler; the REST
/// surface exposes them read-only.
#[derive(Clone)]
pub struct EndpointsRegistry {
    store: Store,
}

impl EndpointsRegistry {
    pub fn new(store: Store) -> EndpointsRegistry {
        EndpointsRegistry { store }
    }

    pub async fn list_endpoints(&self) -> Result<EndpointsList> {
        let (items, index): (Vec<Endpoints>, u64) =
            self.store.extract_list(keys::SERVICE_ENDPOINTS).await?;
        Ok(EndpointsList {
            metadata: ListMeta {
                resource_version: Some(index.to_string()),
                ..ListMeta::default()
            },
            items,
        })
    }

    pub async fn get_endpoints(&self, name: &str) -> Result<Endpoints> {
        self.store
            .get_object(&keys::service_endpoints(name), false)
            .await?
            .ok_or_else(|| Error::not_found("Endpoints", name))
    }

    /// Reconciler write path: converge the record for one service.
    pub async fn update_endpoints(&self, name: &str, endpoints: Vec<String>) -> Result<()> {
        let name = name.to_string();
        self.store
            .atomic_update::<Endpoints, _>(&keys::service_endpoints(&name), |current| {
                let mut record = current.unwrap_or_default();
                record.metadata.name = Some(name.clone());
                record.endpoints = endpoints.clone();
                Ok(record)
            })
            .await?;
        Ok(())
    }

    pub async fn watch_endpoints(&self, from_version: u64) -> Result<Watcher<Endpoints>> {
        watch_prefix(
            self.store.backend(),
            keys::SERVICE_ENDPOINTS,
            from_version,
            |_: &Endpoints| true,
        )
        .await
    }
}

#[async_trait]
impl RestHandler for EndpointsRegistry {
    fn kind(&self) -> &'static str {
        "Endpoints"
    }

    async fn list(
        &self,
        _ctx: &RequestContext,
        _label: &Selector,
        _field: &Selector,
    ) -> Result<ApiObject> {
        Ok(ApiObject::EndpointsList(self.list_endpoints().await?))
    }

    async fn get(&self, _ctx: &RequestContext, name: &str) -> Result<ApiObject> {
        Ok(ApiObject::Endpoints(self.get_endpoints(name).await?))
    }

    async fn watch(
        &self,
        _ctx: &RequestContext,
        _label: Selector,
        _field: Selector,
        from_version: u64,
    ) -> Result<WatchStream> {
        let watcher = self.watch_endpoints(from_version).await?;
        Ok(WatchStream::from_watcher(watcher))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    use regatta_api::meta::ObjectMeta;
    use regatta_api::model::ServiceSpec;
    use regatta_store::MemoryBackend;

    fn service(name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            spec: ServiceSpec {
                port: 80,
                selector: [("app".to_string(), "web".to_string())].into(),
                ..ServiceSpec::default()
            },
            ..Service::default()
        }
    }

    fn registries() -> (ServiceRegistry, EndpointsRegistry) {
        let store = Store::new(Arc::new(MemoryBackend::new()));
        (
            ServiceRegistry::new(store.clone(), PortalIpPool::default()),
            EndpointsRegistry::new(store),
        )
    }

    #[tokio::test]
    async fn test_portal_ips_are_assigned_and_stable() {
        let (services, _) = registries();
        let ctx = RequestContext::default();

        let a = services.create_service(&ctx, service("a")).await.unwrap();
        let b = services.create_service(&ctx, service("b")).await.unwrap();
        let ip_a = a.spec.portal_ip.clone().unwrap();
        assert_ne!(a.spec.portal_ip, b.spec.portal_ip);

        // An update without a portal IP keeps the assigned one.
        let mut updated = a.clone();
        updated.spec.port = 8080;
        updated.spec.portal_ip = None;
        let updated = services.update_service(updated).await.unwrap();
        assert_eq!(updated.spec.portal_ip.as_deref(), Some(ip_a.as_str()));
    }

    #[tokio::test]
    async fn test_pool_exhaustion() {
        let store = Store::new(Arc::new(MemoryBackend::new()));
        let services =
            ServiceRegistry::new(store, PortalIpPool::new(Ipv4Addr::new(10, 0, 0, 1), 1));
        let ctx = RequestContext::default();
        services.create_service(&ctx, service("a")).await.unwrap();
        let err = services.create_service(&ctx, service("b")).await.unwrap_err();
        assert_eq!(err.http_code(), 500);
    }

    #[tokio::test]
    async fn test_delete_removes_endpoints_record() {
        let (services, endpoints) = registries();
        let ctx = RequestContext::default();
        services.create_service(&ctx, service("a")).await.unwrap();
        endpoints
            .update_endpoints("a", vec!["n1:80".to_string()])
            .await
            .unwrap();

        services.delete_service("a").await.unwrap();
        assert!(endpoints.get_endpoints("a").await.unwrap_err().is_not_found());
    }
}
