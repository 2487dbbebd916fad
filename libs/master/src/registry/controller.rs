//! Replication controller storage.

use async_trait::async_trait;
use tracing::info;

use regatta_api::labels::Selector;
use regatta_api::meta::ListMeta;
use regatta_api::model::{ApiObject, ReplicationController, ReplicationControllerList};
use regatta_api::validation::validate_controller;
use regatta_api::{Error, Object, Result};
use regatta_store::{watch_prefix, Store, Watcher};

use super::{create_with_generated_name, keys, prepare_for_create};
use crate::rest::{RequestContext, RestHandler, WatchStream};

const KIND: &str = "ReplicationController";

#[derive(Clone)]
pub struct ControllerRegistry {
    store: Store,
}

impl ControllerRegistry {
    pub fn new(store: Store) -> ControllerRegistry {
        ControllerRegistry { store }
    }

    pub async fn list_controllers(&self, label: &Selector) -> Result<ReplicationControllerList> {
        let (controllers, index): (Vec<ReplicationController>, u64) =
            self.store.extract_list(keys::CONTROLLERS).await?;
        Ok(ReplicationControllerList {
            metadata: ListMeta {
                resource_version: Some(index.to_string()),
                ..ListMeta::default()
            },
            items: controllers
                .into_iter()
                .filter(|rc| label.matches(&rc.metadata.labels))
                .collect(),
        })
    }

    pub async fn get_controller(&self, name: &str) -> Result<ReplicationController> {
        self.store
            .get_object(&keys::controller(name), false)
            .await?
            .ok_or_else(|| Error::not_found(KIND, name))
    }

    pub async fn create_controller(
        &self,
        ctx: &RequestContext,
        mut rc: ReplicationController,
    ) -> Result<ReplicationController> {
        let errors = validate_controller(&rc);
        if !errors.is_empty() {
            return Err(Error::invalid(KIND, rc.metadata.name_str(), errors));
        }
        prepare_for_create(&mut rc.metadata, KIND, &ctx.namespace)?;
        rc.status = Default::default();
        let stored = create_with_generated_name(&self.store, &rc, keys::controller).await?;
        info!(msg = "created replication controller", name = %stored.name());
        Ok(stored)
    }

    pub async fn update_controller(
        &self,
        rc: ReplicationController,
    ) -> Result<ReplicationController> {
        let errors = validate_controller(&rc);
        if !errors.is_empty() {
            return Err(Error::invalid(KIND, rc.metadata.name_str(), errors));
        }
        self.store
            .set_object(&keys::controller(rc.name()), &rc)
            .await
    }

    /// Record the observed replica count without disturbing a concurrent
    /// spec update.
    pub async fn update_status(&self, name: &str, observed: i32) -> Result<()> {
        self.store
            .atomic_update::<ReplicationController, _>(&keys::controller(name), |current| {
                let mut rc = current.ok_or_else(|| Error::not_found(KIND, name))?;
                rc.status.replicas = observed;
                Ok(rc)
            })
            .await?;
        Ok(())
    }

    pub async fn delete_controller(&self, name: &str) -> Result<()> {
        self.store.delete(&keys::controller(name), false).await?;
        info!(msg = "deleted replication controller", %name);
        Ok(())
    }

    pub async fn watch_controllers(
        &self,
        label: Selector,
        from_version: u64,
    ) -> Result<Watcher<ReplicationController>> {
        watch_prefix(
            self.store.backend(),
            keys::CONTROLLERS,
            from_version,
            move |rc: &ReplicationController| label.matches(&rc.metadata.labels),
        )
        .await
    }
}

#[async_trait]
impl RestHandler for ControllerRegistry {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn list(
        &self,
        _ctx: &RequestContext,
        label: &Selector,
        _field: &Selector,
    ) -> Result<ApiObject> {
        Ok(ApiObject::ReplicationControllerList(
            self.list_controllers(label).await?,
        ))
    }

    async fn get(&self, _ctx: &RequestContext, name: &str) -> Result<ApiObject> {
        Ok(ApiObject::ReplicationController(
            self.get_controller(name).await?,
        ))
    }

    async fn create(&self, ctx: &RequestContext, obj: ApiObject) -> Result<ApiObject> {
        let rc: ReplicationController = obj.try_into()?;
        Ok(ApiObject::ReplicationController(
            self.create_controller(ctx, rc).await?,
        ))
    }

    async fn update(&self, _ctx: &RequestContext, obj: ApiObject) -> Result<ApiObject> {
        let rc: ReplicationController = obj.try_into()?;
        Ok(ApiObject::ReplicationController(
            self.update_controller(rc).await?,
        ))
    }

    async fn delete(&self, _ctx: &RequestContext, name: &str) -> Result<ApiObject> {
        self.delete_controller(name).await?;
        Ok(ApiObject::Status(regatta_api::status::Status::success()))
    }

    async fn watch(
        &self,
        _ctx: &RequestContext,
        label: Selector,
        _field: Selector,
        from_version: u64,
    ) -> Result<WatchStream> {
        let watcher = self.watch_controllers(label, from_version).await?;
        Ok(WatchStream::from_watcher(watcher))
    }
}
