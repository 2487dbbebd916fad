//! Node (minion) storage, optionally fronted by a health-checking layer
//! that hides unreachable nodes without deleting them.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use regatta_api::labels::Selector;
use regatta_api::meta::ListMeta;
use regatta_api::model::{ApiObject, Node, NodeList, NodePhase};
use regatta_api::validation::validate_node;
use regatta_api::{Error, Object, Result};
use regatta_store::{watch_prefix, Store, Watcher};

use super::{keys, prepare_for_create};
use crate::clients::NodeAgentClient;
use crate::rest::{RequestContext, RestHandler, WatchStream};

const KIND: &str = "Node";

#[derive(Clone)]
pub struct MinionRegistry {
    store: Store,
}

impl MinionRegistry {
    pub fn new(store: Store) -> MinionRegistry {
        MinionRegistry { store }
    }

    pub async fn list_minions(&self, label: &Selector) -> Result<NodeList> {
        let (nodes, index): (Vec<Node>, u64) = self.store.extract_list(keys::MINIONS).await?;
        Ok(NodeList {
            metadata: ListMeta {
                resource_version: Some(index.to_string()),
                ..ListMeta::default()
            },
            items: nodes
                .into_iter()
                .filter(|n| label.matches(&n.metadata.labels))
                .collect(),
        })
    }

    pub async fn get_minion(&self, name: &str) -> Result<Node> {
        self.store
            .get_object(&keys::minion(name), false)
            .await?
            .ok_or_else(|| Error::not_found(KIND, name))
    }

    pub async fn create_minion(&self, ctx: &RequestContext, mut node: Node) -> Result<Node> {
        let errors = validate_node(&node);
        if !errors.is_empty() {
            return Err(Error::invalid(KIND, node.metadata.name_str(), errors));
        }
        prepare_for_create(&mut node.metadata, KIND, &ctx.namespace)?;
        let stored = self
            .store
            .create_object(&keys::minion(node.name()), &node)
            .await?;
        info!(msg = "registered minion", name = %stored.name());
        Ok(stored)
    }

    pub async fn update_minion(&self, node: Node) -> Result<Node> {
        let errors = validate_node(&node);
        if !errors.is_empty() {
            return Err(Error::invalid(KIND, node.metadata.name_str(), errors));
        }
        self.store.set_object(&keys::minion(node.name()), &node).await
    }

    pub async fn delete_minion(&self, name: &str) -> Result<()> {
        self.store.delete(&keys::minion(name), false).await
    }

    pub async fn watch_minions(&self, from_version: u64) -> Result<Watcher<Node>> {
        watch_prefix(self.store.backend(), keys::MINIONS, from_version, |_: &Node| true).await
    }
}

#[async_trait]
impl RestHandler for MinionRegistry {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn list(
        &self,
        _ctx: &RequestContext,
        label: &Selector,
        _field: &Selector,
    ) -> Result<ApiObject> {
        Ok(ApiObject::NodeList(self.list_minions(label).await?))
    }

    async fn get(&self, _ctx: &RequestContext, name: &str) -> Result<ApiObject> {
        Ok(ApiObject::Node(self.get_minion(name).await?))
    }

    async fn create(&self, ctx: &RequestContext, obj: ApiObject) -> Result<ApiObject> {
        let node: Node = obj.try_into()?;
        Ok(ApiObject::Node(self.create_minion(ctx, node).await?))
    }

    async fn update(&self, _ctx: &RequestContext, obj: ApiObject) -> Result<ApiObject> {
        let node: Node = obj.try_into()?;
        Ok(ApiObject::Node(self.update_minion(node).await?))
    }

    async fn delete(&self, _ctx: &RequestContext, name: &str) -> Result<ApiObject> {
        self.delete_minion(name).await?;
        Ok(ApiObject::Status(regatta_api::status::Status::success()))
    }

    async fn watch(
        &self,
        _ctx: &RequestContext,
        _label: Selector,
        _field: Selector,
        from_version: u64,
    ) -> Result<WatchStream> {
        let watcher = self.watch_minions(from_version).await?;
        Ok(WatchStream::from_watcher(watcher))
    }
}

/// Probes each node's agent and surfaces only healthy nodes. Unreachable
/// nodes disappear from get/list but stay in the store.
#[derive(Clone)]
pub struct HealthyMinionRegistry {
    inner: MinionRegistry,
    agent: Arc<dyn NodeAgentClient>,
}

impl HealthyMinionRegistry {
    pub fn new(inner: MinionRegistry, agent: Arc<dyn NodeAgentClient>) -> HealthyMinionRegistry {
        HealthyMinionRegistry { inner, agent }
    }

    pub async fn list_minions(&self, label: &Selector) -> Result<NodeList> {
        let mut list = self.inner.list_minions(label).await?;
        let mut healthy = Vec::with_capacity(list.items.len());
        for mut node in list.items {
            if self.agent.healthy(node.name()).await.unwrap_or(false) {
                node.status.phase = NodePhase::Ready;
                healthy.push(node);
            } else {
                debug!(msg = "hiding unhealthy minion", name = %node.name());
            }
        }
        list.items = healthy;
        Ok(list)
    }

    pub async fn get_minion(&self, name: &str) -> Result<Node> {
        let mut node = self.inner.get_minion(name).await?;
        if !self.agent.healthy(name).await.unwrap_or(false) {
            return Err(Error::not_found(KIND, name));
        }
        node.status.phase = NodePhase::Ready;
        Ok(node)
    }
}

#[async_trait]
impl RestHandler for HealthyMinionRegistry {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn list(
        &self,
        _ctx: &RequestContext,
        label: &Selector,
        _field: &Selector,
    ) -> Result<ApiObject> {
        Ok(ApiObject::NodeList(self.list_minions(label).await?))
    }

    async fn get(&self, _ctx: &RequestContext, name: &str) -> Result<ApiObject> {
        Ok(ApiObject::Node(self.get_minion(name).await?))
    }

    async fn create(&self, ctx: &RequestContext, obj: ApiObject) -> Result<ApiObject> {
        self.inner.create(ctx, obj).await
    }

    async fn update(&self, ctx: &RequestContext, obj: ApiObject) -> Result<ApiObject> {
        self.inner.update(ctx, obj).await
    }

    async fn delete(&self, ctx: &RequestContext, name: &str) -> Result<ApiObject> {
        self.inner.delete(ctx, name).await
    }

    async fn watch(
        &self,
        ctx: &RequestContext,
        label: Selector,
        field: Selector,
        from_version: u64,
    ) -> Result<WatchStream> {
        self.inner.watch(ctx, label, field, from_version).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use regatta_api::meta::ObjectMeta;
    use regatta_store::MemoryBackend;

    use crate::clients::PodInfo;

    struct FakeAgent {
        healthy: Mutex<BTreeMap<String, bool>>,
    }

    #[async_trait]
    impl NodeAgentClient for FakeAgent {
        async fn pod_info(&self, _host: &str, pod_id: &str) -> Result<PodInfo> {
            Err(Error::not_found("Pod", pod_id))
        }

        async fn healthy(&self, host: &str) -> Result<bool> {
            Ok(*self.healthy.lock().get(host).unwrap_or(&false))
        }
    }

    fn node(name: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            ..Node::default()
        }
    }

    #[tokio::test]
    async fn test_health_check_hides_but_keeps_nodes() {
        let store = Store::new(Arc::new(MemoryBackend::new()));
        let inner = MinionRegistry::new(store);
        let ctx = RequestContext::default();
        inner.create_minion(&ctx, node("n1")).await.unwrap();
        inner.create_minion(&ctx, node("n2")).await.unwrap();

        let agent = Arc::new(FakeAgent {
            healthy: Mutex::new([("n1".to_string(), true)].into()),
        });
        let healthy = HealthyMinionRegistry::new(inner.clone(), agent.clone());

        let list = healthy.list_minions(&Selector::everything()).await.unwrap();
        assert_eq!(list.items.len(), 1);
        assert_eq!(list.items[0].metadata.name.as_deref(), Some("n1"));
        assert_eq!(list.items[0].status.phase, NodePhase::Ready);

        assert!(healthy.get_minion("n2").await.unwrap_err().is_not_found());
        // The node is hidden, not gone.
        assert!(inner.get_minion("n2").await.is_ok());

        agent.healthy.lock().insert("n2".to_string(), true);
        assert!(healthy.get_minion("n2").await.is_ok());
    }
}
