//! Wiring of the apiserver: registries over one store, the REST handler
//! table, and the control loops that run inside the API process.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use regatta_api::metrics::Metrics;
use regatta_store::{Backend, Store};

use crate::clients::{CloudProvider, NodeAgentClient};
use crate::election;
use crate::endpoints::{self, EndpointsReconciler};
use crate::operation::Operations;
use crate::pod_cache::{self, IpCache, PodCache};
use crate::registry::event::DEFAULT_EVENT_TTL;
use crate::registry::{
    BindingHandler, ControllerRegistry, EndpointsRegistry, EventRegistry, HealthyMinionRegistry,
    MinionRegistry, PodRegistry, PortalIpPool, ServiceRegistry,
};
use crate::rest::RestHandler;
use crate::server::{self, AppState, HandlerMap};

pub struct MasterConfig {
    pub portal_ip_pool: PortalIpPool,
    pub event_ttl: Duration,
    /// Probe node agents and hide unhealthy minions from get/list.
    pub health_check_minions: bool,
    pub endpoints_sync_period: Duration,
    pub pod_cache_period: Duration,
    pub ip_cache_ttl: Duration,
}

impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfig {
            portal_ip_pool: PortalIpPool::default(),
            event_ttl: DEFAULT_EVENT_TTL,
            health_check_minions: false,
            endpoints_sync_period: endpoints::DEFAULT_SYNC_PERIOD,
            pod_cache_period: pod_cache::DEFAULT_UPDATE_PERIOD,
            ip_cache_ttl: pod_cache::DEFAULT_IP_CACHE_TTL,
        }
    }
}

pub struct Master {
    store: Store,
    pods: PodRegistry,
    controllers: ControllerRegistry,
    services: ServiceRegistry,
    endpoints: EndpointsRegistry,
    minions: MinionRegistry,
    events: Arc<EventRegistry>,
    operations: Operations,
    metrics: Metrics,
    agent: Arc<dyn NodeAgentClient>,
    pod_cache: Arc<PodCache>,
    config: MasterConfig,
}

impl Master {
    pub fn new(
        backend: Arc<dyn Backend>,
        agent: Arc<dyn NodeAgentClient>,
        cloud: Arc<dyn CloudProvider>,
        config: MasterConfig,
    ) -> Master {
        let store = Store::new(backend);
        let metrics = Metrics::new(&[endpoints::CONTROLLER_ID, pod_cache::CONTROLLER_ID]);

        let pods = PodRegistry::new(store.clone());
        let minions = MinionRegistry::new(store.clone());
        let pod_cache = Arc::new(PodCache::new(
            pods.clone(),
            minions.clone(),
            agent.clone(),
            IpCache::new(cloud, config.ip_cache_ttl, 256),
            metrics.controller(pod_cache::CONTROLLER_ID),
        ));

        Master {
            pods: pods.clone(),
            controllers: ControllerRegistry::new(store.clone()),
            services: ServiceRegistry::new(store.clone(), config.portal_ip_pool.clone()),
            endpoints: EndpointsRegistry::new(store.clone()),
            minions,
            events: Arc::new(EventRegistry::new(store.clone(), config.event_ttl)),
            operations: Operations::new(),
            metrics,
            agent,
            pod_cache,
            store,
            config,
        }
    }

    pub fn store(&self) -> Store {
        self.store.clone()
    }

    pub fn pods(&self) -> PodRegistry {
        self.pods.clone()
    }

    pub fn controllers(&self) -> ControllerRegistry {
        self.controllers.clone()
    }

    pub fn services(&self) -> ServiceRegistry {
        self.services.clone()
    }

    pub fn pod_cache(&self) -> Arc<PodCache> {
        self.pod_cache.clone()
    }

    fn handler_map(&self) -> HandlerMap {
        let mut handlers: HandlerMap = HandlerMap::new();
        handlers.insert("pods", Arc::new(self.pods.clone()));
        handlers.insert("replicationControllers", Arc::new(self.controllers.clone()));
        handlers.insert("services", Arc::new(self.services.clone()));
        handlers.insert("endpoints", Arc::new(self.endpoints.clone()));
        handlers.insert("bindings", Arc::new(BindingHandler::new(self.pods.clone())));
        handlers.insert("events", self.events.clone());

        let minions: Arc<dyn RestHandler> = if self.config.health_check_minions {
            Arc::new(HealthyMinionRegistry::new(
                self.minions.clone(),
                self.agent.clone(),
            ))
        } else {
            Arc::new(self.minions.clone())
        };
        handlers.insert("minions", minions.clone());
        handlers.insert("nodes", minions);
        handlers
    }

    /// The HTTP surface, ready to serve.
    pub fn router(&self) -> Router {
        let state = AppState::new(
            self.handler_map(),
            self.operations.clone(),
            self.metrics.clone(),
        );
        server::router(state)
    }

    /// The control loops living inside the API process: the endpoints
    /// reconciler, the pod-status cache, and the election notifier.
    pub fn spawn_control_loops(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let reconciler = EndpointsReconciler::new(
            self.services.clone(),
            self.pods.clone(),
            self.endpoints.clone(),
            self.metrics.controller(endpoints::CONTROLLER_ID),
        );
        let endpoints_task = tokio::spawn(reconciler.run(
            self.config.endpoints_sync_period,
            cancel.clone(),
        ));

        let cache_task = tokio::spawn(
            self.pod_cache
                .clone()
                .run(self.config.pod_cache_period, cancel.clone()),
        );

        let backend = self.store.backend();
        let notifier_task = tokio::spawn(async move {
            let (tx, mut rx) = tokio::sync::mpsc::channel(16);
            let watch = tokio::spawn(election::notifier(backend, tx, cancel));
            while let Some(change) = rx.recv().await {
                info!(msg = "observed election change", election = %change.election,
                      leader = change.leader.as_deref().unwrap_or("<none>"));
            }
            if let Ok(Err(error)) = watch.await {
                error!(msg = "election notifier failed", %error);
            }
        });

        vec![endpoints_task, cache_task, notifier_task]
    }
}
