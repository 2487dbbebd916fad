//! The endpoints reconciler: keeps each service's `host:port` list in step
//! with the pods its selector matches.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use regatta_api::labels::Selector;
use regatta_api::metrics::ControllerMetrics;
use regatta_api::model::{IntOrString, Pod, Service};
use regatta_api::Result;

use crate::registry::{EndpointsRegistry, PodRegistry, ServiceRegistry};

pub const CONTROLLER_ID: &str = "endpoints";
pub const DEFAULT_SYNC_PERIOD: Duration = Duration::from_secs(5);

pub struct EndpointsReconciler {
    services: ServiceRegistry,
    pods: PodRegistry,
    endpoints: EndpointsRegistry,
    metrics: Arc<ControllerMetrics>,
}

impl EndpointsReconciler {
    pub fn new(
        services: ServiceRegistry,
        pods: PodRegistry,
        endpoints: EndpointsRegistry,
        metrics: Arc<ControllerMetrics>,
    ) -> EndpointsReconciler {
        EndpointsReconciler {
            services,
            pods,
            endpoints,
            metrics,
        }
    }

    /// Watch services and pods, resynchronizing on every change and at
    /// least every `period`.
    pub async fn run(self, period: Duration, cancel: CancellationToken) {
        info!(msg = "starting endpoints reconciler");
        let wake = Arc::new(Notify::new());

        let service_wake = wake.clone();
        let service_cancel = cancel.clone();
        let services = self.services.clone();
        tokio::spawn(async move {
            loop {
                if service_cancel.is_cancelled() {
                    break;
                }
                match services.watch_services(Selector::everything(), 0).await {
                    Ok(mut watcher) => {
                        while let Some(_event) = watcher.next().await {
                            service_wake.notify_one();
                        }
                    }
                    Err(error) => error!(msg = "service watch failed", %error),
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });

        let pod_wake = wake.clone();
        let pod_cancel = cancel.clone();
        let pods = self.pods.clone();
        tokio::spawn(async move {
            loop {
                if pod_cancel.is_cancelled() {
                    break;
                }
                match pods
                    .watch_pods(Selector::everything(), Selector::everything(), 0)
                    .await
                {
                    Ok(mut watcher) => {
                        while let Some(_event) = watcher.next().await {
                            pod_wake.notify_one();
                        }
                    }
                    Err(error) => error!(msg = "pod watch failed", %error),
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });

        self.metrics.ready_set(1);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(msg = "endpoints reconciler shutting down");
                    return;
                }
                _ = wake.notified() => {}
                _ = tokio::time::sleep(period) => {}
            }
            if let Err(error) = self.sync_once().await {
                self.metrics.reconcile_failure_inc();
                error!(msg = "failed to sync endpoints", %error);
            }
        }
    }

    /// One full pass over every service.
    pub async fn sync_once(&self) -> Result<()> {
        let _timer = self.metrics.reconcile_count_and_measure();
        let services = self.services.list_services(&Selector::everything()).await?;
        for service in &services.items {
            let name = service.metadata.name_str().to_string();
            if let Err(error) = self.sync_service(service).await {
                // Per-service failures do not abort the pass.
                self.metrics.reconcile_failure_inc();
                error!(msg = "failed to sync service endpoints", service = %name, %error);
            }
        }
        Ok(())
    }

    async fn sync_service(&self, service: &Service) -> Result<()> {
        let name = service.metadata.name_str();
        let selector = Selector::from_labels(&service.spec.selector);
        let pods = self
            .pods
            .list_pods(&selector, &Selector::everything())
            .await?;

        let mut endpoints: Vec<String> = pods
            .items
            .iter()
            .filter_map(|pod| endpoint_for(service, pod))
            .collect();
        endpoints.sort();

        let current = match self.endpoints.get_endpoints(name).await {
            Ok(record) => record.endpoints,
            Err(err) if err.is_not_found() => Vec::new(),
            Err(err) => return Err(err),
        };
        if current == endpoints {
            return Ok(());
        }
        debug!(msg = "updating endpoints", service = %name, count = endpoints.len());
        self.endpoints.update_endpoints(name, endpoints).await
    }
}

/// The `host:port` for one pod backing a service, or `None` when the pod
/// has no address or the named target port cannot be resolved.
fn endpoint_for(service: &Service, pod: &Pod) -> Option<String> {
    let address = pod
        .status
        .pod_ip
        .clone()
        .or_else(|| pod.status.host.clone())?;
    let port = target_port(service, pod)?;
    Some(format!("{address}:{port}"))
}

fn target_port(service: &Service, pod: &Pod) -> Option<i32> {
    match &service.spec.container_port {
        None => Some(service.spec.port),
        Some(IntOrString::Int(port)) => Some(*port),
        Some(IntOrString::String(name)) => pod
            .spec
            .containers
            .iter()
            .flat_map(|c| &c.ports)
            .find(|p| p.name.as_deref() == Some(name.as_str()))
            .map(|p| p.container_port),
    }
}
