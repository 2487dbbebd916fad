//! The replication controller reconciler.
//!
//! One task consumes controller watch events and a periodic full list (the
//! full sync catches whatever the watch missed), so reconciles for a given
//! controller never race each other. Each reconcile compares the pods
//! matching the controller's selector against the desired count and
//! creates or deletes pods in parallel to close the gap. Failures of
//! individual creates or deletes are logged and retried by the next pass,
//! never aborting the loop; pods that are already bound to a host are left
//! exactly where they are.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use regatta_api::labels::Selector;
use regatta_api::metrics::ControllerMetrics;
use regatta_api::model::{Pod, PodPhase, ReplicationController};
use regatta_api::{Object, Result};
use regatta_client::Client;
use regatta_store::{EventStream, EventType, WatchEvent};

pub const CONTROLLER_ID: &str = "replication";
pub const DEFAULT_FULL_SYNC_PERIOD: Duration = Duration::from_secs(10);

/// Label stamped onto every pod a controller creates, so operators can
/// trace a pod back to its controller.
pub const CONTROLLER_LABEL: &str = "replication-controller";

/// The slice of the API the reconciler needs. The HTTP [`Client`]
/// implements it; tests drive the manager with an in-memory fake.
#[async_trait]
pub trait ReplicationApi: Send + Sync + 'static {
    async fn list_controllers(&self) -> Result<Vec<ReplicationController>>;

    async fn watch_controllers(
        &self,
        from_version: u64,
    ) -> Result<Box<dyn EventStream<ReplicationController>>>;

    async fn update_controller(
        &self,
        rc: ReplicationController,
    ) -> Result<ReplicationController>;

    async fn list_pods(&self, label: &Selector) -> Result<Vec<Pod>>;

    async fn create_pod(&self, pod: Pod) -> Result<Pod>;

    async fn delete_pod(&self, name: &str) -> Result<()>;
}

#[async_trait]
impl ReplicationApi for Client {
    async fn list_controllers(&self) -> Result<Vec<ReplicationController>> {
        Ok(self.list_controllers(&Selector::everything()).await?.items)
    }

    async fn watch_controllers(
        &self,
        from_version: u64,
    ) -> Result<Box<dyn EventStream<ReplicationController>>> {
        Ok(Box::new(Client::watch_controllers(self, from_version).await?))
    }

    async fn update_controller(
        &self,
        rc: ReplicationController,
    ) -> Result<ReplicationController> {
        Client::update_controller(self, rc).await
    }

    async fn list_pods(&self, label: &Selector) -> Result<Vec<Pod>> {
        Ok(Client::list_pods(self, label, &Selector::everything())
            .await?
            .items)
    }

    async fn create_pod(&self, pod: Pod) -> Result<Pod> {
        Client::create_pod(self, pod).await
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        Client::delete_pod(self, name).await
    }
}

fn reconnect_backoff() -> impl Iterator<Item = Duration> {
    ExponentialBuilder::default()
        .with_max_delay(Duration::from_secs(30))
        .without_max_times()
        .build()
}

pub struct ReplicationManager<A: ReplicationApi> {
    api: Arc<A>,
    metrics: Arc<ControllerMetrics>,
}

impl<A: ReplicationApi> ReplicationManager<A> {
    pub fn new(api: Arc<A>, metrics: Arc<ControllerMetrics>) -> ReplicationManager<A> {
        ReplicationManager { api, metrics }
    }

    /// Watch controllers and run a full sync every `full_sync_period`,
    /// both feeding the same single-threaded reconcile path.
    pub async fn run(&self, full_sync_period: Duration, cancel: CancellationToken) {
        enum Wake {
            Event(Option<WatchEvent<ReplicationController>>),
            FullSync,
            Shutdown,
        }

        info!(msg = "starting replication manager");
        self.metrics.ready_set(1);
        let mut last_version: u64 = 0;
        let mut stream: Option<Box<dyn EventStream<ReplicationController>>> = None;
        let mut reconnect = reconnect_backoff();

        loop {
            if stream.is_none() {
                match self.api.watch_controllers(last_version).await {
                    Ok(s) => {
                        stream = Some(s);
                        reconnect = reconnect_backoff();
                    }
                    Err(error) => {
                        // safe unwrap: the policy never exhausts
                        let delay = reconnect.next().unwrap();
                        error!(msg = "controller watch failed, retrying", %error, ?delay);
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(delay) => continue,
                        }
                    }
                }
            }

            let wake = {
                // safe unwrap: a missing stream was re-established above
                let watcher = stream.as_mut().unwrap();
                tokio::select! {
                    _ = cancel.cancelled() => Wake::Shutdown,
                    event = watcher.next_event() => Wake::Event(event),
                    _ = tokio::time::sleep(full_sync_period) => Wake::FullSync,
                }
            };
            match wake {
                Wake::Shutdown => {
                    info!(msg = "replication manager shutting down");
                    return;
                }
                Wake::Event(Some(event)) => {
                    last_version = last_version.max(event.resource_version() + 1);
                    if event.event_type != EventType::Deleted {
                        self.reconcile(&event.object).await;
                    }
                }
                Wake::Event(None) => {
                    debug!(msg = "controller watch closed, restarting",
                           from_version = last_version);
                    stream = None;
                }
                Wake::FullSync => self.synchronize_all().await,
            }
        }
    }

    /// One pass over every controller. Missed watch events cannot cause
    /// drift past one period.
    pub async fn synchronize_all(&self) {
        let controllers = match self.api.list_controllers().await {
            Ok(list) => list,
            Err(error) => {
                error!(msg = "failed to list controllers", %error);
                return;
            }
        };
        for rc in &controllers {
            self.reconcile(rc).await;
        }
    }

    async fn reconcile(&self, rc: &ReplicationController) {
        let _timer = self.metrics.reconcile_count_and_measure();
        if let Err(error) = self.synchronize(rc).await {
            self.metrics.reconcile_failure_inc();
            error!(msg = "failed reconciliation", controller = %rc.name(), %error);
        }
    }

    /// Align the observed pod count for one controller with its spec.
    pub async fn synchronize(&self, rc: &ReplicationController) -> Result<()> {
        let selector = Selector::from_labels(&rc.spec.selector);
        let pods = self.api.list_pods(&selector).await?;
        let mut active: Vec<&Pod> = pods
            .iter()
            .filter(|p| p.status.phase != PodPhase::Failed)
            .collect();

        let desired = rc.spec.replicas.max(0) as usize;
        let observed = active.len();
        debug!(msg = "reconciling", controller = %rc.name(), observed, desired);

        if observed < desired {
            let missing = desired - observed;
            info!(msg = "creating replicas", controller = %rc.name(), count = missing);
            let creates = (0..missing).map(|_| {
                let pod = self.pod_from_template(rc);
                let api = self.api.clone();
                async move { api.create_pod(pod).await }
            });
            for result in join_all(creates).await {
                if let Err(error) = result {
                    // The next sync pass picks up the shortfall.
                    warn!(msg = "failed to create replica", controller = %rc.name(), %error);
                }
            }
        } else if observed > desired {
            let excess = observed - desired;
            info!(msg = "deleting excess replicas", controller = %rc.name(), count = excess);
            active.sort_by_key(|p| p.metadata.name_str().to_string());
            let deletes = active.iter().take(excess).map(|pod| {
                let name = pod.metadata.name_str().to_string();
                let api = self.api.clone();
                async move { api.delete_pod(&name).await }
            });
            for result in join_all(deletes).await {
                if let Err(error) = result {
                    warn!(msg = "failed to delete replica", controller = %rc.name(), %error);
                }
            }
        }

        if rc.status.replicas != observed as i32 {
            let mut updated = rc.clone();
            updated.status.replicas = observed as i32;
            self.api.update_controller(updated).await?;
        }
        Ok(())
    }

    fn pod_from_template(&self, rc: &ReplicationController) -> Pod {
        let template = rc.spec.template.clone().unwrap_or_default();
        let mut pod = Pod {
            metadata: template.metadata,
            spec: template.spec,
            ..Pod::default()
        };
        pod.metadata.name = None;
        pod.metadata.generate_name = Some(format!("{}-", rc.name()));
        pod.metadata
            .labels
            .insert(CONTROLLER_LABEL.to_string(), rc.name().to_string());
        pod
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use regatta_api::meta::ObjectMeta;
    use regatta_api::metrics::Metrics;
    use regatta_api::model::{
        Container, PodSpec, PodTemplateSpec, ReplicationControllerSpec,
    };
    use regatta_api::Error;
    use regatta_store::WatchEvent;

    #[derive(Default)]
    struct FakeApi {
        pods: Mutex<Vec<Pod>>,
        controllers: Mutex<Vec<ReplicationController>>,
        create_failures: AtomicUsize,
        created: AtomicUsize,
        deleted: Mutex<Vec<String>>,
    }

    struct EmptyStream;

    #[async_trait]
    impl EventStream<ReplicationController> for EmptyStream {
        async fn next_event(&mut self) -> Option<WatchEvent<ReplicationController>> {
            None
        }
    }

    #[async_trait]
    impl ReplicationApi for FakeApi {
        async fn list_controllers(&self) -> Result<Vec<ReplicationController>> {
            Ok(self.controllers.lock().clone())
        }

        async fn watch_controllers(
            &self,
            _from_version: u64,
        ) -> Result<Box<dyn EventStream<ReplicationController>>> {
            Ok(Box::new(EmptyStream))
        }

        async fn update_controller(
            &self,
            rc: ReplicationController,
        ) -> Result<ReplicationController> {
            let mut controllers = self.controllers.lock();
            if let Some(existing) = controllers
                .iter_mut()
                .find(|c| c.metadata.name == rc.metadata.name)
            {
                *existing = rc.clone();
            }
            Ok(rc)
        }

        async fn list_pods(&self, label: &Selector) -> Result<Vec<Pod>> {
            Ok(self
                .pods
                .lock()
                .iter()
                .filter(|p| label.matches(&p.metadata.labels))
                .cloned()
                .collect())
        }

        async fn create_pod(&self, mut pod: Pod) -> Result<Pod> {
            if self.create_failures.load(Ordering::SeqCst) > 0 {
                self.create_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::Unknown("injected create failure".to_string()));
            }
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            let prefix = pod.metadata.generate_name.clone().unwrap_or_default();
            pod.metadata.name = Some(format!("{prefix}{n}"));
            self.pods.lock().push(pod.clone());
            Ok(pod)
        }

        async fn delete_pod(&self, name: &str) -> Result<()> {
            self.deleted.lock().push(name.to_string());
            self.pods
                .lock()
                .retain(|p| p.metadata.name.as_deref() != Some(name));
            Ok(())
        }
    }

    fn controller(replicas: i32) -> ReplicationController {
        let labels: BTreeMap<String, String> = [("app".to_string(), "x".to_string())].into();
        ReplicationController {
            metadata: ObjectMeta {
                name: Some("rc1".to_string()),
                ..ObjectMeta::default()
            },
            spec: ReplicationControllerSpec {
                replicas,
                selector: labels.clone(),
                template: Some(PodTemplateSpec {
                    metadata: ObjectMeta {
                        labels,
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
                }),
            },
            ..ReplicationController::default()
        }
    }

    fn manager(api: Arc<FakeApi>) -> ReplicationManager<FakeApi> {
        let metrics = Metrics::new(&[CONTROLLER_ID]);
        ReplicationManager::new(api, metrics.controller(CONTROLLER_ID))
    }

    #[tokio::test]
    async fn test_scales_up_to_desired() {
        let api = Arc::new(FakeApi::default());
        let rc = controller(3);
        api.controllers.lock().push(rc.clone());

        manager(api.clone()).synchronize(&rc).await.unwrap();

        let pods = api.pods.lock();
        assert_eq!(pods.len(), 3);
        for pod in pods.iter() {
            assert_eq!(pod.metadata.labels.get("app").map(String::as_str), Some("x"));
            assert_eq!(
                pod.metadata.labels.get(CONTROLLER_LABEL).map(String::as_str),
                Some("rc1")
            );
            assert!(pod.metadata.name.as_deref().unwrap().starts_with("rc1-"));
        }
    }

    #[tokio::test]
    async fn test_scales_down_excess() {
        let api = Arc::new(FakeApi::default());
        let rc = controller(1);
        for name in ["a", "b", "c"] {
            api.pods.lock().push(Pod {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    labels: rc.spec.selector.clone(),
                    ..ObjectMeta::default()
                },
                ..Pod::default()
            });
        }

        manager(api.clone()).synchronize(&rc).await.unwrap();
        assert_eq!(api.pods.lock().len(), 1);
        assert_eq!(api.deleted.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_pods_are_replaced() {
        let api = Arc::new(FakeApi::default());
        let rc = controller(2);
        let mut dead = Pod {
            metadata: ObjectMeta {
                name: Some("dead".to_string()),
                labels: rc.spec.selector.clone(),
                ..ObjectMeta::default()
            },
            ..Pod::default()
        };
        dead.status.phase = PodPhase::Failed;
        api.pods.lock().push(dead);

        manager(api.clone()).synchronize(&rc).await.unwrap();
        // Two live pods on top of the failed one it does not count.
        assert_eq!(api.pods.lock().len(), 3);
        assert_eq!(api.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_create_failures_do_not_abort_the_pass() {
        let api = Arc::new(FakeApi::default());
        let rc = controller(3);
        api.create_failures.store(1, Ordering::SeqCst);

        manager(api.clone()).synchronize(&rc).await.unwrap();
        assert_eq!(api.pods.lock().len(), 2);

        // The following full-sync closes the remaining gap.
        manager(api.clone()).synchronize(&rc).await.unwrap();
        assert_eq!(api.pods.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_status_reflects_observed_count() {
        let api = Arc::new(FakeApi::default());
        let rc = controller(2);
        api.controllers.lock().push(rc.clone());

        manager(api.clone()).synchronize(&rc).await.unwrap();
        assert_eq!(api.controllers.lock()[0].status.replicas, 0);

        // After convergence the next pass records the observed count.
        let updated = api.controllers.lock()[0].clone();
        manager(api.clone()).synchronize(&updated).await.unwrap();
        assert_eq!(api.controllers.lock()[0].status.replicas, 2);
    }
}
