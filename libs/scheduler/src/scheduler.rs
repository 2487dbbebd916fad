//! The scheduling loop: pop an unassigned pod, filter and score nodes,
//! write the binding, back off per pod when nothing fits.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use regatta_api::labels::Selector;
use regatta_api::metrics::ControllerMetrics;
use regatta_api::model::{Binding, Event, Node, ObjectReference, Pod, Service};
use regatta_api::{Error, Result};
use regatta_client::Client;
use regatta_store::{EventStream, EventType};

use crate::backoff::BackoffTable;
use crate::fifo::WatchFifo;
use crate::predicates::{FitPredicate, Snapshot};
use crate::priorities::PriorityConfig;

pub const CONTROLLER_ID: &str = "scheduler";
const SOURCE: &str = "scheduler";

/// The slice of the API the scheduler needs. The HTTP [`Client`]
/// implements it; tests drive the loop with in-memory fakes.
#[async_trait]
pub trait SchedulerApi: Send + Sync + 'static {
    async fn watch_unassigned_pods(&self, from_version: u64)
        -> Result<Box<dyn EventStream<Pod>>>;

    async fn list_pods(&self) -> Result<Vec<Pod>>;

    async fn list_minions(&self) -> Result<Vec<Node>>;

    async fn list_services(&self) -> Result<Vec<Service>>;

    async fn create_binding(&self, binding: Binding) -> Result<()>;

    async fn create_event(&self, event: Event) -> Result<()>;
}

fn unassigned_selector() -> Selector {
    // Pods whose host field is empty are the scheduler's inbox.
    "spec.host=".parse().expect("static selector parses")
}

fn reconnect_backoff() -> impl Iterator<Item = std::time::Duration> {
    ExponentialBuilder::default()
        .with_max_delay(std::time::Duration::from_secs(30))
        .without_max_times()
        .build()
}

#[async_trait]
impl SchedulerApi for Client {
    async fn watch_unassigned_pods(
        &self,
        from_version: u64,
    ) -> Result<Box<dyn EventStream<Pod>>> {
        Ok(Box::new(
            self.watch_pods(&Selector::everything(), &unassigned_selector(), from_version)
                .await?,
        ))
    }

    async fn list_pods(&self) -> Result<Vec<Pod>> {
        Ok(Client::list_pods(self, &Selector::everything(), &Selector::everything())
            .await?
            .items)
    }

    async fn list_minions(&self) -> Result<Vec<Node>> {
        Ok(Client::list_minions(self).await?.items)
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        Ok(Client::list_services(self, &Selector::everything())
            .await?
            .items)
    }

    async fn create_binding(&self, binding: Binding) -> Result<()> {
        Client::create_binding(self, binding).await
    }

    async fn create_event(&self, event: Event) -> Result<()> {
        Client::create_event(self, event).await?;
        Ok(())
    }
}

/// Filter-then-score placement over a cluster snapshot. The random source
/// is injected so a seeded run reproduces its choices exactly.
pub struct GenericScheduler {
    predicates: Vec<Arc<dyn FitPredicate>>,
    priorities: Vec<PriorityConfig>,
    rng: Mutex<StdRng>,
}

impl GenericScheduler {
    pub fn new(
        predicates: Vec<Arc<dyn FitPredicate>>,
        priorities: Vec<PriorityConfig>,
        rng: StdRng,
    ) -> GenericScheduler {
        GenericScheduler {
            predicates,
            priorities,
            rng: Mutex::new(rng),
        }
    }

    /// The chosen host for `pod`, or an error when no node survives the
    /// predicates.
    pub fn schedule(&self, pod: &Pod, snapshot: &Snapshot) -> Result<String> {
        let feasible: Vec<&Node> = snapshot
            .nodes
            .iter()
            .filter(|node| {
                self.predicates
                    .iter()
                    .all(|predicate| predicate.fits(pod, node, snapshot))
            })
            .collect();
        if feasible.is_empty() {
            return Err(Error::Unknown(format!(
                "failed to find fit for pod {:?}",
                pod.metadata.name_str()
            )));
        }

        let mut totals: HashMap<&str, i64> = feasible
            .iter()
            .map(|n| (n.metadata.name_str(), 0))
            .collect();
        for config in &self.priorities {
            let scores = config.function.scores(pod, &feasible, snapshot);
            for (host, score) in scores {
                if let Some(total) = totals.get_mut(host.as_str()) {
                    *total += score * config.weight;
                }
            }
        }

        let best = totals.values().copied().max().unwrap_or(0);
        // Ties break uniformly at random; feasible-node order keeps the
        // winner set stable for a fixed input.
        let winners: Vec<&str> = feasible
            .iter()
            .map(|n| n.metadata.name_str())
            .filter(|name| totals.get(name) == Some(&best))
            .collect();
        let choice = winners[self.rng.lock().gen_range(0..winners.len())];
        Ok(choice.to_string())
    }
}

pub struct Scheduler<A: SchedulerApi> {
    api: Arc<A>,
    algorithm: GenericScheduler,
    fifo: Arc<WatchFifo<Pod>>,
    backoff: BackoffTable,
    metrics: Arc<ControllerMetrics>,
}

impl<A: SchedulerApi> Scheduler<A> {
    pub fn new(
        api: Arc<A>,
        algorithm: GenericScheduler,
        backoff: BackoffTable,
        metrics: Arc<ControllerMetrics>,
    ) -> Scheduler<A> {
        Scheduler {
            api,
            algorithm,
            fifo: Arc::new(WatchFifo::new()),
            backoff,
            metrics,
        }
    }

    /// Feed the FIFO from the watch fabric and place pods until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(msg = "starting scheduler");
        self.spawn_watch(cancel.clone());
        self.metrics.ready_set(1);
        loop {
            let pod = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(msg = "scheduler shutting down");
                    return;
                }
                pod = self.fifo.pop() => pod,
            };
            self.schedule_one(pod).await;
        }
    }

    fn spawn_watch(self: &Arc<Self>, cancel: CancellationToken) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut from_version: u64 = 0;
            let mut reconnect = reconnect_backoff();
            loop {
                if cancel.is_cancelled() {
                    return;
                }
                let mut stream = match scheduler.api.watch_unassigned_pods(from_version).await {
                    Ok(stream) => {
                        reconnect = reconnect_backoff();
                        stream
                    }
                    Err(error) => {
                        // safe unwrap: the policy never exhausts
                        let delay = reconnect.next().unwrap();
                        error!(msg = "pod watch failed, retrying", %error, ?delay);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                };
                while let Some(event) = stream.next_event().await {
                    from_version = from_version.max(event.resource_version() + 1);
                    let name = event.object.metadata.name_str().to_string();
                    match event.event_type {
                        EventType::Deleted => scheduler.fifo.delete(&name),
                        _ if event.object.is_unassigned() => {
                            scheduler.fifo.add(&name, event.object)
                        }
                        // A bound pod still in the queue is no longer ours.
                        _ => scheduler.fifo.delete(&name),
                    }
                }
                debug!(msg = "pod watch closed, restarting", from_version);
            }
        });
    }

    async fn schedule_one(&self, pod: Pod) {
        let _timer = self.metrics.reconcile_count_and_measure();
        let name = pod.metadata.name_str().to_string();
        match self.attempt(&pod).await {
            Ok(host) => {
                info!(msg = "scheduled pod", pod = %name, %host);
                self.backoff.reset(&name);
            }
            Err(error) => {
                self.metrics.reconcile_failure_inc();
                warn!(msg = "failed to schedule pod", pod = %name, %error);
                self.record_failure(&pod, &error).await;
                self.retry_later(pod).await;
            }
        }
    }

    async fn attempt(&self, pod: &Pod) -> Result<String> {
        let snapshot = Snapshot {
            nodes: self.api.list_minions().await?,
            pods: self.api.list_pods().await?,
            services: self.api.list_services().await?,
        };
        let host = self.algorithm.schedule(pod, &snapshot)?;
        self.api
            .create_binding(Binding {
                pod_id: pod.metadata.name_str().to_string(),
                host: host.clone(),
                ..Binding::default()
            })
            .await?;
        Ok(host)
    }

    async fn record_failure(&self, pod: &Pod, error: &Error) {
        let event = Event {
            involved_object: ObjectReference {
                kind: "Pod".to_string(),
                name: pod.metadata.name_str().to_string(),
                namespace: pod.metadata.namespace_or_default().to_string(),
                uid: pod.metadata.uid.clone().unwrap_or_default(),
                ..ObjectReference::default()
            },
            condition: "Unschedulable".to_string(),
            reason: "NoFit".to_string(),
            message: error.to_string(),
            source: SOURCE.to_string(),
            ..Event::default()
        };
        if let Err(error) = self.api.create_event(event).await {
            debug!(msg = "failed to record scheduling event", %error);
        }
    }

    /// Requeue after the pod's exponential delay.
    async fn retry_later(&self, pod: Pod) {
        let name = pod.metadata.name_str().to_string();
        let delay = self.backoff.next_delay(&name);
        debug!(msg = "requeueing pod", pod = %name, ?delay);
        let fifo = self.fifo.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fifo.add(&name, pod);
        });
    }

    /// Test and warm-start hook: push a pod straight into the queue.
    pub fn enqueue(&self, pod: Pod) {
        let name = pod.metadata.name_str().to_string();
        self.fifo.add(&name, pod);
    }
}
