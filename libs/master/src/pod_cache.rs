//! Pod-status cache: periodically consolidates what the node agents report
//! into a per-pod phase, and memoizes cloud instance-IP lookups.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use regatta_api::labels::Selector;
use regatta_api::metrics::ControllerMetrics;
use regatta_api::model::{ContainerStatus, Pod, PodPhase, PodStatus, RestartPolicy};
use regatta_api::Result;

use crate::clients::{CloudProvider, NodeAgentClient};
use crate::registry::{MinionRegistry, PodRegistry};

pub const CONTROLLER_ID: &str = "pod-cache";
pub const DEFAULT_UPDATE_PERIOD: Duration = Duration::from_secs(30);
pub const DEFAULT_IP_CACHE_TTL: Duration = Duration::from_secs(60);

/// Derive the pod phase from its restart policy and per-container states.
///
/// Containers the agent has not reported on count as waiting; a terminated
/// container "has run" for the purposes of the always-restart policy.
pub fn derive_phase(
    policy: RestartPolicy,
    info: &BTreeMap<String, ContainerStatus>,
    container_count: usize,
) -> PodPhase {
    let mut running = 0usize;
    let mut waiting = container_count.saturating_sub(info.len());
    let mut succeeded = 0usize;
    let mut failed = 0usize;
    let mut restarts = 0usize;
    for status in info.values() {
        restarts += status.restart_count.max(0) as usize;
        if status.state.running.is_some() {
            running += 1;
        } else if let Some(terminated) = &status.state.terminated {
            if terminated.exit_code == 0 {
                succeeded += 1;
            } else {
                failed += 1;
            }
        } else {
            waiting += 1;
        }
    }
    let terminated = succeeded + failed;

    match policy {
        RestartPolicy::Always => {
            // Everything restarts, so any progress at all means the pod is
            // running; only a pod whose containers have never run is still
            // pending.
            if running > 0 || terminated > 0 || restarts > 0 {
                PodPhase::Running
            } else {
                PodPhase::Pending
            }
        }
        RestartPolicy::Never => {
            if running > 0 {
                PodPhase::Running
            } else if waiting == 0 && terminated == container_count {
                if failed > 0 {
                    PodPhase::Failed
                } else {
                    PodPhase::Succeeded
                }
            } else {
                PodPhase::Pending
            }
        }
        RestartPolicy::OnFailure => {
            if running > 0 || failed > 0 {
                PodPhase::Running
            } else if waiting == 0 && succeeded == container_count {
                PodPhase::Succeeded
            } else {
                PodPhase::Pending
            }
        }
    }
}

/// TTL-bounded memoization of cloud instance-IP lookups.
pub struct IpCache {
    provider: Arc<dyn CloudProvider>,
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<String, (Instant, String)>>,
}

impl IpCache {
    pub fn new(provider: Arc<dyn CloudProvider>, ttl: Duration, capacity: usize) -> IpCache {
        IpCache {
            provider,
            ttl,
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn instance_ip(&self, host: &str) -> Result<String> {
        {
            let entries = self.entries.lock();
            if let Some((stored_at, ip)) = entries.get(host) {
                if stored_at.elapsed() < self.ttl {
                    trace!(msg = "instance ip cache hit", %host);
                    return Ok(ip.clone());
                }
            }
        }

        let ip = self.provider.instance_ip(host).await?;
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity && !entries.contains_key(host) {
            // Evict the stalest entry to stay bounded.
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, (at, _))| *at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(host.to_string(), (Instant::now(), ip.clone()));
        Ok(ip)
    }
}

/// One writer refreshes the map; any number of tasks read it.
pub struct PodCache {
    pods: PodRegistry,
    minions: MinionRegistry,
    agent: Arc<dyn NodeAgentClient>,
    ips: IpCache,
    metrics: Arc<ControllerMetrics>,
    statuses: RwLock<HashMap<String, PodStatus>>,
}

impl PodCache {
    pub fn new(
        pods: PodRegistry,
        minions: MinionRegistry,
        agent: Arc<dyn NodeAgentClient>,
        ips: IpCache,
        metrics: Arc<ControllerMetrics>,
    ) -> PodCache {
        PodCache {
            pods,
            minions,
            agent,
            ips,
            metrics,
            statuses: RwLock::new(HashMap::new()),
        }
    }

    /// Cached status, if the updater has seen the pod.
    pub fn status_of(&self, pod_name: &str) -> Option<PodStatus> {
        self.statuses.read().get(pod_name).cloned()
    }

    /// On-demand refresh for a single pod.
    pub async fn update_pod(&self, pod: &Pod) -> PodStatus {
        let nodes = self.current_nodes().await;
        let status = self.compute_status(pod, &nodes).await;
        self.statuses
            .write()
            .insert(pod.metadata.name_str().to_string(), status.clone());
        status
    }

    /// Full refresh of every known pod.
    pub async fn update_all(&self) -> Result<()> {
        let _timer = self.metrics.reconcile_count_and_measure();
        let pods = self
            .pods
            .list_pods(&Selector::everything(), &Selector::everything())
            .await?;
        let nodes = self.current_nodes().await;

        let mut fresh = HashMap::with_capacity(pods.items.len());
        for pod in &pods.items {
            let status = self.compute_status(pod, &nodes).await;
            fresh.insert(pod.metadata.name_str().to_string(), status);
        }
        *self.statuses.write() = fresh;
        Ok(())
    }

    async fn current_nodes(&self) -> BTreeSet<String> {
        match self.minions.list_minions(&Selector::everything()).await {
            Ok(list) => list
                .items
                .iter()
                .map(|n| n.metadata.name_str().to_string())
                .collect(),
            Err(error) => {
                error!(msg = "failed to list minions", %error);
                BTreeSet::new()
            }
        }
    }

    async fn compute_status(&self, pod: &Pod, nodes: &BTreeSet<String>) -> PodStatus {
        let mut status = pod.status.clone();
        let host = match pod.spec.host.as_deref() {
            None | Some("") => {
                status.phase = PodPhase::Pending;
                return status;
            }
            Some(host) => host,
        };
        if !nodes.contains(host) {
            // The pod's host left the cluster out from under it.
            status.phase = PodPhase::Failed;
            return status;
        }

        status.host = Some(host.to_string());
        match self.ips.instance_ip(host).await {
            Ok(ip) => status.host_ip = Some(ip),
            Err(error) => debug!(msg = "instance ip lookup failed", %host, %error),
        }

        match self
            .agent
            .pod_info(host, pod.metadata.name_str())
            .await
        {
            Ok(info) => {
                status.phase =
                    derive_phase(pod.spec.restart_policy, &info, pod.spec.containers.len());
                status.info = info;
            }
            Err(error) => {
                debug!(msg = "agent has no status yet", %host,
                       pod = %pod.metadata.name_str(), %error);
                status.phase = PodPhase::Pending;
            }
        }
        status
    }

    pub async fn run(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        info!(msg = "starting pod-status cache");
        self.metrics.ready_set(1);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(msg = "pod-status cache shutting down");
                    return;
                }
                _ = tokio::time::sleep(period) => {}
            }
            if let Err(error) = self.update_all().await {
                self.metrics.reconcile_failure_inc();
                error!(msg = "pod-status refresh failed", %error);
            }
        }
    }
}
