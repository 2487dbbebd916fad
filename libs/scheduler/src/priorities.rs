//! Phase two: node scorers. Each returns 0..=10 per feasible node; the
//! final ranking is the weighted sum across the configured functions.

use std::collections::HashMap;
use std::sync::Arc;

use regatta_api::labels::Selector;
use regatta_api::model::{Node, Pod, RESOURCE_CPU, RESOURCE_MEMORY};

use crate::predicates::Snapshot;

pub trait PriorityFunction: Send + Sync {
    fn name(&self) -> &'static str;

    /// Score every node in `feasible`, 0 (worst) to 10 (best).
    fn scores(&self, pod: &Pod, feasible: &[&Node], snapshot: &Snapshot)
        -> HashMap<String, i64>;
}

/// A scorer and its weight in the final sum.
#[derive(Clone)]
pub struct PriorityConfig {
    pub function: Arc<dyn PriorityFunction>,
    pub weight: i64,
}

fn requested_millis(pod: &Pod) -> (i64, i64) {
    let cpu = pod
        .spec
        .containers
        .iter()
        .filter_map(|c| c.cpu)
        .map(|q| q.milli_value())
        .sum();
    let memory = pod
        .spec
        .containers
        .iter()
        .filter_map(|c| c.memory)
        .map(|q| q.milli_value())
        .sum();
    (cpu, memory)
}

/// Favor nodes with the most free capacity after placing the pod:
/// `(capacity - requested) / capacity` averaged over CPU and memory,
/// scaled to 0..=10.
pub struct LeastRequested;

fn fraction_score(capacity: i64, requested: i64) -> i64 {
    if capacity <= 0 {
        return 0;
    }
    let free = (capacity - requested).max(0);
    free * 10 / capacity
}

impl PriorityFunction for LeastRequested {
    fn name(&self) -> &'static str {
        "LeastRequested"
    }

    fn scores(
        &self,
        pod: &Pod,
        feasible: &[&Node],
        snapshot: &Snapshot,
    ) -> HashMap<String, i64> {
        let (pod_cpu, pod_memory) = requested_millis(pod);
        feasible
            .iter()
            .map(|node| {
                let name = node.metadata.name_str();
                let (mut cpu, mut memory) = (pod_cpu, pod_memory);
                for existing in snapshot.pods_on(name) {
                    let (c, m) = requested_millis(existing);
                    cpu += c;
                    memory += m;
                }
                let cap = |resource: &str| {
                    node.spec
                        .capacity
                        .get(resource)
                        .map(|q| q.milli_value())
                        .unwrap_or(0)
                };
                let score = (fraction_score(cap(RESOURCE_CPU), cpu)
                    + fraction_score(cap(RESOURCE_MEMORY), memory))
                    / 2;
                (name.to_string(), score)
            })
            .collect()
    }
}

/// Favor nodes carrying fewer pods with the candidate's labels, normalized
/// against the busiest node.
pub struct Spreading;

impl PriorityFunction for Spreading {
    fn name(&self) -> &'static str {
        "Spreading"
    }

    fn scores(
        &self,
        pod: &Pod,
        feasible: &[&Node],
        snapshot: &Snapshot,
    ) -> HashMap<String, i64> {
        let selector = Selector::from_labels(&pod.metadata.labels);
        let counts: HashMap<String, i64> = feasible
            .iter()
            .map(|node| {
                let name = node.metadata.name_str();
                let count = snapshot
                    .pods_on(name)
                    .filter(|p| selector.matches(&p.metadata.labels))
                    .count() as i64;
                (name.to_string(), count)
            })
            .collect();
        let max = counts.values().copied().max().unwrap_or(0);
        counts
            .into_iter()
            .map(|(name, count)| {
                let score = if max == 0 { 10 } else { (max - count) * 10 / max };
                (name, score)
            })
            .collect()
    }
}

/// When the pod belongs to a service, favor nodes already running that
/// service's pods. The configured label keys gate the lookup: a pod that
/// already carries all of them placed itself, so other pods are not
/// consulted.
pub struct ServiceAffinity {
    label_keys: Vec<String>,
}

impl ServiceAffinity {
    pub fn new(label_keys: Vec<String>) -> ServiceAffinity {
        ServiceAffinity { label_keys }
    }
}

impl PriorityFunction for ServiceAffinity {
    fn name(&self) -> &'static str {
        "ServiceAffinity"
    }

    fn scores(
        &self,
        pod: &Pod,
        feasible: &[&Node],
        snapshot: &Snapshot,
    ) -> HashMap<String, i64> {
        let gated = !self.label_keys.is_empty()
            && self
                .label_keys
                .iter()
                .all(|key| pod.metadata.labels.contains_key(key));
        if gated {
            return feasible
                .iter()
                .map(|n| (n.metadata.name_str().to_string(), 0))
                .collect();
        }

        let service_selectors: Vec<Selector> = snapshot
            .services
            .iter()
            .map(|svc| Selector::from_labels(&svc.spec.selector))
            .filter(|sel| !sel.is_empty() && sel.matches(&pod.metadata.labels))
            .collect();

        feasible
            .iter()
            .map(|node| {
                let name = node.metadata.name_str();
                let hosts_peer = !service_selectors.is_empty()
                    && snapshot.pods_on(name).any(|p| {
                        service_selectors
                            .iter()
                            .any(|sel| sel.matches(&p.metadata.labels))
                    });
                (name.to_string(), if hosts_peer { 10 } else { 0 })
            })
            .collect()
    }
}

/// Constant baseline.
pub struct Equal;

impl PriorityFunction for Equal {
    fn name(&self) -> &'static str {
        "Equal"
    }

    fn scores(
        &self,
        _pod: &Pod,
        feasible: &[&Node],
        _snapshot: &Snapshot,
    ) -> HashMap<String, i64> {
        feasible
            .iter()
            .map(|n| (n.metadata.name_str().to_string(), 1))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::predicates::test::{node, pod_with_resources};

    #[test]
    fn test_least_requested_prefers_idle_nodes() {
        let snapshot = Snapshot {
            nodes: vec![node("busy", 1000, 1 << 30), node("idle", 1000, 1 << 30)],
            pods: vec![pod_with_resources("p0", Some("busy"), 800, 512 << 20)],
            services: vec![],
        };
        let feasible: Vec<&Node> = snapshot.nodes.iter().collect();
        let scores = LeastRequested.scores(
            &pod_with_resources("new", None, 100, 128 << 20),
            &feasible,
            &snapshot,
        );
        assert!(scores["idle"] > scores["busy"]);
    }

    #[test]
    fn test_spreading_prefers_fewer_peers() {
        let mut peer = pod_with_resources("peer", Some("crowded"), 0, 0);
        peer.metadata
            .labels
            .insert("app".to_string(), "web".to_string());
        let snapshot = Snapshot {
            nodes: vec![node("crowded", 0, 0), node("empty", 0, 0)],
            pods: vec![peer],
            services: vec![],
        };
        let feasible: Vec<&Node> = snapshot.nodes.iter().collect();

        let mut candidate = pod_with_resources("new", None, 0, 0);
        candidate
            .metadata
            .labels
            .insert("app".to_string(), "web".to_string());
        let scores = Spreading.scores(&candidate, &feasible, &snapshot);
        assert_eq!(scores["crowded"], 0);
        assert_eq!(scores["empty"], 10);
    }

    #[test]
    fn test_service_affinity_favors_peer_hosts() {
        use regatta_api::model::{Service, ServiceSpec};
        let mut peer = pod_with_resources("peer", Some("n1"), 0, 0);
        peer.metadata
            .labels
            .insert("app".to_string(), "web".to_string());
        let snapshot = Snapshot {
            nodes: vec![node("n1", 0, 0), node("n2", 0, 0)],
            pods: vec![peer],
            services: vec![Service {
                spec: ServiceSpec {
                    port: 80,
                    selector: [("app".to_string(), "web".to_string())].into(),
                    ..ServiceSpec::default()
                },
                ..Service::default()
            }],
        };
        let feasible: Vec<&Node> = snapshot.nodes.iter().collect();

        let mut candidate = pod_with_resources("new", None, 0, 0);
        candidate
            .metadata
            .labels
            .insert("app".to_string(), "web".to_string());
        let affinity = ServiceAffinity::new(vec![]);
        let scores = affinity.scores(&candidate, &feasible, &snapshot);
        assert_eq!(scores["n1"], 10);
        assert_eq!(scores["n2"], 0);

        // A pod already carrying every affinity label keeps its own
        // counsel.
        let gated = ServiceAffinity::new(vec!["app".to_string()]);
        let scores = gated.scores(&candidate, &feasible, &snapshot);
        assert_eq!(scores["n1"], 0);
        assert_eq!(scores["n2"], 0);
    }
}
