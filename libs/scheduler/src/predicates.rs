//! Phase one: boolean node filters.

use std::collections::BTreeSet;

use regatta_api::labels::subset;
use regatta_api::model::{Node, Pod, Service, RESOURCE_CPU, RESOURCE_MEMORY};

/// Cluster state a scheduling pass works from, listed once per pod.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub nodes: Vec<Node>,
    pub pods: Vec<Pod>,
    pub services: Vec<Service>,
}

impl Snapshot {
    /// Pods currently placed on `host`.
    pub fn pods_on<'a>(&'a self, host: &str) -> impl Iterator<Item = &'a Pod> {
        self.pods
            .iter()
            .filter(move |p| p.spec.host.as_deref() == Some(host))
    }
}

pub trait FitPredicate: Send + Sync {
    fn name(&self) -> &'static str;

    fn fits(&self, pod: &Pod, node: &Node, snapshot: &Snapshot) -> bool;
}

fn host_ports(pod: &Pod) -> BTreeSet<i32> {
    pod.spec
        .containers
        .iter()
        .flat_map(|c| &c.ports)
        .filter_map(|p| p.host_port)
        .collect()
}

/// No host port of the candidate may collide with a pod already on the
/// node.
pub struct PodFitsPorts;

impl FitPredicate for PodFitsPorts {
    fn name(&self) -> &'static str {
        "PodFitsPorts"
    }

    fn fits(&self, pod: &Pod, node: &Node, snapshot: &Snapshot) -> bool {
        let wanted = host_ports(pod);
        if wanted.is_empty() {
            return true;
        }
        let node_name = node.metadata.name_str();
        !snapshot
            .pods_on(node_name)
            .flat_map(|existing| host_ports(existing))
            .any(|port| wanted.contains(&port))
    }
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

fn capacity_millis(node: &Node) -> (i64, i64) {
    let get = |name: &str| {
        node.spec
            .capacity
            .get(name)
            .map(|q| q.milli_value())
            .unwrap_or(0)
    };
    (get(RESOURCE_CPU), get(RESOURCE_MEMORY))
}

/// Requests of placed pods plus the candidate must fit the node's declared
/// capacity. A node that declares no capacity accepts everything.
pub struct PodFitsResources;

impl FitPredicate for PodFitsResources {
    fn name(&self) -> &'static str {
        "PodFitsResources"
    }

    fn fits(&self, pod: &Pod, node: &Node, snapshot: &Snapshot) -> bool {
        let (cap_cpu, cap_memory) = capacity_millis(node);
        if cap_cpu == 0 && cap_memory == 0 {
            return true;
        }
        let (mut used_cpu, mut used_memory) = requested_millis(pod);
        for existing in snapshot.pods_on(node.metadata.name_str()) {
            let (cpu, memory) = requested_millis(existing);
            used_cpu += cpu;
            used_memory += memory;
        }
        (cap_cpu == 0 || used_cpu <= cap_cpu) && (cap_memory == 0 || used_memory <= cap_memory)
    }
}

fn host_dir_paths(pod: &Pod) -> BTreeSet<&str> {
    pod.spec
        .volumes
        .iter()
        .filter_map(|v| v.source.host_dir.as_ref())
        .map(|h| h.path.as_str())
        .collect()
}

/// A host directory is exclusive to one pod per node.
pub struct NoDiskConflict;

impl FitPredicate for NoDiskConflict {
    fn name(&self) -> &'static str {
        "NoDiskConflict"
    }

    fn fits(&self, pod: &Pod, node: &Node, snapshot: &Snapshot) -> bool {
        let wanted = host_dir_paths(pod);
        if wanted.is_empty() {
            return true;
        }
        !snapshot
            .pods_on(node.metadata.name_str())
            .flat_map(|existing| {
                existing
                    .spec
                    .volumes
                    .iter()
                    .filter_map(|v| v.source.host_dir.as_ref())
            })
            .any(|dir| wanted.contains(dir.path.as_str()))
    }
}

/// The pod's node-selector labels must be a subset of the node's labels.
pub struct MatchNodeSelector;

impl FitPredicate for MatchNodeSelector {
    fn name(&self) -> &'static str {
        "MatchNodeSelector"
    }

    fn fits(&self, pod: &Pod, node: &Node, _snapshot: &Snapshot) -> bool {
        subset(&pod.spec.node_selector, &node.metadata.labels)
    }
}

/// A pod naming an explicit host only fits that host.
pub struct PodFitsHost;

impl FitPredicate for PodFitsHost {
    fn name(&self) -> &'static str {
        "PodFitsHost"
    }

    fn fits(&self, pod: &Pod, node: &Node, _snapshot: &Snapshot) -> bool {
        match pod.spec.host.as_deref() {
            None | Some("") => true,
            Some(host) => host == node.metadata.name_str(),
        }
    }
}

/// Require (or forbid) a fixed set of label keys on every candidate node.
pub struct NodeLabelPresence {
    labels: Vec<String>,
    presence: bool,
}

impl NodeLabelPresence {
    pub fn new(labels: Vec<String>, presence: bool) -> NodeLabelPresence {
        NodeLabelPresence { labels, presence }
    }
}

impl FitPredicate for NodeLabelPresence {
    fn name(&self) -> &'static str {
        "NodeLabelPresence"
    }

    fn fits(&self, _pod: &Pod, node: &Node, _snapshot: &Snapshot) -> bool {
        self.labels
            .iter()
            .all(|key| node.metadata.labels.contains_key(key) == self.presence)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use regatta_api::meta::ObjectMeta;
    use regatta_api::model::{Container, NodeSpec, PodSpec, Port};
    use regatta_api::quantity::{Format, Quantity};

    pub(crate) fn node(name: &str, cpu_milli: i64, memory: i64) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            spec: NodeSpec {
                capacity: [
                    (RESOURCE_CPU.to_string(), Quantity::from_milli(cpu_milli)),
                    (
                        RESOURCE_MEMORY.to_string(),
                        Quantity::from_value(memory, Format::BinarySi),
                    ),
                ]
                .into(),
            },
            ..Node::default()
        }
    }

    pub(crate) fn pod_with_port(name: &str, host: Option<&str>, host_port: i32) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            spec: PodSpec {
                containers: vec![Container {
                    name: "c".to_string(),
                    image: "i".to_string(),
                    ports: vec![Port {
                        host_port: Some(host_port),
                        container_port: host_port,
                        ..Port::default()
                    }],
                    ..Container::default()
                }],
                host: host.map(String::from),
                ..PodSpec::default()
            },
            ..Pod::default()
        }
    }

    pub(crate) fn pod_with_resources(name: &str, host: Option<&str>, cpu: i64, memory: i64) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            spec: PodSpec {
                containers: vec![Container {
                    name: "c".to_string(),
                    image: "i".to_string(),
                    cpu: Some(Quantity::from_milli(cpu)),
                    memory: Some(Quantity::from_value(memory, Format::BinarySi)),
                    ..Container::default()
                }],
                host: host.map(String::from),
                ..PodSpec::default()
            },
            ..Pod::default()
        }
    }

    #[test]
    fn test_pod_fits_ports() {
        let snapshot = Snapshot {
            nodes: vec![node("n1", 4000, 1 << 30)],
            pods: vec![pod_with_port("existing", Some("n1"), 80)],
            services: vec![],
        };
        let predicate = PodFitsPorts;
        assert!(!predicate.fits(
            &pod_with_port("new", None, 80),
            &snapshot.nodes[0],
            &snapshot
        ));
        assert!(predicate.fits(
            &pod_with_port("new", None, 8080),
            &snapshot.nodes[0],
            &snapshot
        ));
    }

    #[test]
    fn test_pod_fits_resources() {
        let snapshot = Snapshot {
            nodes: vec![node("n1", 1000, 1 << 30)],
            pods: vec![pod_with_resources("existing", Some("n1"), 600, 512 << 20)],
            services: vec![],
        };
        let predicate = PodFitsResources;
        assert!(predicate.fits(
            &pod_with_resources("small", None, 400, 256 << 20),
            &snapshot.nodes[0],
            &snapshot
        ));
        assert!(!predicate.fits(
            &pod_with_resources("big", None, 500, 256 << 20),
            &snapshot.nodes[0],
            &snapshot
        ));
    }

    #[test]
    fn test_match_node_selector() {
        let mut labeled = node("n1", 0, 0);
        labeled
            .metadata
            .labels
            .insert("disk".to_string(), "ssd".to_string());
        let mut pod = pod_with_port("p", None, 80);
        pod.spec.node_selector = [("disk".to_string(), "ssd".to_string())].into();

        let predicate = MatchNodeSelector;
        let snapshot = Snapshot::default();
        assert!(predicate.fits(&pod, &labeled, &snapshot));
        assert!(!predicate.fits(&pod, &node("n2", 0, 0), &snapshot));
    }

    #[test]
    fn test_pod_fits_host() {
        let predicate = PodFitsHost;
        let snapshot = Snapshot::default();
        let mut pod = pod_with_port("p", None, 80);
        assert!(predicate.fits(&pod, &node("n1", 0, 0), &snapshot));
        pod.spec.host = Some("n2".to_string());
        assert!(!predicate.fits(&pod, &node("n1", 0, 0), &snapshot));
        assert!(predicate.fits(&pod, &node("n2", 0, 0), &snapshot));
    }

    #[test]
    fn test_node_label_presence() {
        let mut labeled = node("n1", 0, 0);
        labeled
            .metadata
            .labels
            .insert("region".to_string(), "east".to_string());
        let pod = pod_with_port("p", None, 80);
        let snapshot = Snapshot::default();

        let require = NodeLabelPresence::new(vec!["region".to_string()], true);
        assert!(require.fits(&pod, &labeled, &snapshot));
        assert!(!require.fits(&pod, &node("n2", 0, 0), &snapshot));

        let forbid = NodeLabelPresence::new(vec!["region".to_string()], false);
        assert!(!forbid.fits(&pod, &labeled, &snapshot));
    }

    #[test]
    fn test_no_disk_conflict() {
        use regatta_api::model::{HostDir, Volume, VolumeSource};
        let mut existing = pod_with_port("existing", Some("n1"), 80);
        existing.spec.volumes = vec![Volume {
            name: "data".to_string(),
            source: VolumeSource {
                host_dir: Some(HostDir {
                    path: "/mnt/data".to_string(),
                }),
                ..VolumeSource::default()
            },
        }];
        let snapshot = Snapshot {
            nodes: vec![node("n1", 0, 0)],
            pods: vec![existing.clone()],
            services: vec![],
        };

        let mut wants_same = pod_with_port("new", None, 8080);
        wants_same.spec.volumes = existing.spec.volumes.clone();
        let predicate = NoDiskConflict;
        assert!(!predicate.fits(&wants_same, &snapshot.nodes[0], &snapshot));
        assert!(predicate.fits(
            &pod_with_port("plain", None, 8080),
            &snapshot.nodes[0],
            &snapshot
        ));
    }
}
