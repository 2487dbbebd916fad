//! Conversions between the canonical model and the `v1alpha1` wire shapes.
//!
//! Conversions are lossless for every field `v1alpha1` defines. Fields the
//! old wire never carried (`generateName`, `nodeSelector`, distinct
//! spec/status hosts) do not survive a trip through it.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::meta::ObjectMeta;
use crate::model;
use crate::quantity::{Format, Quantity};
use crate::v1alpha1 as old;

const MANIFEST_VERSION: &str = "v1alpha1";

fn meta_to_base(meta: &ObjectMeta) -> Result<old::JsonBase> {
    let resource_version = match meta.resource_version.as_deref() {
        None | Some("") => None,
        Some(v) => Some(v.parse::<u64>().map_err(|_| {
            Error::Decode(format!("resource version {v:?} is not an integer"))
        })?),
    };
    Ok(old::JsonBase {
        id: meta.name.clone(),
        uid: meta.uid.clone(),
        namespace: meta.namespace.clone(),
        creation_timestamp: meta.creation_timestamp,
        self_link: meta.self_link.clone(),
        resource_version,
        annotations: meta.annotations.clone(),
    })
}

fn base_to_meta(base: &old::JsonBase, labels: &BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: base.id.clone(),
        generate_name: None,
        namespace: base.namespace.clone(),
        uid: base.uid.clone(),
        resource_version: base.resource_version.map(|v| v.to_string()),
        creation_timestamp: base.creation_timestamp,
        self_link: base.self_link.clone(),
        labels: labels.clone(),
        annotations: base.annotations.clone(),
    }
}

fn container_to_old(c: &model::Container) -> old::Container {
    old::Container {
        name: c.name.clone(),
        image: c.image.clone(),
        command: c.command.clone(),
        working_dir: c.working_dir.clone(),
        ports: c.ports.clone(),
        env: c.env.clone(),
        cpu: c.cpu.map(|q| q.milli_value()),
        memory: c.memory.map(|q| q.value()),
        volume_mounts: c.volume_mounts.clone(),
        liveness_probe: c.liveness_probe.clone(),
        lifecycle: c.lifecycle.clone(),
        image_pull_policy: c.image_pull_policy,
        privileged: c.privileged,
    }
}

fn container_from_old(c: &old::Container) -> model::Container {
    model::Container {
        name: c.name.clone(),
        image: c.image.clone(),
        command: c.command.clone(),
        working_dir: c.working_dir.clone(),
        ports: c.ports.clone(),
        env: c.env.clone(),
        cpu: c.cpu.map(Quantity::from_milli),
        memory: c.memory.map(|v| Quantity::from_value(v, Format::BinarySi)),
        volume_mounts: c.volume_mounts.clone(),
        liveness_probe: c.liveness_probe.clone(),
        lifecycle: c.lifecycle.clone(),
        image_pull_policy: c.image_pull_policy,
        privileged: c.privileged,
    }
}

fn restart_policy_to_old(p: model::RestartPolicy) -> old::RestartPolicy {
    match p {
        model::RestartPolicy::Always => old::RestartPolicy {
            always: Some(old::RestartPolicyAlways {}),
            ..old::RestartPolicy::default()
        },
        model::RestartPolicy::OnFailure => old::RestartPolicy {
            on_failure: Some(old::RestartPolicyOnFailure {}),
            ..old::RestartPolicy::default()
        },
        model::RestartPolicy::Never => old::RestartPolicy {
            never: Some(old::RestartPolicyNever {}),
            ..old::RestartPolicy::default()
        },
    }
}

fn restart_policy_from_old(p: &old::RestartPolicy) -> model::RestartPolicy {
    if p.never.is_some() {
        model::RestartPolicy::Never
    } else if p.on_failure.is_some() {
        model::RestartPolicy::OnFailure
    } else {
        model::RestartPolicy::Always
    }
}

fn manifest_to_old(id: &str, spec: &model::PodSpec) -> old::ContainerManifest {
    old::ContainerManifest {
        version: MANIFEST_VERSION.to_string(),
        id: Some(id.to_string()),
        containers: spec.containers.iter().map(container_to_old).collect(),
        volumes: spec.volumes.clone(),
        restart_policy: restart_policy_to_old(spec.restart_policy),
    }
}

fn spec_from_manifest(manifest: &old::ContainerManifest) -> model::PodSpec {
    model::PodSpec {
        containers: manifest.containers.iter().map(container_from_old).collect(),
        volumes: manifest.volumes.clone(),
        restart_policy: restart_policy_from_old(&manifest.restart_policy),
        host: None,
        node_selector: BTreeMap::new(),
    }
}

pub fn pod_to_old(pod: &model::Pod) -> Result<old::Pod> {
    Ok(old::Pod {
        base: meta_to_base(&pod.metadata)?,
        labels: pod.metadata.labels.clone(),
        desired_state: old::PodState {
            manifest: manifest_to_old(pod.metadata.name_str(), &pod.spec),
            ..old::PodState::default()
        },
        current_state: old::PodState {
            manifest: old::ContainerManifest::default(),
            status: Some(pod.status.phase),
            host: pod.spec.host.clone().or_else(|| pod.status.host.clone()),
            host_ip: pod.status.host_ip.clone(),
            pod_ip: pod.status.pod_ip.clone(),
            info: pod.status.info.clone(),
        },
    })
}

pub fn pod_from_old(pod: &old::Pod) -> model::Pod {
    let mut spec = spec_from_manifest(&pod.desired_state.manifest);
    spec.host = pod.current_state.host.clone();
    model::Pod {
        metadata: base_to_meta(&pod.base, &pod.labels),
        spec,
        status: model::PodStatus {
            phase: pod.current_state.status.unwrap_or_default(),
            host: pod.current_state.host.clone(),
            host_ip: pod.current_state.host_ip.clone(),
            pod_ip: pod.current_state.pod_ip.clone(),
            info: pod.current_state.info.clone(),
        },
    }
}

pub fn controller_to_old(
    rc: &model::ReplicationController,
) -> Result<old::ReplicationController> {
    let pod_template = rc.spec.template.as_ref().map(|t| old::PodTemplate {
        desired_state: old::PodState {
            manifest: manifest_to_old("", &t.spec),
            ..old::PodState::default()
        },
        labels: t.metadata.labels.clone(),
    });
    Ok(old::ReplicationController {
        base: meta_to_base(&rc.metadata)?,
        labels: rc.metadata.labels.clone(),
        desired_state: old::ReplicationControllerState {
            replicas: rc.spec.replicas,
            replica_selector: rc.spec.selector.clone(),
            pod_template,
        },
        current_state: old::ReplicationControllerState {
            replicas: rc.status.replicas,
            ..old::ReplicationControllerState::default()
        },
    })
}

pub fn controller_from_old(rc: &old::ReplicationController) -> model::ReplicationController {
    let template = rc.desired_state.pod_template.as_ref().map(|t| {
        model::PodTemplateSpec {
            metadata: ObjectMeta {
                labels: t.labels.clone(),
                ..ObjectMeta::default()
            },
            spec: spec_from_manifest(&t.desired_state.manifest),
        }
    });
    model::ReplicationController {
        metadata: base_to_meta(&rc.base, &rc.labels),
        spec: model::ReplicationControllerSpec {
            replicas: rc.desired_state.replicas,
            selector: rc.desired_state.replica_selector.clone(),
            template,
        },
        status: model::ReplicationControllerStatus {
            replicas: rc.current_state.replicas,
        },
    }
}

pub fn service_to_old(svc: &model::Service) -> Result<old::Service> {
    Ok(old::Service {
        base: meta_to_base(&svc.metadata)?,
        labels: svc.metadata.labels.clone(),
        port: svc.spec.port,
        protocol: svc.spec.protocol,
        selector: svc.spec.selector.clone(),
        container_port: svc.spec.container_port.clone(),
        create_external_load_balancer: svc.spec.create_external_load_balancer,
        portal_ip: svc.spec.portal_ip.clone(),
    })
}

pub fn service_from_old(svc: &old::Service) -> model::Service {
    model::Service {
        metadata: base_to_meta(&svc.base, &svc.labels),
        spec: model::ServiceSpec {
            port: svc.port,
            protocol: svc.protocol,
            selector: svc.selector.clone(),
            container_port: svc.container_port.clone(),
            create_external_load_balancer: svc.create_external_load_balancer,
            portal_ip: svc.portal_ip.clone(),
        },
        status: model::ServiceStatus::default(),
    }
}

pub fn endpoints_to_old(ep: &model::Endpoints) -> Result<old::Endpoints> {
    Ok(old::Endpoints {
        base: meta_to_base(&ep.metadata)?,
        endpoints: ep.endpoints.clone(),
    })
}

pub fn endpoints_from_old(ep: &old::Endpoints) -> model::Endpoints {
    model::Endpoints {
        metadata: base_to_meta(&ep.base, &BTreeMap::new()),
        endpoints: ep.endpoints.clone(),
    }
}

pub fn node_to_old(node: &model::Node) -> Result<old::Minion> {
    let capacity = node
        .spec
        .capacity
        .iter()
        .map(|(name, q)| {
            let v = if name == model::RESOURCE_CPU {
                q.milli_value()
            } else {
                q.value()
            };
            (name.clone(), v)
        })
        .collect();
    Ok(old::Minion {
        base: meta_to_base(&node.metadata)?,
        labels: node.metadata.labels.clone(),
        host_ip: node.status.host_ip.clone(),
        resources: old::NodeResources { capacity },
    })
}

pub fn node_from_old(minion: &old::Minion) -> model::Node {
    let capacity = minion
        .resources
        .capacity
        .iter()
        .map(|(name, v)| {
            let q = if name == model::RESOURCE_CPU {
                Quantity::from_milli(*v)
            } else {
                Quantity::from_value(*v, Format::BinarySi)
            };
            (name.clone(), q)
        })
        .collect();
    model::Node {
        metadata: base_to_meta(&minion.base, &minion.labels),
        spec: model::NodeSpec { capacity },
        status: model::NodeStatus {
            phase: model::NodePhase::default(),
            host_ip: minion.host_ip.clone(),
        },
    }
}

pub fn binding_to_old(b: &model::Binding) -> Result<old::Binding> {
    Ok(old::Binding {
        base: meta_to_base(&b.metadata)?,
        pod_id: b.pod_id.clone(),
        host: b.host.clone(),
    })
}

pub fn binding_from_old(b: &old::Binding) -> model::Binding {
    model::Binding {
        metadata: base_to_meta(&b.base, &BTreeMap::new()),
        pod_id: b.pod_id.clone(),
        host: b.host.clone(),
    }
}

pub fn event_to_old(ev: &model::Event) -> Result<old::Event> {
    Ok(old::Event {
        base: meta_to_base(&ev.metadata)?,
        labels: ev.metadata.labels.clone(),
        involved_object: ev.involved_object.clone(),
        status: ev.condition.clone(),
        reason: ev.reason.clone(),
        message: ev.message.clone(),
        source: ev.source.clone(),
        timestamp: ev.timestamp,
    })
}

pub fn event_from_old(ev: &old::Event) -> model::Event {
    model::Event {
        metadata: base_to_meta(&ev.base, &ev.labels),
        involved_object: ev.involved_object.clone(),
        condition: ev.status.clone(),
        reason: ev.reason.clone(),
        message: ev.message.clone(),
        source: ev.source.clone(),
        timestamp: ev.timestamp,
    }
}

pub fn manifest_list_to_old(
    list: &model::ContainerManifestList,
) -> Result<old::ContainerManifestList> {
    Ok(old::ContainerManifestList {
        base: meta_to_base(&list.metadata)?,
        items: list
            .items
            .iter()
            .map(|m| old::ContainerManifest {
                version: MANIFEST_VERSION.to_string(),
                id: Some(m.id.clone()),
                containers: m.containers.iter().map(container_to_old).collect(),
                volumes: m.volumes.clone(),
                restart_policy: restart_policy_to_old(m.restart_policy),
            })
            .collect(),
    })
}

pub fn manifest_list_from_old(list: &old::ContainerManifestList) -> model::ContainerManifestList {
    model::ContainerManifestList {
        metadata: base_to_meta(&list.base, &BTreeMap::new()),
        items: list
            .items
            .iter()
            .map(|m| model::ContainerManifest {
                version: m.version.clone(),
                id: m.id.clone().unwrap_or_default(),
                containers: m.containers.iter().map(container_from_old).collect(),
                volumes: m.volumes.clone(),
                restart_policy: restart_policy_from_old(&m.restart_policy),
            })
            .collect(),
    }
}

fn list_base(resource_version: Option<&str>) -> Result<old::JsonBase> {
    let resource_version = match resource_version {
        None | Some("") => None,
        Some(v) => Some(v.parse::<u64>().map_err(|_| {
            Error::Decode(format!("resource version {v:?} is not an integer"))
        })?),
    };
    Ok(old::JsonBase {
        resource_version,
        ..old::JsonBase::default()
    })
}

fn list_meta(base: &old::JsonBase) -> crate::meta::ListMeta {
    crate::meta::ListMeta {
        resource_version: base.resource_version.map(|v| v.to_string()),
        self_link: base.self_link.clone(),
    }
}

pub fn pod_list_to_old(list: &model::PodList) -> Result<old::PodList> {
    Ok(old::PodList {
        base: list_base(list.metadata.resource_version.as_deref())?,
        items: list.items.iter().map(pod_to_old).collect::<Result<_>>()?,
    })
}

pub fn pod_list_from_old(list: &old::PodList) -> model::PodList {
    model::PodList {
        metadata: list_meta(&list.base),
        items: list.items.iter().map(pod_from_old).collect(),
    }
}

pub fn controller_list_to_old(
    list: &model::ReplicationControllerList,
) -> Result<old::ReplicationControllerList> {
    Ok(old::ReplicationControllerList {
        base: list_base(list.metadata.resource_version.as_deref())?,
        items: list
            .items
            .iter()
            .map(controller_to_old)
            .collect::<Result<_>>()?,
    })
}

pub fn controller_list_from_old(
    list: &old::ReplicationControllerList,
) -> model::ReplicationControllerList {
    model::ReplicationControllerList {
        metadata: list_meta(&list.base),
        items: list.items.iter().map(controller_from_old).collect(),
    }
}

pub fn service_list_to_old(list: &model::ServiceList) -> Result<old::ServiceList> {
    Ok(old::ServiceList {
        base: list_base(list.metadata.resource_version.as_deref())?,
        items: list.items.iter().map(service_to_old).collect::<Result<_>>()?,
    })
}

pub fn service_list_from_old(list: &old::ServiceList) -> model::ServiceList {
    model::ServiceList {
        metadata: list_meta(&list.base),
        items: list.items.iter().map(service_from_old).collect(),
    }
}

pub fn endpoints_list_to_old(list: &model::EndpointsList) -> Result<old::EndpointsList> {
    Ok(old::EndpointsList {
        base: list_base(list.metadata.resource_version.as_deref())?,
        items: list
            .items
            .iter()
            .map(endpoints_to_old)
            .collect::<Result<_>>()?,
    })
}

pub fn endpoints_list_from_old(list: &old::EndpointsList) -> model::EndpointsList {
    model::EndpointsList {
        metadata: list_meta(&list.base),
        items: list.items.iter().map(endpoints_from_old).collect(),
    }
}

pub fn node_list_to_old(list: &model::NodeList) -> Result<old::MinionList> {
    Ok(old::MinionList {
        base: list_base(list.metadata.resource_version.as_deref())?,
        items: list.items.iter().map(node_to_old).collect::<Result<_>>()?,
    })
}

pub fn node_list_from_old(list: &old::MinionList) -> model::NodeList {
    model::NodeList {
        metadata: list_meta(&list.base),
        items: list.items.iter().map(node_from_old).collect(),
    }
}

pub fn event_list_to_old(list: &model::EventList) -> Result<old::EventList> {
    Ok(old::EventList {
        base: list_base(list.metadata.resource_version.as_deref())?,
        items: list.items.iter().map(event_to_old).collect::<Result<_>>()?,
    })
}

pub fn event_list_from_old(list: &old::EventList) -> model::EventList {
    model::EventList {
        metadata: list_meta(&list.base),
        items: list.items.iter().map(event_from_old).collect(),
    }
}
