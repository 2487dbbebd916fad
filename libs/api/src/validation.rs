//! Per-kind admission validation and defaulting.
//!
//! Validators return the full list of field errors rather than stopping at
//! the first, so a client sees every problem in one 422. Defaulting runs
//! before validation: port protocols become TCP and an unset host port takes
//! the container port.

use std::collections::BTreeSet;

use crate::error::FieldError;
use crate::model::{
    Binding, Event, Node, Pod, PodSpec, ReplicationController, Service,
};

/// RFC 1035 label: lowercase alphanumeric and dashes, starting and ending
/// alphanumeric, at most 63 characters.
pub fn is_dns_label(s: &str) -> bool {
    if s.is_empty() || s.len() > 63 {
        return false;
    }
    let bytes = s.as_bytes();
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return false;
    }
    bytes.iter().all(|&b| alnum(b) || b == b'-')
}

fn validate_name(name: Option<&str>, field: &str, errors: &mut Vec<FieldError>) {
    match name {
        None | Some("") => errors.push(FieldError::required(field)),
        Some(n) if !is_dns_label(n) => {
            errors.push(FieldError::invalid(field, format!("{n:?} is not a DNS label")))
        }
        _ => {}
    }
}

/// Fill the defaults the wire leaves open on a pod spec.
pub fn default_pod_spec(spec: &mut PodSpec) {
    for container in &mut spec.containers {
        for port in &mut container.ports {
            if port.host_port.is_none() {
                port.host_port = Some(port.container_port);
            }
        }
    }
}

fn validate_pod_spec(spec: &PodSpec, prefix: &str, errors: &mut Vec<FieldError>) {
    let mut volume_names: BTreeSet<&str> = BTreeSet::new();
    for (i, volume) in spec.volumes.iter().enumerate() {
        let field = format!("{prefix}.volumes[{i}].name");
        if !is_dns_label(&volume.name) {
            errors.push(FieldError::invalid(
                &field,
                format!("{:?} is not a DNS label", volume.name),
            ));
        } else if !volume_names.insert(&volume.name) {
            errors.push(FieldError::duplicate(&field, volume.name.clone()));
        }
        let sources =
            volume.source.host_dir.is_some() as u8 + volume.source.empty_dir.is_some() as u8;
        if sources != 1 {
            errors.push(FieldError::invalid(
                &format!("{prefix}.volumes[{i}].source"),
                "exactly one volume source must be set",
            ));
        }
    }

    if spec.containers.is_empty() {
        errors.push(FieldError::required(&format!("{prefix}.containers")));
    }
    let mut container_names: BTreeSet<&str> = BTreeSet::new();
    let mut host_ports: BTreeSet<i32> = BTreeSet::new();
    for (i, container) in spec.containers.iter().enumerate() {
        let field = format!("{prefix}.containers[{i}].name");
        if !is_dns_label(&container.name) {
            errors.push(FieldError::invalid(
                &field,
                format!("{:?} is not a DNS label", container.name),
            ));
        } else if !container_names.insert(&container.name) {
            errors.push(FieldError::duplicate(&field, container.name.clone()));
        }
        if container.image.is_empty() {
            errors.push(FieldError::required(&format!(
                "{prefix}.containers[{i}].image"
            )));
        }
        for (j, port) in container.ports.iter().enumerate() {
            if port.container_port <= 0 || port.container_port >= 65536 {
                errors.push(FieldError::invalid(
                    &format!("{prefix}.containers[{i}].ports[{j}].containerPort"),
                    format!("{} is not a valid port number", port.container_port),
                ));
            }
            if let Some(host_port) = port.host_port {
                if host_port <= 0 || host_port >= 65536 {
                    errors.push(FieldError::invalid(
                        &format!("{prefix}.containers[{i}].ports[{j}].hostPort"),
                        format!("{host_port} is not a valid port number"),
                    ));
                } else if !host_ports.insert(host_port) {
                    errors.push(FieldError::duplicate(
                        &format!("{prefix}.containers[{i}].ports[{j}].hostPort"),
                        host_port.to_string(),
                    ));
                }
            }
        }
        for (j, mount) in container.volume_mounts.iter().enumerate() {
            if !volume_names.contains(mount.name.as_str()) {
                errors.push(FieldError::not_found(
                    &format!("{prefix}.containers[{i}].volumeMounts[{j}].name"),
                    format!("no volume named {:?}", mount.name),
                ));
            }
            if mount.mount_path.is_empty() {
                errors.push(FieldError::required(&format!(
                    "{prefix}.containers[{i}].volumeMounts[{j}].mountPath"
                )));
            }
        }
    }
}

pub fn validate_pod(pod: &Pod) -> Vec<FieldError> {
    let mut errors = Vec::new();
    validate_name(pod.metadata.name.as_deref(), "metadata.name", &mut errors);
    validate_pod_spec(&pod.spec, "spec", &mut errors);
    errors
}

pub fn validate_controller(rc: &ReplicationController) -> Vec<FieldError> {
    let mut errors = Vec::new();
    validate_name(rc.metadata.name.as_deref(), "metadata.name", &mut errors);
    if rc.spec.replicas < 0 {
        errors.push(FieldError::invalid(
            "spec.replicas",
            "must not be negative",
        ));
    }
    if rc.spec.selector.is_empty() {
        errors.push(FieldError::required("spec.selector"));
    }
    match &rc.spec.template {
        None => errors.push(FieldError::required("spec.template")),
        Some(template) => {
            // Created pods must be counted by the selector that created
            // them, or the controller would replace them forever.
            let selected = rc
                .spec
                .selector
                .iter()
                .all(|(k, v)| template.metadata.labels.get(k) == Some(v));
            if !selected {
                errors.push(FieldError::invalid(
                    "spec.template.metadata.labels",
                    "selector does not match template labels",
                ));
            }
            validate_pod_spec(&template.spec, "spec.template.spec", &mut errors);
        }
    }
    errors
}

pub fn validate_service(svc: &Service) -> Vec<FieldError> {
    let mut errors = Vec::new();
    validate_name(svc.metadata.name.as_deref(), "metadata.name", &mut errors);
    if svc.spec.port <= 0 || svc.spec.port >= 65536 {
        errors.push(FieldError::invalid(
            "spec.port",
            format!("{} is not a valid port number", svc.spec.port),
        ));
    }
    if svc.spec.selector.is_empty() {
        errors.push(FieldError::required("spec.selector"));
    }
    errors
}

pub fn validate_node(node: &Node) -> Vec<FieldError> {
    let mut errors = Vec::new();
    validate_name(node.metadata.name.as_deref(), "metadata.name", &mut errors);
    errors
}

pub fn validate_binding(binding: &Binding) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if binding.pod_id.is_empty() {
        errors.push(FieldError::required("podId"));
    }
    if binding.host.is_empty() {
        errors.push(FieldError::required("host"));
    }
    errors
}

pub fn validate_event(event: &Event) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if event.involved_object.name.is_empty() {
        errors.push(FieldError::required("involvedObject.name"));
    }
    if event.condition.is_empty() {
        errors.push(FieldError::required("condition"));
    }
    errors
}
