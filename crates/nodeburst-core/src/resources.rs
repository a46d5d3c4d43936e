//! Accessors over k8s-openapi Pod and Node objects
//!
//! Every field the scheduler reads goes through these helpers so that the
//! "missing" and "empty" cases are folded together in one place.

use crate::error::{CoreError, Result};
use crate::types::{GroupKey, PodPhase, WorkKey};
use k8s_openapi::api::core::v1::{Node, Pod};

/// Scheduler name the API server assigns when a pod does not choose one
pub const DEFAULT_SCHEDULER_NAME: &str = "default-scheduler";

/// Build the queue key for a pod
pub fn work_key(pod: &Pod) -> Result<WorkKey> {
    let name = pod
        .metadata
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or(CoreError::MissingField {
            field: "metadata.name",
        })?;
    let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
    Ok(WorkKey::new(namespace, name))
}

/// `spec.schedulerName`, defaulted the way the API server does
pub fn pod_scheduler_name(pod: &Pod) -> &str {
    pod.spec
        .as_ref()
        .and_then(|s| s.scheduler_name.as_deref())
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SCHEDULER_NAME)
}

/// `spec.nodeName` if set and non-empty
pub fn pod_node_name(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .filter(|n| !n.is_empty())
}

/// Whether the pod has been assigned to a node
pub fn is_pod_bound(pod: &Pod) -> bool {
    pod_node_name(pod).is_some()
}

/// Whether the pod carries a deletion timestamp
pub fn is_pod_terminating(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

pub fn pod_phase(pod: &Pod) -> PodPhase {
    PodPhase::parse(pod.status.as_ref().and_then(|s| s.phase.as_deref()))
}

/// Whether the pod has finished (Succeeded or Failed)
pub fn is_terminal(pod: &Pod) -> bool {
    pod_phase(pod).is_terminal()
}

/// Value of the grouping label, treating an empty value as absent
pub fn application_label<'a>(pod: &'a Pod, label_key: &str) -> Option<&'a str> {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(label_key))
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

/// Application group of a pod, or None for an unlabeled (isolated) pod
pub fn group_key(pod: &Pod, label_key: &str) -> Option<GroupKey> {
    let label = application_label(pod, label_key)?;
    let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
    Some(GroupKey::new(namespace, label))
}

pub fn node_name(node: &Node) -> Option<&str> {
    node.metadata.name.as_deref().filter(|n| !n.is_empty())
}

/// A node is ready when its Ready condition is True and it is not cordoned
pub fn node_is_ready(node: &Node) -> bool {
    let cordoned = node
        .spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false);
    if cordoned {
        return false;
    }

    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .is_some_and(|c| c.status == "True")
}
