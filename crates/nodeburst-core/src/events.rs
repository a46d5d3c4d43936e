use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};

/// Watch event type as sent by the API server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
    Bookmark,
    Error,
}

/// One line of a watch stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent<T> {
    #[serde(rename = "type")]
    pub event_type: WatchEventType,
    pub object: T,
}

/// Pod notification emitted by the cluster cache
#[derive(Debug, Clone)]
pub struct PodEvent {
    /// Added, Modified or Deleted
    pub event_type: WatchEventType,
    /// Pod state after the change (last known state for deletions)
    pub pod: Pod,
}

impl PodEvent {
    /// Create an ADDED event
    pub fn added(pod: Pod) -> Self {
        Self {
            event_type: WatchEventType::Added,
            pod,
        }
    }

    /// Create a MODIFIED event
    pub fn modified(pod: Pod) -> Self {
        Self {
            event_type: WatchEventType::Modified,
            pod,
        }
    }

    /// Create a DELETED event
    pub fn deleted(pod: Pod) -> Self {
        Self {
            event_type: WatchEventType::Deleted,
            pod,
        }
    }
}
