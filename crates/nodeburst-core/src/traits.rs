use crate::error::BindError;
use crate::events::PodEvent;
use crate::resources::group_key;
use crate::types::GroupKey;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use tokio::sync::broadcast;

/// Read-only, eventually-consistent view of pods and nodes
///
/// Implemented by the informer cache in `nodeburst-client` and by
/// `FakeCluster` for tests. Readers never mutate the cache.
#[async_trait]
pub trait ClusterCache: Send + Sync {
    /// Look up a pod by namespace and name; None if it is not (or no longer) cached
    async fn get_pod(&self, namespace: &str, name: &str) -> Option<Pod>;

    /// Snapshot of all cached pods
    async fn list_pods(&self) -> Vec<Pod>;

    /// Snapshot of all cached nodes
    async fn list_nodes(&self) -> Vec<Node>;

    /// Pods belonging to one application group
    ///
    /// The default filters `list_pods`; caches that maintain a group index
    /// should override it.
    async fn list_group_pods(&self, group: &GroupKey, label_key: &str) -> Vec<Pod> {
        self.list_pods()
            .await
            .into_iter()
            .filter(|pod| group_key(pod, label_key).as_ref() == Some(group))
            .collect()
    }

    /// Subscribe to pod add/update/delete notifications
    fn subscribe(&self) -> broadcast::Receiver<PodEvent>;

    /// Resolve once the initial list has been loaded; false if it never will be
    async fn wait_for_sync(&self) -> bool;
}

/// The API call that assigns a pod to a node
#[async_trait]
pub trait BindingApi: Send + Sync {
    /// Issue a single binding request
    async fn bind(&self, namespace: &str, name: &str, node_name: &str) -> Result<(), BindError>;
}
