use crate::error::Result;
use nodeburst_core::resources::{pod_node_name, work_key};
use nodeburst_core::{BindError, BindingApi, ClusterCache, Pod};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a bind attempt that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// The binding request was accepted
    Bound,
    /// The pod was already assigned; nothing was changed
    AlreadyBound { node: Option<String> },
}

/// Assigns pods to nodes through the binding API
///
/// Binding a pod that is already assigned is a no-op, whether that is seen in
/// the cache before the call or reported by the API server.
pub struct Binder {
    api: Arc<dyn BindingApi>,
    cache: Arc<dyn ClusterCache>,
}

impl Binder {
    pub fn new(api: Arc<dyn BindingApi>, cache: Arc<dyn ClusterCache>) -> Self {
        Self { api, cache }
    }

    pub async fn bind(&self, pod: &Pod, node_name: &str) -> Result<BindOutcome> {
        let key = work_key(pod)?;

        if let Some(current) = self.cache.get_pod(&key.namespace, &key.name).await {
            if let Some(bound_to) = pod_node_name(&current) {
                debug!("Pod {} already bound to {}, skipping bind", key, bound_to);
                return Ok(BindOutcome::AlreadyBound {
                    node: Some(bound_to.to_string()),
                });
            }
        }

        match self.api.bind(&key.namespace, &key.name, node_name).await {
            Ok(()) => {
                info!("Bound pod {} to node {}", key, node_name);
                Ok(BindOutcome::Bound)
            }
            Err(BindError::AlreadyBound { node, .. }) => {
                debug!("API server reports pod {} already bound", key);
                Ok(BindOutcome::AlreadyBound { node })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchedulerError;
    use nodeburst_core::mock::{make_node, make_pod};
    use nodeburst_core::FakeCluster;

    async fn setup() -> (FakeCluster, Binder) {
        let cluster = FakeCluster::new();
        cluster.apply_node(make_node("node-a", true)).await;
        let shared = Arc::new(cluster.clone());
        let binder = Binder::new(shared.clone(), shared);
        (cluster, binder)
    }

    #[tokio::test]
    async fn test_bind_unbound_pod() {
        let (cluster, binder) = setup().await;
        let pod = make_pod("shop", "p2", "nodeburst", None, None, "Pending");
        cluster.apply_pod(pod.clone()).await;

        assert_eq!(binder.bind(&pod, "node-a").await.unwrap(), BindOutcome::Bound);
        assert_eq!(cluster.bind_calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_already_bound_in_cache_is_noop_without_api_call() {
        let (cluster, binder) = setup().await;
        let stale = make_pod("shop", "p2", "nodeburst", None, None, "Pending");
        cluster
            .apply_pod(make_pod("shop", "p2", "nodeburst", None, Some("node-a"), "Running"))
            .await;

        let outcome = binder.bind(&stale, "node-a").await.unwrap();
        assert_eq!(
            outcome,
            BindOutcome::AlreadyBound {
                node: Some("node-a".to_string())
            }
        );
        assert!(cluster.bind_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_already_bound_from_api_is_success() {
        let (cluster, binder) = setup().await;
        let pod = make_pod("shop", "p2", "nodeburst", None, None, "Pending");
        cluster.apply_pod(pod.clone()).await;
        cluster
            .fail_next_bind(BindError::already_bound("shop/p2", Some("node-b".to_string())))
            .await;

        let outcome = binder.bind(&pod, "node-a").await.unwrap();
        assert!(matches!(outcome, BindOutcome::AlreadyBound { .. }));
    }

    #[tokio::test]
    async fn test_other_rejections_are_errors() {
        let (cluster, binder) = setup().await;
        let pod = make_pod("shop", "p2", "nodeburst", None, None, "Pending");
        cluster.apply_pod(pod.clone()).await;

        let err = binder.bind(&pod, "missing-node").await.unwrap_err();
        assert!(matches!(err, SchedulerError::Bind(BindError::NotFound { .. })));

        cluster
            .fail_next_bind(BindError::conflict("shop/p2", "object modified"))
            .await;
        let err = binder.bind(&pod, "node-a").await.unwrap_err();
        assert!(matches!(err, SchedulerError::Bind(BindError::Conflict { .. })));
    }
}
