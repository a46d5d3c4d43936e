use crate::error::BindError;
use crate::events::PodEvent;
use crate::resources::{is_pod_bound, pod_node_name, work_key};
use crate::traits::{BindingApi, ClusterCache};
use crate::types::WorkKey;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeStatus, Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Recorded binding request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindCall {
    pub key: WorkKey,
    pub node_name: String,
}

/// When an accepted binding shows up in the cached pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindVisibility {
    Immediate,
    After(Duration),
    Manual,
}

#[derive(Default)]
struct FakeState {
    pods: HashMap<WorkKey, Pod>,
    nodes: BTreeMap<String, Node>,
    /// Assignments accepted by the API, visible in the cache or not
    assigned: HashMap<WorkKey, String>,
    /// Assignments held back until `flush_binds`
    pending: Vec<(WorkKey, String)>,
    bind_calls: Vec<BindCall>,
    scripted_failures: VecDeque<BindError>,
}

impl FakeState {
    /// Write an accepted assignment into the cached pod
    fn reveal(&mut self, key: &WorkKey, node_name: &str) -> Option<Pod> {
        let pod = self.pods.get_mut(key)?;
        if is_pod_bound(pod) {
            return None;
        }
        pod.spec.get_or_insert_with(Default::default).node_name = Some(node_name.to_string());
        pod.status.get_or_insert_with(Default::default).phase = Some("Running".to_string());
        Some(pod.clone())
    }
}

/// In-memory cluster for tests
///
/// Acts as both the cache and the binding API. A successful bind writes
/// `spec.nodeName` (and phase Running) back into the stored pod and emits a
/// MODIFIED event, the way the real API server plus informer would. By default
/// that happens before `bind` returns; `with_bind_visibility_delay` and
/// `with_manual_bind_visibility` leave the cache stale for a while, like a
/// watch stream that lags behind the API server.
#[derive(Clone)]
pub struct FakeCluster {
    state: Arc<RwLock<FakeState>>,
    events: broadcast::Sender<PodEvent>,
    synced: bool,
    bind_latency: Duration,
    visibility: BindVisibility,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCluster {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            state: Arc::new(RwLock::new(FakeState::default())),
            events,
            synced: true,
            bind_latency: Duration::ZERO,
            visibility: BindVisibility::Immediate,
        }
    }

    /// A cache that never finishes its initial sync
    pub fn never_syncs() -> Self {
        Self {
            synced: false,
            ..Self::new()
        }
    }

    /// Delay every bind call by `latency`
    pub fn with_bind_latency(mut self, latency: Duration) -> Self {
        self.bind_latency = latency;
        self
    }

    /// Accepted bindings reach the cache `delay` after the bind call returns
    pub fn with_bind_visibility_delay(mut self, delay: Duration) -> Self {
        self.visibility = BindVisibility::After(delay);
        self
    }

    /// Accepted bindings reach the cache only on `flush_binds`
    pub fn with_manual_bind_visibility(mut self) -> Self {
        self.visibility = BindVisibility::Manual;
        self
    }

    /// Insert or replace a pod and emit the matching notification
    pub async fn apply_pod(&self, pod: Pod) {
        let Ok(key) = work_key(&pod) else {
            return;
        };
        let existed = self.state.write().await.pods.insert(key, pod.clone()).is_some();
        let event = if existed {
            PodEvent::modified(pod)
        } else {
            PodEvent::added(pod)
        };
        let _ = self.events.send(event);
    }

    /// Remove a pod and emit DELETED
    pub async fn delete_pod(&self, namespace: &str, name: &str) {
        let key = WorkKey::new(namespace, name);
        let removed = {
            let mut state = self.state.write().await;
            state.assigned.remove(&key);
            state.pending.retain(|(pending, _)| pending != &key);
            state.pods.remove(&key)
        };
        if let Some(pod) = removed {
            let _ = self.events.send(PodEvent::deleted(pod));
        }
    }

    /// Re-send MODIFIED for the stored pod without changing it
    pub async fn notify_pod(&self, namespace: &str, name: &str) {
        if let Some(pod) = self.get_pod(namespace, name).await {
            let _ = self.events.send(PodEvent::modified(pod));
        }
    }

    pub async fn apply_node(&self, node: Node) {
        if let Some(name) = node.metadata.name.clone() {
            self.state.write().await.nodes.insert(name, node);
        }
    }

    /// Publish held-back bindings to the cache, returning how many changed a pod
    pub async fn flush_binds(&self) -> usize {
        let updated: Vec<Pod> = {
            let mut state = self.state.write().await;
            let pending = std::mem::take(&mut state.pending);
            pending
                .iter()
                .filter_map(|(key, node_name)| state.reveal(key, node_name))
                .collect()
        };
        let count = updated.len();
        for pod in updated {
            let _ = self.events.send(PodEvent::modified(pod));
        }
        count
    }

    /// Record a binding made by another writer that the cache has not seen yet
    ///
    /// Later bind calls for the pod are rejected as already bound. The cached
    /// pod changes on `flush_binds`.
    pub async fn bind_behind_cache(&self, namespace: &str, name: &str, node_name: &str) {
        let key = WorkKey::new(namespace, name);
        let mut state = self.state.write().await;
        state.assigned.insert(key.clone(), node_name.to_string());
        state.pending.push((key, node_name.to_string()));
    }

    /// Node the API server has assigned the pod to, visible in the cache or not
    pub async fn api_node(&self, namespace: &str, name: &str) -> Option<String> {
        let key = WorkKey::new(namespace, name);
        let state = self.state.read().await;
        state.assigned.get(&key).cloned().or_else(|| {
            state
                .pods
                .get(&key)
                .and_then(pod_node_name)
                .map(str::to_string)
        })
    }

    async fn publish_binding(&self, key: WorkKey, node_name: String) {
        let updated = self.state.write().await.reveal(&key, &node_name);
        if let Some(pod) = updated {
            let _ = self.events.send(PodEvent::modified(pod));
        }
    }

    /// Make the next bind call fail with `error`
    pub async fn fail_next_bind(&self, error: BindError) {
        self.state.write().await.scripted_failures.push_back(error);
    }

    pub async fn bind_calls(&self) -> Vec<BindCall> {
        self.state.read().await.bind_calls.clone()
    }

    pub async fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.get_pod(namespace, name).await
    }
}

#[async_trait]
impl ClusterCache for FakeCluster {
    async fn get_pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.state
            .read()
            .await
            .pods
            .get(&WorkKey::new(namespace, name))
            .cloned()
    }

    async fn list_pods(&self) -> Vec<Pod> {
        self.state.read().await.pods.values().cloned().collect()
    }

    async fn list_nodes(&self) -> Vec<Node> {
        self.state.read().await.nodes.values().cloned().collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<PodEvent> {
        self.events.subscribe()
    }

    async fn wait_for_sync(&self) -> bool {
        if !self.synced {
            std::future::pending::<()>().await;
        }
        true
    }
}

#[async_trait]
impl BindingApi for FakeCluster {
    async fn bind(&self, namespace: &str, name: &str, node_name: &str) -> Result<(), BindError> {
        if !self.bind_latency.is_zero() {
            tokio::time::sleep(self.bind_latency).await;
        }

        let key = WorkKey::new(namespace, name);
        {
            let mut state = self.state.write().await;
            state.bind_calls.push(BindCall {
                key: key.clone(),
                node_name: node_name.to_string(),
            });

            if let Some(err) = state.scripted_failures.pop_front() {
                return Err(err);
            }
            if !state.nodes.contains_key(node_name) {
                return Err(BindError::not_found(
                    key.to_string(),
                    format!("nodes \"{}\" not found", node_name),
                ));
            }

            let pod = state
                .pods
                .get(&key)
                .ok_or_else(|| BindError::not_found(key.to_string(), "pod not found"))?;
            let current = state
                .assigned
                .get(&key)
                .cloned()
                .or_else(|| pod_node_name(pod).map(str::to_string));
            if let Some(current) = current {
                return Err(BindError::already_bound(key.to_string(), Some(current)));
            }
            state.assigned.insert(key.clone(), node_name.to_string());
            if self.visibility == BindVisibility::Manual {
                state.pending.push((key.clone(), node_name.to_string()));
            }
        }

        debug!("Fake: bound {} to {}", key, node_name);
        match self.visibility {
            BindVisibility::Immediate => {
                self.publish_binding(key, node_name.to_string()).await;
            }
            BindVisibility::After(delay) => {
                let cluster = self.clone();
                let node_name = node_name.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    cluster.publish_binding(key, node_name).await;
                });
            }
            BindVisibility::Manual => {}
        }
        Ok(())
    }
}

/// Build a pod for tests
pub fn make_pod(
    namespace: &str,
    name: &str,
    scheduler_name: &str,
    app: Option<&str>,
    node_name: Option<&str>,
    phase: &str,
) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: app.map(|a| BTreeMap::from([("app".to_string(), a.to_string())])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            scheduler_name: Some(scheduler_name.to_string()),
            node_name: node_name.map(str::to_string),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
    }
}

/// Build a node for tests
pub fn make_node(name: &str, ready: bool) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: None,
        status: Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::WatchEventType;

    #[tokio::test]
    async fn test_bind_writes_node_name_and_emits_event() {
        let cluster = FakeCluster::new();
        cluster.apply_node(make_node("node-a", true)).await;
        cluster
            .apply_pod(make_pod("shop", "web-1", "nodeburst", Some("web"), None, "Pending"))
            .await;
        let mut rx = cluster.subscribe();

        cluster.bind("shop", "web-1", "node-a").await.unwrap();

        let pod = cluster.pod("shop", "web-1").await.unwrap();
        assert_eq!(pod_node_name(&pod), Some("node-a"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, WatchEventType::Modified);
    }

    #[tokio::test]
    async fn test_second_bind_reports_already_bound() {
        let cluster = FakeCluster::new();
        cluster.apply_node(make_node("node-a", true)).await;
        cluster
            .apply_pod(make_pod("shop", "web-1", "nodeburst", None, None, "Pending"))
            .await;

        cluster.bind("shop", "web-1", "node-a").await.unwrap();
        let err = cluster.bind("shop", "web-1", "node-a").await.unwrap_err();
        assert!(matches!(err, BindError::AlreadyBound { .. }));
        assert_eq!(cluster.bind_calls().await.len(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failure_is_returned_once() {
        let cluster = FakeCluster::new();
        cluster.apply_node(make_node("node-a", true)).await;
        cluster
            .apply_pod(make_pod("shop", "web-1", "nodeburst", None, None, "Pending"))
            .await;
        cluster
            .fail_next_bind(BindError::transient("shop/web-1", "timeout"))
            .await;

        assert!(cluster.bind("shop", "web-1", "node-a").await.is_err());
        assert!(cluster.bind("shop", "web-1", "node-a").await.is_ok());
    }

    #[tokio::test]
    async fn test_manual_visibility_holds_binding_until_flush() {
        let cluster = FakeCluster::new().with_manual_bind_visibility();
        cluster.apply_node(make_node("node-a", true)).await;
        cluster
            .apply_pod(make_pod("shop", "web-1", "nodeburst", None, None, "Pending"))
            .await;
        let mut rx = cluster.subscribe();

        cluster.bind("shop", "web-1", "node-a").await.unwrap();
        let cached = cluster.get_pod("shop", "web-1").await.unwrap();
        assert!(!is_pod_bound(&cached));
        assert_eq!(cluster.api_node("shop", "web-1").await.as_deref(), Some("node-a"));

        // The API already knows, even though the cache does not
        let err = cluster.bind("shop", "web-1", "node-b").await.unwrap_err();
        assert_eq!(
            err,
            BindError::already_bound("shop/web-1", Some("node-a".to_string()))
        );

        assert_eq!(cluster.flush_binds().await, 1);
        let cached = cluster.get_pod("shop", "web-1").await.unwrap();
        assert_eq!(pod_node_name(&cached), Some("node-a"));
        assert_eq!(rx.recv().await.unwrap().event_type, WatchEventType::Modified);
        assert_eq!(cluster.flush_binds().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_visibility_reaches_cache_later() {
        let cluster = FakeCluster::new().with_bind_visibility_delay(Duration::from_millis(100));
        cluster.apply_node(make_node("node-a", true)).await;
        cluster
            .apply_pod(make_pod("shop", "web-1", "nodeburst", None, None, "Pending"))
            .await;

        cluster.bind("shop", "web-1", "node-a").await.unwrap();
        assert!(!is_pod_bound(&cluster.pod("shop", "web-1").await.unwrap()));

        tokio::time::sleep(Duration::from_millis(150)).await;
        let cached = cluster.pod("shop", "web-1").await.unwrap();
        assert_eq!(pod_node_name(&cached), Some("node-a"));
    }

    #[tokio::test]
    async fn test_binding_behind_cache_rejects_later_binds() {
        let cluster = FakeCluster::new();
        cluster.apply_node(make_node("node-a", true)).await;
        cluster
            .apply_pod(make_pod("shop", "web-1", "nodeburst", None, None, "Pending"))
            .await;
        cluster.bind_behind_cache("shop", "web-1", "node-b").await;

        let err = cluster.bind("shop", "web-1", "node-a").await.unwrap_err();
        assert!(matches!(err, BindError::AlreadyBound { node: Some(ref n), .. } if n == "node-b"));
        assert!(!is_pod_bound(&cluster.pod("shop", "web-1").await.unwrap()));

        cluster.flush_binds().await;
        let cached = cluster.pod("shop", "web-1").await.unwrap();
        assert_eq!(pod_node_name(&cached), Some("node-b"));
    }

    #[tokio::test]
    async fn test_delete_emits_event() {
        let cluster = FakeCluster::new();
        cluster
            .apply_pod(make_pod("shop", "web-1", "nodeburst", None, None, "Pending"))
            .await;
        let mut rx = cluster.subscribe();

        cluster.delete_pod("shop", "web-1").await;

        assert!(cluster.pod("shop", "web-1").await.is_none());
        assert_eq!(rx.recv().await.unwrap().event_type, WatchEventType::Deleted);
    }
}
