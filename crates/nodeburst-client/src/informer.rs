use crate::api_client::ApiClient;
use crate::error::{ClientError, Result};
use crate::store::PodStore;
use crate::watch::{event_resource_version, is_expired_error, WatchStream};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use nodeburst_core::resources::{node_name, work_key};
use nodeburst_core::{ClusterCache, GroupKey, PodEvent, WatchEventType, WorkKey};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Informer settings
#[derive(Debug, Clone)]
pub struct InformerConfig {
    /// Restrict the pod watch to one namespace; None watches all
    pub namespace: Option<String>,
    /// Label used to build the group index
    pub label_key: String,
    /// Capacity of the pod notification channel
    pub event_capacity: usize,
    /// First delay after a failed list or watch
    pub relist_base_delay: Duration,
    /// Cap for the relist delay
    pub relist_max_delay: Duration,
}

impl Default for InformerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            label_key: "app".to_string(),
            event_capacity: 1024,
            relist_base_delay: Duration::from_millis(500),
            relist_max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resource {
    Pods,
    Nodes,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Pods => write!(f, "pods"),
            Resource::Nodes => write!(f, "nodes"),
        }
    }
}

/// Watch-backed cache of pods and nodes
///
/// Each resource is listed once, then watched from the list's resource
/// version. A closed watch resumes from the last version seen; an expired
/// version (410) triggers an immediate relist, any other failure a relist
/// after a capped exponential delay.
pub struct Informer {
    api: Arc<ApiClient>,
    config: InformerConfig,
    pods: RwLock<PodStore>,
    nodes: RwLock<BTreeMap<String, Node>>,
    events: broadcast::Sender<PodEvent>,
    pods_synced: watch::Sender<bool>,
    nodes_synced: watch::Sender<bool>,
}

impl Informer {
    pub fn new(api: Arc<ApiClient>, config: InformerConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            api,
            pods: RwLock::new(PodStore::new(config.label_key.clone())),
            nodes: RwLock::new(BTreeMap::new()),
            events,
            pods_synced: watch::Sender::new(false),
            nodes_synced: watch::Sender::new(false),
            config,
        }
    }

    /// Whether both initial lists have completed
    pub fn has_synced(&self) -> bool {
        *self.pods_synced.borrow() && *self.nodes_synced.borrow()
    }

    /// Run both reflectors until `token` is cancelled
    pub async fn run(&self, token: CancellationToken) {
        info!(
            "Starting informer (namespace: {})",
            self.config.namespace.as_deref().unwrap_or("<all>")
        );
        tokio::join!(
            self.reflect(Resource::Pods, &token),
            self.reflect(Resource::Nodes, &token)
        );
        info!("Informer stopped");
    }

    async fn reflect(&self, resource: Resource, token: &CancellationToken) {
        let mut failures: u32 = 0;
        loop {
            match self.list_and_watch(resource, token, &mut failures).await {
                Ok(()) => return,
                Err(ClientError::Gone) => {
                    info!("Watch on {} expired, relisting", resource);
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.relist_delay(failures);
                    warn!(
                        "Reflector for {} failed (attempt {}), relisting in {:?}: {}",
                        resource, failures, delay, e
                    );
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Returns Ok only when cancelled
    async fn list_and_watch(
        &self,
        resource: Resource,
        token: &CancellationToken,
        failures: &mut u32,
    ) -> Result<()> {
        let mut resource_version = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            listed = self.list(resource) => listed?,
        };
        *failures = 0;
        self.mark_synced(resource);

        loop {
            let mut stream = tokio::select! {
                _ = token.cancelled() => return Ok(()),
                opened = self.open_watch(resource, &resource_version) => opened?,
            };

            loop {
                let next = tokio::select! {
                    _ = token.cancelled() => return Ok(()),
                    next = stream.next_event() => next,
                };
                let Some(event) = next else {
                    debug!("Watch on {} closed at {}, resuming", resource, resource_version);
                    break;
                };
                let event = event?;

                match event.event_type {
                    WatchEventType::Added | WatchEventType::Modified | WatchEventType::Deleted => {
                        if let Some(rv) = event_resource_version(&event.object) {
                            resource_version = rv.to_string();
                        }
                        self.apply(resource, event.event_type, event.object).await?;
                    }
                    WatchEventType::Bookmark => {
                        if let Some(rv) = event_resource_version(&event.object) {
                            resource_version = rv.to_string();
                        }
                    }
                    WatchEventType::Error => {
                        if is_expired_error(&event.object) {
                            return Err(ClientError::Gone);
                        }
                        return Err(ClientError::Status {
                            method: "WATCH",
                            url: resource.to_string(),
                            status: event
                                .object
                                .get("code")
                                .and_then(Value::as_u64)
                                .and_then(|c| u16::try_from(c).ok())
                                .unwrap_or(500),
                            message: event
                                .object
                                .get("message")
                                .and_then(Value::as_str)
                                .unwrap_or("watch error")
                                .to_string(),
                        });
                    }
                }
            }
        }
    }

    fn relist_delay(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16);
        self.config
            .relist_base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.config.relist_max_delay)
            .min(self.config.relist_max_delay)
    }

    fn mark_synced(&self, resource: Resource) {
        let flag = match resource {
            Resource::Pods => &self.pods_synced,
            Resource::Nodes => &self.nodes_synced,
        };
        if !flag.send_replace(true) {
            info!("Initial list of {} loaded", resource);
        }
    }

    async fn open_watch(&self, resource: Resource, resource_version: &str) -> Result<WatchStream> {
        match resource {
            Resource::Pods => {
                self.api
                    .watch_pods(self.config.namespace.as_deref(), resource_version)
                    .await
            }
            Resource::Nodes => self.api.watch_nodes(resource_version).await,
        }
    }

    /// List one resource into the store, returning the list's resource version
    async fn list(&self, resource: Resource) -> Result<String> {
        match resource {
            Resource::Pods => {
                let list = self.api.list_pods(self.config.namespace.as_deref()).await?;
                let rv = list.resource_version().unwrap_or("0").to_string();
                let count = list.items.len();
                self.replace_pods(list.items).await;
                debug!("Listed {} pods at {}", count, rv);
                Ok(rv)
            }
            Resource::Nodes => {
                let list = self.api.list_nodes().await?;
                let rv = list.resource_version().unwrap_or("0").to_string();
                let count = list.items.len();
                self.replace_nodes(list.items).await;
                debug!("Listed {} nodes at {}", count, rv);
                Ok(rv)
            }
        }
    }

    async fn apply(&self, resource: Resource, event_type: WatchEventType, object: Value) -> Result<()> {
        match resource {
            Resource::Pods => {
                let pod: Pod =
                    serde_json::from_value(object).map_err(|e| ClientError::decode("pod", e))?;
                self.apply_pod(event_type, pod).await;
            }
            Resource::Nodes => {
                let node: Node =
                    serde_json::from_value(object).map_err(|e| ClientError::decode("node", e))?;
                self.apply_node(event_type, node).await;
            }
        }
        Ok(())
    }

    async fn apply_pod(&self, event_type: WatchEventType, pod: Pod) {
        let key = match work_key(&pod) {
            Ok(key) => key,
            Err(e) => {
                warn!("Ignoring pod event: {}", e);
                return;
            }
        };

        let event = {
            let mut store = self.pods.write().await;
            if event_type == WatchEventType::Deleted {
                store.remove(&key);
                PodEvent::deleted(pod)
            } else if store.upsert(pod.clone()).is_some() {
                PodEvent::modified(pod)
            } else {
                PodEvent::added(pod)
            }
        };
        debug!("Pod {} {:?}", key, event.event_type);
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn apply_node(&self, event_type: WatchEventType, node: Node) {
        let Some(name) = node_name(&node).map(str::to_string) else {
            warn!("Ignoring node event without a name");
            return;
        };
        let mut nodes = self.nodes.write().await;
        if event_type == WatchEventType::Deleted {
            nodes.remove(&name);
        } else {
            nodes.insert(name, node);
        }
    }

    /// Swap in a fresh pod list, notifying for every difference
    async fn replace_pods(&self, pods: Vec<Pod>) {
        let events = {
            let mut store = self.pods.write().await;
            let mut stale: HashSet<WorkKey> = store.keys().into_iter().collect();
            let mut events = Vec::new();

            for pod in pods {
                let Ok(key) = work_key(&pod) else {
                    continue;
                };
                stale.remove(&key);
                let unchanged = store.get(&key).is_some_and(|old| {
                    old.metadata.resource_version.is_some()
                        && old.metadata.resource_version == pod.metadata.resource_version
                });
                if unchanged {
                    continue;
                }
                if store.upsert(pod.clone()).is_some() {
                    events.push(PodEvent::modified(pod));
                } else {
                    events.push(PodEvent::added(pod));
                }
            }
            for key in stale {
                if let Some(pod) = store.remove(&key) {
                    events.push(PodEvent::deleted(pod));
                }
            }
            events
        };

        for event in events {
            let _ = self.events.send(event);
        }
    }

    async fn replace_nodes(&self, nodes: Vec<Node>) {
        let fresh: BTreeMap<String, Node> = nodes
            .into_iter()
            .filter_map(|node| {
                let name = node_name(&node)?.to_string();
                Some((name, node))
            })
            .collect();
        *self.nodes.write().await = fresh;
    }
}

#[async_trait]
impl ClusterCache for Informer {
    async fn get_pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.pods
            .read()
            .await
            .get(&WorkKey::new(namespace, name))
            .cloned()
    }

    async fn list_pods(&self) -> Vec<Pod> {
        self.pods.read().await.list()
    }

    async fn list_nodes(&self) -> Vec<Node> {
        self.nodes.read().await.values().cloned().collect()
    }

    async fn list_group_pods(&self, group: &GroupKey, label_key: &str) -> Vec<Pod> {
        let store = self.pods.read().await;
        if store.label_key() == label_key {
            return store.group(group);
        }
        // Index was built for a different label
        store
            .list()
            .into_iter()
            .filter(|pod| nodeburst_core::group_key(pod, label_key).as_ref() == Some(group))
            .collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<PodEvent> {
        self.events.subscribe()
    }

    async fn wait_for_sync(&self) -> bool {
        let mut pods = self.pods_synced.subscribe();
        let mut nodes = self.nodes_synced.subscribe();
        let pods_ok = pods.wait_for(|synced| *synced).await.is_ok();
        let nodes_ok = nodes.wait_for(|synced| *synced).await.is_ok();
        pods_ok && nodes_ok
    }
}
