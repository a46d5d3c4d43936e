use crate::assume::AssumedPlacements;
use crate::binder::{BindOutcome, Binder};
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::placement::{Placement, PlacementEngine};
use crate::select::NodeSelector;
use nodeburst_core::resources::{is_pod_terminating, pod_node_name, pod_scheduler_name};
use nodeburst_core::{BindingApi, ClusterCache, GroupKey, Pod, Pool, WorkKey};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Why a pod is not handled by this scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ineligible {
    /// `spec.schedulerName` names a different scheduler
    OtherScheduler(String),
    /// Already assigned to a node
    AlreadyBound(String),
    /// Deletion in progress
    Terminating,
}

impl fmt::Display for Ineligible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ineligible::OtherScheduler(name) => write!(f, "scheduled by {}", name),
            Ineligible::AlreadyBound(node) => write!(f, "already bound to {}", node),
            Ineligible::Terminating => write!(f, "terminating"),
        }
    }
}

/// Check whether `pod` should be placed by the scheduler named `scheduler_name`
pub fn check_eligibility(pod: &Pod, scheduler_name: &str) -> std::result::Result<(), Ineligible> {
    let requested = pod_scheduler_name(pod);
    if requested != scheduler_name {
        return Err(Ineligible::OtherScheduler(requested.to_string()));
    }
    if let Some(node) = pod_node_name(pod) {
        return Err(Ineligible::AlreadyBound(node.to_string()));
    }
    if is_pod_terminating(pod) {
        return Err(Ineligible::Terminating);
    }
    Ok(())
}

/// Terminal result of one reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The pod is gone from the cache
    PodAbsent,
    /// The pod is not ours to place (anymore)
    Skipped(Ineligible),
    /// A binding was issued
    Bound { pool: Pool, node: String },
    /// A concurrent bind won the race; nothing was changed
    AlreadyBound { node: Option<String> },
}

/// Runs decide, select and bind for a single work key
///
/// Every call starts from the current cache state. The only thing carried
/// between calls is the set of assumed placements, which covers bindings the
/// cache has not reported yet. Decisions for grouped pods are serialized on it;
/// the bind itself runs outside the lock.
pub struct Reconciler {
    cache: Arc<dyn ClusterCache>,
    engine: PlacementEngine,
    selector: NodeSelector,
    binder: Binder,
    assumed: AssumedPlacements,
    scheduler_name: String,
}

impl Reconciler {
    pub fn new(
        config: &SchedulerConfig,
        cache: Arc<dyn ClusterCache>,
        api: Arc<dyn BindingApi>,
    ) -> Self {
        Self {
            engine: PlacementEngine::new(config.burst_threshold, config.app_label.clone()),
            selector: NodeSelector::new(config.pools.clone()),
            binder: Binder::new(api, cache.clone()),
            assumed: AssumedPlacements::new(),
            cache,
            scheduler_name: config.scheduler_name.clone(),
        }
    }

    pub async fn reconcile(&self, key: &WorkKey) -> Result<ReconcileOutcome> {
        let Some(pod) = self.cache.get_pod(&key.namespace, &key.name).await else {
            debug!("Pod {} no longer exists, nothing to do", key);
            return Ok(ReconcileOutcome::PodAbsent);
        };

        if let Err(reason) = check_eligibility(&pod, &self.scheduler_name) {
            debug!("Skipping pod {}: {}", key, reason);
            return Ok(ReconcileOutcome::Skipped(reason));
        }

        let Some(group) = self.engine.group_of(&pod) else {
            let placement = self.engine.decide(&pod, &[]);
            let node = self.select_node(&placement).await?;
            return self.bind(key, &pod, &placement, node).await;
        };

        let (placement, node) = {
            let mut assumed = self.assumed.lock().await;
            let group_pods = self
                .cache
                .list_group_pods(&group, self.engine.label_key())
                .await;
            assumed.prune(&group, &group_pods);

            if let Some(node) = assumed.node_for(&group, key) {
                debug!("Pod {} already placed on {}, waiting for the cache", key, node);
                return Ok(ReconcileOutcome::AlreadyBound {
                    node: Some(node.to_string()),
                });
            }

            let placement = self
                .engine
                .decide_with_assumed(&pod, &group_pods, assumed.count(&group));
            let node = self.select_node(&placement).await?;
            assumed.assume(group.clone(), key.clone(), node.clone());
            (placement, node)
        };

        let result = self.bind(key, &pod, &placement, node).await;
        self.settle(&group, key, &result).await;
        result
    }

    async fn select_node(&self, placement: &Placement) -> Result<String> {
        let nodes = self.cache.list_nodes().await;
        self.selector.select(placement.pool, &nodes)
    }

    async fn bind(
        &self,
        key: &WorkKey,
        pod: &Pod,
        placement: &Placement,
        node: String,
    ) -> Result<ReconcileOutcome> {
        info!(
            "Placing pod {} on {} node {} ({} of group already scheduled)",
            key,
            placement.pool,
            node,
            placement.total_count()
        );

        match self.binder.bind(pod, &node).await? {
            BindOutcome::Bound => Ok(ReconcileOutcome::Bound {
                pool: placement.pool,
                node,
            }),
            BindOutcome::AlreadyBound { node } => Ok(ReconcileOutcome::AlreadyBound { node }),
        }
    }

    /// Reconcile the assumed placement with what the API server answered
    async fn settle(&self, group: &GroupKey, key: &WorkKey, result: &Result<ReconcileOutcome>) {
        let mut assumed = self.assumed.lock().await;
        match result {
            Ok(ReconcileOutcome::AlreadyBound { node: Some(node) }) => {
                assumed.assume(group.clone(), key.clone(), node.clone());
            }
            Ok(_) => {}
            Err(_) => assumed.forget(group, key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::error::SchedulerError;
    use chrono::Utc;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use nodeburst_core::mock::{make_node, make_pod};
    use nodeburst_core::{BindError, FakeCluster};

    const SCHED: &str = "nodeburst";

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            scheduler_name: SCHED.to_string(),
            burst_threshold: 2,
            pools: PoolConfig::new(["burst-0"]),
            ..Default::default()
        }
    }

    async fn setup() -> (FakeCluster, Reconciler) {
        setup_with(FakeCluster::new()).await
    }

    async fn setup_with(cluster: FakeCluster) -> (FakeCluster, Reconciler) {
        cluster.apply_node(make_node("node-a", true)).await;
        cluster.apply_node(make_node("burst-0", true)).await;
        let shared = Arc::new(cluster.clone());
        let reconciler = Reconciler::new(&config(), shared.clone(), shared);
        (cluster, reconciler)
    }

    #[test]
    fn test_eligibility_filter() {
        let ok = make_pod("shop", "p", SCHED, None, None, "Pending");
        assert_eq!(check_eligibility(&ok, SCHED), Ok(()));

        let other = make_pod("shop", "p", "default-scheduler", None, None, "Pending");
        assert!(matches!(
            check_eligibility(&other, SCHED),
            Err(Ineligible::OtherScheduler(_))
        ));

        let bound = make_pod("shop", "p", SCHED, None, Some("node-a"), "Running");
        assert_eq!(
            check_eligibility(&bound, SCHED),
            Err(Ineligible::AlreadyBound("node-a".to_string()))
        );

        let mut deleting = make_pod("shop", "p", SCHED, None, None, "Pending");
        deleting.metadata.deletion_timestamp = Some(Time(Utc::now()));
        assert_eq!(check_eligibility(&deleting, SCHED), Err(Ineligible::Terminating));
    }

    #[tokio::test]
    async fn test_absent_pod_is_success_without_bind() {
        let (cluster, reconciler) = setup().await;
        let outcome = reconciler.reconcile(&WorkKey::new("shop", "p1")).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::PodAbsent);
        assert!(cluster.bind_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_ineligible_pod_is_skipped() {
        let (cluster, reconciler) = setup().await;
        cluster
            .apply_pod(make_pod("shop", "p1", "default-scheduler", None, None, "Pending"))
            .await;
        let outcome = reconciler.reconcile(&WorkKey::new("shop", "p1")).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Skipped(_)));
        assert!(cluster.bind_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_binds_primary_then_burst() {
        let (cluster, reconciler) = setup().await;
        for name in ["web-1", "web-2", "web-3"] {
            cluster
                .apply_pod(make_pod("shop", name, SCHED, Some("web"), None, "Pending"))
                .await;
        }

        let mut pools = Vec::new();
        for name in ["web-1", "web-2", "web-3"] {
            match reconciler.reconcile(&WorkKey::new("shop", name)).await.unwrap() {
                ReconcileOutcome::Bound { pool, .. } => pools.push(pool),
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert_eq!(pools, vec![Pool::Primary, Pool::Primary, Pool::Burst]);

        let calls = cluster.bind_calls().await;
        assert_eq!(calls[0].node_name, "node-a");
        assert_eq!(calls[1].node_name, "node-a");
        assert_eq!(calls[2].node_name, "burst-0");
    }

    #[tokio::test]
    async fn test_threshold_holds_while_cache_is_stale() {
        let cluster = FakeCluster::new().with_manual_bind_visibility();
        let (cluster, reconciler) = setup_with(cluster).await;
        for name in ["web-1", "web-2", "web-3"] {
            cluster
                .apply_pod(make_pod("shop", name, SCHED, Some("web"), None, "Pending"))
                .await;
        }

        let mut pools = Vec::new();
        for name in ["web-1", "web-2", "web-3"] {
            match reconciler.reconcile(&WorkKey::new("shop", name)).await.unwrap() {
                ReconcileOutcome::Bound { pool, .. } => pools.push(pool),
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert_eq!(pools, vec![Pool::Primary, Pool::Primary, Pool::Burst]);

        // None of the bindings are visible yet
        let cached = cluster.pod("shop", "web-1").await.unwrap();
        assert_eq!(pod_node_name(&cached), None);

        assert_eq!(cluster.flush_binds().await, 3);
        cluster
            .apply_pod(make_pod("shop", "web-4", SCHED, Some("web"), None, "Pending"))
            .await;
        match reconciler.reconcile(&WorkKey::new("shop", "web-4")).await.unwrap() {
            ReconcileOutcome::Bound { pool, .. } => assert_eq!(pool, Pool::Burst),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(reconciler.assumed.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_assumed_pod_is_not_bound_twice() {
        let cluster = FakeCluster::new().with_manual_bind_visibility();
        let (cluster, reconciler) = setup_with(cluster).await;
        cluster
            .apply_pod(make_pod("shop", "web-1", SCHED, Some("web"), None, "Pending"))
            .await;
        let key = WorkKey::new("shop", "web-1");

        assert!(matches!(
            reconciler.reconcile(&key).await.unwrap(),
            ReconcileOutcome::Bound { .. }
        ));
        assert_eq!(
            reconciler.reconcile(&key).await.unwrap(),
            ReconcileOutcome::AlreadyBound {
                node: Some("node-a".to_string())
            }
        );
        assert_eq!(cluster.bind_calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_bind_releases_assumed_slot() {
        let cluster = FakeCluster::new().with_manual_bind_visibility();
        let (cluster, reconciler) = setup_with(cluster).await;
        cluster
            .apply_pod(make_pod("shop", "web-1", SCHED, Some("web"), None, "Pending"))
            .await;
        cluster
            .apply_pod(make_pod("shop", "web-2", SCHED, Some("web"), None, "Pending"))
            .await;
        cluster
            .fail_next_bind(BindError::conflict("shop/web-1", "object modified"))
            .await;

        assert!(reconciler.reconcile(&WorkKey::new("shop", "web-1")).await.is_err());
        assert!(reconciler.assumed.lock().await.is_empty());

        for name in ["web-2", "web-1"] {
            match reconciler.reconcile(&WorkKey::new("shop", name)).await.unwrap() {
                ReconcileOutcome::Bound { pool, .. } => assert_eq!(pool, Pool::Primary),
                other => panic!("unexpected outcome {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_racing_bind_counts_toward_group() {
        let cluster = FakeCluster::new().with_manual_bind_visibility();
        let (cluster, reconciler) = setup_with(cluster).await;
        cluster
            .apply_pod(make_pod("shop", "web-1", SCHED, Some("web"), None, "Pending"))
            .await;
        cluster.bind_behind_cache("shop", "web-1", "node-b").await;

        assert_eq!(
            reconciler.reconcile(&WorkKey::new("shop", "web-1")).await.unwrap(),
            ReconcileOutcome::AlreadyBound {
                node: Some("node-b".to_string())
            }
        );
        let state = reconciler.assumed.lock().await;
        assert_eq!(
            state.node_for(&GroupKey::new("shop", "web"), &WorkKey::new("shop", "web-1")),
            Some("node-b")
        );
    }

    #[tokio::test]
    async fn test_second_reconcile_is_noop() {
        let (cluster, reconciler) = setup().await;
        cluster
            .apply_pod(make_pod("shop", "web-1", SCHED, Some("web"), None, "Pending"))
            .await;
        let key = WorkKey::new("shop", "web-1");

        assert!(matches!(
            reconciler.reconcile(&key).await.unwrap(),
            ReconcileOutcome::Bound { .. }
        ));
        assert_eq!(
            reconciler.reconcile(&key).await.unwrap(),
            ReconcileOutcome::Skipped(Ineligible::AlreadyBound("node-a".to_string()))
        );
        assert_eq!(cluster.bind_calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_no_capacity_propagates() {
        let cluster = FakeCluster::new();
        cluster.apply_node(make_node("node-a", true)).await;
        cluster.apply_node(make_node("burst-0", false)).await;
        let shared = Arc::new(cluster.clone());
        let config = SchedulerConfig {
            burst_threshold: 0,
            ..config()
        };
        let reconciler = Reconciler::new(&config, shared.clone(), shared);
        cluster
            .apply_pod(make_pod("shop", "web-1", SCHED, Some("web"), None, "Pending"))
            .await;

        let err = reconciler
            .reconcile(&WorkKey::new("shop", "web-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NoCapacity { pool: Pool::Burst }));
        assert!(cluster.bind_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_bind_failure_propagates() {
        let (cluster, reconciler) = setup().await;
        cluster
            .apply_pod(make_pod("shop", "web-1", SCHED, None, None, "Pending"))
            .await;
        cluster
            .fail_next_bind(BindError::transient("shop/web-1", "timeout"))
            .await;

        let err = reconciler
            .reconcile(&WorkKey::new("shop", "web-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Bind(BindError::Transient { .. })));
    }
}
