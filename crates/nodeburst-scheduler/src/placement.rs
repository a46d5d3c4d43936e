use nodeburst_core::resources::{group_key, is_pod_bound, is_terminal};
use nodeburst_core::{GroupKey, Pod, Pool};
use tracing::debug;

/// Outcome of a placement decision
///
/// Computed fresh on every reconciliation and never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Pool the pod goes to
    pub pool: Pool,
    /// Application group the pod was counted against (None if unlabeled)
    pub group: Option<GroupKey>,
    /// Bound, non-terminal pods observed in the group
    pub scheduled_count: usize,
    /// Placements issued by this scheduler that the cache does not show yet
    pub assumed_count: usize,
}

impl Placement {
    /// Instances of the group the decision was based on
    pub fn total_count(&self) -> usize {
        self.scheduled_count + self.assumed_count
    }
}

/// Decides between the primary and burst pools per application group
///
/// Once `burst_threshold` instances of a group are bound and still running,
/// further instances overflow to the burst pool. A threshold of zero or less
/// sends everything to burst.
#[derive(Debug, Clone)]
pub struct PlacementEngine {
    burst_threshold: i64,
    label_key: String,
}

impl PlacementEngine {
    pub fn new(burst_threshold: i64, label_key: impl Into<String>) -> Self {
        Self {
            burst_threshold,
            label_key: label_key.into(),
        }
    }

    pub fn label_key(&self) -> &str {
        &self.label_key
    }

    /// Application group of a pod; None means an isolated group of one
    pub fn group_of(&self, pod: &Pod) -> Option<GroupKey> {
        group_key(pod, &self.label_key)
    }

    /// Count bound, non-terminal members of `group` in one pass
    pub fn scheduled_count<'a, I>(&self, group: &GroupKey, pods: I) -> usize
    where
        I: IntoIterator<Item = &'a Pod>,
    {
        pods.into_iter()
            .filter(|pod| is_pod_bound(pod) && !is_terminal(pod))
            .filter(|pod| self.group_of(pod).as_ref() == Some(group))
            .count()
    }

    /// Pool for a group that already has `scheduled_count` placed instances
    pub fn pool_for_count(&self, scheduled_count: usize) -> Pool {
        let count = i64::try_from(scheduled_count).unwrap_or(i64::MAX);
        if count < self.burst_threshold {
            Pool::Primary
        } else {
            Pool::Burst
        }
    }

    /// Decide the pool for `pod` given the currently cached members of its group
    ///
    /// `group_pods` may include the pod itself; it is unbound and not counted.
    /// Performs no I/O.
    pub fn decide(&self, pod: &Pod, group_pods: &[Pod]) -> Placement {
        self.decide_with_assumed(pod, group_pods, 0)
    }

    /// Like `decide`, adding `assumed_count` placements the cache has not caught up with
    ///
    /// Assumed placements must be disjoint from the bound pods in `group_pods`.
    /// They are ignored for unlabeled pods.
    pub fn decide_with_assumed(
        &self,
        pod: &Pod,
        group_pods: &[Pod],
        assumed_count: usize,
    ) -> Placement {
        let group = self.group_of(pod);
        let (scheduled_count, assumed_count) = match &group {
            Some(g) => (self.scheduled_count(g, group_pods), assumed_count),
            None => (0, 0),
        };
        let pool = self.pool_for_count(scheduled_count + assumed_count);

        debug!(
            group = %group.as_ref().map(ToString::to_string).unwrap_or_default(),
            scheduled_count,
            assumed_count,
            threshold = self.burst_threshold,
            %pool,
            "Placement decided"
        );

        Placement {
            pool,
            group,
            scheduled_count,
            assumed_count,
        }
    }
}
