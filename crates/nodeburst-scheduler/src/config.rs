use crate::error::{Result, SchedulerError};
use nodeburst_core::Pool;
use std::collections::BTreeSet;
use std::time::Duration;

/// Partition of the cluster's nodes into the two pools
///
/// Fixed for the lifetime of a controller run. Nodes named here form the
/// burst pool; every other node is primary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolConfig {
    burst_nodes: BTreeSet<String>,
}

impl PoolConfig {
    pub fn new<I, S>(burst_nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            burst_nodes: burst_nodes.into_iter().map(Into::into).collect(),
        }
    }

    /// Pool a node belongs to
    pub fn pool_of(&self, node_name: &str) -> Pool {
        if self.burst_nodes.contains(node_name) {
            Pool::Burst
        } else {
            Pool::Primary
        }
    }

    pub fn burst_nodes(&self) -> impl Iterator<Item = &str> {
        self.burst_nodes.iter().map(String::as_str)
    }
}

/// Per-key retry delay policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
        }
    }
}

/// Configuration for the burst scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pods must set `spec.schedulerName` to this value to be handled
    pub scheduler_name: String,
    /// Scheduled instances per application group before overflowing to burst
    pub burst_threshold: i64,
    /// Label key that defines application groups
    pub app_label: String,
    /// Primary/burst node partition
    pub pools: PoolConfig,
    /// Number of concurrent workers
    pub workers: usize,
    /// Retry policy for failed reconciliations
    pub backoff: BackoffConfig,
    /// How long to wait for the initial cache sync
    pub cache_sync_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduler_name: "nodeburst-scheduler".to_string(),
            burst_threshold: 2,
            app_label: "app".to_string(),
            pools: PoolConfig::default(),
            workers: 2,
            backoff: BackoffConfig::default(),
            cache_sync_timeout: Duration::from_secs(60),
        }
    }
}

impl SchedulerConfig {
    /// Reject configurations the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.scheduler_name.trim().is_empty() {
            return Err(SchedulerError::invalid_config(
                "scheduler name is empty",
                "Set --scheduler-name to the value pods use in spec.schedulerName",
            ));
        }
        if self.app_label.trim().is_empty() {
            return Err(SchedulerError::invalid_config(
                "application label key is empty",
                "Set --app-label, e.g. \"app\"",
            ));
        }
        if self.workers == 0 {
            return Err(SchedulerError::invalid_config(
                "worker count must be at least 1",
                "Set --workers to a positive number",
            ));
        }
        if self.backoff.base_delay > self.backoff.max_delay {
            return Err(SchedulerError::invalid_config(
                format!(
                    "backoff base delay {:?} exceeds max delay {:?}",
                    self.backoff.base_delay, self.backoff.max_delay
                ),
                "Lower --backoff-base-ms or raise --backoff-max-secs",
            ));
        }
        Ok(())
    }
}
