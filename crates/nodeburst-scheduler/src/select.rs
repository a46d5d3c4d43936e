use crate::config::PoolConfig;
use crate::error::{Result, SchedulerError};
use nodeburst_core::resources::{node_is_ready, node_name};
use nodeburst_core::{Node, Pool};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

/// Resolves a pool to a concrete node
///
/// Picks uniformly at random among the ready nodes of the pool. With a single
/// burst node configured this degenerates to that node.
#[derive(Debug, Clone)]
pub struct NodeSelector {
    pools: PoolConfig,
}

impl NodeSelector {
    pub fn new(pools: PoolConfig) -> Self {
        Self { pools }
    }

    /// Ready nodes belonging to `pool`
    pub fn candidates<'a>(&self, pool: Pool, nodes: &'a [Node]) -> Vec<&'a str> {
        nodes
            .iter()
            .filter(|node| node_is_ready(node))
            .filter_map(node_name)
            .filter(|name| self.pools.pool_of(name) == pool)
            .collect()
    }

    /// Choose a node from `pool`, failing with NoCapacity if none is ready
    pub fn select(&self, pool: Pool, nodes: &[Node]) -> Result<String> {
        self.select_with(pool, nodes, &mut rand::thread_rng())
    }

    pub fn select_with<R: Rng + ?Sized>(
        &self,
        pool: Pool,
        nodes: &[Node],
        rng: &mut R,
    ) -> Result<String> {
        let candidates = self.candidates(pool, nodes);
        debug!("{} ready nodes in the {} pool", candidates.len(), pool);

        candidates
            .choose(rng)
            .map(|name| name.to_string())
            .ok_or(SchedulerError::no_capacity(pool))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeburst_core::mock::make_node;
    use std::collections::HashSet;

    fn selector() -> NodeSelector {
        NodeSelector::new(PoolConfig::new(["burst-0"]))
    }

    #[test]
    fn test_primary_excludes_burst_and_unready_nodes() {
        let nodes = vec![
            make_node("node-a", true),
            make_node("node-b", false),
            make_node("burst-0", true),
        ];
        assert_eq!(selector().candidates(Pool::Primary, &nodes), vec!["node-a"]);
        assert_eq!(selector().select(Pool::Primary, &nodes).unwrap(), "node-a");
    }

    #[test]
    fn test_primary_spreads_across_ready_nodes() {
        let nodes = vec![
            make_node("node-a", true),
            make_node("node-b", true),
            make_node("node-c", true),
        ];
        let s = selector();
        let mut rng = rand::thread_rng();
        let seen: HashSet<String> = (0..200)
            .map(|_| s.select_with(Pool::Primary, &nodes, &mut rng).unwrap())
            .collect();
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_single_burst_node() {
        let nodes = vec![make_node("node-a", true), make_node("burst-0", true)];
        assert_eq!(selector().select(Pool::Burst, &nodes).unwrap(), "burst-0");
    }

    #[test]
    fn test_burst_with_no_ready_nodes_is_no_capacity() {
        let nodes = vec![make_node("node-a", true), make_node("burst-0", false)];
        let err = selector().select(Pool::Burst, &nodes).unwrap_err();
        assert!(matches!(err, SchedulerError::NoCapacity { pool: Pool::Burst }));
    }

    #[test]
    fn test_empty_node_list_is_no_capacity() {
        let err = selector().select(Pool::Primary, &[]).unwrap_err();
        assert!(matches!(err, SchedulerError::NoCapacity { pool: Pool::Primary }));
    }
}
