use nodeburst_core::resources::{is_pod_bound, is_terminal, work_key};
use nodeburst_core::{GroupKey, Pod, WorkKey};
use std::collections::{HashMap, HashSet};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Bindings this scheduler issued that the cache may not reflect yet
///
/// The cache learns about a binding only when the watch delivers the MODIFIED
/// event, so a decision taken in between would undercount the group. Entries
/// live until the cache shows the pod bound (or terminal), or the pod leaves
/// the group. Holding the guard serializes decisions so that no two workers
/// count the same group without seeing each other's placement.
#[derive(Debug, Default)]
pub struct AssumedPlacements {
    state: Mutex<AssumedState>,
}

impl AssumedPlacements {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self) -> MutexGuard<'_, AssumedState> {
        self.state.lock().await
    }
}

#[derive(Debug, Default)]
pub struct AssumedState {
    groups: HashMap<GroupKey, HashMap<WorkKey, String>>,
}

impl AssumedState {
    /// Drop entries the cache has caught up with
    ///
    /// `group_pods` is the cached membership of `group`. A pod that is bound
    /// there is counted by the cache itself; a pod that is missing was deleted
    /// or relabeled.
    pub fn prune(&mut self, group: &GroupKey, group_pods: &[Pod]) {
        let Some(entries) = self.groups.get_mut(group) else {
            return;
        };
        let pending: HashSet<WorkKey> = group_pods
            .iter()
            .filter(|pod| !is_pod_bound(pod) && !is_terminal(pod))
            .filter_map(|pod| work_key(pod).ok())
            .collect();

        let before = entries.len();
        entries.retain(|key, _| pending.contains(key));
        if entries.len() != before {
            debug!(
                %group,
                dropped = before - entries.len(),
                "Cache caught up with assumed placements"
            );
        }
        if entries.is_empty() {
            self.groups.remove(group);
        }
    }

    /// Assumed placements in `group` not yet visible in the cache
    pub fn count(&self, group: &GroupKey) -> usize {
        self.groups.get(group).map_or(0, HashMap::len)
    }

    /// Node `key` was assumed onto, if any
    pub fn node_for(&self, group: &GroupKey, key: &WorkKey) -> Option<&str> {
        self.groups
            .get(group)
            .and_then(|entries| entries.get(key))
            .map(String::as_str)
    }

    pub fn assume(&mut self, group: GroupKey, key: WorkKey, node_name: String) {
        self.groups.entry(group).or_default().insert(key, node_name);
    }

    pub fn forget(&mut self, group: &GroupKey, key: &WorkKey) {
        if let Some(entries) = self.groups.get_mut(group) {
            entries.remove(key);
            if entries.is_empty() {
                self.groups.remove(group);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeburst_core::mock::make_pod;

    fn web() -> GroupKey {
        GroupKey::new("shop", "web")
    }

    fn pending(name: &str) -> Pod {
        make_pod("shop", name, "nodeburst", Some("web"), None, "Pending")
    }

    #[tokio::test]
    async fn test_assumed_placements_are_counted_per_group() {
        let assumed = AssumedPlacements::new();
        let mut state = assumed.lock().await;
        state.assume(web(), WorkKey::new("shop", "web-1"), "node-a".to_string());
        state.assume(web(), WorkKey::new("shop", "web-2"), "node-b".to_string());
        state.assume(
            GroupKey::new("shop", "api"),
            WorkKey::new("shop", "api-1"),
            "node-a".to_string(),
        );

        assert_eq!(state.count(&web()), 2);
        assert_eq!(state.count(&GroupKey::new("blog", "web")), 0);
        assert_eq!(state.node_for(&web(), &WorkKey::new("shop", "web-2")), Some("node-b"));
        assert_eq!(state.len(), 3);
    }

    #[test]
    fn test_prune_drops_entries_the_cache_shows_bound() {
        let mut state = AssumedState::default();
        state.assume(web(), WorkKey::new("shop", "web-1"), "node-a".to_string());
        state.assume(web(), WorkKey::new("shop", "web-2"), "node-a".to_string());

        let cached = vec![
            make_pod("shop", "web-1", "nodeburst", Some("web"), Some("node-a"), "Running"),
            pending("web-2"),
        ];
        state.prune(&web(), &cached);

        assert_eq!(state.count(&web()), 1);
        assert!(state.node_for(&web(), &WorkKey::new("shop", "web-1")).is_none());
    }

    #[test]
    fn test_prune_drops_deleted_and_relabeled_pods() {
        let mut state = AssumedState::default();
        state.assume(web(), WorkKey::new("shop", "gone"), "node-a".to_string());
        state.assume(web(), WorkKey::new("shop", "moved"), "node-a".to_string());

        // Neither pod is listed under the group anymore
        state.prune(&web(), &[pending("web-9")]);

        assert!(state.is_empty());
    }

    #[test]
    fn test_forget_releases_the_slot() {
        let mut state = AssumedState::default();
        let key = WorkKey::new("shop", "web-1");
        state.assume(web(), key.clone(), "node-a".to_string());
        state.forget(&web(), &key);
        state.forget(&web(), &key);

        assert_eq!(state.count(&web()), 0);
        assert!(state.is_empty());
    }
}
