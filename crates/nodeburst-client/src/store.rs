use k8s_openapi::api::core::v1::Pod;
use nodeburst_core::resources::{group_key, work_key};
use nodeburst_core::{GroupKey, WorkKey};
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

/// Local copy of the watched pods, indexed by application group
///
/// Group membership follows the pod's current label value; relabeling a pod
/// moves it between groups on the next upsert.
#[derive(Debug)]
pub struct PodStore {
    label_key: String,
    pods: HashMap<WorkKey, Pod>,
    groups: HashMap<GroupKey, BTreeSet<WorkKey>>,
}

impl PodStore {
    pub fn new(label_key: impl Into<String>) -> Self {
        Self {
            label_key: label_key.into(),
            pods: HashMap::new(),
            groups: HashMap::new(),
        }
    }

    pub fn label_key(&self) -> &str {
        &self.label_key
    }

    /// Insert or replace a pod, returning the previous version
    pub fn upsert(&mut self, pod: Pod) -> Option<Pod> {
        let key = match work_key(&pod) {
            Ok(key) => key,
            Err(e) => {
                warn!("Ignoring pod without identity: {}", e);
                return None;
            }
        };

        let previous = self.pods.remove(&key);
        if let Some(old) = &previous {
            self.unindex(&key, old);
        }
        if let Some(group) = group_key(&pod, &self.label_key) {
            self.groups.entry(group).or_default().insert(key.clone());
        }
        self.pods.insert(key, pod);
        previous
    }

    /// Remove a pod, returning the last stored version
    pub fn remove(&mut self, key: &WorkKey) -> Option<Pod> {
        let removed = self.pods.remove(key)?;
        self.unindex(key, &removed);
        Some(removed)
    }

    fn unindex(&mut self, key: &WorkKey, pod: &Pod) {
        let Some(group) = group_key(pod, &self.label_key) else {
            return;
        };
        if let Some(members) = self.groups.get_mut(&group) {
            members.remove(key);
            if members.is_empty() {
                self.groups.remove(&group);
            }
        }
    }

    pub fn get(&self, key: &WorkKey) -> Option<&Pod> {
        self.pods.get(key)
    }

    pub fn list(&self) -> Vec<Pod> {
        self.pods.values().cloned().collect()
    }

    pub fn keys(&self) -> Vec<WorkKey> {
        self.pods.keys().cloned().collect()
    }

    /// Pods of one group, read through the index
    pub fn group(&self, group: &GroupKey) -> Vec<Pod> {
        self.groups
            .get(group)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|key| self.pods.get(key).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn len(&self) -> usize {
        self.pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }
}
