//! Nodeburst Core - Shared types for the nodeburst secondary scheduler
//!
//! This crate provides:
//! - Work keys, pool and phase types
//! - Pod and node accessors over k8s-openapi types
//! - Watch and pod notification events
//! - Collaborator traits for the cluster cache and the binding API
//! - An in-memory fake cluster for tests

// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

pub mod error;
pub mod events;
pub mod mock;
pub mod resources;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use error::{BindError, CoreError, Result};
pub use events::{PodEvent, WatchEvent, WatchEventType};
pub use mock::FakeCluster;
pub use resources::{
    application_label, group_key, is_pod_bound, is_pod_terminating, is_terminal, node_is_ready,
    node_name, pod_node_name, pod_phase, pod_scheduler_name, work_key,
};
pub use traits::{BindingApi, ClusterCache};
pub use types::{GroupKey, PodPhase, Pool, WorkKey};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::{Node, Pod};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
