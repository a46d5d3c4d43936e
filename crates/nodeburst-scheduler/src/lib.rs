//! Nodeburst Scheduler - primary/burst placement for opted-in pods
//!
//! This crate provides:
//! - A deduplicating, rate-limited reconciliation queue
//! - The event translator feeding it from cache notifications
//! - The placement decision engine (primary vs. burst per application group)
//! - Tracking of issued placements until the cache reflects them
//! - Node selection and binding
//! - The controller lifecycle that runs the worker pool

// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

pub mod assume;
pub mod backoff;
pub mod binder;
pub mod config;
pub mod controller;
pub mod error;
pub mod placement;
pub mod queue;
pub mod reconciler;
pub mod select;
pub mod translator;

// Re-export commonly used types
pub use assume::AssumedPlacements;
pub use binder::{BindOutcome, Binder};
pub use config::{BackoffConfig, PoolConfig, SchedulerConfig};
pub use controller::Controller;
pub use error::{Result, SchedulerError};
pub use placement::{Placement, PlacementEngine};
pub use queue::WorkQueue;
pub use reconciler::{Ineligible, ReconcileOutcome, Reconciler};
pub use select::NodeSelector;
pub use translator::EventTranslator;
