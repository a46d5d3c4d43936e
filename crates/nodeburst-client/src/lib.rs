// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod api_client;
pub mod error;
pub mod informer;
pub mod store;
pub mod watch;

// Re-export primary types
pub use api_client::{ApiClient, ApiClientConfig, ObjectList};
pub use error::{ClientError, Result};
pub use informer::{Informer, InformerConfig};
pub use store::PodStore;
pub use watch::{WatchDecoder, WatchStream};
