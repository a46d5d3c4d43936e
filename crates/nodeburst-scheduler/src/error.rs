use miette::Diagnostic;
use nodeburst_core::{BindError, CoreError, Pool};
use thiserror::Error;

/// Scheduler error type
#[derive(Error, Debug, Diagnostic)]
pub enum SchedulerError {
    /// The chosen pool has no ready nodes
    #[error("No ready nodes in the {pool} pool")]
    #[diagnostic(
        code(scheduler::no_capacity),
        help("Check that the pool's nodes are Ready and not cordoned; the pod will be retried with backoff")
    )]
    NoCapacity {
        #[allow(unused)]
        pool: Pool,
    },

    /// The binding API rejected the request
    #[error(transparent)]
    #[diagnostic(transparent)]
    Bind(#[from] BindError),

    /// Core error (objects missing metadata)
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] CoreError),

    /// The cache never completed its initial sync
    #[error("Timed out after {timeout_secs}s waiting for the cache to sync")]
    #[diagnostic(
        code(scheduler::cache_sync_failed),
        help("Verify API server connectivity and that the service account can list and watch pods and nodes")
    )]
    CacheSyncFailed {
        #[allow(unused)]
        timeout_secs: u64,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(scheduler::invalid_config), help("{suggestion}"))]
    InvalidConfig {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    /// Create a NoCapacity error
    pub fn no_capacity(pool: Pool) -> Self {
        Self::NoCapacity { pool }
    }

    /// Create an InvalidConfig error
    pub fn invalid_config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }
}
