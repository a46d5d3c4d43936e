use miette::Diagnostic;
use thiserror::Error;

/// Core error type for nodeburst operations
#[derive(Error, Debug, Diagnostic)]
pub enum CoreError {
    /// Object is missing a required metadata field
    #[error("Object is missing {field}")]
    #[diagnostic(
        code(nodeburst::missing_field),
        help("Objects from the API server always carry name and namespace; check the cache source")
    )]
    MissingField {
        #[allow(unused)]
        field: &'static str,
    },
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Outcome of a rejected binding request
///
/// Every variant except `AlreadyBound` is retryable.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum BindError {
    /// The pod is already assigned to a node
    #[error("Pod {pod} is already bound{}", bound_suffix(.node))]
    #[diagnostic(code(nodeburst::bind::already_bound))]
    AlreadyBound {
        #[allow(unused)]
        pod: String,
        #[allow(unused)]
        node: Option<String>,
    },

    /// The binding raced with another writer
    #[error("Binding conflict for pod {pod}: {message}")]
    #[diagnostic(
        code(nodeburst::bind::conflict),
        help("The pod was modified concurrently; the binding will be retried")
    )]
    Conflict {
        #[allow(unused)]
        pod: String,
        #[allow(unused)]
        message: String,
    },

    /// The pod or node does not exist
    #[error("Binding target not found for pod {pod}: {message}")]
    #[diagnostic(
        code(nodeburst::bind::not_found),
        help("The pod may have been deleted, or the node removed from the cluster")
    )]
    NotFound {
        #[allow(unused)]
        pod: String,
        #[allow(unused)]
        message: String,
    },

    /// Timeouts, throttling, server errors
    #[error("Transient binding failure for pod {pod}: {message}")]
    #[diagnostic(
        code(nodeburst::bind::transient),
        help("Check API server connectivity; the binding will be retried with backoff")
    )]
    Transient {
        #[allow(unused)]
        pod: String,
        #[allow(unused)]
        message: String,
    },
}

fn bound_suffix(node: &Option<String>) -> String {
    node.as_ref()
        .map(|n| format!(" to {}", n))
        .unwrap_or_default()
}

impl BindError {
    pub fn already_bound(pod: impl Into<String>, node: Option<String>) -> Self {
        Self::AlreadyBound {
            pod: pod.into(),
            node,
        }
    }

    pub fn conflict(pod: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            pod: pod.into(),
            message: message.into(),
        }
    }

    pub fn not_found(pod: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFound {
            pod: pod.into(),
            message: message.into(),
        }
    }

    pub fn transient(pod: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            pod: pod.into(),
            message: message.into(),
        }
    }

    /// Whether the queue should redeliver the key after this failure
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::AlreadyBound { .. })
    }
}
