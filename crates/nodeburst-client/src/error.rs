use miette::Diagnostic;
use thiserror::Error;

/// Error talking to the cluster API server
#[derive(Error, Debug, Diagnostic)]
pub enum ClientError {
    /// Transport-level failure (connect, TLS, timeout)
    #[error("HTTP request to {url} failed: {message}")]
    #[diagnostic(
        code(nodeburst::client::http_error),
        help("Verify --api-url is reachable from this host")
    )]
    Http {
        #[allow(unused)]
        url: String,
        #[allow(unused)]
        message: String,
    },

    /// Non-success HTTP status
    #[error("{method} {url} failed with status {status}: {message}")]
    #[diagnostic(
        code(nodeburst::client::status_error),
        help("Check the service account's RBAC permissions for pods, nodes and pods/binding")
    )]
    Status {
        #[allow(unused)]
        method: &'static str,
        #[allow(unused)]
        url: String,
        #[allow(unused)]
        status: u16,
        #[allow(unused)]
        message: String,
    },

    /// Response body could not be decoded
    #[error("Failed to decode {what}: {message}")]
    #[diagnostic(
        code(nodeburst::client::decode_error),
        help("The API server returned an unexpected payload; check the server version")
    )]
    Decode {
        #[allow(unused)]
        what: String,
        #[allow(unused)]
        message: String,
    },

    /// The resource version used for a watch is too old
    #[error("Watch resource version expired")]
    #[diagnostic(code(nodeburst::client::gone))]
    Gone,

    /// Invalid client configuration
    #[error("Invalid client configuration: {message}")]
    #[diagnostic(code(nodeburst::client::invalid_config), help("{suggestion}"))]
    InvalidConfig {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    pub fn http(url: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Http {
            url: url.into(),
            message: err.to_string(),
        }
    }

    pub fn decode(what: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            what: what.into(),
            message: err.to_string(),
        }
    }

    pub fn invalid_config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }
}
