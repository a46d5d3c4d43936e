use crate::error::{ClientError, Result};
use crate::watch::WatchStream;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Binding, Node, ObjectReference, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ListMeta, ObjectMeta, Status};
use nodeburst_core::{BindError, BindingApi};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Server-side timeout for one watch request
const WATCH_TIMEOUT_SECS: u64 = 300;

/// Connection settings for the API server
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// e.g. `https://10.0.0.1:443`
    pub base_url: String,
    /// File holding the bearer token; re-read on every request so rotated
    /// service account tokens are picked up
    pub token_file: Option<PathBuf>,
    /// PEM bundle used to verify the server
    pub ca_file: Option<PathBuf>,
    /// Timeout for list and bind requests (watches are long-lived)
    pub request_timeout: Duration,
}

impl ApiClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token_file: None,
            ca_file: None,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Settings for a pod running inside the cluster
    pub fn in_cluster() -> Result<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            ClientError::invalid_config(
                "KUBERNETES_SERVICE_HOST is not set",
                "Run inside a cluster or pass --api-url",
            )
        })?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());

        // IPv6 service addresses need brackets
        let host = if host.contains(':') {
            format!("[{}]", host)
        } else {
            host
        };

        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        Ok(Self {
            token_file: Some(dir.join("token")),
            ca_file: Some(dir.join("ca.crt")),
            ..Self::new(format!("https://{}:{}", host, port))
        })
    }
}

/// Collection response from a list call
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ObjectList<T> {
    #[serde(default)]
    pub metadata: ListMeta,
    #[serde(default)]
    pub items: Vec<T>,
}

impl<T> ObjectList<T> {
    pub fn resource_version(&self) -> Option<&str> {
        self.metadata
            .resource_version
            .as_deref()
            .filter(|rv| !rv.is_empty())
    }
}

/// Minimal HTTP client for the pod and node endpoints the scheduler needs
pub struct ApiClient {
    base_url: String,
    client: Client,
    token_file: Option<PathBuf>,
    request_timeout: Duration,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            token_file: None,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_config(config: &ApiClientConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(ca_file) = &config.ca_file {
            let pem = std::fs::read(ca_file).map_err(|e| {
                ClientError::invalid_config(
                    format!("cannot read CA bundle {}: {}", ca_file.display(), e),
                    "Pass --ca-file pointing at the cluster CA certificate",
                )
            })?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                ClientError::invalid_config(
                    format!("invalid CA bundle {}: {}", ca_file.display(), e),
                    "The CA file must contain PEM-encoded certificates",
                )
            })?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder.build().map_err(|e| {
            ClientError::invalid_config(format!("cannot build HTTP client: {}", e), "Check TLS settings")
        })?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            token_file: config.token_file.clone(),
            request_timeout: config.request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Collection path for pods, cluster-wide when `namespace` is None
    pub fn pods_path(namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) => format!("/api/v1/namespaces/{}/pods", ns),
            None => "/api/v1/pods".to_string(),
        }
    }

    pub fn nodes_path() -> &'static str {
        "/api/v1/nodes"
    }

    fn request(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        let mut req = self.client.request(method, url);
        if let Some(token_file) = &self.token_file {
            let token = std::fs::read_to_string(token_file).map_err(|e| {
                ClientError::invalid_config(
                    format!("cannot read token {}: {}", token_file.display(), e),
                    "Pass --token-file pointing at a service account token",
                )
            })?;
            req = req.bearer_auth(token.trim());
        }
        Ok(req)
    }

    /// GET /api/v1/namespaces/{namespace}/pods (or /api/v1/pods)
    pub async fn list_pods(&self, namespace: Option<&str>) -> Result<ObjectList<Pod>> {
        self.list(&Self::pods_path(namespace)).await
    }

    /// GET /api/v1/nodes
    pub async fn list_nodes(&self) -> Result<ObjectList<Node>> {
        self.list(Self::nodes_path()).await
    }

    /// GET any collection path
    pub async fn list<T: DeserializeOwned>(&self, path: &str) -> Result<ObjectList<T>> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let resp = self
            .request(Method::GET, &url)?
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| ClientError::http(&url, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                method: "GET",
                url,
                status: status.as_u16(),
                message: status_message(&body),
            });
        }

        resp.json::<ObjectList<T>>()
            .await
            .map_err(|e| ClientError::decode(path, e))
    }

    /// GET /api/v1/namespaces/{namespace}/pods?watch=true
    pub async fn watch_pods(
        &self,
        namespace: Option<&str>,
        resource_version: &str,
    ) -> Result<WatchStream> {
        self.watch(&Self::pods_path(namespace), resource_version)
            .await
    }

    /// GET /api/v1/nodes?watch=true
    pub async fn watch_nodes(&self, resource_version: &str) -> Result<WatchStream> {
        self.watch(Self::nodes_path(), resource_version).await
    }

    /// Open a watch starting after `resource_version`
    ///
    /// A 410 response maps to `ClientError::Gone`; the caller must relist.
    pub async fn watch(&self, path: &str, resource_version: &str) -> Result<WatchStream> {
        let url = format!(
            "{}{}?watch=true&allowWatchBookmarks=true&resourceVersion={}&timeoutSeconds={}",
            self.base_url, path, resource_version, WATCH_TIMEOUT_SECS
        );
        debug!("WATCH {}", url);

        let resp = self
            .request(Method::GET, &url)?
            .send()
            .await
            .map_err(|e| ClientError::http(&url, e))?;

        let status = resp.status();
        if status == StatusCode::GONE {
            return Err(ClientError::Gone);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                method: "GET",
                url,
                status: status.as_u16(),
                message: status_message(&body),
            });
        }

        Ok(WatchStream::new(url, resp))
    }

    /// POST /api/v1/namespaces/{namespace}/pods/{name}/binding
    pub async fn bind_pod(
        &self,
        namespace: &str,
        name: &str,
        node_name: &str,
    ) -> std::result::Result<(), BindError> {
        let pod = format!("{}/{}", namespace, name);
        let url = format!(
            "{}/api/v1/namespaces/{}/pods/{}/binding",
            self.base_url, namespace, name
        );
        debug!("POST {}", url);

        let binding = binding_for(namespace, name, node_name);
        let resp = self
            .request(Method::POST, &url)
            .map_err(|e| BindError::transient(&pod, e.to_string()))?
            .timeout(self.request_timeout)
            .json(&binding)
            .send()
            .await
            .map_err(|e| BindError::transient(&pod, format!("HTTP request failed: {}", e)))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        let err = classify_bind_failure(&pod, status, &body);
        if err.is_retryable() {
            warn!("Binding {} to {} rejected: {}", pod, node_name, err);
        }
        Err(err)
    }
}

#[async_trait]
impl BindingApi for ApiClient {
    async fn bind(
        &self,
        namespace: &str,
        name: &str,
        node_name: &str,
    ) -> std::result::Result<(), BindError> {
        self.bind_pod(namespace, name, node_name).await
    }
}

fn binding_for(namespace: &str, name: &str, node_name: &str) -> Binding {
    Binding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        target: ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Node".to_string()),
            name: Some(node_name.to_string()),
            ..Default::default()
        },
    }
}

/// Human-readable message from a `Status` body, falling back to the raw text
fn status_message(body: &str) -> String {
    serde_json::from_str::<Status>(body)
        .ok()
        .and_then(|s| s.message)
        .unwrap_or_else(|| body.trim().to_string())
}

/// Map a rejected binding response onto the bind outcome taxonomy
pub fn classify_bind_failure(pod: &str, status: StatusCode, body: &str) -> BindError {
    let message = status_message(body);
    match status {
        StatusCode::NOT_FOUND => BindError::not_found(pod, message),
        StatusCode::CONFLICT => match assigned_node(&message) {
            Some(node) => BindError::already_bound(pod, node),
            None => BindError::conflict(pod, message),
        },
        _ => BindError::transient(pod, format!("status {}: {}", status.as_u16(), message)),
    }
}

/// For "pod x is already assigned to node \"y\"" returns Some(Some("y"))
fn assigned_node(message: &str) -> Option<Option<String>> {
    const MARKER: &str = "already assigned to node";
    let idx = message.find(MARKER)?;
    let node = message[idx + MARKER.len()..]
        .trim()
        .trim_matches('"')
        .trim();
    Some((!node.is_empty()).then(|| node.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pods_path() {
        assert_eq!(ApiClient::pods_path(Some("shop")), "/api/v1/namespaces/shop/pods");
        assert_eq!(ApiClient::pods_path(None), "/api/v1/pods");
    }

    #[test]
    fn test_new_trims_trailing_slash() {
        let client = ApiClient::new("https://10.0.0.1:6443/");
        assert_eq!(client.base_url(), "https://10.0.0.1:6443");
    }

    #[test]
    fn test_binding_body() {
        let value = serde_json::to_value(binding_for("shop", "web-1", "burst-0")).unwrap();
        assert_eq!(value["kind"], "Binding");
        assert_eq!(value["metadata"]["name"], "web-1");
        assert_eq!(value["metadata"]["namespace"], "shop");
        assert_eq!(value["target"]["kind"], "Node");
        assert_eq!(value["target"]["name"], "burst-0");
    }

    #[test]
    fn test_classify_already_assigned() {
        let body = r#"{"kind":"Status","status":"Failure","message":"Operation cannot be fulfilled on pods/binding \"web-1\": pod web-1 is already assigned to node \"node-a\"","reason":"Conflict","code":409}"#;
        assert_eq!(
            classify_bind_failure("shop/web-1", StatusCode::CONFLICT, body),
            BindError::already_bound("shop/web-1", Some("node-a".to_string()))
        );
    }

    #[test]
    fn test_classify_other_statuses() {
        let conflict = r#"{"kind":"Status","message":"the object has been modified","code":409}"#;
        assert!(matches!(
            classify_bind_failure("shop/p", StatusCode::CONFLICT, conflict),
            BindError::Conflict { .. }
        ));
        assert!(matches!(
            classify_bind_failure("shop/p", StatusCode::NOT_FOUND, "pods \"p\" not found"),
            BindError::NotFound { .. }
        ));
        for status in [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            let err = classify_bind_failure("shop/p", status, "");
            assert!(matches!(err, BindError::Transient { .. }));
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn test_object_list_decodes_resource_version() {
        let body = r#"{"kind":"PodList","apiVersion":"v1","metadata":{"resourceVersion":"1234"},"items":[{"metadata":{"name":"p1","namespace":"shop"}}]}"#;
        let list: ObjectList<Pod> = serde_json::from_str(body).unwrap();
        assert_eq!(list.resource_version(), Some("1234"));
        assert_eq!(list.items.len(), 1);

        let empty: ObjectList<Node> = serde_json::from_str("{}").unwrap();
        assert!(empty.items.is_empty());
        assert_eq!(empty.resource_version(), None);
    }

    #[tokio::test]
    async fn test_bind_transport_error_is_transient() {
        // Nothing listens on the discard port
        let client = ApiClient::new("http://127.0.0.1:9");
        let err = client.bind_pod("shop", "p1", "node-a").await.unwrap_err();
        assert!(matches!(err, BindError::Transient { .. }));
    }

    #[test]
    fn test_in_cluster_requires_service_host() {
        if std::env::var("KUBERNETES_SERVICE_HOST").is_ok() {
            return;
        }
        assert!(matches!(
            ApiClientConfig::in_cluster(),
            Err(ClientError::InvalidConfig { .. })
        ));
    }
}
