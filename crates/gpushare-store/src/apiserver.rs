//! Kubernetes API server store
//!
//! Talks to the pods and nodes endpoints over HTTP. Conditional updates are
//! JSON merge patches carrying `metadata.resourceVersion`, which the API
//! server treats as a precondition and answers with 409 when stale.

use async_trait::async_trait;
use gpushare_core::{
    ContainerSpec, GpuShareError, GpuShareResult, StoreConfig, WorkloadDescriptor, WorkloadPhase,
};
use reqwest::{header, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::traits::{NodeStore, WorkloadStore};

const MERGE_PATCH: &str = "application/merge-patch+json";

/// Store backed by the Kubernetes API server
pub struct ApiServerStore {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl ApiServerStore {
    /// Create a store from configuration, reading the token and CA files
    pub fn new(config: &StoreConfig) -> GpuShareResult<Self> {
        let mut builder = reqwest::Client::builder();

        if let Some(ca_path) = config.ca_path.as_deref().filter(|p| p.exists()) {
            let pem = std::fs::read(ca_path)?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                GpuShareError::Config(format!("invalid CA bundle {}: {}", ca_path.display(), e))
            })?;
            builder = builder.add_root_certificate(cert);
        }

        let token = match config.token_path.as_deref().filter(|p| p.exists()) {
            Some(path) => Some(std::fs::read_to_string(path)?.trim().to_string()),
            None => None,
        };

        let client = builder
            .build()
            .map_err(|e| GpuShareError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.api_server_url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> GpuShareResult<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| GpuShareError::StoreUnavailable(format!("{}: {}", what, e)))?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::CONFLICT => Err(GpuShareError::VersionConflict(what.to_string())),
            StatusCode::NOT_FOUND => Err(GpuShareError::NotFound(what.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(GpuShareError::StoreUnavailable(format!(
                    "{}: {} {}",
                    what, status, body
                )))
            }
        }
    }

    async fn read_pod(response: Response) -> GpuShareResult<WorkloadDescriptor> {
        let pod: Pod = response
            .json()
            .await
            .map_err(|e| GpuShareError::Serialization(e.to_string()))?;
        Ok(pod.into_descriptor())
    }
}

#[async_trait]
impl WorkloadStore for ApiServerStore {
    async fn list(
        &self,
        node_name: &str,
        phase: WorkloadPhase,
    ) -> GpuShareResult<Vec<WorkloadDescriptor>> {
        let selector = format!("spec.nodeName={},status.phase={}", node_name, phase);
        let builder = self
            .request(Method::GET, "/api/v1/pods")
            .query(&[("fieldSelector", selector.as_str())]);

        let response = self.send(builder, "list pods").await?;
        let list: PodList = response
            .json()
            .await
            .map_err(|e| GpuShareError::Serialization(e.to_string()))?;

        debug!(node = node_name, pods = list.items.len(), "Listed pods");
        Ok(list.items.into_iter().map(Pod::into_descriptor).collect())
    }

    async fn get(&self, namespace: &str, name: &str) -> GpuShareResult<WorkloadDescriptor> {
        let path = format!("/api/v1/namespaces/{}/pods/{}", namespace, name);
        let what = format!("pod {}/{}", namespace, name);
        let response = self.send(self.request(Method::GET, &path), &what).await?;
        Self::read_pod(response).await
    }

    async fn update(&self, workload: &WorkloadDescriptor) -> GpuShareResult<WorkloadDescriptor> {
        let path = format!(
            "/api/v1/namespaces/{}/pods/{}",
            workload.namespace, workload.name
        );
        let patch = json!({
            "metadata": {
                "resourceVersion": workload.resource_version,
                "annotations": workload.annotations,
            }
        });
        let builder = self
            .request(Method::PATCH, &path)
            .header(header::CONTENT_TYPE, MERGE_PATCH)
            .body(serde_json::to_vec(&patch)?);

        let response = self.send(builder, &workload.key().to_string()).await?;
        Self::read_pod(response).await
    }
}

#[async_trait]
impl NodeStore for ApiServerStore {
    async fn set_node_annotation(
        &self,
        node_name: &str,
        key: &str,
        value: &str,
    ) -> GpuShareResult<()> {
        let mut annotations = BTreeMap::new();
        annotations.insert(key, value);
        let patch = json!({ "metadata": { "annotations": annotations } });
        let builder = self
            .request(Method::PATCH, &format!("/api/v1/nodes/{}", node_name))
            .header(header::CONTENT_TYPE, MERGE_PATCH)
            .body(serde_json::to_vec(&patch)?);

        self.send(builder, &format!("node {}", node_name)).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: PodSpec,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    resource_version: String,
    #[serde(default)]
    annotations: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodSpec {
    node_name: Option<String>,
    #[serde(default)]
    containers: Vec<Container>,
}

#[derive(Debug, Deserialize)]
struct Container {
    name: String,
    #[serde(default)]
    resources: Resources,
}

#[derive(Debug, Default, Deserialize)]
struct Resources {
    #[serde(default)]
    limits: Option<BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    phase: Option<String>,
}

impl Pod {
    fn into_descriptor(self) -> WorkloadDescriptor {
        let containers = self
            .spec
            .containers
            .into_iter()
            .map(|c| ContainerSpec {
                limits: c
                    .resources
                    .limits
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|(resource, qty)| {
                        parse_quantity(&qty).map(|units| (resource, units))
                    })
                    .collect(),
                name: c.name,
            })
            .collect();

        WorkloadDescriptor {
            namespace: self.metadata.namespace,
            name: self.metadata.name,
            node_name: self.spec.node_name,
            phase: WorkloadPhase::parse(self.status.phase.as_deref().unwrap_or_default()),
            annotations: self.metadata.annotations.unwrap_or_default(),
            containers,
            resource_version: self.metadata.resource_version,
        }
    }
}

/// Integer resource quantity; fractional or suffixed values are skipped
fn parse_quantity(value: &serde_json::Value) -> Option<u64> {
    let parsed = match value {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.as_u64(),
        _ => None,
    };
    if parsed.is_none() {
        warn!(quantity = %value, "Ignoring non-integer resource quantity");
    }
    parsed
}
