//! Configuration types for gpushare

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::topology::LinkType;
use crate::workload::DEFAULT_RESOURCE_NAME;
use crate::{GpuShareError, GpuShareResult};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Node identity
    pub node: NodeConfig,
    /// API server configuration
    pub api: ApiConfig,
    /// Workload store configuration
    pub store: StoreConfig,
    /// Device backend configuration
    pub devices: DevicesConfig,
    /// Health watch configuration
    pub health: HealthConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl DaemonConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> GpuShareResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GpuShareError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> GpuShareResult<Self> {
        toml::from_str(content)
            .map_err(|e| GpuShareError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Reject configurations the daemon cannot run with
    pub fn validate(&self) -> GpuShareResult<()> {
        if self.node.node_name.trim().is_empty() {
            return Err(GpuShareError::Config(
                "node name is required (set NODE_NAME)".to_string(),
            ));
        }
        if self.store.list_attempts == 0 {
            return Err(GpuShareError::Config(
                "store.list_attempts must be at least 1".to_string(),
            ));
        }
        if self.health.wait_timeout_ms == 0 {
            return Err(GpuShareError::Config(
                "health.wait_timeout_ms must be at least 1".to_string(),
            ));
        }
        if self.store.backend == StoreBackend::ApiServer && self.store.api_server_url.is_empty() {
            return Err(GpuShareError::Config(
                "store.api_server_url is required for the apiserver backend".to_string(),
            ));
        }
        Ok(())
    }

    /// Identity passed to every component
    pub fn node_context(&self) -> NodeContext {
        NodeContext {
            node_name: self.node.node_name.clone(),
            resource_name: self.node.resource_name.clone(),
        }
    }
}

/// Which node this process serves and which resource it shares
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContext {
    pub node_name: String,
    pub resource_name: String,
}

impl NodeContext {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            resource_name: DEFAULT_RESOURCE_NAME.to_string(),
        }
    }
}

/// Node identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Name of the node this plugin runs on
    pub node_name: String,
    /// Extended resource name of the shared device
    pub resource_name: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            resource_name: DEFAULT_RESOURCE_NAME.to_string(),
        }
    }
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to bind the REST API server
    pub address: String,
    /// Port for the REST API server
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 9090,
        }
    }
}

/// Workload store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local store (development only)
    Memory,
    /// Kubernetes API server
    ApiServer,
}

/// Workload store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Base URL of the API server
    pub api_server_url: String,
    /// Bearer token file
    pub token_path: Option<PathBuf>,
    /// PEM bundle used to verify the API server
    pub ca_path: Option<PathBuf>,
    /// Attempts for the pending-workload query
    pub list_attempts: u32,
    /// Pause between failed query attempts, in milliseconds
    pub list_backoff_ms: u64,
}

impl StoreConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.list_attempts,
            backoff: Duration::from_millis(self.list_backoff_ms),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            api_server_url: "https://kubernetes.default.svc".to_string(),
            token_path: Some(PathBuf::from(
                "/var/run/secrets/kubernetes.io/serviceaccount/token",
            )),
            ca_path: Some(PathBuf::from(
                "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt",
            )),
            list_attempts: 5,
            list_backoff_ms: 100,
        }
    }
}

/// Fixed-backoff retry bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        StoreConfig::default().retry_policy()
    }
}

/// Device backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceBackend {
    /// Devices listed in this configuration
    Static,
    /// NVIDIA Management Library
    Nvml,
}

/// Device backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    pub backend: DeviceBackend,
    /// Devices for the static backend
    #[serde(rename = "static")]
    pub static_devices: Vec<StaticDeviceConfig>,
    /// Links for the static backend, by enumeration position
    pub links: Vec<StaticLinkConfig>,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            backend: DeviceBackend::Static,
            static_devices: Vec::new(),
            links: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticDeviceConfig {
    pub id: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticLinkConfig {
    pub a: usize,
    pub b: usize,
    #[serde(default)]
    pub local: LinkType,
    #[serde(default)]
    pub fast: LinkType,
}

/// Health watch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Disabled checks: "all", or a list containing "xids"
    pub disabled: String,
    /// Upper bound of one event wait, in milliseconds
    pub wait_timeout_ms: u64,
    /// Application-level XID codes that leave the device healthy
    pub benign_xids: Vec<u64>,
}

impl HealthConfig {
    /// Whether the XID event watch should run
    pub fn xids_enabled(&self) -> bool {
        let disabled = self.disabled.to_lowercase();
        disabled != "all" && !disabled.contains("xids")
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            disabled: String::new(),
            wait_timeout_ms: 5000,
            benign_xids: vec![31, 43, 45],
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}
