//! Error types for gpushare

use thiserror::Error;

/// Main error type for gpushare
#[derive(Error, Debug)]
pub enum GpuShareError {
    /// Device enumeration facility unavailable, or no devices visible
    #[error("Device discovery error: {0}")]
    Discovery(String),

    /// A link-quality probe failed while computing topology
    #[error("Topology probe error: {0}")]
    TopologyProbe(String),

    /// The workload store could not be reached or answered with an error
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Conditional update rejected because the stored version moved on
    #[error("Version conflict on {0}")]
    VersionConflict(String),

    /// A requested device id is not part of this node's inventory
    #[error("invalid allocation request: unknown device: {0}")]
    UnknownDevice(String),

    /// A device cannot report health events
    #[error("Health probe not supported for device {0}")]
    UnsupportedHealthProbe(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Object not found in the store
    #[error("Not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for gpushare operations
pub type GpuShareResult<T> = Result<T, GpuShareError>;

impl GpuShareError {
    /// Whether a store operation may succeed if attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(self, GpuShareError::StoreUnavailable(_))
    }
}

impl From<serde_json::Error> for GpuShareError {
    fn from(err: serde_json::Error) -> Self {
        GpuShareError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for GpuShareError {
    fn from(err: toml::de::Error) -> Self {
        GpuShareError::Config(err.to_string())
    }
}
