//! Workload descriptors as read from and written to the shared store

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Annotation holding the device ids chosen by the scheduler (e.g. "1,2,4")
pub const ANNOTATION_DEVICE_IDS: &str = "ALIYUN_COM_GPU_GROUP";
/// Annotation holding the confirmed-assignment flag ("false" / "true")
pub const ANNOTATION_ASSIGNED: &str = "ALIYUN_COM_GPU_ASSIGNED";
/// Annotation holding the provisional match time, in unix nanoseconds
pub const ANNOTATION_ASSUME_TIME: &str = "ALIYUN_COM_GPU_ASSUME_TIME";
/// Node annotation holding the JSON topology map
pub const ANNOTATION_TOPOLOGY: &str = "GPU_TOPOLOGY";
/// Default extended resource name for shared GPUs
pub const DEFAULT_RESOURCE_NAME: &str = "aliyun.com/gpu";

/// Namespace + name of a workload
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkloadKey {
    pub namespace: String,
    pub name: String,
}

impl std::fmt::Display for WorkloadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Lifecycle phase of a workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl WorkloadPhase {
    /// Parse a phase string as reported by the store
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => WorkloadPhase::Pending,
            "Running" => WorkloadPhase::Running,
            "Succeeded" => WorkloadPhase::Succeeded,
            "Failed" => WorkloadPhase::Failed,
            _ => WorkloadPhase::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadPhase::Pending => "Pending",
            WorkloadPhase::Running => "Running",
            WorkloadPhase::Succeeded => "Succeeded",
            WorkloadPhase::Failed => "Failed",
            WorkloadPhase::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for WorkloadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared resources of one container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    /// Resource limits, integer quantities only
    #[serde(default)]
    pub limits: BTreeMap<String, u64>,
}

/// The fields of a workload (pod) this plugin consumes or mutates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadDescriptor {
    pub namespace: String,
    pub name: String,
    /// Node the workload is placed on
    pub node_name: Option<String>,
    pub phase: WorkloadPhase,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
    /// Store-level version token for optimistic concurrency
    #[serde(default)]
    pub resource_version: String,
}

impl WorkloadDescriptor {
    /// Create a pending workload with no containers or annotations
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            node_name: None,
            phase: WorkloadPhase::Pending,
            annotations: BTreeMap::new(),
            containers: Vec::new(),
            resource_version: String::new(),
        }
    }

    pub fn key(&self) -> WorkloadKey {
        WorkloadKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// Total units of `resource_name` across all container limits
    pub fn requested_units(&self, resource_name: &str) -> u64 {
        self.containers
            .iter()
            .filter_map(|c| c.limits.get(resource_name))
            .sum()
    }

    /// Whether the scheduler has recorded a provisional match
    pub fn has_provisional_match(&self) -> bool {
        self.annotations.contains_key(ANNOTATION_ASSUME_TIME)
    }

    /// Provisional match time; an unparseable value reads as 0
    pub fn provisional_match_time(&self) -> u64 {
        self.annotations
            .get(ANNOTATION_ASSUME_TIME)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Confirmed-assignment flag: `None` when absent, `Some(false)` only for
    /// the literal "false", `Some(true)` for any other value
    pub fn confirmed_flag(&self) -> Option<bool> {
        self.annotations
            .get(ANNOTATION_ASSIGNED)
            .map(|v| v != "false")
    }

    /// Raw device id annotation written by the scheduler
    pub fn assigned_device_ids(&self) -> Option<&str> {
        self.annotations
            .get(ANNOTATION_DEVICE_IDS)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Copy with the assignment confirmed at `now_nanos`
    pub fn confirmed(&self, now_nanos: i64) -> Self {
        let mut updated = self.clone();
        updated
            .annotations
            .insert(ANNOTATION_ASSIGNED.to_string(), "true".to_string());
        updated
            .annotations
            .insert(ANNOTATION_ASSUME_TIME.to_string(), now_nanos.to_string());
        updated
    }

    // Test and development helpers

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node_name = Some(node.into());
        self
    }

    pub fn with_phase(mut self, phase: WorkloadPhase) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_annotation(mut self, key: &str, value: impl Into<String>) -> Self {
        self.annotations.insert(key.to_string(), value.into());
        self
    }

    pub fn with_container(mut self, name: &str, resource_name: &str, units: u64) -> Self {
        let mut limits = BTreeMap::new();
        limits.insert(resource_name.to_string(), units);
        self.containers.push(ContainerSpec {
            name: name.to_string(),
            limits,
        });
        self
    }
}
