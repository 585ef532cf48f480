//! Store trait definitions

use async_trait::async_trait;
use gpushare_core::{GpuShareResult, WorkloadDescriptor, WorkloadPhase};

/// Read/list/conditional-update access to workload descriptors
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    /// Workloads placed on `node_name` in `phase`
    async fn list(
        &self,
        node_name: &str,
        phase: WorkloadPhase,
    ) -> GpuShareResult<Vec<WorkloadDescriptor>>;

    /// Latest version of one workload
    async fn get(&self, namespace: &str, name: &str) -> GpuShareResult<WorkloadDescriptor>;

    /// Write `workload`'s annotations if the stored version still equals
    /// `workload.resource_version`.
    ///
    /// Fails with `VersionConflict` when another writer got there first.
    async fn update(&self, workload: &WorkloadDescriptor) -> GpuShareResult<WorkloadDescriptor>;
}

/// Node-level shared state
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Set one annotation on a node
    async fn set_node_annotation(&self, node_name: &str, key: &str, value: &str)
        -> GpuShareResult<()>;
}
