//! Process-local workload store

use async_trait::async_trait;
use gpushare_core::{
    GpuShareError, GpuShareResult, WorkloadDescriptor, WorkloadKey, WorkloadPhase,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use crate::traits::{NodeStore, WorkloadStore};

type WorkloadsMap = BTreeMap<WorkloadKey, WorkloadDescriptor>;
type NodeAnnotations = HashMap<String, BTreeMap<String, String>>;

/// In-memory store with per-object version tokens
pub struct MemoryStore {
    /// Workloads indexed by namespace/name
    workloads: RwLock<WorkloadsMap>,
    /// Node annotations indexed by node name
    nodes: RwLock<NodeAnnotations>,
    /// Source of version tokens
    version: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            workloads: RwLock::new(BTreeMap::new()),
            nodes: RwLock::new(HashMap::new()),
            version: AtomicU64::new(0),
        }
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    /// Create or replace a workload, assigning it a fresh version
    pub async fn insert(&self, mut workload: WorkloadDescriptor) -> WorkloadDescriptor {
        workload.resource_version = self.next_version();
        self.workloads
            .write()
            .await
            .insert(workload.key(), workload.clone());
        workload
    }

    /// Current content of a workload, if present
    pub async fn snapshot(&self, namespace: &str, name: &str) -> Option<WorkloadDescriptor> {
        let key = WorkloadKey {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.workloads.read().await.get(&key).cloned()
    }

    /// Current value of a node annotation
    pub async fn node_annotation(&self, node_name: &str, key: &str) -> Option<String> {
        self.nodes
            .read()
            .await
            .get(node_name)
            .and_then(|a| a.get(key))
            .cloned()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkloadStore for MemoryStore {
    async fn list(
        &self,
        node_name: &str,
        phase: WorkloadPhase,
    ) -> GpuShareResult<Vec<WorkloadDescriptor>> {
        let workloads = self.workloads.read().await;
        Ok(workloads
            .values()
            .filter(|w| w.node_name.as_deref() == Some(node_name) && w.phase == phase)
            .cloned()
            .collect())
    }

    async fn get(&self, namespace: &str, name: &str) -> GpuShareResult<WorkloadDescriptor> {
        self.snapshot(namespace, name)
            .await
            .ok_or_else(|| GpuShareError::NotFound(format!("{}/{}", namespace, name)))
    }

    async fn update(&self, workload: &WorkloadDescriptor) -> GpuShareResult<WorkloadDescriptor> {
        let key = workload.key();
        let mut workloads = self.workloads.write().await;

        let stored = workloads
            .get(&key)
            .ok_or_else(|| GpuShareError::NotFound(key.to_string()))?;

        if stored.resource_version != workload.resource_version {
            debug!(
                workload = %key,
                expected = %workload.resource_version,
                actual = %stored.resource_version,
                "Rejected stale update"
            );
            return Err(GpuShareError::VersionConflict(key.to_string()));
        }

        let mut updated = workload.clone();
        updated.resource_version = self.next_version();
        workloads.insert(key, updated.clone());
        Ok(updated)
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn set_node_annotation(
        &self,
        node_name: &str,
        key: &str,
        value: &str,
    ) -> GpuShareResult<()> {
        self.nodes
            .write()
            .await
            .entry(node_name.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(name: &str, node: &str) -> WorkloadDescriptor {
        WorkloadDescriptor::new("default", name).with_node(node)
    }

    #[tokio::test]
    async fn test_list_filters_node_and_phase() {
        let store = MemoryStore::new();
        store.insert(pod("a", "node-1")).await;
        store.insert(pod("b", "node-2")).await;
        store
            .insert(pod("c", "node-1").with_phase(WorkloadPhase::Running))
            .await;

        let pending = store.list("node-1", WorkloadPhase::Pending).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].name, "a");
    }

    #[tokio::test]
    async fn test_update_requires_current_version() {
        let store = MemoryStore::new();
        let stored = store.insert(pod("a", "node-1")).await;

        let first = store
            .update(&stored.clone().with_annotation("k", "1"))
            .await
            .unwrap();
        assert_ne!(first.resource_version, stored.resource_version);

        let stale = store.update(&stored.with_annotation("k", "2")).await;
        assert!(matches!(stale, Err(GpuShareError::VersionConflict(_))));

        let current = store.get("default", "a").await.unwrap();
        assert_eq!(current.annotations.get("k").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryStore::new();
        let result = store.get("default", "nope").await;
        assert!(matches!(result, Err(GpuShareError::NotFound(_))));
    }
}
