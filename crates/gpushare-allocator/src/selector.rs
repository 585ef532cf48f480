//! Candidate selection among provisionally matched workloads

use gpushare_core::{
    GpuShareError, GpuShareResult, NodeContext, RetryPolicy, WorkloadDescriptor, WorkloadPhase,
};
use gpushare_store::WorkloadStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Finds pending workloads on this node that the scheduler has matched but
/// nobody has confirmed yet
pub struct CandidateSelector {
    store: Arc<dyn WorkloadStore>,
    context: NodeContext,
    retry: RetryPolicy,
}

impl CandidateSelector {
    /// Create a new candidate selector
    pub fn new(store: Arc<dyn WorkloadStore>, context: NodeContext, retry: RetryPolicy) -> Self {
        Self {
            store,
            context,
            retry,
        }
    }

    /// Assumed workloads ordered by provisional match time, oldest first
    pub async fn list_candidates(&self) -> GpuShareResult<Vec<WorkloadDescriptor>> {
        let mut candidates: Vec<WorkloadDescriptor> = self
            .pending_workloads()
            .await?
            .into_iter()
            .filter(|w| self.is_assumed(w))
            .collect();

        candidates.sort_by_key(|w| w.provisional_match_time());

        for candidate in &candidates {
            debug!(
                workload = %candidate.key(),
                units = candidate.requested_units(&self.context.resource_name),
                assume_time = candidate.provisional_match_time(),
                "Found candidate workload"
            );
        }

        Ok(candidates)
    }

    /// Pending workloads placed on this node, each identity at most once
    async fn pending_workloads(&self) -> GpuShareResult<Vec<WorkloadDescriptor>> {
        let node = &self.context.node_name;
        let attempts = self.retry.attempts.max(1);

        let mut attempt = 1;
        let listed = loop {
            match self.store.list(node, WorkloadPhase::Pending).await {
                Ok(listed) => break listed,
                Err(e) if attempt < attempts && e.is_retryable() => {
                    warn!(
                        attempt = attempt,
                        error = %e,
                        "Failed to list pending workloads, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry.backoff).await;
                }
                Err(e) => {
                    return Err(GpuShareError::StoreUnavailable(format!(
                        "failed to get workloads assigned to node {} after {} attempts: {}",
                        node, attempt, e
                    )));
                }
            }
        };

        let mut seen = HashSet::new();
        let mut workloads = Vec::with_capacity(listed.len());
        for workload in listed {
            if workload.node_name.as_deref() != Some(node.as_str()) {
                warn!(
                    workload = %workload.key(),
                    placed_on = workload.node_name.as_deref().unwrap_or("<none>"),
                    "Workload listed for this node is placed elsewhere"
                );
                continue;
            }
            if seen.insert(workload.key()) {
                workloads.push(workload);
            }
        }

        info!(node = %node, workloads = workloads.len(), "Listed pending workloads");
        Ok(workloads)
    }

    /// Shared-device workload with a provisional match and an explicit
    /// "false" assignment flag
    pub fn is_assumed(&self, workload: &WorkloadDescriptor) -> bool {
        if workload.requested_units(&self.context.resource_name) == 0 {
            trace!(workload = %workload.key(), "No shared GPU request");
            return false;
        }
        if !workload.has_provisional_match() {
            debug!(workload = %workload.key(), "No assume timestamp");
            return false;
        }
        match workload.confirmed_flag() {
            Some(false) => true,
            Some(true) => {
                debug!(workload = %workload.key(), "Already assigned");
                false
            }
            None => {
                warn!(workload = %workload.key(), "No assigned flag");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gpushare_core::{ANNOTATION_ASSIGNED, ANNOTATION_ASSUME_TIME, DEFAULT_RESOURCE_NAME};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Store answering `list` from a script of results
    struct ScriptedStore {
        results: Mutex<VecDeque<GpuShareResult<Vec<WorkloadDescriptor>>>>,
        calls: AtomicU32,
    }

    impl ScriptedStore {
        fn new(results: Vec<GpuShareResult<Vec<WorkloadDescriptor>>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl WorkloadStore for ScriptedStore {
        async fn list(
            &self,
            _node_name: &str,
            _phase: WorkloadPhase,
        ) -> GpuShareResult<Vec<WorkloadDescriptor>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GpuShareError::StoreUnavailable("script ended".into())))
        }

        async fn get(&self, namespace: &str, name: &str) -> GpuShareResult<WorkloadDescriptor> {
            Err(GpuShareError::NotFound(format!("{}/{}", namespace, name)))
        }

        async fn update(
            &self,
            workload: &WorkloadDescriptor,
        ) -> GpuShareResult<WorkloadDescriptor> {
            Ok(workload.clone())
        }
    }

    fn assumed(name: &str, units: u64, ts: u64) -> WorkloadDescriptor {
        WorkloadDescriptor::new("default", name)
            .with_node("node-1")
            .with_container("main", DEFAULT_RESOURCE_NAME, units)
            .with_annotation(ANNOTATION_ASSUME_TIME, ts.to_string())
            .with_annotation(ANNOTATION_ASSIGNED, "false")
    }

    fn selector(store: Arc<ScriptedStore>) -> CandidateSelector {
        CandidateSelector::new(
            store,
            NodeContext::new("node-1"),
            RetryPolicy {
                attempts: 5,
                backoff: Duration::from_millis(1),
            },
        )
    }

    #[test]
    fn test_is_assumed_rules() {
        let s = selector(ScriptedStore::new(vec![]));

        assert!(s.is_assumed(&assumed("a", 1, 10)));

        let mut no_flag = assumed("b", 1, 10);
        no_flag.annotations.remove(ANNOTATION_ASSIGNED);
        assert!(!s.is_assumed(&no_flag));

        let confirmed = assumed("c", 1, 10).with_annotation(ANNOTATION_ASSIGNED, "true");
        assert!(!s.is_assumed(&confirmed));

        let mut no_time = assumed("d", 1, 10);
        no_time.annotations.remove(ANNOTATION_ASSUME_TIME);
        assert!(!s.is_assumed(&no_time));

        assert!(!s.is_assumed(&assumed("e", 0, 10)));
    }

    #[tokio::test]
    async fn test_candidates_sorted_oldest_first() {
        let store = ScriptedStore::new(vec![Ok(vec![
            assumed("late", 2, 300),
            assumed("early", 2, 100),
            assumed("middle", 4, 200),
        ])]);
        let names: Vec<String> = selector(store)
            .list_candidates()
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.name)
            .collect();
        assert_eq!(names, vec!["early", "middle", "late"]);
    }

    #[tokio::test]
    async fn test_duplicates_and_foreign_nodes_dropped() {
        let store = ScriptedStore::new(vec![Ok(vec![
            assumed("a", 1, 1),
            assumed("a", 1, 1),
            assumed("b", 1, 2).with_node("node-2"),
        ])]);
        let candidates = selector(store).list_candidates().await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "a");
    }

    #[tokio::test]
    async fn test_list_retried_until_success() {
        let store = ScriptedStore::new(vec![
            Err(GpuShareError::StoreUnavailable("timeout".into())),
            Err(GpuShareError::StoreUnavailable("timeout".into())),
            Ok(vec![assumed("a", 1, 1)]),
        ]);
        let candidates = selector(store.clone()).list_candidates().await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_list_is_not_retried() {
        let store = ScriptedStore::new(vec![Ok(vec![])]);
        let candidates = selector(store.clone()).list_candidates().await.unwrap();
        assert!(candidates.is_empty());
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_list_not_retried() {
        let store = ScriptedStore::new(vec![Err(GpuShareError::Serialization("bad".into()))]);
        let result = selector(store.clone()).list_candidates().await;
        assert!(matches!(result, Err(GpuShareError::StoreUnavailable(_))));
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_list_gives_up_after_bound() {
        let store = ScriptedStore::new(vec![]);
        let result = selector(store.clone()).list_candidates().await;
        assert!(matches!(result, Err(GpuShareError::StoreUnavailable(_))));
        assert_eq!(store.calls.load(Ordering::SeqCst), 5);
    }
}
