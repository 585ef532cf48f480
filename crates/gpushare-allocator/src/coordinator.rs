//! Allocation coordinator
//!
//! Serialises allocation decisions on this node. Each call validates the
//! requested device ids, picks the oldest provisionally matched workload
//! whose request size equals the call's total, and confirms it in the store
//! with a version-conditioned update before handing out any device ids.
//! Anything short of a confirmed commit answers with the sentinel response.

use chrono::Utc;
use gpushare_core::{
    decode_device_ids, AllocationRequest, AllocationResponse, GpuShareError, GpuShareResult,
    NodeContext, RetryPolicy, WorkloadDescriptor,
};
use gpushare_device::DeviceInventory;
use gpushare_store::WorkloadStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::selector::CandidateSelector;

/// Node-wide allocation entry point
pub struct AllocationCoordinator {
    inventory: Arc<DeviceInventory>,
    selector: CandidateSelector,
    store: Arc<dyn WorkloadStore>,
    context: NodeContext,
    /// Held for the whole select-then-commit sequence
    commit_lock: Mutex<()>,
}

impl AllocationCoordinator {
    /// Create a new coordinator
    pub fn new(
        inventory: Arc<DeviceInventory>,
        store: Arc<dyn WorkloadStore>,
        context: NodeContext,
        retry: RetryPolicy,
    ) -> Self {
        let selector = CandidateSelector::new(store.clone(), context.clone(), retry);
        Self {
            inventory,
            selector,
            store,
            context,
            commit_lock: Mutex::new(()),
        }
    }

    /// Node identity this coordinator serves
    pub fn context(&self) -> &NodeContext {
        &self.context
    }

    /// Allocate devices for one request.
    ///
    /// Returns `UnknownDevice` if the request names a device this node does
    /// not have; every other failure yields the sentinel response.
    pub async fn allocate(&self, request: &AllocationRequest) -> GpuShareResult<AllocationResponse> {
        let requested = request.total_units();
        info!(requested = requested, "Allocating shared GPUs");

        if let Some(unknown) = request.device_ids().find(|id| !self.inventory.exists(id)) {
            return Err(GpuShareError::UnknownDevice(unknown.to_string()));
        }

        let _section = self.commit_lock.lock().await;
        Ok(self.select_and_commit(request, requested).await)
    }

    /// Critical section body; callers hold `commit_lock`
    async fn select_and_commit(
        &self,
        request: &AllocationRequest,
        requested: u64,
    ) -> AllocationResponse {
        let candidates = match self.selector.list_candidates().await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "invalid allocation request: failed to find candidate workloads");
                return AllocationResponse::failed(request);
            }
        };

        let resource = &self.context.resource_name;
        let Some(candidate) = candidates
            .into_iter()
            .find(|c| c.requested_units(resource) == requested)
        else {
            warn!(
                requested = requested,
                "invalid allocation request: requested GPUs can't be satisfied"
            );
            return AllocationResponse::failed(request);
        };

        info!(
            workload = %candidate.key(),
            units = requested,
            "Found assumed shared GPU workload"
        );

        let ids = candidate
            .assigned_device_ids()
            .map(decode_device_ids)
            .unwrap_or_default();
        if ids.is_empty() {
            warn!(workload = %candidate.key(), "Assumed workload carries no device ids");
        }
        for index in ids.split(',').filter_map(|s| s.parse::<u32>().ok()) {
            if self.inventory.id_of(index).is_none() {
                warn!(
                    workload = %candidate.key(),
                    index = index,
                    "Assigned device index not on this node"
                );
            }
        }
        let response = AllocationResponse::granted(request, &ids);

        match self.commit(&candidate).await {
            Ok(()) => {
                info!(workload = %candidate.key(), devices = %ids, "Confirmed GPU assignment");
                response
            }
            Err(e) => {
                warn!(workload = %candidate.key(), error = %e, "Failed to confirm GPU assignment");
                AllocationResponse::failed(request)
            }
        }
    }

    /// Mark `candidate` confirmed, conditioned on the version it was read at.
    /// A version conflict is retried once against a fresh read.
    async fn commit(&self, candidate: &WorkloadDescriptor) -> GpuShareResult<()> {
        match self.store.update(&candidate.confirmed(now_nanos())).await {
            Ok(_) => Ok(()),
            Err(GpuShareError::VersionConflict(what)) => {
                debug!(workload = %what, "Version conflict on commit, re-reading");
                let latest = self.store.get(&candidate.namespace, &candidate.name).await?;
                if latest.confirmed_flag() == Some(true) {
                    return Err(GpuShareError::VersionConflict(format!(
                        "{} was confirmed by another writer",
                        latest.key()
                    )));
                }
                self.store.update(&latest.confirmed(now_nanos())).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}
