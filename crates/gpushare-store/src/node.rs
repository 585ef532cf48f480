//! Topology publication

use gpushare_core::{GpuShareResult, TopologyMatrix, ANNOTATION_TOPOLOGY};
use tracing::info;

use crate::traits::NodeStore;

/// Write the sparse topology map to the node's annotations.
///
/// Returns false without writing when no pair has a detected link.
pub async fn publish_topology(
    store: &dyn NodeStore,
    node_name: &str,
    topology: &TopologyMatrix,
) -> GpuShareResult<bool> {
    if topology.to_annotation_map().is_empty() {
        info!(node = node_name, "No GPU topology to publish");
        return Ok(false);
    }

    let json = topology.to_annotation_json()?;
    store
        .set_node_annotation(node_name, ANNOTATION_TOPOLOGY, &json)
        .await?;

    info!(node = node_name, topology = %json, "Published GPU topology");
    Ok(true)
}
