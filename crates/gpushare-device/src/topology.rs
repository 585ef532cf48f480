//! Pairwise topology computation

use gpushare_core::{Device, GpuShareError, GpuShareResult, LinkType, TopologyMatrix};
use tracing::debug;

use crate::traits::LinkProbe;

/// Classify every unordered device pair.
///
/// The local probe's answer is taken when known, and the fast probe's answer
/// replaces it whenever that one is known too. Each pair is probed once and
/// written to both triangles. Any probe failure fails the whole computation.
pub fn compute_topology(
    devices: &[Device],
    probe: &dyn LinkProbe,
) -> GpuShareResult<TopologyMatrix> {
    let mut matrix = TopologyMatrix::new(devices.iter().map(|d| d.index).collect());

    for i in 0..devices.len() {
        for j in (i + 1)..devices.len() {
            let (a, b) = (&devices[i], &devices[j]);
            let local = probe.local_link(a, b).map_err(|e| probe_error("local", a, b, e))?;
            let fast = probe.fast_link(a, b).map_err(|e| probe_error("fast", a, b, e))?;

            let mut link = LinkType::Unknown;
            if local.is_known() {
                link = local;
            }
            if fast.is_known() {
                link = fast;
            }

            debug!(
                a = a.index,
                b = b.index,
                abbreviation = link.abbreviation(),
                description = %link,
                "Classified device pair"
            );
            matrix.set_pair(i, j, link);
        }
    }

    Ok(matrix)
}

fn probe_error(kind: &str, a: &Device, b: &Device, err: GpuShareError) -> GpuShareError {
    match err {
        GpuShareError::TopologyProbe(_) => err,
        other => GpuShareError::TopologyProbe(format!(
            "{} link probe failed for {} and {}: {}",
            kind, a.id, b.id, other
        )),
    }
}
