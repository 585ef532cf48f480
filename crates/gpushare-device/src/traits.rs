//! Collaborator traits for the device layer

use gpushare_core::{Device, DeviceDescription, GpuShareResult, LinkType};
use std::time::Duration;

/// Enumerates the physical devices present on the node
pub trait DeviceSource: Send + Sync {
    /// Number of devices visible
    fn count(&self) -> GpuShareResult<u32>;

    /// Identity and device node of the device at `index`
    fn describe(&self, index: u32) -> GpuShareResult<DeviceDescription>;

    /// Get the backend name
    fn name(&self) -> &'static str;
}

/// Probes interconnect quality between two devices.
///
/// Both probes return `LinkType::Unknown` when they have no information and
/// an error only when the probe itself failed.
pub trait LinkProbe: Send + Sync {
    /// PCIe / CPU level relationship
    fn local_link(&self, a: &Device, b: &Device) -> GpuShareResult<LinkType>;

    /// NVLink relationship
    fn fast_link(&self, a: &Device, b: &Device) -> GpuShareResult<LinkType>;
}

/// A device error event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XidEvent {
    /// Affected device; `None` when the driver could not attribute the event
    pub device_id: Option<String>,
    /// XID error code
    pub code: u64,
}

/// Source of device error events. Calls block, so the health loop drives it
/// from a blocking thread.
pub trait HealthEventSource: Send {
    /// Subscribe to critical errors for one device.
    ///
    /// Fails with `UnsupportedHealthProbe` when the device cannot report them.
    fn register(&mut self, device_id: &str) -> GpuShareResult<()>;

    /// Wait up to `timeout` for the next event; `Ok(None)` on timeout
    fn wait(&mut self, timeout: Duration) -> GpuShareResult<Option<XidEvent>>;
}
