//! NVML (NVIDIA Management Library) backend

use gpushare_core::{Device, DeviceDescription, GpuShareError, GpuShareResult, LinkType};
use nvml_wrapper::bitmasks::event::EventTypes;
use nvml_wrapper::enum_wrappers::device::TopologyLevel;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::{EventSet, Nvml};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::traits::{DeviceSource, HealthEventSource, LinkProbe, XidEvent};

/// NVLink slots probed per device
const MAX_NVLINKS: u32 = 18;

static NVML: OnceLock<Nvml> = OnceLock::new();

/// The process-wide NVML handle, initialised on first use
fn nvml() -> GpuShareResult<&'static Nvml> {
    if let Some(nvml) = NVML.get() {
        return Ok(nvml);
    }
    let nvml = Nvml::init()
        .map_err(|e| GpuShareError::Discovery(format!("failed to initialise NVML: {}", e)))?;
    info!("NVML initialised");
    Ok(NVML.get_or_init(|| nvml))
}

/// NVML device backend
pub struct NvmlBackend {
    nvml: &'static Nvml,
}

impl NvmlBackend {
    /// Initialise NVML
    pub fn new() -> GpuShareResult<Self> {
        Ok(Self { nvml: nvml()? })
    }

    fn device(&self, id: &str) -> GpuShareResult<nvml_wrapper::Device<'static>> {
        self.nvml
            .device_by_uuid(id)
            .map_err(|e| GpuShareError::TopologyProbe(format!("device {}: {}", id, e)))
    }
}

impl DeviceSource for NvmlBackend {
    fn count(&self) -> GpuShareResult<u32> {
        self.nvml
            .device_count()
            .map_err(|e| GpuShareError::Discovery(e.to_string()))
    }

    fn describe(&self, index: u32) -> GpuShareResult<DeviceDescription> {
        let device = self
            .nvml
            .device_by_index(index)
            .map_err(|e| GpuShareError::Discovery(e.to_string()))?;
        let id = device
            .uuid()
            .map_err(|e| GpuShareError::Discovery(e.to_string()))?;
        let minor = device
            .minor_number()
            .map_err(|e| GpuShareError::Discovery(e.to_string()))?;
        Ok(DeviceDescription {
            id,
            path: format!("{}{}", gpushare_core::DEVICE_PATH_PREFIX, minor),
        })
    }

    fn name(&self) -> &'static str {
        "nvml"
    }
}

impl LinkProbe for NvmlBackend {
    fn local_link(&self, a: &Device, b: &Device) -> GpuShareResult<LinkType> {
        let first = self.device(&a.id)?;
        let second = self.device(&b.id)?;
        let level = match first.topology_common_ancestor(second) {
            Ok(level) => level,
            Err(NvmlError::NotSupported) => return Ok(LinkType::Unknown),
            Err(e) => return Err(GpuShareError::TopologyProbe(e.to_string())),
        };
        Ok(match level {
            TopologyLevel::Internal => LinkType::SameBoard,
            TopologyLevel::Single => LinkType::SingleSwitch,
            TopologyLevel::Multiple => LinkType::MultiSwitch,
            TopologyLevel::HostBridge => LinkType::HostBridge,
            TopologyLevel::Node => LinkType::SameCpu,
            TopologyLevel::System => LinkType::CrossCpu,
        })
    }

    fn fast_link(&self, a: &Device, b: &Device) -> GpuShareResult<LinkType> {
        let first = self.device(&a.id)?;
        let peer_bus_id = self
            .device(&b.id)?
            .pci_info()
            .map_err(|e| GpuShareError::TopologyProbe(e.to_string()))?
            .bus_id;

        let mut count = 0;
        for link in 0..MAX_NVLINKS {
            let wrapper = first.link_wrapper_for(link);
            match wrapper.is_active() {
                Ok(true) => {}
                Ok(false) => continue,
                // Past the last link, or no NVLink on this board
                Err(NvmlError::NotSupported) | Err(NvmlError::InvalidArg) => break,
                Err(e) => return Err(GpuShareError::TopologyProbe(e.to_string())),
            }
            let remote = wrapper
                .remote_pci_info()
                .map_err(|e| GpuShareError::TopologyProbe(e.to_string()))?;
            if remote.bus_id == peer_bus_id {
                count += 1;
            }
        }

        debug!(a = a.index, b = b.index, nvlinks = count, "Counted NVLinks");
        Ok(LinkType::from_nvlink_count(count))
    }
}

/// Critical XID event subscription over an NVML event set
pub struct NvmlEventSource {
    nvml: &'static Nvml,
    set: Option<EventSet<'static>>,
}

impl NvmlEventSource {
    pub fn new() -> GpuShareResult<Self> {
        let nvml = nvml()?;
        let set = nvml
            .create_event_set()
            .map_err(|e| GpuShareError::Internal(format!("failed to create event set: {}", e)))?;
        Ok(Self {
            nvml,
            set: Some(set),
        })
    }
}

impl HealthEventSource for NvmlEventSource {
    fn register(&mut self, device_id: &str) -> GpuShareResult<()> {
        let device = self
            .nvml
            .device_by_uuid(device_id)
            .map_err(|e| GpuShareError::Internal(e.to_string()))?;
        let set = match self.set.take() {
            Some(set) => set,
            None => self
                .nvml
                .create_event_set()
                .map_err(|e| GpuShareError::Internal(e.to_string()))?,
        };

        match device.register_events(EventTypes::CRITICAL_XID_ERROR, set) {
            Ok(set) => {
                self.set = Some(set);
                Ok(())
            }
            Err(err) => {
                self.set = err.source;
                match err.error {
                    NvmlError::NotSupported => Err(GpuShareError::UnsupportedHealthProbe(
                        device_id.to_string(),
                    )),
                    other => Err(GpuShareError::Internal(other.to_string())),
                }
            }
        }
    }

    fn wait(&mut self, timeout: Duration) -> GpuShareResult<Option<XidEvent>> {
        let Some(set) = self.set.as_ref() else {
            std::thread::sleep(timeout);
            return Ok(None);
        };
        match set.wait(wait_millis(timeout)) {
            Ok(event) => {
                if !event.event_type.contains(EventTypes::CRITICAL_XID_ERROR) {
                    return Ok(None);
                }
                let device_id = match event.device.uuid() {
                    Ok(id) if !id.is_empty() => Some(id),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(error = %e, "XID event without a readable device UUID");
                        None
                    }
                };
                Ok(Some(XidEvent {
                    device_id,
                    code: event.event_data.unwrap_or_default(),
                }))
            }
            Err(NvmlError::Timeout) => Ok(None),
            Err(e) => Err(GpuShareError::Internal(e.to_string())),
        }
    }
}

/// NVML wait bound in milliseconds, saturating at `u32::MAX`
fn wait_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_millis_saturates() {
        assert_eq!(wait_millis(Duration::from_millis(5000)), 5000);
        assert_eq!(wait_millis(Duration::from_millis(u64::from(u32::MAX))), u32::MAX);
        assert_eq!(wait_millis(Duration::from_millis(u64::from(u32::MAX) + 1)), u32::MAX);
        assert_eq!(wait_millis(Duration::from_secs(u64::MAX)), u32::MAX);
    }
}
