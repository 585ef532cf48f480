//! Configuration-driven device backend
//!
//! Serves devices and links listed in the daemon configuration. Used on
//! machines without NVML and in tests.

use gpushare_core::{
    Device, DeviceDescription, GpuShareError, GpuShareResult, LinkType, StaticDeviceConfig,
    StaticLinkConfig,
};
use std::time::Duration;

use crate::traits::{DeviceSource, HealthEventSource, LinkProbe, XidEvent};

/// Static device backend
pub struct StaticBackend {
    devices: Vec<StaticDeviceConfig>,
    links: Vec<StaticLinkConfig>,
}

impl StaticBackend {
    /// Create a backend from configured devices and links
    pub fn new(devices: Vec<StaticDeviceConfig>, links: Vec<StaticLinkConfig>) -> Self {
        Self { devices, links }
    }

    fn position(&self, device: &Device) -> Option<usize> {
        self.devices.iter().position(|d| d.id == device.id)
    }

    fn link(&self, a: &Device, b: &Device) -> Option<&StaticLinkConfig> {
        let (pa, pb) = (self.position(a)?, self.position(b)?);
        self.links
            .iter()
            .find(|l| (l.a == pa && l.b == pb) || (l.a == pb && l.b == pa))
    }
}

impl DeviceSource for StaticBackend {
    fn count(&self) -> GpuShareResult<u32> {
        Ok(self.devices.len() as u32)
    }

    fn describe(&self, index: u32) -> GpuShareResult<DeviceDescription> {
        self.devices
            .get(index as usize)
            .map(|d| DeviceDescription {
                id: d.id.clone(),
                path: d.path.clone(),
            })
            .ok_or_else(|| GpuShareError::Discovery(format!("no static device at {}", index)))
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

impl LinkProbe for StaticBackend {
    fn local_link(&self, a: &Device, b: &Device) -> GpuShareResult<LinkType> {
        Ok(self.link(a, b).map(|l| l.local).unwrap_or_default())
    }

    fn fast_link(&self, a: &Device, b: &Device) -> GpuShareResult<LinkType> {
        Ok(self.link(a, b).map(|l| l.fast).unwrap_or_default())
    }
}

/// Health source for static devices: accepts every subscription and never
/// reports an event
#[derive(Debug, Default)]
pub struct IdleEventSource;

impl HealthEventSource for IdleEventSource {
    fn register(&mut self, _device_id: &str) -> GpuShareResult<()> {
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> GpuShareResult<Option<XidEvent>> {
        std::thread::sleep(timeout);
        Ok(None)
    }
}
