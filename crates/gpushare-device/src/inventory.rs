//! Device inventory for this node

use gpushare_core::{Device, GpuShareError, GpuShareResult};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::traits::DeviceSource;

/// The devices enumerated at startup, with id <-> index lookups
#[derive(Debug, Clone)]
pub struct DeviceInventory {
    devices: Vec<Device>,
    index_by_id: HashMap<String, u32>,
    id_by_index: HashMap<u32, String>,
}

impl DeviceInventory {
    /// Enumerate every device the source reports
    pub fn enumerate(source: &dyn DeviceSource) -> GpuShareResult<Self> {
        let count = source
            .count()
            .map_err(|e| GpuShareError::Discovery(format!("failed to count devices: {}", e)))?;

        if count == 0 {
            return Err(GpuShareError::Discovery(format!(
                "no devices visible through {}",
                source.name()
            )));
        }

        let mut devices = Vec::with_capacity(count as usize);
        for i in 0..count {
            let desc = source.describe(i).map_err(|e| {
                GpuShareError::Discovery(format!("failed to describe device {}: {}", i, e))
            })?;
            let index = desc.minor_number().ok_or_else(|| {
                GpuShareError::Discovery(format!(
                    "device {} has unexpected path {}",
                    desc.id, desc.path
                ))
            })?;
            debug!(device = %desc.id, index = index, path = %desc.path, "Discovered device");
            devices.push(Device::new(desc.id, index));
        }

        info!(
            backend = source.name(),
            devices = devices.len(),
            "Device inventory built"
        );

        Ok(Self::from_devices(devices))
    }

    /// Build an inventory from already known devices
    pub fn from_devices(devices: Vec<Device>) -> Self {
        let index_by_id = devices.iter().map(|d| (d.id.clone(), d.index)).collect();
        let id_by_index = devices.iter().map(|d| (d.index, d.id.clone())).collect();
        Self {
            devices,
            index_by_id,
            id_by_index,
        }
    }

    /// Devices in enumeration order
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Check whether a device id belongs to this node
    pub fn exists(&self, id: &str) -> bool {
        self.index_by_id.contains_key(id)
    }

    /// Index of a device id
    pub fn index_of(&self, id: &str) -> Option<u32> {
        self.index_by_id.get(id).copied()
    }

    /// Device id at an index
    pub fn id_of(&self, index: u32) -> Option<&str> {
        self.id_by_index.get(&index).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::static_backend::StaticBackend;
    use gpushare_core::StaticDeviceConfig;

    fn backend(paths: &[(&str, &str)]) -> StaticBackend {
        StaticBackend::new(
            paths
                .iter()
                .map(|(id, path)| StaticDeviceConfig {
                    id: id.to_string(),
                    path: path.to_string(),
                })
                .collect(),
            Vec::new(),
        )
    }

    #[test]
    fn test_enumerate_builds_lookups() {
        let source = backend(&[("GPU-a", "/dev/nvidia0"), ("GPU-b", "/dev/nvidia2")]);
        let inventory = DeviceInventory::enumerate(&source).unwrap();

        assert_eq!(inventory.len(), 2);
        assert!(inventory.exists("GPU-a"));
        assert!(!inventory.exists("GPU-x"));
        assert_eq!(inventory.index_of("GPU-b"), Some(2));
        assert_eq!(inventory.id_of(0), Some("GPU-a"));
        assert_eq!(inventory.id_of(1), None);
        assert!(inventory.devices().iter().all(|d| d.is_healthy()));
    }

    #[test]
    fn test_enumerate_no_devices() {
        let source = backend(&[]);
        let result = DeviceInventory::enumerate(&source);
        assert!(matches!(result, Err(GpuShareError::Discovery(_))));
    }

    #[test]
    fn test_enumerate_bad_path() {
        let source = backend(&[("GPU-a", "/dev/dri/card0")]);
        let result = DeviceInventory::enumerate(&source);
        assert!(matches!(result, Err(GpuShareError::Discovery(_))));
    }
}
