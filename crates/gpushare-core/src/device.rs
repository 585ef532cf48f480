//! Physical accelerator devices and their health

use serde::{Deserialize, Serialize};

/// Prefix of the character device node backing each GPU
pub const DEVICE_PATH_PREFIX: &str = "/dev/nvidia";

/// Represents one physical accelerator device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Globally unique, stable identifier (the device UUID)
    pub id: String,
    /// Minor number of the device node, used in topology keys and selectors
    pub index: u32,
    /// Current health
    pub health: DeviceHealth,
}

impl Device {
    /// Create a healthy device
    pub fn new(id: impl Into<String>, index: u32) -> Self {
        Self {
            id: id.into(),
            index,
            health: DeviceHealth::Healthy,
        }
    }

    /// Check if the device is healthy
    pub fn is_healthy(&self) -> bool {
        self.health == DeviceHealth::Healthy
    }

    /// Mark the device unhealthy. Returns true if the health changed.
    ///
    /// There is no inverse: a device never returns to healthy.
    pub fn mark_unhealthy(&mut self) -> bool {
        let changed = self.health == DeviceHealth::Healthy;
        self.health = DeviceHealth::Unhealthy;
        changed
    }
}

/// Device health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceHealth {
    Healthy,
    Unhealthy,
}

impl std::fmt::Display for DeviceHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceHealth::Healthy => write!(f, "Healthy"),
            DeviceHealth::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}

/// What a device enumeration source reports about one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescription {
    /// Device UUID
    pub id: String,
    /// Device node path (e.g. "/dev/nvidia0")
    pub path: String,
}

impl DeviceDescription {
    /// Minor number parsed from a `/dev/nvidiaN` path
    pub fn minor_number(&self) -> Option<u32> {
        self.path.strip_prefix(DEVICE_PATH_PREFIX)?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minor_number() {
        let desc = DeviceDescription {
            id: "GPU-a".to_string(),
            path: "/dev/nvidia3".to_string(),
        };
        assert_eq!(desc.minor_number(), Some(3));

        let bad = DeviceDescription {
            id: "GPU-b".to_string(),
            path: "/dev/nvidiactl".to_string(),
        };
        assert_eq!(bad.minor_number(), None);
    }

    #[test]
    fn test_mark_unhealthy_is_one_way() {
        let mut dev = Device::new("GPU-a", 0);
        assert!(dev.is_healthy());
        assert!(dev.mark_unhealthy());
        assert!(!dev.mark_unhealthy());
        assert_eq!(dev.health, DeviceHealth::Unhealthy);
    }
}
