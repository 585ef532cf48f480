//! Published device list

use futures::stream::{BoxStream, StreamExt};
use gpushare_core::Device;
use gpushare_device::DeviceInventory;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

/// Current device list with change notification.
///
/// Health is only ever written through [`DeviceRegistry::mark_unhealthy`];
/// readers take snapshots.
pub struct DeviceRegistry {
    tx: watch::Sender<Vec<Device>>,
}

impl DeviceRegistry {
    /// Create a registry holding `devices`
    pub fn new(devices: Vec<Device>) -> Self {
        let (tx, _rx) = watch::channel(devices);
        Self { tx }
    }

    /// Create a registry from the startup inventory
    pub fn from_inventory(inventory: &DeviceInventory) -> Self {
        Self::new(inventory.devices().to_vec())
    }

    /// Copy of the current device list
    pub fn snapshot(&self) -> Vec<Device> {
        self.tx.borrow().clone()
    }

    /// Number of devices currently healthy
    pub fn healthy_count(&self) -> usize {
        self.tx.borrow().iter().filter(|d| d.is_healthy()).count()
    }

    /// Mark one device unhealthy and publish the new list.
    ///
    /// Returns false if the device is unknown or was already unhealthy, in
    /// which case watchers are not woken.
    pub fn mark_unhealthy(&self, device_id: &str) -> bool {
        self.tx.send_if_modified(|devices| {
            devices
                .iter_mut()
                .find(|d| d.id == device_id)
                .map(Device::mark_unhealthy)
                .unwrap_or(false)
        })
    }

    /// Device list snapshots: the current list first, then one per change,
    /// until `token` is cancelled. Intermediate changes may be coalesced.
    pub fn watch(&self, token: CancellationToken) -> BoxStream<'static, Vec<Device>> {
        WatchStream::new(self.tx.subscribe())
            .take_until(token.cancelled_owned())
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(vec![Device::new("GPU-a", 0), Device::new("GPU-b", 1)])
    }

    #[test]
    fn test_mark_unhealthy_is_one_way() {
        let registry = registry();
        assert!(registry.mark_unhealthy("GPU-a"));
        assert!(!registry.mark_unhealthy("GPU-a"));
        assert!(!registry.mark_unhealthy("GPU-missing"));

        let devices = registry.snapshot();
        assert!(!devices[0].is_healthy());
        assert!(devices[1].is_healthy());
        assert_eq!(registry.healthy_count(), 1);
    }

    #[tokio::test]
    async fn test_watch_yields_current_then_changes() {
        let registry = registry();
        let token = CancellationToken::new();
        let mut stream = registry.watch(token.clone());

        let first = stream.next().await.unwrap();
        assert!(first.iter().all(Device::is_healthy));

        registry.mark_unhealthy("GPU-b");
        let second = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert!(!second[1].is_healthy());

        token.cancel();
        let end = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_unchanged_mark_does_not_wake_watchers() {
        let registry = registry();
        registry.mark_unhealthy("GPU-a");

        let token = CancellationToken::new();
        let mut stream = registry.watch(token);
        stream.next().await.unwrap();

        registry.mark_unhealthy("GPU-a");
        let woke = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(woke.is_err());
    }
}
