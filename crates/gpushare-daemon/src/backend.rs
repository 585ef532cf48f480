//! Backend selection from configuration

use anyhow::Context;
use gpushare_core::{DeviceBackend, DevicesConfig, StoreBackend, StoreConfig};
use gpushare_device::{DeviceSource, HealthEventSource, IdleEventSource, LinkProbe, StaticBackend};
use gpushare_store::{ApiServerStore, MemoryStore, NodeStore, WorkloadStore};
use std::sync::Arc;
use tracing::{info, warn};

/// Device-side collaborators of one backend
pub struct Devices {
    pub source: Arc<dyn DeviceSource>,
    pub probe: Arc<dyn LinkProbe>,
    pub events: Box<dyn HealthEventSource>,
}

/// Store-side collaborators
pub struct Stores {
    pub workloads: Arc<dyn WorkloadStore>,
    pub nodes: Arc<dyn NodeStore>,
}

pub fn open_devices(config: &DevicesConfig) -> anyhow::Result<Devices> {
    match config.backend {
        DeviceBackend::Static => {
            let backend = Arc::new(StaticBackend::new(
                config.static_devices.clone(),
                config.links.clone(),
            ));
            info!(devices = config.static_devices.len(), "Using static device backend");
            Ok(Devices {
                source: backend.clone(),
                probe: backend,
                events: Box::new(IdleEventSource),
            })
        }
        #[cfg(feature = "nvml")]
        DeviceBackend::Nvml => {
            let backend = Arc::new(gpushare_device::NvmlBackend::new()?);
            let events = gpushare_device::NvmlEventSource::new()?;
            info!("Using NVML device backend");
            Ok(Devices {
                source: backend.clone(),
                probe: backend,
                events: Box::new(events),
            })
        }
        #[cfg(not(feature = "nvml"))]
        DeviceBackend::Nvml => {
            anyhow::bail!("NVML backend requested but gpushared was built without the nvml feature")
        }
    }
}

pub fn open_stores(config: &StoreConfig) -> anyhow::Result<Stores> {
    match config.backend {
        StoreBackend::Memory => {
            warn!("Using in-memory workload store; assignments are not shared with the scheduler");
            let store = Arc::new(MemoryStore::new());
            Ok(Stores {
                workloads: store.clone(),
                nodes: store,
            })
        }
        StoreBackend::ApiServer => {
            let store = Arc::new(
                ApiServerStore::new(config).context("Failed to create API server client")?,
            );
            info!(url = %config.api_server_url, "Using API server workload store");
            Ok(Stores {
                workloads: store.clone(),
                nodes: store,
            })
        }
    }
}
