//! gpushare-device: Device layer for gpushare
//!
//! This crate provides everything that talks to the accelerators themselves:
//! - Collaborator traits for enumeration, link probing and health events
//! - The device inventory built once at startup
//! - Pairwise topology computation
//! - A configuration-driven static backend
//! - An NVML backend (feature `nvml`)

pub mod inventory;
#[cfg(feature = "nvml")]
pub mod nvml;
pub mod static_backend;
pub mod topology;
pub mod traits;

pub use inventory::DeviceInventory;
#[cfg(feature = "nvml")]
pub use nvml::{NvmlBackend, NvmlEventSource};
pub use static_backend::{IdleEventSource, StaticBackend};
pub use topology::compute_topology;
pub use traits::{DeviceSource, HealthEventSource, LinkProbe, XidEvent};
