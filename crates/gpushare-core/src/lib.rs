//! gpushare-core: Core types for the gpushare device plugin
//!
//! This crate provides the fundamental types used throughout gpushare:
//! - Devices, health, and interconnect topology
//! - Workload descriptors and their sharing annotations
//! - Allocation request and response messages
//! - Configuration types
//! - Error handling

pub mod allocation;
pub mod config;
pub mod device;
pub mod error;
pub mod topology;
pub mod workload;

pub use allocation::*;
pub use config::*;
pub use device::*;
pub use error::*;
pub use topology::*;
pub use workload::*;
