//! gpushare-store: Shared state access
//!
//! This crate provides access to the cluster's workload and node records:
//! - Store collaborator traits with conditional update
//! - A process-local in-memory store
//! - A Kubernetes API server store
//! - Topology publication to node annotations

pub mod apiserver;
pub mod memory;
pub mod node;
pub mod traits;

pub use apiserver::ApiServerStore;
pub use memory::MemoryStore;
pub use node::publish_topology;
pub use traits::{NodeStore, WorkloadStore};
