//! gpushare-allocator: Allocation matching and commit
//!
//! This crate turns a scheduler's provisional match into a confirmed device
//! assignment:
//! - Candidate selection from pending workloads on this node
//! - The node-wide allocate critical section
//! - Optimistic-concurrency commit of the confirmation

pub mod coordinator;
pub mod selector;

pub use coordinator::AllocationCoordinator;
pub use selector::CandidateSelector;
