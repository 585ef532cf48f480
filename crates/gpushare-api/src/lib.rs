//! gpushare-api: HTTP API for gpushare
//!
//! This crate exposes the plugin's outward contracts over HTTP:
//! - Allocate
//! - Device listing and the device health stream
//! - The published topology and daemon status

pub mod rest;

pub use rest::{create_router, AppState, StatusResponse};
