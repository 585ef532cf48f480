//! CLI commands implementation

use anyhow::Result;
use gpushare_core::{AllocationRequest, AllocationResponse, Device};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

/// API client for communicating with the daemon
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Status response
#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub node_name: String,
    pub resource_name: String,
    pub devices: usize,
    pub healthy_devices: usize,
}

/// List devices
pub async fn devices(client: &ApiClient) -> Result<()> {
    let response = client
        .client
        .get(client.url("/api/v1/devices"))
        .send()
        .await?;

    if response.status().is_success() {
        let devices: Vec<Device> = response.json().await?;

        if devices.is_empty() {
            println!("No devices found");
        } else {
            println!("{:<6} {:<44} {:<10}", "INDEX", "ID", "HEALTH");
            for device in devices {
                println!(
                    "{:<6} {:<44} {:<10}",
                    device.index,
                    device.id,
                    device.health.to_string()
                );
            }
        }
    } else {
        let error = response.text().await?;
        eprintln!("Failed to list devices: {}", error);
    }

    Ok(())
}

/// Show the topology map
pub async fn topology(client: &ApiClient) -> Result<()> {
    let response = client
        .client
        .get(client.url("/api/v1/topology"))
        .send()
        .await?;

    if response.status().is_success() {
        let topology: BTreeMap<String, String> = response.json().await?;

        if topology.is_empty() {
            println!("No GPU links detected");
        } else {
            for (key, link) in topology {
                println!("{:<20} {}", key, link);
            }
        }
    } else {
        let error = response.text().await?;
        eprintln!("Failed to get topology: {}", error);
    }

    Ok(())
}

/// Show daemon status
pub async fn status(client: &ApiClient) -> Result<()> {
    let response = client
        .client
        .get(client.url("/api/v1/status"))
        .send()
        .await?;

    if response.status().is_success() {
        let status: StatusResponse = response.json().await?;

        println!("gpushare v{}", status.version);
        println!();
        println!("Node: {}", status.node_name);
        println!("Resource: {}", status.resource_name);
        println!(
            "GPUs: {} total, {} healthy",
            status.devices, status.healthy_devices
        );
    } else {
        let error = response.text().await?;
        eprintln!("Failed to get status: {}", error);
    }

    Ok(())
}

/// Request an allocation for a single container
pub async fn allocate(client: &ApiClient, device_ids: Vec<String>) -> Result<()> {
    let request = AllocationRequest::new(vec![device_ids]);
    debug!(units = request.total_units(), "Sending allocate request");

    let response = client
        .client
        .post(client.url("/api/v1/allocate"))
        .json(&request)
        .send()
        .await?;

    if response.status().is_success() {
        let allocation: AllocationResponse = response.json().await?;
        print_allocation(&allocation);
    } else {
        let error = response.text().await?;
        eprintln!("Allocation rejected: {}", error);
    }

    Ok(())
}

fn print_allocation(allocation: &AllocationResponse) {
    if allocation.is_failure() {
        println!("No matching workload; sentinel response returned");
        return;
    }
    for (i, container) in allocation.container_responses.iter().enumerate() {
        println!("Container {}:", i);
        for (key, value) in &container.envs {
            println!("  {}={}", key, value);
        }
    }
}
