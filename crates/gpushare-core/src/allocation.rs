//! Allocation request and response messages

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::workload::ANNOTATION_DEVICE_IDS;

/// Env key carrying the device ids granted to a container
pub const ENV_VISIBLE_DEVICES: &str = "NVIDIA_VISIBLE_DEVICES";
/// Env key carrying the failure sentinel
pub const ENV_RESOURCE_INDEX: &str = ANNOTATION_DEVICE_IDS;
/// Sentinel value meaning "no allocation happened"
pub const NO_ALLOCATION: &str = "-1";

/// Devices requested for one container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerAllocateRequest {
    pub devices_ids: Vec<String>,
}

/// An allocation request from the node agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub container_requests: Vec<ContainerAllocateRequest>,
}

impl AllocationRequest {
    /// Build a request from per-container device id lists
    pub fn new(containers: Vec<Vec<String>>) -> Self {
        Self {
            container_requests: containers
                .into_iter()
                .map(|devices_ids| ContainerAllocateRequest { devices_ids })
                .collect(),
        }
    }

    /// Total units requested across all containers
    pub fn total_units(&self) -> u64 {
        self.container_requests
            .iter()
            .map(|r| r.devices_ids.len() as u64)
            .sum()
    }

    /// Every device id named by any container
    pub fn device_ids(&self) -> impl Iterator<Item = &str> {
        self.container_requests
            .iter()
            .flat_map(|r| r.devices_ids.iter().map(String::as_str))
    }
}

/// Environment handed to one container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerAllocateResponse {
    pub envs: BTreeMap<String, String>,
}

/// Response to an allocation request. Always has one entry per container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationResponse {
    pub container_responses: Vec<ContainerAllocateResponse>,
}

impl AllocationResponse {
    /// Every container gets the same device id list
    pub fn granted(request: &AllocationRequest, device_ids: &str) -> Self {
        Self::uniform(request, ENV_VISIBLE_DEVICES, device_ids)
    }

    /// Every container gets the sentinel instead of device ids
    pub fn failed(request: &AllocationRequest) -> Self {
        Self::uniform(request, ENV_RESOURCE_INDEX, NO_ALLOCATION)
    }

    fn uniform(request: &AllocationRequest, key: &str, value: &str) -> Self {
        let container_responses = request
            .container_requests
            .iter()
            .map(|_| {
                let mut envs = BTreeMap::new();
                envs.insert(key.to_string(), value.to_string());
                ContainerAllocateResponse { envs }
            })
            .collect();
        Self {
            container_responses,
        }
    }

    /// Whether this is the sentinel failure payload
    pub fn is_failure(&self) -> bool {
        !self.container_responses.is_empty()
            && self.container_responses.iter().all(|r| {
                r.envs.get(ENV_RESOURCE_INDEX).map(String::as_str) == Some(NO_ALLOCATION)
            })
    }

    /// Device ids granted to the first container, if any
    pub fn visible_devices(&self) -> Option<&str> {
        self.container_responses
            .first()
            .and_then(|r| r.envs.get(ENV_VISIBLE_DEVICES))
            .map(String::as_str)
    }
}

/// Normalise a scheduler device id annotation ("1, 2,4" -> "1,2,4")
pub fn decode_device_ids(raw: &str) -> String {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}
