//! REST API handlers

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use futures::stream::{Stream, StreamExt};
use gpushare_allocator::AllocationCoordinator;
use gpushare_core::{AllocationRequest, AllocationResponse, Device, GpuShareError, NodeContext};
use gpushare_health::DeviceRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers
pub struct AppState {
    pub coordinator: Arc<AllocationCoordinator>,
    pub registry: Arc<DeviceRegistry>,
    /// Topology map as published to the node
    pub topology: BTreeMap<String, String>,
    pub node: NodeContext,
    /// Ends open watch streams on shutdown
    pub shutdown: CancellationToken,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/allocate", post(allocate))
        .route("/api/v1/devices", get(list_devices))
        .route("/api/v1/devices/watch", get(watch_devices))
        .route("/api/v1/topology", get(get_topology))
        .route("/api/v1/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Allocate shared devices for one request
async fn allocate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AllocationRequest>,
) -> Result<Json<AllocationResponse>, (StatusCode, String)> {
    info!(
        containers = req.container_requests.len(),
        units = req.total_units(),
        "Allocate request"
    );

    let response = state.coordinator.allocate(&req).await.map_err(|e| match e {
        GpuShareError::UnknownDevice(_) => (StatusCode::BAD_REQUEST, e.to_string()),
        _ => {
            error!(error = %e, "Allocate failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    })?;

    Ok(Json(response))
}

/// Current device list
async fn list_devices(State(state): State<Arc<AppState>>) -> Json<Vec<Device>> {
    Json(state.registry.snapshot())
}

/// Device list snapshots as server-sent events, until shutdown
async fn watch_devices(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = state
        .registry
        .watch(state.shutdown.child_token())
        .map(|devices| Event::default().json_data(devices));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Published topology map
async fn get_topology(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, String>> {
    Json(state.topology.clone())
}

/// Daemon status response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub node_name: String,
    pub resource_name: String,
    pub devices: usize,
    pub healthy_devices: usize,
}

/// Get daemon status
async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        node_name: state.node.node_name.clone(),
        resource_name: state.node.resource_name.clone(),
        devices: state.registry.snapshot().len(),
        healthy_devices: state.registry.healthy_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use gpushare_core::{
        RetryPolicy, WorkloadDescriptor, ANNOTATION_ASSIGNED, ANNOTATION_ASSUME_TIME,
        ANNOTATION_DEVICE_IDS, DEFAULT_RESOURCE_NAME,
    };
    use gpushare_device::DeviceInventory;
    use gpushare_store::MemoryStore;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn router() -> (Router, Arc<MemoryStore>, Arc<DeviceRegistry>) {
        let inventory = Arc::new(DeviceInventory::from_devices(vec![
            Device::new("GPU-a", 0),
            Device::new("GPU-b", 1),
        ]));
        let store = Arc::new(MemoryStore::new());
        store
            .insert(
                WorkloadDescriptor::new("default", "train-0")
                    .with_node("node-1")
                    .with_container("main", DEFAULT_RESOURCE_NAME, 1)
                    .with_annotation(ANNOTATION_ASSUME_TIME, "100")
                    .with_annotation(ANNOTATION_ASSIGNED, "false")
                    .with_annotation(ANNOTATION_DEVICE_IDS, "1"),
            )
            .await;

        let node = NodeContext::new("node-1");
        let coordinator = Arc::new(AllocationCoordinator::new(
            inventory.clone(),
            store.clone(),
            node.clone(),
            RetryPolicy {
                attempts: 1,
                backoff: Duration::from_millis(1),
            },
        ));
        let registry = Arc::new(DeviceRegistry::from_inventory(&inventory));
        let mut topology = BTreeMap::new();
        topology.insert("GPU_NV2_0_1".to_string(), "Two NVLinks".to_string());

        let router = create_router(AppState {
            coordinator,
            registry: registry.clone(),
            topology,
            node,
            shutdown: CancellationToken::new(),
        });
        (router, store, registry)
    }

    fn allocate_request(ids: &[&str]) -> Request<Body> {
        let body = serde_json::to_vec(&AllocationRequest::new(vec![ids
            .iter()
            .map(|s| s.to_string())
            .collect()]))
        .unwrap();
        Request::post("/api/v1/allocate")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_allocate_confirms_candidate() {
        let (router, store, _) = router().await;

        let response = router.oneshot(allocate_request(&["GPU-a"])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: AllocationResponse = body_json(response).await;
        assert_eq!(body.visible_devices(), Some("1"));
        let stored = store.snapshot("default", "train-0").await.unwrap();
        assert_eq!(stored.confirmed_flag(), Some(true));
    }

    #[tokio::test]
    async fn test_allocate_without_match_returns_sentinel() {
        let (router, _, _) = router().await;

        let response = router
            .oneshot(allocate_request(&["GPU-a", "GPU-b"]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: AllocationResponse = body_json(response).await;
        assert!(body.is_failure());
    }

    #[tokio::test]
    async fn test_allocate_unknown_device_is_bad_request() {
        let (router, _, _) = router().await;

        let response = router.oneshot(allocate_request(&["X"])).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_devices_reflect_health() {
        let (router, _, registry) = router().await;
        registry.mark_unhealthy("GPU-b");

        let response = router
            .oneshot(Request::get("/api/v1/devices").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let devices: Vec<Device> = body_json(response).await;
        assert_eq!(devices.len(), 2);
        assert!(devices[0].is_healthy());
        assert!(!devices[1].is_healthy());
    }

    #[tokio::test]
    async fn test_topology_and_status() {
        let (router, _, _) = router().await;

        let response = router
            .clone()
            .oneshot(Request::get("/api/v1/topology").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let topology: BTreeMap<String, String> = body_json(response).await;
        assert_eq!(topology.get("GPU_NV2_0_1").map(String::as_str), Some("Two NVLinks"));

        let response = router
            .oneshot(Request::get("/api/v1/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status: StatusResponse = body_json(response).await;
        assert_eq!(status.node_name, "node-1");
        assert_eq!(status.devices, 2);
        assert_eq!(status.healthy_devices, 2);
    }

    #[tokio::test]
    async fn test_watch_is_event_stream() {
        let (router, _, _) = router().await;

        let response = router
            .oneshot(
                Request::get("/api/v1/devices/watch")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
    }
}
