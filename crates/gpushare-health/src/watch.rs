//! Health watch loop
//!
//! Two tasks cooperate. The event task owns the blocking event source: it
//! registers every device, then waits for critical errors in bounded slices,
//! re-checking the cancellation token between waits, and sends the id of
//! each affected device down a channel. The drain task applies those reports
//! to the [`DeviceRegistry`], which republishes the device list. Cancelling
//! the token stops both; a device never becomes healthy again.

use gpushare_core::{GpuShareError, GpuShareResult, HealthConfig};
use gpushare_device::{HealthEventSource, XidEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::registry::DeviceRegistry;

/// Pending unhealthy reports between the event task and the drain task
const REPORT_BUFFER: usize = 64;

/// Starts the health watch tasks
pub struct HealthWatcher {
    config: HealthConfig,
    registry: Arc<DeviceRegistry>,
}

/// Handles of a running health watch
pub struct HealthTasks {
    events: JoinHandle<GpuShareResult<()>>,
    drain: JoinHandle<()>,
}

impl HealthTasks {
    /// Wait for both tasks to finish
    pub async fn join(self) {
        match self.events.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Health event task failed"),
            Err(e) => error!(error = %e, "Health event task panicked"),
        }
        if let Err(e) = self.drain.await {
            error!(error = %e, "Health drain task panicked");
        }
    }
}

impl HealthWatcher {
    /// Create a new health watcher
    pub fn new(config: HealthConfig, registry: Arc<DeviceRegistry>) -> Self {
        Self { config, registry }
    }

    /// Start watching. Returns `None` when XID health checks are disabled.
    pub fn start(
        self,
        source: Box<dyn HealthEventSource>,
        token: CancellationToken,
    ) -> Option<HealthTasks> {
        if !self.config.xids_enabled() {
            info!(disabled = %self.config.disabled, "Health checks disabled");
            return None;
        }

        let (tx, rx) = mpsc::channel(REPORT_BUFFER);
        let loop_state = EventLoop {
            device_ids: self.registry.snapshot().into_iter().map(|d| d.id).collect(),
            benign_xids: self.config.benign_xids.clone(),
            timeout: self.config.wait_timeout(),
            tx,
            token: token.clone(),
            runtime: Handle::current(),
        };

        let events = tokio::task::spawn_blocking(move || loop_state.run(source));
        let drain = tokio::spawn(drain(self.registry, rx, token));
        info!("Health watch started");

        Some(HealthTasks { events, drain })
    }
}

/// State of the blocking event task
struct EventLoop {
    device_ids: Vec<String>,
    benign_xids: Vec<u64>,
    timeout: Duration,
    tx: mpsc::Sender<String>,
    token: CancellationToken,
    runtime: Handle,
}

impl EventLoop {
    fn run(self, mut source: Box<dyn HealthEventSource>) -> GpuShareResult<()> {
        for id in &self.device_ids {
            match source.register(id) {
                Ok(()) => debug!(device = %id, "Registered for critical XID events"),
                Err(GpuShareError::UnsupportedHealthProbe(_)) => {
                    warn!(device = %id, "Device cannot report health, marking unhealthy");
                    if !self.report(id) {
                        return Ok(());
                    }
                }
                Err(e) => return Err(e),
            }
        }

        let mut failures: u32 = 0;
        while !self.token.is_cancelled() {
            let event = match source.wait(self.timeout) {
                Ok(event) => {
                    if failures > 0 {
                        info!(failures = failures, "Device event wait recovered");
                        failures = 0;
                    }
                    match event {
                        Some(event) => event,
                        None => continue,
                    }
                }
                Err(e) => {
                    if failures == 0 {
                        warn!(error = %e, "Failed to wait for device events");
                    } else {
                        debug!(
                            error = %e,
                            failures = failures,
                            "Device event wait still failing"
                        );
                    }
                    failures = failures.saturating_add(1);
                    self.pause();
                    continue;
                }
            };
            if self.token.is_cancelled() {
                break;
            }
            for id in self.affected(&event) {
                if !self.report(id) {
                    return Ok(());
                }
            }
        }

        debug!("Health event task stopped");
        Ok(())
    }

    /// Devices an event marks unhealthy
    fn affected<'a>(&'a self, event: &'a XidEvent) -> Vec<&'a str> {
        if self.benign_xids.contains(&event.code) {
            debug!(xid = event.code, "Ignoring application XID");
            return Vec::new();
        }

        match event.device_id.as_deref() {
            None => {
                warn!(
                    xid = event.code,
                    "XID event without a device, marking all devices unhealthy"
                );
                self.device_ids.iter().map(String::as_str).collect()
            }
            Some(id) if self.device_ids.iter().any(|d| d == id) => {
                warn!(device = %id, xid = event.code, "Critical XID error");
                vec![id]
            }
            Some(id) => {
                warn!(device = %id, xid = event.code, "XID event for an unknown device");
                Vec::new()
            }
        }
    }

    /// Block for one wait timeout, returning early on cancellation
    fn pause(&self) {
        let token = self.token.clone();
        let timeout = self.timeout;
        self.runtime.block_on(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {}
            }
        });
    }

    /// Returns false once the drain side is gone
    fn report(&self, device_id: &str) -> bool {
        self.tx.blocking_send(device_id.to_string()).is_ok()
    }
}

async fn drain(
    registry: Arc<DeviceRegistry>,
    mut rx: mpsc::Receiver<String>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            report = rx.recv() => match report {
                Some(id) => {
                    if registry.mark_unhealthy(&id) {
                        warn!(device = %id, "Device marked unhealthy");
                    }
                }
                None => break,
            },
        }
    }
    debug!("Health drain task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpushare_core::Device;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::mpsc as std_mpsc;

    /// Event source fed by the test through a channel
    struct ChannelSource {
        unsupported: HashSet<String>,
        events: std_mpsc::Receiver<XidEvent>,
    }

    impl HealthEventSource for ChannelSource {
        fn register(&mut self, device_id: &str) -> GpuShareResult<()> {
            if self.unsupported.contains(device_id) {
                return Err(GpuShareError::UnsupportedHealthProbe(device_id.to_string()));
            }
            Ok(())
        }

        fn wait(&mut self, timeout: Duration) -> GpuShareResult<Option<XidEvent>> {
            match self.events.recv_timeout(timeout) {
                Ok(event) => Ok(Some(event)),
                Err(std_mpsc::RecvTimeoutError::Timeout) => Ok(None),
                Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                    std::thread::sleep(timeout);
                    Ok(None)
                }
            }
        }
    }

    fn setup(
        unsupported: &[&str],
        config: HealthConfig,
    ) -> (
        Arc<DeviceRegistry>,
        std_mpsc::Sender<XidEvent>,
        CancellationToken,
        Option<HealthTasks>,
    ) {
        let registry = Arc::new(DeviceRegistry::new(vec![
            Device::new("GPU-a", 0),
            Device::new("GPU-b", 1),
            Device::new("GPU-c", 2),
        ]));
        let (events_tx, events_rx) = std_mpsc::channel();
        let source = ChannelSource {
            unsupported: unsupported.iter().map(|s| s.to_string()).collect(),
            events: events_rx,
        };
        let token = CancellationToken::new();
        let tasks =
            HealthWatcher::new(config, registry.clone()).start(Box::new(source), token.clone());
        (registry, events_tx, token, tasks)
    }

    fn fast_config() -> HealthConfig {
        HealthConfig {
            wait_timeout_ms: 10,
            ..HealthConfig::default()
        }
    }

    fn xid(device: Option<&str>, code: u64) -> XidEvent {
        XidEvent {
            device_id: device.map(str::to_string),
            code,
        }
    }

    /// Ids of unhealthy devices once at least `count` are down, or `None`
    /// if that does not happen `within`
    async fn wait_unhealthy(
        registry: &DeviceRegistry,
        count: usize,
        within: Duration,
    ) -> Option<Vec<String>> {
        let mut stream = registry.watch(CancellationToken::new());
        let wait = async {
            loop {
                let devices = futures::StreamExt::next(&mut stream).await.unwrap_or_default();
                let down: Vec<String> = devices
                    .into_iter()
                    .filter(|d| !d.is_healthy())
                    .map(|d| d.id)
                    .collect();
                if down.len() >= count {
                    return down;
                }
            }
        };
        tokio::time::timeout(within, wait).await.ok()
    }

    async fn unhealthy_when(registry: &DeviceRegistry, count: usize) -> Vec<String> {
        wait_unhealthy(registry, count, Duration::from_secs(5))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_unsupported_device_marked_unhealthy() {
        let (registry, _events, token, tasks) = setup(&["GPU-b"], fast_config());

        assert_eq!(unhealthy_when(&registry, 1).await, vec!["GPU-b"]);

        token.cancel();
        tasks.unwrap().join().await;
        assert_eq!(registry.healthy_count(), 2);
    }

    #[tokio::test]
    async fn test_critical_xid_marks_only_that_device() {
        let (registry, events, token, tasks) = setup(&[], fast_config());

        events.send(xid(Some("GPU-a"), 43)).unwrap();
        events.send(xid(Some("GPU-c"), 79)).unwrap();

        assert_eq!(unhealthy_when(&registry, 1).await, vec!["GPU-c"]);

        token.cancel();
        tasks.unwrap().join().await;
        assert_eq!(registry.healthy_count(), 2);
    }

    #[tokio::test]
    async fn test_xid_without_device_marks_all() {
        let (registry, events, token, tasks) = setup(&[], fast_config());

        events.send(xid(None, 48)).unwrap();

        assert_eq!(unhealthy_when(&registry, 3).await.len(), 3);
        token.cancel();
        tasks.unwrap().join().await;
    }

    #[tokio::test]
    async fn test_disabled_checks_do_not_start() {
        let config = HealthConfig {
            disabled: "all".to_string(),
            ..fast_config()
        };
        let (registry, _events, _token, tasks) = setup(&["GPU-a"], config);

        assert!(tasks.is_none());
        assert_eq!(registry.healthy_count(), 3);
    }

    #[tokio::test]
    async fn test_no_transitions_after_cancel() {
        let config = HealthConfig {
            wait_timeout_ms: 300,
            ..HealthConfig::default()
        };
        let (registry, events, token, tasks) = setup(&[], config);

        // Let the event task settle into its wait before cancelling
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        events.send(xid(None, 79)).unwrap();

        let down = wait_unhealthy(&registry, 1, Duration::from_millis(200)).await;
        assert!(down.is_none());

        tasks.unwrap().join().await;
        assert_eq!(registry.healthy_count(), 3);
    }

    /// Event source whose waits always fail
    struct FailingSource {
        waits: Arc<AtomicU32>,
    }

    impl HealthEventSource for FailingSource {
        fn register(&mut self, _device_id: &str) -> GpuShareResult<()> {
            Ok(())
        }

        fn wait(&mut self, _timeout: Duration) -> GpuShareResult<Option<XidEvent>> {
            self.waits.fetch_add(1, Ordering::SeqCst);
            Err(GpuShareError::Internal("driver gone".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failing_wait_is_paced_by_timeout() {
        let registry = Arc::new(DeviceRegistry::new(vec![Device::new("GPU-a", 0)]));
        let waits = Arc::new(AtomicU32::new(0));
        let source = FailingSource {
            waits: waits.clone(),
        };
        let config = HealthConfig {
            wait_timeout_ms: 20,
            ..HealthConfig::default()
        };
        let token = CancellationToken::new();
        let tasks = HealthWatcher::new(config, registry.clone())
            .start(Box::new(source), token.clone())
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
        tasks.join().await;

        let calls = waits.load(Ordering::SeqCst);
        assert!(calls >= 1);
        assert!(calls <= 10, "wait called {} times in 100ms", calls);
        assert_eq!(registry.healthy_count(), 1);
    }

    #[tokio::test]
    async fn test_failing_wait_stops_promptly_on_cancel() {
        let registry = Arc::new(DeviceRegistry::new(vec![Device::new("GPU-a", 0)]));
        let source = FailingSource {
            waits: Arc::new(AtomicU32::new(0)),
        };
        let config = HealthConfig {
            wait_timeout_ms: 60_000,
            ..HealthConfig::default()
        };
        let token = CancellationToken::new();
        let tasks = HealthWatcher::new(config, registry)
            .start(Box::new(source), token.clone())
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), tasks.join())
            .await
            .unwrap();
    }
}
