//! Supervision of many independently configured devices.
//!
//! Reads go straight to the concurrent instance map. Add, remove, start and
//! stop serialize through one async gate.

mod batch;
mod instance;

pub use batch::{BatchMode, BatchOperation, BatchResult, DeviceResult};
pub use instance::{
    DeviceInstance, DeviceInstanceEvent, DeviceStatistics, DeviceStatsSnapshot, DeviceStatus,
};

use crate::catalog::DefinitionCatalog;
use crate::config::{Config, CoordinatorConfig, DeviceConfig};
use crate::connection::ConnectionManager;
use crate::controller::ControllerDataProvider;
use crate::error::{GemError, OperationResult, Result};
use crate::events::{EventBus, EventKind, GemEvent};
use crate::init::InitOutcome;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drivers backing one device
pub struct DeviceDrivers {
    pub connection: Arc<dyn ConnectionManager>,
    pub controller: Arc<dyn ControllerDataProvider>,
}

/// Builds the host connection and controller driver for a device
#[async_trait]
pub trait DeviceDriverFactory: Send + Sync {
    async fn create(&self, config: &DeviceConfig) -> Result<DeviceDrivers>;
}

/// Coordinator-wide counters
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorSummary {
    pub device_count: usize,
    pub running: usize,
    pub online: usize,
    pub active_alarms: usize,
    pub timestamp: DateTime<Utc>,
}

pub struct DeviceCoordinator {
    config: CoordinatorConfig,
    factory: Arc<dyn DeviceDriverFactory>,
    catalog: Arc<DefinitionCatalog>,
    devices: DashMap<String, Arc<DeviceInstance>>,
    gate: Arc<AsyncMutex<()>>,
    events: EventBus,
    shutdown: CancellationToken,
    health_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl DeviceCoordinator {
    pub fn new(config: CoordinatorConfig, factory: Arc<dyn DeviceDriverFactory>) -> Self {
        Self::with_catalog(config, factory, Arc::new(DefinitionCatalog::standard()))
    }

    pub fn with_catalog(
        config: CoordinatorConfig,
        factory: Arc<dyn DeviceDriverFactory>,
        catalog: Arc<DefinitionCatalog>,
    ) -> Self {
        Self {
            config,
            factory,
            catalog,
            devices: DashMap::new(),
            gate: Arc::new(AsyncMutex::new(())),
            events: EventBus::new(),
            shutdown: CancellationToken::new(),
            health_task: parking_lot::Mutex::new(None),
        }
    }

    /// Build a coordinator and register every configured device
    pub async fn from_config(config: &Config, factory: Arc<dyn DeviceDriverFactory>) -> Result<Self> {
        config.validate()?;
        let coordinator = Self::new(config.coordinator.clone(), factory);
        for device in &config.devices {
            coordinator.add_device(device.clone()).await?;
        }
        Ok(coordinator)
    }

    /// Device lifecycle notifications (Added, Removed, Started, ...)
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<GemEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn publish_instance_event(events: &EventBus, device: &DeviceInstance, event: DeviceInstanceEvent) {
        events.publish(GemEvent::new(device.device_id(), EventKind::DeviceInstance).with_new(event));
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    pub async fn add_device(&self, config: DeviceConfig) -> Result<()> {
        config.validate()?;
        let _guard = self.gate.lock().await;

        if self.devices.contains_key(&config.device_id) {
            return Err(GemError::AlreadyExists(format!("device '{}'", config.device_id)));
        }

        let drivers = self.factory.create(&config).await?;
        let device = DeviceInstance::new(
            config,
            drivers.connection,
            drivers.controller,
            Arc::clone(&self.catalog),
        );
        info!(device = %device.device_id(), "Device added");
        Self::publish_instance_event(&self.events, &device, DeviceInstanceEvent::Added);
        self.devices.insert(device.device_id().to_string(), device);
        Ok(())
    }

    /// Stop (if running) and unregister a device
    pub async fn remove_device(&self, device_id: &str) -> Result<()> {
        let _guard = self.gate.lock().await;
        let device = self
            .device(device_id)
            .ok_or_else(|| GemError::NotFound(format!("device '{}'", device_id)))?;

        if let Err(e) = device.stop().await {
            warn!(device = device_id, "Stop during removal failed: {}", e);
        }
        self.devices.remove(device_id);
        info!(device = device_id, "Device removed");
        Self::publish_instance_event(&self.events, &device, DeviceInstanceEvent::Removed);
        Ok(())
    }

    pub fn device(&self, device_id: &str) -> Option<Arc<DeviceInstance>> {
        self.devices.get(device_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Registered ids in sorted order
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    fn instances(&self) -> Vec<Arc<DeviceInstance>> {
        self.devices.iter().map(|e| Arc::clone(e.value())).collect()
    }

    // ------------------------------------------------------------------
    // Per-device operations
    // ------------------------------------------------------------------

    pub async fn start_device(&self, device_id: &str) -> OperationResult {
        let Some(device) = self.device(device_id) else {
            return OperationResult::fail(format!("device '{}' not found", device_id));
        };
        let _guard = self.gate.lock().await;
        let result = OperationResult::from(device.start().await);
        if result.success {
            Self::publish_instance_event(&self.events, &device, DeviceInstanceEvent::Started);
        }
        result
    }

    pub async fn stop_device(&self, device_id: &str) -> OperationResult {
        let Some(device) = self.device(device_id) else {
            return OperationResult::fail(format!("device '{}' not found", device_id));
        };
        let _guard = self.gate.lock().await;
        let result = OperationResult::from(device.stop().await);
        if result.success {
            Self::publish_instance_event(&self.events, &device, DeviceInstanceEvent::Stopped);
        }
        result
    }

    pub async fn initialize_device(&self, device_id: &str) -> InitOutcome {
        match self.device(device_id) {
            Some(device) => device.initialize().await,
            None => InitOutcome {
                success: false,
                message: format!("device '{}' not found", device_id),
                elapsed: std::time::Duration::ZERO,
            },
        }
    }

    pub async fn request_online(&self, device_id: &str) -> OperationResult {
        match self.device(device_id) {
            Some(device) => device.request_online().await,
            None => OperationResult::fail(format!("device '{}' not found", device_id)),
        }
    }

    pub fn request_offline(&self, device_id: &str) -> OperationResult {
        match self.device(device_id) {
            Some(device) => device.request_offline(),
            None => OperationResult::fail(format!("device '{}' not found", device_id)),
        }
    }

    pub async fn start_all(&self) -> BatchResult {
        self.batch(BatchOperation::Start, &self.device_ids(), BatchMode::Parallel)
            .await
    }

    pub async fn stop_all(&self) -> BatchResult {
        self.batch(BatchOperation::Stop, &self.device_ids(), BatchMode::Parallel)
            .await
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    pub fn status(&self, device_id: &str) -> Option<DeviceStatus> {
        self.device(device_id).map(|d| d.status())
    }

    pub fn all_status(&self) -> Vec<DeviceStatus> {
        let mut all: Vec<DeviceStatus> = self.instances().iter().map(|d| d.status()).collect();
        all.sort_by(|a, b| a.state.device_id.cmp(&b.state.device_id));
        all
    }

    pub fn summary(&self) -> CoordinatorSummary {
        let instances = self.instances();
        CoordinatorSummary {
            device_count: instances.len(),
            running: instances.iter().filter(|d| d.is_running()).count(),
            online: instances.iter().filter(|d| d.triad().is_online()).count(),
            active_alarms: instances.iter().map(|d| d.alarms().active_count()).sum(),
            timestamp: Utc::now(),
        }
    }

    // ------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------

    /// One health pass over the running devices. Returns how many were reconnected.
    pub async fn check_health(&self) -> usize {
        let mut reconnected = 0;

        for device in self.instances() {
            if !device.is_running() || device.connection().is_connected() {
                continue;
            }

            if !device.config().auto_reconnect {
                device.record_error("transport disconnected");
                Self::publish_instance_event(&self.events, &device, DeviceInstanceEvent::HealthCheckFailed);
                continue;
            }

            debug!(device = %device.device_id(), "Transport down, reconnecting");
            match device.reconnect().await {
                Ok(()) => {
                    reconnected += 1;
                    Self::publish_instance_event(&self.events, &device, DeviceInstanceEvent::Reconnected);
                }
                Err(e) => {
                    device.record_error(format!("reconnect failed: {}", e));
                    Self::publish_instance_event(
                        &self.events,
                        &device,
                        DeviceInstanceEvent::HealthCheckFailed,
                    );
                }
            }
        }
        reconnected
    }

    /// Spawn the periodic health check; it runs until [`shutdown`](Self::shutdown)
    pub fn start_health_monitor(self: &Arc<Self>) {
        let mut slot = self.health_task.lock();
        if slot.is_some() {
            return;
        }

        let coordinator = Arc::clone(self);
        let cancel = self.shutdown.child_token();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval(coordinator.config.health_check_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let reconnected = coordinator.check_health().await;
                        if reconnected > 0 {
                            info!(reconnected, "Health check reconnected devices");
                        }
                    }
                }
            }
        }));
    }

    /// Stop the health monitor and every device
    pub async fn shutdown(&self) -> BatchResult {
        info!("Coordinator shutting down");
        self.shutdown.cancel();
        let task = self.health_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.stop_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::connection::ConnectionState;
    use crate::controller::MemoryController;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[derive(Default)]
    struct FlakyConnection {
        connected: AtomicBool,
        starts: AtomicUsize,
        fail_start: bool,
        handshakes: Mutex<Vec<oneshot::Sender<()>>>,
    }

    #[async_trait]
    impl ConnectionManager for FlakyConnection {
        async fn start(&self) -> Result<()> {
            if self.fail_start {
                return Err(GemError::Transport("refused".into()));
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn establish_communication(&self, _device_id: &str) -> Result<bool> {
            Ok(true)
        }

        async fn request_online(&self, _device_id: &str) -> Result<u8> {
            Ok(0)
        }

        fn connection_state(&self) -> ConnectionState {
            if self.is_connected() {
                ConnectionState::Selected
            } else {
                ConnectionState::NotConnected
            }
        }

        fn communication_established(&self) -> oneshot::Receiver<()> {
            let (tx, rx) = oneshot::channel();
            self.handshakes.lock().push(tx);
            rx
        }
    }

    struct TestFactory {
        connections: DashMap<String, Arc<FlakyConnection>>,
    }

    #[async_trait]
    impl DeviceDriverFactory for TestFactory {
        async fn create(&self, config: &DeviceConfig) -> Result<DeviceDrivers> {
            let connection = Arc::new(FlakyConnection {
                fail_start: config.device_id == "BAD",
                ..Default::default()
            });
            self.connections
                .insert(config.device_id.clone(), Arc::clone(&connection));
            Ok(DeviceDrivers {
                connection,
                controller: Arc::new(MemoryController::new()),
            })
        }
    }

    fn coordinator() -> (DeviceCoordinator, Arc<TestFactory>) {
        let factory = Arc::new(TestFactory {
            connections: DashMap::new(),
        });
        (
            DeviceCoordinator::new(CoordinatorConfig::default(), factory.clone()),
            factory,
        )
    }

    fn device(id: &str) -> DeviceConfig {
        DeviceConfig::new(id, TransportConfig::new("127.0.0.1", 5000))
    }

    #[tokio::test]
    async fn test_duplicate_device_rejected() {
        let (coordinator, _) = coordinator();
        coordinator.add_device(device("EQ1")).await.unwrap();
        let err = coordinator.add_device(device("EQ1")).await.unwrap_err();
        assert!(matches!(err, GemError::AlreadyExists(_)));
        assert_eq!(coordinator.device_count(), 1);
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let (coordinator, _) = coordinator();
        let mut rx = coordinator.subscribe();
        coordinator.add_device(device("EQ1")).await.unwrap();
        assert!(coordinator.start_device("EQ1").await.success);
        assert!(coordinator.stop_device("EQ1").await.success);
        coordinator.remove_device("EQ1").await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event.new.unwrap_or_default());
        }
        assert_eq!(seen, vec!["Added", "Started", "Stopped", "Removed"]);
        assert!(coordinator.device("EQ1").is_none());
    }

    #[tokio::test]
    async fn test_start_failure_is_recorded() {
        let (coordinator, _) = coordinator();
        coordinator.add_device(device("BAD")).await.unwrap();
        let result = coordinator.start_device("BAD").await;
        assert!(!result.success);

        let status = coordinator.status("BAD").unwrap();
        assert!(!status.running);
        assert_eq!(status.statistics.errors, 1);
        assert!(status.error_message.unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn test_unknown_device_operations_fail() {
        let (coordinator, _) = coordinator();
        assert!(!coordinator.start_device("nope").await.success);
        assert!(!coordinator.request_offline("nope").success);
        assert!(coordinator.remove_device("nope").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_reconnects_dropped_transport() {
        let (coordinator, factory) = coordinator();
        coordinator.add_device(device("EQ1")).await.unwrap();
        coordinator.add_device(device("EQ2")).await.unwrap();
        coordinator.start_device("EQ1").await;
        coordinator.start_device("EQ2").await;

        let conn = factory.connections.get("EQ1").unwrap().clone();
        conn.connected.store(false, Ordering::SeqCst);

        assert_eq!(coordinator.check_health().await, 1);
        assert!(conn.is_connected());
        assert_eq!(conn.starts.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.status("EQ1").unwrap().statistics.reconnects, 1);
        assert_eq!(coordinator.check_health().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_without_auto_reconnect() {
        let (coordinator, factory) = coordinator();
        let mut config = device("EQ1");
        config.auto_reconnect = false;
        coordinator.add_device(config).await.unwrap();
        coordinator.start_device("EQ1").await;

        factory
            .connections
            .get("EQ1")
            .unwrap()
            .connected
            .store(false, Ordering::SeqCst);

        assert_eq!(coordinator.check_health().await, 0);
        let status = coordinator.status("EQ1").unwrap();
        assert_eq!(status.error_message.as_deref(), Some("transport disconnected"));
    }

    #[tokio::test]
    async fn test_summary_counts() {
        let (coordinator, _) = coordinator();
        coordinator.add_device(device("EQ1")).await.unwrap();
        coordinator.add_device(device("EQ2")).await.unwrap();
        coordinator.start_device("EQ2").await;
        coordinator
            .device("EQ1")
            .unwrap()
            .alarms()
            .set_alarm(2004, "timeout");

        let summary = coordinator.summary();
        assert_eq!(summary.device_count, 2);
        assert_eq!(summary.running, 1);
        assert_eq!(summary.online, 0);
        assert_eq!(summary.active_alarms, 1);
    }
}
