use crate::alarm::AlarmManager;
use crate::catalog::DefinitionCatalog;
use crate::config::DeviceConfig;
use crate::connection::ConnectionManager;
use crate::controller::{ControllerDataProvider, EventCallback};
use crate::error::{GemError, OperationResult, Result};
use crate::events::{EventBus, EventKind, GemEvent};
use crate::init::{InitOutcome, InitializationState, Initializer};
use crate::state::{StateTriad, StatusInfo};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long `stop` lets the bring-up task observe cancellation
const INITIALIZER_STOP_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle notifications for a device inside the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceInstanceEvent {
    Added,
    Removed,
    Started,
    Stopped,
    Reconnected,
    HealthCheckFailed,
}

impl fmt::Display for DeviceInstanceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per-device counters, updated without locks
#[derive(Debug, Default)]
pub struct DeviceStatistics {
    initializations: AtomicU64,
    online_requests: AtomicU64,
    reconnects: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceStatsSnapshot {
    pub initializations: u64,
    pub online_requests: u64,
    pub reconnects: u64,
    pub errors: u64,
}

impl DeviceStatistics {
    pub fn snapshot(&self) -> DeviceStatsSnapshot {
        DeviceStatsSnapshot {
            initializations: self.initializations.load(Ordering::Relaxed),
            online_requests: self.online_requests.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Full per-device status as reported by the coordinator
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub name: String,
    pub running: bool,
    pub state: StatusInfo,
    pub initialization: InitializationState,
    pub initialization_progress: i32,
    pub statistics: DeviceStatsSnapshot,
    pub last_update: DateTime<Utc>,
    pub error_message: Option<String>,
}

/// One configured equipment instance and everything it owns
pub struct DeviceInstance {
    config: DeviceConfig,
    catalog: Arc<DefinitionCatalog>,
    triad: Arc<StateTriad>,
    alarms: Arc<AlarmManager>,
    connection: Arc<dyn ConnectionManager>,
    controller: Arc<dyn ControllerDataProvider>,
    initializer: Initializer,
    events: EventBus,
    stats: DeviceStatistics,
    running: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    init_task: Mutex<Option<JoinHandle<()>>>,
    last_update: RwLock<DateTime<Utc>>,
    error_message: RwLock<Option<String>>,
}

impl DeviceInstance {
    pub fn new(
        config: DeviceConfig,
        connection: Arc<dyn ConnectionManager>,
        controller: Arc<dyn ControllerDataProvider>,
        catalog: Arc<DefinitionCatalog>,
    ) -> Arc<Self> {
        let events = EventBus::new();
        let triad = Arc::new(StateTriad::new(config.device_id.clone(), events.clone()));
        let alarms = Arc::new(AlarmManager::new(
            config.device_id.clone(),
            config.alarms.clone(),
            Arc::clone(&catalog),
            Arc::clone(&controller),
            events.clone(),
        ));

        triad.attach_alarm_counter(alarms.clone());
        let weak_triad = Arc::downgrade(&triad);
        alarms.set_critical_hook(Arc::new(move |record| {
            if let Some(triad) = weak_triad.upgrade() {
                triad.report_equipment_failure(&format!(
                    "critical alarm {}: {}",
                    record.id, record.text
                ));
            }
        }));

        let initializer = Initializer::new(
            config.clone(),
            Arc::clone(&connection),
            triad.clone(),
            Arc::clone(&catalog),
            events.clone(),
        );

        Arc::new(Self {
            config,
            catalog,
            triad,
            alarms,
            connection,
            controller,
            initializer,
            events,
            stats: DeviceStatistics::default(),
            running: AtomicBool::new(false),
            cancel: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            init_task: Mutex::new(None),
            last_update: RwLock::new(Utc::now()),
            error_message: RwLock::new(None),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.config.device_id
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn triad(&self) -> &Arc<StateTriad> {
        &self.triad
    }

    pub fn alarms(&self) -> &Arc<AlarmManager> {
        &self.alarms
    }

    pub fn connection(&self) -> &Arc<dyn ConnectionManager> {
        &self.connection
    }

    pub fn controller(&self) -> &Arc<dyn ControllerDataProvider> {
        &self.controller
    }

    pub fn initializer(&self) -> &Initializer {
        &self.initializer
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn statistics(&self) -> DeviceStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn error_message(&self) -> Option<String> {
        self.error_message.read().clone()
    }

    fn touch(&self) {
        *self.last_update.write() = Utc::now();
    }

    pub(crate) fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(device = %self.device_id(), "{}", message);
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
        *self.error_message.write() = Some(message);
        self.touch();
    }

    pub fn status(&self) -> DeviceStatus {
        let init = self.initializer.state();
        DeviceStatus {
            name: self.config.display_name().to_string(),
            running: self.is_running(),
            state: self.triad.status_info(),
            initialization: init,
            initialization_progress: init.progress(),
            statistics: self.stats.snapshot(),
            last_update: *self.last_update.read(),
            error_message: self.error_message(),
        }
    }

    /// Start the transport, alarm polling and collection-event monitoring,
    /// then run the bring-up sequence in the background.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(GemError::Precondition(format!(
                "device '{}' is already running",
                self.device_id()
            )));
        }

        if let Err(e) = self.connection.start().await {
            self.running.store(false, Ordering::SeqCst);
            self.record_error(format!("transport start failed: {}", e));
            return Err(e);
        }

        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(2);
        tasks.push(tokio::spawn(
            Arc::clone(&self.alarms).run(cancel.child_token()),
        ));

        let events = self.events.clone();
        let device_id = self.device_id().to_string();
        let callback: EventCallback = Arc::new(move |ceid, value| {
            events.publish(
                GemEvent::new(&device_id, EventKind::CollectionEvent)
                    .with_new(ceid)
                    .with_reason(value.to_string()),
            );
        });
        if let Err(e) = self
            .controller
            .monitor_events(self.catalog.event_sources(), callback)
            .await
        {
            warn!(device = %self.device_id(), "Collection event monitoring unavailable: {}", e);
        }

        if !self.initializer.reset() {
            warn!(device = %self.device_id(), "Bring-up already in progress, not restarted");
        }
        let me = Arc::clone(self);
        let token = cancel.clone();
        let init_task = tokio::spawn(async move {
            me.run_initializer(&token).await;
        });

        *self.cancel.lock() = Some(cancel);
        self.tasks.lock().extend(tasks);
        *self.init_task.lock() = Some(init_task);
        self.touch();
        info!(device = %self.device_id(), "Device started");
        Ok(())
    }

    /// Cancel background work, go offline and stop the transport
    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let cancel = self.cancel.lock().take();
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }

        // the bring-up task records Failed itself once it sees the cancellation
        let init_task = self.init_task.lock().take();
        if let Some(mut task) = init_task {
            if timeout(INITIALIZER_STOP_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
        self.initializer.abandon("device stopped");

        self.triad.request_offline();
        self.triad.set_communication_established(false);
        self.touch();

        self.connection.stop().await?;
        info!(device = %self.device_id(), "Device stopped");
        Ok(())
    }

    async fn run_initializer(&self, cancel: &CancellationToken) -> InitOutcome {
        self.stats.initializations.fetch_add(1, Ordering::Relaxed);
        let outcome = self.initializer.initialize(cancel).await;
        if !outcome.success {
            self.record_error(format!("initialization failed: {}", outcome.message));
        }
        self.touch();
        outcome
    }

    /// Run the bring-up sequence in the caller's task
    pub async fn initialize(&self) -> InitOutcome {
        let cancel = self.cancel.lock().clone().unwrap_or_default();
        self.run_initializer(&cancel).await
    }

    /// Ask the host to bring the device online using the retry protocol
    pub async fn request_online(&self) -> OperationResult {
        self.stats.online_requests.fetch_add(1, Ordering::Relaxed);
        let result = self.initializer.request_online().await;
        self.touch();
        if result.success {
            OperationResult::ok(result.message)
        } else {
            self.record_error(result.message.clone());
            OperationResult::fail(result.message)
        }
    }

    pub fn request_offline(&self) -> OperationResult {
        self.triad.request_offline();
        self.touch();
        OperationResult::ok("offline")
    }

    /// Drop the session and restart the transport. Communication is marked
    /// lost until the host completes a new handshake.
    pub async fn reconnect(self: &Arc<Self>) -> Result<()> {
        self.triad.set_communication_established(false);
        if let Err(e) = self.connection.stop().await {
            warn!(device = %self.device_id(), "Transport stop before reconnect failed: {}", e);
        }
        self.connection.start().await?;
        self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
        self.touch();

        let me = Arc::clone(self);
        let watcher = tokio::spawn(async move {
            let limit = me.config.initialization.handshake_timeout();
            if let Ok(Ok(())) = timeout(limit, me.connection.communication_established()).await {
                me.triad.set_communication_established(true);
            }
        });
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(watcher);
        drop(tasks);

        info!(device = %self.device_id(), "Device reconnected");
        Ok(())
    }
}

impl fmt::Debug for DeviceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceInstance")
            .field("device_id", &self.config.device_id)
            .field("running", &self.is_running())
            .finish()
    }
}
