// src/init.rs - Device bring-up sequence
//
// One async transition function per step. Steps are public so a caller can
// drive them individually; `initialize` runs them in order behind a
// single-slot gate.

use crate::catalog::DefinitionCatalog;
use crate::config::DeviceConfig;
use crate::connection::ConnectionManager;
use crate::error::{GemError, Result};
use crate::events::{EventBus, EventKind, GemEvent};
use crate::online::{OnlineRequestResult, OnlineRequester, OnlineRetryPolicy};
use crate::state::{ControlState, EquipmentState, StateService};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const CONNECTION_POLL: Duration = Duration::from_millis(100);
const ONLINE_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum InitializationState {
    NotStarted,
    SecsInitializing,
    ProcessInitializing,
    CommunicationEnabling,
    WaitingForConnection,
    WaitingForHandshake,
    WaitingForOnlineRequest,
    InitializingFunctions,
    Completed,
    Failed,
}

impl InitializationState {
    /// Fixed progress percentage; -1 once failed
    pub fn progress(self) -> i32 {
        match self {
            InitializationState::NotStarted => 0,
            InitializationState::SecsInitializing => 10,
            InitializationState::ProcessInitializing => 20,
            InitializationState::CommunicationEnabling => 30,
            InitializationState::WaitingForConnection => 40,
            InitializationState::WaitingForHandshake => 60,
            InitializationState::WaitingForOnlineRequest => 80,
            InitializationState::InitializingFunctions => 90,
            InitializationState::Completed => 100,
            InitializationState::Failed => -1,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, InitializationState::Completed | InitializationState::Failed)
    }
}

impl fmt::Display for InitializationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of one `initialize` call
#[derive(Debug, Clone, Serialize)]
pub struct InitOutcome {
    pub success: bool,
    pub message: String,
    pub elapsed: Duration,
}

impl InitOutcome {
    fn ok(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: true,
            message: message.into(),
            elapsed,
        }
    }

    fn fail(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            message: message.into(),
            elapsed,
        }
    }
}

pub struct Initializer {
    device_id: String,
    config: DeviceConfig,
    connection: Arc<dyn ConnectionManager>,
    state: Arc<dyn StateService>,
    catalog: Arc<DefinitionCatalog>,
    events: EventBus,
    requester: OnlineRequester,
    gate: Semaphore,
    current: RwLock<InitializationState>,
    /// Keeps listening for a host handshake that missed the step 6 window
    handshake_watch: Mutex<Option<JoinHandle<()>>>,
}

impl Initializer {
    pub fn new(
        config: DeviceConfig,
        connection: Arc<dyn ConnectionManager>,
        state: Arc<dyn StateService>,
        catalog: Arc<DefinitionCatalog>,
        events: EventBus,
    ) -> Self {
        let requester = OnlineRequester::new(OnlineRetryPolicy::from(&config.online));
        Self {
            device_id: config.device_id.clone(),
            config,
            connection,
            state,
            catalog,
            events,
            requester,
            gate: Semaphore::new(1),
            current: RwLock::new(InitializationState::NotStarted),
            handshake_watch: Mutex::new(None),
        }
    }

    pub fn state(&self) -> InitializationState {
        *self.current.read()
    }

    pub fn progress(&self) -> i32 {
        self.state().progress()
    }

    fn set_state(&self, new: InitializationState) {
        let old = std::mem::replace(&mut *self.current.write(), new);
        if old == new {
            return;
        }
        debug!(device = %self.device_id, "Initialization {} -> {} ({}%)", old, new, new.progress());
        self.events.publish(
            GemEvent::transition(&self.device_id, EventKind::InitializationProgress, old, new)
                .with_reason(format!("{}%", new.progress())),
        );
    }

    /// Return to NotStarted so the next `initialize` runs every step again.
    /// Refused while a sequence is in progress.
    pub fn reset(&self) -> bool {
        let Ok(_permit) = self.gate.try_acquire() else {
            return false;
        };
        self.stop_handshake_watch();
        self.set_state(InitializationState::NotStarted);
        true
    }

    /// Mark an interrupted sequence Failed. Terminal and untouched states are kept.
    pub fn abandon(&self, reason: &str) {
        self.stop_handshake_watch();
        let state = self.state();
        if state.is_terminal() || state == InitializationState::NotStarted {
            return;
        }
        warn!(device = %self.device_id, "Initialization abandoned in {}: {}", state, reason);
        self.set_state(InitializationState::Failed);
    }

    /// Stop waiting for a late host handshake
    pub fn stop_handshake_watch(&self) {
        if let Some(watch) = self.handshake_watch.lock().take() {
            watch.abort();
        }
    }

    /// Run the full sequence. A concurrent call is rejected, not queued.
    pub async fn initialize(&self, cancel: &CancellationToken) -> InitOutcome {
        if self.state() == InitializationState::Completed {
            return InitOutcome::ok("already initialized", Duration::ZERO);
        }

        let _permit = match self.gate.try_acquire() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(device = %self.device_id, "Initialization already in progress");
                return InitOutcome::fail("initialization already in progress", Duration::ZERO);
            }
        };

        info!(device = %self.device_id, "Starting initialization");
        let started = Instant::now();

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(GemError::Cancelled),
            r = self.run_steps() => r,
        };
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {
                self.set_state(InitializationState::Completed);
                info!(device = %self.device_id, ?elapsed, "Initialization complete");
                self.events.publish(
                    GemEvent::new(&self.device_id, EventKind::InitializationComplete)
                        .with_new(InitializationState::Completed)
                        .with_reason(format!("{} ms", elapsed.as_millis())),
                );
                InitOutcome::ok("initialization complete", elapsed)
            }
            Err(e) => {
                if matches!(e, GemError::Cancelled) {
                    self.stop_handshake_watch();
                }
                self.set_state(InitializationState::Failed);
                error!(device = %self.device_id, "Initialization failed: {}", e);
                InitOutcome::fail(e.to_string(), elapsed)
            }
        }
    }

    async fn run_steps(&self) -> Result<()> {
        self.validate_transport().await?;
        self.prepare_process().await?;
        self.enable_communication().await?;
        self.await_connection().await?;
        self.await_handshake().await?;
        self.await_online_request().await?;
        self.publish_catalogs().await
    }

    /// Step 1: transport parameters must be usable
    pub async fn validate_transport(&self) -> Result<()> {
        self.set_state(InitializationState::SecsInitializing);
        self.config.transport.validate()
    }

    /// Step 2: bring the process machine out of Init
    pub async fn prepare_process(&self) -> Result<()> {
        self.set_state(InitializationState::ProcessInitializing);
        self.state.initialize_process();
        let process = self.state.snapshot().process_state;
        if process == crate::state::ProcessState::Init {
            return Err(GemError::Precondition(
                "process state machine did not leave Init".into(),
            ));
        }
        Ok(())
    }

    /// Steps 3 and 4: equipment must not be failed; control mode is left alone
    pub async fn enable_communication(&self) -> Result<()> {
        self.set_state(InitializationState::CommunicationEnabling);
        let snapshot = self.state.snapshot();
        if snapshot.equipment_state == EquipmentState::UnscheduledDown {
            return Err(GemError::Precondition(
                "equipment is in UnscheduledDown".into(),
            ));
        }
        if snapshot.equipment_state == EquipmentState::Unknown {
            self.state
                .set_equipment_state(EquipmentState::Standby, "communication enabled");
        }
        debug!(
            device = %self.device_id,
            mode = %snapshot.control_mode(),
            "Control mode unchanged during bring-up"
        );
        Ok(())
    }

    /// Step 5: start the transport and wait for a lower-layer connection
    pub async fn await_connection(&self) -> Result<()> {
        self.set_state(InitializationState::WaitingForConnection);
        if self.connection.is_connected() {
            return Ok(());
        }

        if let Err(e) = self.connection.start().await {
            warn!(device = %self.device_id, "Transport start failed, waiting anyway: {}", e);
        }

        let limit = self.config.initialization.connection_timeout();
        let waited = timeout(limit, async {
            while !self.connection.is_connected() {
                sleep(CONNECTION_POLL).await;
            }
        })
        .await;

        match waited {
            Ok(()) => info!(device = %self.device_id, "Transport connected"),
            Err(_) => warn!(
                device = %self.device_id,
                ?limit,
                "No connection yet, continuing; the host may connect later"
            ),
        }
        Ok(())
    }

    /// Step 6: wait for the host-driven communication handshake
    pub async fn await_handshake(&self) -> Result<()> {
        self.set_state(InitializationState::WaitingForHandshake);
        if self.state.snapshot().communication_established {
            return Ok(());
        }

        let limit = self.config.initialization.handshake_timeout();
        let mut registration = self.connection.communication_established();
        match timeout(limit, &mut registration).await {
            Ok(Ok(())) => {
                info!(device = %self.device_id, "Communication handshake complete");
                self.state.set_communication_established(true);
            }
            Ok(Err(_)) => warn!(device = %self.device_id, "Handshake registration dropped"),
            Err(_) => {
                warn!(
                    device = %self.device_id,
                    ?limit,
                    "Handshake not completed, continuing; a later handshake is still accepted"
                );
                let state = Arc::clone(&self.state);
                let device_id = self.device_id.clone();
                let watch = tokio::spawn(async move {
                    if registration.await.is_ok() {
                        info!(device = %device_id, "Late communication handshake complete");
                        state.set_communication_established(true);
                    }
                });
                if let Some(previous) = self.handshake_watch.lock().replace(watch) {
                    previous.abort();
                }
            }
        }
        Ok(())
    }

    /// Step 7: wait for the host to bring the device online, or ask for it
    pub async fn await_online_request(&self) -> Result<()> {
        self.set_state(InitializationState::WaitingForOnlineRequest);

        if self.config.initialization.request_online_on_startup {
            let result = self.request_online().await;
            if !result.success {
                warn!(device = %self.device_id, "Startup online request failed: {}", result.message);
            }
            return Ok(());
        }

        let limit = self.config.initialization.online_request_timeout();
        let waited = timeout(limit, async {
            while !self.state.snapshot().control_state.is_online() {
                sleep(ONLINE_POLL).await;
            }
        })
        .await;

        if waited.is_err() {
            info!(
                device = %self.device_id,
                "No online request from host, staying offline"
            );
        }
        Ok(())
    }

    /// Run the retry protocol and drive the control machine through the attempt
    ///
    /// Success means the control state ended online, not merely that the
    /// host acknowledged.
    pub async fn request_online(&self) -> OnlineRequestResult {
        let remote = self.config.initialization.remote_on_startup;
        if self.state.snapshot().control_state == ControlState::HostOffline {
            // a previous refusal left the host in charge; ask again from EquipmentOffline
            self.state.request_offline();
        }
        let mut attempting = self.state.begin_online_attempt();

        let mut result = self
            .requester
            .request(self.connection.as_ref(), &self.device_id)
            .await;

        if result.success && !attempting {
            self.state.set_communication_established(true);
            attempting = self.state.begin_online_attempt();
        }
        if attempting {
            self.state.complete_online_attempt(result.success, remote);
        }

        let control = self.state.snapshot().control_state;
        if result.success && !control.is_online() {
            result.success = false;
            result.message = format!(
                "host accepted online but control state is {}",
                control
            );
            warn!(device = %self.device_id, "{}", result.message);
        }
        result
    }

    /// Step 8: report the catalogs the host can query
    pub async fn publish_catalogs(&self) -> Result<()> {
        self.set_state(InitializationState::InitializingFunctions);
        let summary = self.catalog.summary();
        info!(
            device = %self.device_id,
            status_variables = summary.status_variables,
            events = summary.events,
            alarms = summary.alarms,
            equipment_constants = summary.equipment_constants,
            "Catalogs ready"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::connection::{ConnectionState, MockConnectionManager};
    use crate::state::{ProcessState, StateSnapshot, StateTriad, StubStateService};
    use tokio::sync::oneshot;

    fn device_config() -> DeviceConfig {
        DeviceConfig::new("EQ1", TransportConfig::new("127.0.0.1", 5000))
    }

    fn initializer(
        config: DeviceConfig,
        conn: MockConnectionManager,
    ) -> (Initializer, Arc<StateTriad>, EventBus) {
        let events = EventBus::new();
        let triad = Arc::new(StateTriad::new("EQ1", events.clone()));
        let init = Initializer::new(
            config,
            Arc::new(conn),
            triad.clone(),
            Arc::new(DefinitionCatalog::standard()),
            events.clone(),
        );
        (init, triad, events)
    }

    fn stub_initializer(snapshot: StateSnapshot, conn: MockConnectionManager) -> Initializer {
        Initializer::new(
            device_config(),
            Arc::new(conn),
            Arc::new(StubStateService::with_snapshot("EQ1", snapshot)),
            Arc::new(DefinitionCatalog::standard()),
            EventBus::new(),
        )
    }

    fn handshake_conn() -> MockConnectionManager {
        let mut conn = MockConnectionManager::new();
        conn.expect_is_connected().return_const(true);
        conn.expect_communication_established().returning(|| {
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(());
            rx
        });
        conn
    }

    #[test]
    fn test_progress_table() {
        assert_eq!(InitializationState::NotStarted.progress(), 0);
        assert_eq!(InitializationState::WaitingForHandshake.progress(), 60);
        assert_eq!(InitializationState::Completed.progress(), 100);
        assert_eq!(InitializationState::Failed.progress(), -1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_passive_bring_up_stays_offline() {
        let (init, triad, _) = initializer(device_config(), handshake_conn());

        let outcome = init.initialize(&CancellationToken::new()).await;
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(init.state(), InitializationState::Completed);

        let snapshot = triad.snapshot();
        assert!(snapshot.communication_established);
        assert_eq!(snapshot.process_state, ProcessState::Idle);
        assert_eq!(snapshot.equipment_state, EquipmentState::Standby);
        assert_eq!(snapshot.control_state, ControlState::EquipmentOffline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_initializer_returns_immediately() {
        let (init, _, _) = initializer(device_config(), handshake_conn());
        let cancel = CancellationToken::new();
        assert!(init.initialize(&cancel).await.success);

        let again = init.initialize(&cancel).await;
        assert!(again.success);
        assert_eq!(again.elapsed, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_transport_fails() {
        let mut config = device_config();
        config.transport.host.clear();
        let (init, _, _) = initializer(config, MockConnectionManager::new());

        let outcome = init.initialize(&CancellationToken::new()).await;
        assert!(!outcome.success);
        assert_eq!(init.state(), InitializationState::Failed);
        assert_eq!(init.progress(), -1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_equipment_blocks_bring_up() {
        let (init, triad, _) = initializer(device_config(), MockConnectionManager::new());
        triad.report_equipment_failure("interlock");

        let outcome = init.initialize(&CancellationToken::new()).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("UnscheduledDown"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_online_request() {
        let mut config = device_config();
        config.initialization.request_online_on_startup = true;

        let mut conn = handshake_conn();
        conn.expect_connection_state()
            .return_const(ConnectionState::Selected);
        conn.expect_request_online().times(1).returning(|_| Ok(0));
        let (init, triad, _) = initializer(config, conn);

        assert!(init.initialize(&CancellationToken::new()).await.success);
        assert_eq!(triad.control_state(), ControlState::OnlineRemote);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_marks_failed() {
        let mut conn = MockConnectionManager::new();
        conn.expect_is_connected().return_const(false);
        conn.expect_start().returning(|| Ok(()));
        let (init, _, _) = initializer(device_config(), conn);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = init.initialize(&cancel).await;
        assert!(!outcome.success);
        assert_eq!(init.state(), InitializationState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_events_published() {
        let (init, _, events) = initializer(device_config(), handshake_conn());
        let mut rx = events.subscribe();
        init.initialize(&CancellationToken::new()).await;

        let mut progress = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if event.kind == EventKind::InitializationProgress {
                progress.push(event.new.unwrap_or_default());
            }
        }
        assert_eq!(progress.first().map(String::as_str), Some("SecsInitializing"));
        assert_eq!(progress.last().map(String::as_str), Some("Completed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stub_service_stuck_in_init_fails() {
        let init = stub_initializer(StateSnapshot::default(), MockConnectionManager::new());

        let outcome = init.initialize(&CancellationToken::new()).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("did not leave Init"), "{}", outcome.message);
        assert_eq!(init.state(), InitializationState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stub_service_reporting_failure_fails() {
        let snapshot = StateSnapshot {
            process_state: ProcessState::Idle,
            equipment_state: EquipmentState::UnscheduledDown,
            ..StateSnapshot::default()
        };
        let init = stub_initializer(snapshot, MockConnectionManager::new());

        let outcome = init.initialize(&CancellationToken::new()).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("UnscheduledDown"), "{}", outcome.message);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stub_service_ready_snapshot_completes() {
        let snapshot = StateSnapshot {
            process_state: ProcessState::Idle,
            equipment_state: EquipmentState::Standby,
            communication_established: true,
            ..StateSnapshot::default()
        };
        let init = stub_initializer(snapshot, handshake_conn());

        let outcome = init.initialize(&CancellationToken::new()).await;
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(init.state(), InitializationState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_request_on_refusing_service_is_not_success() {
        let snapshot = StateSnapshot {
            process_state: ProcessState::Idle,
            equipment_state: EquipmentState::Standby,
            communication_established: true,
            ..StateSnapshot::default()
        };
        let mut conn = MockConnectionManager::new();
        conn.expect_connection_state()
            .return_const(ConnectionState::Selected);
        conn.expect_request_online().times(1).returning(|_| Ok(0));
        let init = stub_initializer(snapshot, conn);

        let result = init.request_online().await;
        assert!(!result.success);
        assert!(result.message.contains("EquipmentOffline"), "{}", result.message);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_reruns_every_step() {
        let (init, triad, _) = initializer(device_config(), handshake_conn());
        let cancel = CancellationToken::new();
        assert!(init.initialize(&cancel).await.success);

        triad.set_communication_established(false);
        assert!(init.reset());
        assert_eq!(init.state(), InitializationState::NotStarted);

        assert!(init.initialize(&cancel).await.success);
        assert!(triad.communication_established());
    }

    #[test]
    fn test_abandon_keeps_terminal_states() {
        let (init, _, _) = initializer(device_config(), MockConnectionManager::new());
        init.abandon("stopped");
        assert_eq!(init.state(), InitializationState::NotStarted);

        init.set_state(InitializationState::WaitingForHandshake);
        init.abandon("stopped");
        assert_eq!(init.state(), InitializationState::Failed);
    }
}
