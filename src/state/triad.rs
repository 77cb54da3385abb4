use super::history::{StateHistory, StateHistoryEntry, StateType, STATE_HISTORY_CAPACITY};
use super::{
    AlarmCounter, ControlMode, ControlState, EquipmentState, ProcessState, StateService,
    StateSnapshot, StatusInfo,
};
use crate::events::{EventBus, EventKind, GemEvent};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

type Rejection = std::result::Result<(), String>;

struct TriadInner {
    control: ControlState,
    process: ProcessState,
    equipment: EquipmentState,
    communication_established: bool,
    history: StateHistory,
}

impl TriadInner {
    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            control_state: self.control,
            process_state: self.process,
            equipment_state: self.equipment,
            communication_established: self.communication_established,
        }
    }

    fn set_control(
        &mut self,
        device_id: &str,
        new: ControlState,
        reason: &str,
        out: &mut Vec<GemEvent>,
    ) {
        let old = self.control;
        if old == new {
            return;
        }
        self.control = new;
        self.history.record(StateType::Control, old, new, Some(reason));
        out.push(GemEvent::transition(device_id, EventKind::StateChanged, old, new).with_reason(reason));
        if old.mode() != new.mode() {
            out.push(
                GemEvent::transition(device_id, EventKind::ControlModeChanged, old.mode(), new.mode())
                    .with_reason(reason),
            );
        }
    }

    fn set_process(
        &mut self,
        device_id: &str,
        new: ProcessState,
        reason: &str,
        out: &mut Vec<GemEvent>,
    ) {
        let old = self.process;
        if old == new {
            return;
        }
        self.process = new;
        self.history.record(StateType::Process, old, new, Some(reason));
        out.push(
            GemEvent::transition(device_id, EventKind::ProcessStateChanged, old, new).with_reason(reason),
        );
    }

    fn set_equipment(
        &mut self,
        device_id: &str,
        new: EquipmentState,
        reason: &str,
        out: &mut Vec<GemEvent>,
    ) {
        let old = self.equipment;
        if old == new {
            return;
        }
        self.equipment = new;
        self.history.record(StateType::Equipment, old, new, Some(reason));
        out.push(
            GemEvent::transition(device_id, EventKind::EquipmentStateChanged, old, new)
                .with_reason(reason),
        );
    }

    /// Productive while a run is active, back to Standby when it ends
    fn end_run(&mut self, device_id: &str, out: &mut Vec<GemEvent>) {
        if self.equipment == EquipmentState::Productive {
            self.set_equipment(device_id, EquipmentState::Standby, "run ended", out);
        }
    }
}

/// The control/process/equipment state machines of one device.
///
/// Writers hold the lock only for the in-memory transition. Logging and
/// event publication happen after the guard is released.
pub struct StateTriad {
    device_id: String,
    inner: RwLock<TriadInner>,
    events: EventBus,
    alarm_counter: RwLock<Option<Arc<dyn AlarmCounter>>>,
}

impl StateTriad {
    pub fn new(device_id: impl Into<String>, events: EventBus) -> Self {
        Self::with_history_capacity(device_id, events, STATE_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(
        device_id: impl Into<String>,
        events: EventBus,
        capacity: usize,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            inner: RwLock::new(TriadInner {
                control: ControlState::EquipmentOffline,
                process: ProcessState::Init,
                equipment: EquipmentState::Unknown,
                communication_established: false,
                history: StateHistory::with_capacity(capacity),
            }),
            events,
            alarm_counter: RwLock::new(None),
        }
    }

    /// Attach the alarm manager whose active count is reported in status snapshots
    pub fn attach_alarm_counter(&self, counter: Arc<dyn AlarmCounter>) {
        *self.alarm_counter.write() = Some(counter);
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // ------------------------------------------------------------------
    // Read accessors
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> StateSnapshot {
        self.inner.read().snapshot()
    }

    pub fn control_state(&self) -> ControlState {
        self.inner.read().control
    }

    pub fn control_mode(&self) -> ControlMode {
        self.inner.read().control.mode()
    }

    pub fn process_state(&self) -> ProcessState {
        self.inner.read().process
    }

    pub fn equipment_state(&self) -> EquipmentState {
        self.inner.read().equipment
    }

    pub fn communication_established(&self) -> bool {
        self.inner.read().communication_established
    }

    pub fn is_online(&self) -> bool {
        self.inner.read().control.is_online()
    }

    pub fn status_info(&self) -> StatusInfo {
        let snapshot = self.snapshot();
        let alarms = self
            .alarm_counter
            .read()
            .as_ref()
            .map(|c| c.active_alarm_count())
            .unwrap_or(0);
        StatusInfo::from_snapshot(&self.device_id, snapshot, alarms)
    }

    /// Newest `limit` transitions, oldest first
    pub fn history(&self, limit: usize) -> Vec<StateHistoryEntry> {
        self.inner.read().history.recent(limit)
    }

    // ------------------------------------------------------------------
    // Transaction plumbing
    // ------------------------------------------------------------------

    fn transact<F>(&self, operation: &str, f: F) -> bool
    where
        F: FnOnce(&mut TriadInner, &str, &mut Vec<GemEvent>) -> Rejection,
    {
        let mut events = Vec::new();
        let outcome = {
            let mut inner = self.inner.write();
            f(&mut inner, &self.device_id, &mut events)
        };

        match outcome {
            Ok(()) => {
                for event in events {
                    info!(
                        device = %self.device_id,
                        "{:?}: {} -> {}",
                        event.kind,
                        event.old.as_deref().unwrap_or("-"),
                        event.new.as_deref().unwrap_or("-")
                    );
                    self.events.publish(event);
                }
                true
            }
            Err(why) => {
                warn!(device = %self.device_id, "{} rejected: {}", operation, why);
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Control state
    // ------------------------------------------------------------------

    /// EquipmentOffline → Online{Remote|Local}; requires established communication.
    pub fn request_online(&self, remote: bool) -> bool {
        self.transact("request_online", |inner, id, out| {
            if inner.control != ControlState::EquipmentOffline {
                return Err(format!("control state is {}", inner.control));
            }
            if !inner.communication_established {
                return Err("communication not established".into());
            }
            inner.set_control(id, ControlState::online(remote), "online requested", out);
            Ok(())
        })
    }

    /// Any state → EquipmentOffline. Idempotent.
    pub fn request_offline(&self) -> bool {
        self.transact("request_offline", |inner, id, out| {
            inner.set_control(id, ControlState::EquipmentOffline, "offline requested", out);
            Ok(())
        })
    }

    /// OnlineLocal ⇄ OnlineRemote
    pub fn switch_control_mode(&self, remote: bool) -> bool {
        self.transact("switch_control_mode", |inner, id, out| {
            if !inner.control.is_online() {
                return Err(format!("control state is {}", inner.control));
            }
            inner.set_control(id, ControlState::online(remote), "control mode switched", out);
            Ok(())
        })
    }

    /// Set the communication flag. Clearing it while not offline is the
    /// CommunicationLost transition and forces EquipmentOffline in the same call.
    pub fn set_communication_established(&self, established: bool) {
        self.transact("set_communication_established", |inner, id, out| {
            let old = inner.communication_established;
            if old != established {
                inner.communication_established = established;
                inner
                    .history
                    .record(StateType::Communication, old, established, None);
            }
            if !established && inner.control != ControlState::EquipmentOffline {
                inner.set_control(id, ControlState::EquipmentOffline, "communication lost", out);
            }
            Ok(())
        });
    }

    /// EquipmentOffline → AttemptOnline while the equipment asks the host
    pub fn begin_online_attempt(&self) -> bool {
        self.transact("begin_online_attempt", |inner, id, out| {
            if inner.control != ControlState::EquipmentOffline {
                return Err(format!("control state is {}", inner.control));
            }
            if !inner.communication_established {
                return Err("communication not established".into());
            }
            inner.set_control(id, ControlState::AttemptOnline, "online attempt", out);
            Ok(())
        })
    }

    /// AttemptOnline → Online* when the host accepted, HostOffline otherwise
    pub fn complete_online_attempt(&self, accepted: bool, remote: bool) -> bool {
        self.transact("complete_online_attempt", |inner, id, out| {
            if inner.control != ControlState::AttemptOnline {
                return Err(format!("control state is {}", inner.control));
            }
            if accepted {
                inner.set_control(id, ControlState::online(remote), "host accepted online", out);
            } else {
                inner.set_control(id, ControlState::HostOffline, "host refused online", out);
            }
            Ok(())
        })
    }

    /// Online* → HostOffline on a host offline request
    pub fn host_offline(&self) -> bool {
        self.transact("host_offline", |inner, id, out| {
            if !inner.control.is_online() {
                return Err(format!("control state is {}", inner.control));
            }
            inner.set_control(id, ControlState::HostOffline, "host requested offline", out);
            Ok(())
        })
    }

    /// HostOffline → Online* on a host online request
    pub fn host_online(&self, remote: bool) -> bool {
        self.transact("host_online", |inner, id, out| {
            if inner.control != ControlState::HostOffline {
                return Err(format!("control state is {}", inner.control));
            }
            if !inner.communication_established {
                return Err("communication not established".into());
            }
            inner.set_control(id, ControlState::online(remote), "host requested online", out);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Process state
    // ------------------------------------------------------------------

    /// Init → Idle. Succeeds without a transition once out of Init.
    pub fn initialize_process(&self) -> bool {
        self.transact("initialize_process", |inner, id, out| {
            if inner.process == ProcessState::Init {
                inner.set_process(id, ProcessState::Idle, "process initialized", out);
            }
            Ok(())
        })
    }

    /// Idle → Setup (recipe selected)
    pub fn setup_process(&self) -> bool {
        self.transact("setup_process", |inner, id, out| {
            if inner.process != ProcessState::Idle {
                return Err(format!("process state is {}", inner.process));
            }
            inner.set_process(id, ProcessState::Setup, "setup", out);
            Ok(())
        })
    }

    /// {Idle, Setup} → Executing; equipment Standby → Productive
    pub fn start_process(&self) -> bool {
        self.transact("start_process", |inner, id, out| {
            if !inner.process.can_start() {
                return Err(format!("process state is {}", inner.process));
            }
            if inner.equipment.is_down() {
                return Err(format!("equipment state is {}", inner.equipment));
            }
            inner.set_process(id, ProcessState::Executing, "start", out);
            if inner.equipment == EquipmentState::Standby {
                inner.set_equipment(id, EquipmentState::Productive, "run started", out);
            }
            Ok(())
        })
    }

    /// Executing → Pause
    pub fn pause_process(&self) -> bool {
        self.transact("pause_process", |inner, id, out| {
            if !inner.process.can_pause() {
                return Err(format!("process state is {}", inner.process));
            }
            inner.set_process(id, ProcessState::Pause, "pause", out);
            Ok(())
        })
    }

    /// {Pause, Paused} → Executing
    pub fn resume_process(&self) -> bool {
        self.transact("resume_process", |inner, id, out| {
            if !inner.process.can_resume() {
                return Err(format!("process state is {}", inner.process));
            }
            inner.set_process(id, ProcessState::Executing, "resume", out);
            Ok(())
        })
    }

    /// {Executing, Pause, Paused} → Stopping
    pub fn stop_process(&self) -> bool {
        self.transact("stop_process", |inner, id, out| {
            if !inner.process.can_stop() {
                return Err(format!("process state is {}", inner.process));
            }
            inner.set_process(id, ProcessState::Stopping, "stop", out);
            Ok(())
        })
    }

    /// {Setup, Executing, Pause, Paused, Stopping} → Aborting
    pub fn abort_process(&self) -> bool {
        self.transact("abort_process", |inner, id, out| {
            if !inner.process.can_abort() {
                return Err(format!("process state is {}", inner.process));
            }
            inner.set_process(id, ProcessState::Aborting, "abort", out);
            Ok(())
        })
    }

    /// Settle a transitional state once the controller confirms it:
    /// Pause → Paused, Stopping/Executing → Completed, Aborting → Aborted.
    pub fn complete_process_transition(&self) -> bool {
        self.transact("complete_process_transition", |inner, id, out| {
            let target = inner
                .process
                .settled()
                .ok_or_else(|| format!("process state {} has nothing to settle", inner.process))?;
            inner.set_process(id, target, "controller confirmed", out);
            if target.is_finished() {
                inner.end_run(id, out);
            }
            Ok(())
        })
    }

    /// {Completed, Aborted} → Idle
    pub fn reset_process(&self) -> bool {
        self.transact("reset_process", |inner, id, out| {
            if !inner.process.can_reset() {
                return Err(format!("process state is {}", inner.process));
            }
            inner.set_process(id, ProcessState::Idle, "reset", out);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Equipment state
    // ------------------------------------------------------------------

    pub fn set_equipment_state(&self, target: EquipmentState, reason: &str) -> bool {
        self.transact("set_equipment_state", |inner, id, out| {
            if inner.equipment == target {
                return Ok(());
            }
            if !inner.equipment.can_transition_to(target) {
                return Err(format!("{} -> {} not allowed", inner.equipment, target));
            }
            inner.set_equipment(id, target, reason, out);
            Ok(())
        })
    }

    /// Any → UnscheduledDown. A running process is aborted along with it.
    pub fn report_equipment_failure(&self, reason: &str) -> bool {
        self.transact("report_equipment_failure", |inner, id, out| {
            inner.set_equipment(id, EquipmentState::UnscheduledDown, reason, out);
            if inner.process.can_abort() {
                inner.set_process(id, ProcessState::Aborting, reason, out);
            }
            Ok(())
        })
    }

    /// Down → Standby after repair or completed maintenance
    pub fn report_equipment_repaired(&self) -> bool {
        self.transact("report_equipment_repaired", |inner, id, out| {
            if !inner.equipment.is_down() {
                return Err(format!("equipment state is {}", inner.equipment));
            }
            inner.set_equipment(id, EquipmentState::Standby, "repaired", out);
            Ok(())
        })
    }
}

impl StateService for StateTriad {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn snapshot(&self) -> StateSnapshot {
        StateTriad::snapshot(self)
    }

    fn status_info(&self) -> StatusInfo {
        StateTriad::status_info(self)
    }

    fn request_online(&self, remote: bool) -> bool {
        StateTriad::request_online(self, remote)
    }

    fn request_offline(&self) -> bool {
        StateTriad::request_offline(self)
    }

    fn switch_control_mode(&self, remote: bool) -> bool {
        StateTriad::switch_control_mode(self, remote)
    }

    fn set_communication_established(&self, established: bool) {
        StateTriad::set_communication_established(self, established)
    }

    fn begin_online_attempt(&self) -> bool {
        StateTriad::begin_online_attempt(self)
    }

    fn complete_online_attempt(&self, accepted: bool, remote: bool) -> bool {
        StateTriad::complete_online_attempt(self, accepted, remote)
    }

    fn initialize_process(&self) -> bool {
        StateTriad::initialize_process(self)
    }

    fn start_process(&self) -> bool {
        StateTriad::start_process(self)
    }

    fn pause_process(&self) -> bool {
        StateTriad::pause_process(self)
    }

    fn resume_process(&self) -> bool {
        StateTriad::resume_process(self)
    }

    fn stop_process(&self) -> bool {
        StateTriad::stop_process(self)
    }

    fn abort_process(&self) -> bool {
        StateTriad::abort_process(self)
    }

    fn reset_process(&self) -> bool {
        StateTriad::reset_process(self)
    }

    fn set_equipment_state(&self, target: EquipmentState, reason: &str) -> bool {
        StateTriad::set_equipment_state(self, target, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triad() -> StateTriad {
        StateTriad::new("EQ1", EventBus::new())
    }

    fn online_triad(remote: bool) -> StateTriad {
        let t = triad();
        t.set_communication_established(true);
        assert!(t.request_online(remote));
        t
    }

    /// Drive the process machine into `target` through legal transitions
    fn drive_to(t: &StateTriad, target: ProcessState) {
        use ProcessState::*;
        t.initialize_process();
        t.set_equipment_state(EquipmentState::Standby, "test");
        match target {
            Init => unreachable!(),
            Idle => {}
            Setup => assert!(t.setup_process()),
            Executing => assert!(t.start_process()),
            Pause => {
                t.start_process();
                assert!(t.pause_process());
            }
            Paused => {
                t.start_process();
                t.pause_process();
                assert!(t.complete_process_transition());
            }
            Stopping => {
                t.start_process();
                assert!(t.stop_process());
            }
            Aborting => {
                t.start_process();
                assert!(t.abort_process());
            }
            Completed => {
                t.start_process();
                assert!(t.complete_process_transition());
            }
            Aborted => {
                t.start_process();
                t.abort_process();
                assert!(t.complete_process_transition());
            }
        }
        assert_eq!(t.process_state(), target);
    }

    #[test]
    fn test_online_requires_communication() {
        let t = triad();
        assert!(!t.request_online(true));
        assert_eq!(t.control_state(), ControlState::EquipmentOffline);
        assert!(t.history(10).is_empty());

        t.set_communication_established(true);
        assert!(t.request_online(true));
        assert_eq!(t.control_state(), ControlState::OnlineRemote);
        assert_eq!(t.control_mode(), ControlMode::Remote);
    }

    #[test]
    fn test_online_rejected_when_already_online() {
        let t = online_triad(false);
        assert!(!t.request_online(true));
        assert_eq!(t.control_state(), ControlState::OnlineLocal);
    }

    #[test]
    fn test_offline_is_idempotent() {
        let t = online_triad(true);
        assert!(t.request_offline());
        let entries = t.history(100).len();
        assert!(t.request_offline());
        assert_eq!(t.history(100).len(), entries);
        assert_eq!(t.control_mode(), ControlMode::Offline);
    }

    #[test]
    fn test_switch_mode_only_when_online() {
        let t = triad();
        assert!(!t.switch_control_mode(true));
        let t = online_triad(false);
        assert!(t.switch_control_mode(true));
        assert_eq!(t.control_state(), ControlState::OnlineRemote);
        assert!(t.switch_control_mode(true));
    }

    #[test]
    fn test_communication_lost_forces_offline() {
        let t = online_triad(true);
        t.set_communication_established(false);
        assert_eq!(t.control_state(), ControlState::EquipmentOffline);
        assert_eq!(t.control_mode(), ControlMode::Offline);
        assert!(!t.communication_established());
    }

    #[test]
    fn test_online_attempt_paths() {
        let t = triad();
        assert!(!t.begin_online_attempt());
        t.set_communication_established(true);
        assert!(t.begin_online_attempt());
        assert_eq!(t.control_mode(), ControlMode::Offline);
        assert!(t.complete_online_attempt(false, true));
        assert_eq!(t.control_state(), ControlState::HostOffline);
        assert!(t.host_online(false));
        assert_eq!(t.control_state(), ControlState::OnlineLocal);
        assert!(t.host_offline());
        assert_eq!(t.control_state(), ControlState::HostOffline);
        assert!(!t.complete_online_attempt(true, true));
    }

    #[test]
    fn test_reset_only_from_finished_states() {
        for state in ProcessState::ALL.iter().copied().skip(1) {
            let t = triad();
            drive_to(&t, state);
            let expected = matches!(state, ProcessState::Completed | ProcessState::Aborted);
            assert_eq!(t.reset_process(), expected, "reset from {state}");
            let after = if expected { ProcessState::Idle } else { state };
            assert_eq!(t.process_state(), after);
        }
        let t = triad();
        assert!(!t.reset_process());
        assert_eq!(t.process_state(), ProcessState::Init);
    }

    #[test]
    fn test_run_moves_equipment_productive_and_back() {
        let t = triad();
        drive_to(&t, ProcessState::Executing);
        assert_eq!(t.equipment_state(), EquipmentState::Productive);
        assert!(t.complete_process_transition());
        assert_eq!(t.process_state(), ProcessState::Completed);
        assert_eq!(t.equipment_state(), EquipmentState::Standby);
    }

    #[test]
    fn test_start_blocked_while_down() {
        let t = triad();
        t.initialize_process();
        assert!(t.report_equipment_failure("interlock"));
        assert!(!t.start_process());
        assert_eq!(t.process_state(), ProcessState::Idle);
        assert!(t.report_equipment_repaired());
        assert!(t.start_process());
    }

    #[test]
    fn test_failure_aborts_running_process() {
        let t = triad();
        drive_to(&t, ProcessState::Executing);
        t.report_equipment_failure("estop");
        assert_eq!(t.equipment_state(), EquipmentState::UnscheduledDown);
        assert_eq!(t.process_state(), ProcessState::Aborting);
    }

    #[test]
    fn test_equipment_table_enforced() {
        let t = triad();
        assert!(!t.set_equipment_state(EquipmentState::Productive, "skip standby"));
        assert!(t.set_equipment_state(EquipmentState::Standby, "init"));
        assert!(t.set_equipment_state(EquipmentState::Engineering, "maint"));
        assert!(!t.set_equipment_state(EquipmentState::ScheduledDown, "pm"));
    }

    #[test]
    fn test_availability_derivation() {
        let t = online_triad(true);
        assert!(!t.status_info().is_available);
        t.initialize_process();
        t.set_equipment_state(EquipmentState::Standby, "init");
        let status = t.status_info();
        assert!(status.is_available);
        assert!(status.can_start);

        t.report_equipment_failure("fault");
        assert!(!t.status_info().is_available);
    }

    #[test]
    fn test_history_is_bounded() {
        let t = StateTriad::with_history_capacity("EQ1", EventBus::new(), 4);
        t.set_communication_established(true);
        for _ in 0..5 {
            t.request_online(true);
            t.request_offline();
        }
        assert_eq!(t.history(100).len(), 4);
    }

    #[tokio::test]
    async fn test_transitions_publish_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let t = StateTriad::new("EQ1", bus);
        t.set_communication_established(true);
        t.request_online(false);

        let state = rx.recv().await.unwrap();
        assert_eq!(state.kind, EventKind::StateChanged);
        assert_eq!(state.new.as_deref(), Some("OnlineLocal"));
        let mode = rx.recv().await.unwrap();
        assert_eq!(mode.kind, EventKind::ControlModeChanged);
        assert_eq!(mode.new.as_deref(), Some("Local"));
    }

    struct FixedCount(usize);

    impl AlarmCounter for FixedCount {
        fn active_alarm_count(&self) -> usize {
            self.0
        }
    }

    #[test]
    fn test_status_reports_alarm_count() {
        let t = triad();
        assert_eq!(t.status_info().active_alarm_count, 0);
        t.attach_alarm_counter(Arc::new(FixedCount(3)));
        assert_eq!(t.status_info().active_alarm_count, 3);
    }
}
