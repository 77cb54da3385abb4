use super::{EquipmentState, StateService, StateSnapshot, StatusInfo};

/// Inert [`StateService`] used where a device has no live state machine.
///
/// Reports a fixed snapshot and refuses every transition.
#[derive(Debug, Clone)]
pub struct StubStateService {
    device_id: String,
    snapshot: StateSnapshot,
}

impl StubStateService {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self::with_snapshot(device_id, StateSnapshot::default())
    }

    pub fn with_snapshot(device_id: impl Into<String>, snapshot: StateSnapshot) -> Self {
        Self {
            device_id: device_id.into(),
            snapshot,
        }
    }
}

impl StateService for StubStateService {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn snapshot(&self) -> StateSnapshot {
        self.snapshot
    }

    fn status_info(&self) -> StatusInfo {
        StatusInfo::from_snapshot(&self.device_id, self.snapshot, 0)
    }

    fn request_online(&self, _remote: bool) -> bool {
        false
    }

    fn request_offline(&self) -> bool {
        false
    }

    fn switch_control_mode(&self, _remote: bool) -> bool {
        false
    }

    fn set_communication_established(&self, _established: bool) {}

    fn begin_online_attempt(&self) -> bool {
        false
    }

    fn complete_online_attempt(&self, _accepted: bool, _remote: bool) -> bool {
        false
    }

    fn initialize_process(&self) -> bool {
        false
    }

    fn start_process(&self) -> bool {
        false
    }

    fn pause_process(&self) -> bool {
        false
    }

    fn resume_process(&self) -> bool {
        false
    }

    fn stop_process(&self) -> bool {
        false
    }

    fn abort_process(&self) -> bool {
        false
    }

    fn reset_process(&self) -> bool {
        false
    }

    fn set_equipment_state(&self, _target: EquipmentState, _reason: &str) -> bool {
        false
    }
}
