//! Control, process and equipment state machines.
//!
//! Each device owns one [`StateTriad`]. The three machines share a single
//! reader-writer lock so that a status query always observes one consistent
//! combination of states.

mod control;
mod equipment;
mod history;
mod process;
mod stub;
mod triad;

pub use control::{ControlMode, ControlState};
pub use equipment::EquipmentState;
pub use history::{StateHistoryEntry, StateType, STATE_HISTORY_CAPACITY};
pub use process::ProcessState;
pub use stub::StubStateService;
pub use triad::StateTriad;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Source of the active alarm count shown in status snapshots
pub trait AlarmCounter: Send + Sync {
    fn active_alarm_count(&self) -> usize;
}

/// Atomic read of all three machines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    pub control_state: ControlState,
    pub process_state: ProcessState,
    pub equipment_state: EquipmentState,
    pub communication_established: bool,
}

impl StateSnapshot {
    pub fn control_mode(&self) -> ControlMode {
        self.control_state.mode()
    }

    /// Online, not failed, and ready for a new run
    pub fn is_available(&self) -> bool {
        self.control_state.is_online()
            && self.equipment_state != EquipmentState::UnscheduledDown
            && self.process_state.can_start()
    }
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            control_state: ControlState::EquipmentOffline,
            process_state: ProcessState::Init,
            equipment_state: EquipmentState::Unknown,
            communication_established: false,
        }
    }
}

/// Status composed on every request; derived fields are never stored.
#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub device_id: String,
    pub control_state: ControlState,
    pub control_mode: ControlMode,
    pub process_state: ProcessState,
    pub equipment_state: EquipmentState,
    pub communication_established: bool,
    pub is_online: bool,
    pub is_processing: bool,
    pub can_start: bool,
    pub is_available: bool,
    pub active_alarm_count: usize,
    pub timestamp: DateTime<Utc>,
}

impl StatusInfo {
    pub fn from_snapshot(device_id: &str, snapshot: StateSnapshot, active_alarm_count: usize) -> Self {
        Self {
            device_id: device_id.to_string(),
            control_state: snapshot.control_state,
            control_mode: snapshot.control_mode(),
            process_state: snapshot.process_state,
            equipment_state: snapshot.equipment_state,
            communication_established: snapshot.communication_established,
            is_online: snapshot.control_state.is_online(),
            is_processing: snapshot.process_state.is_processing(),
            can_start: snapshot.process_state.can_start(),
            is_available: snapshot.is_available(),
            active_alarm_count,
            timestamp: Utc::now(),
        }
    }
}

/// Operations the orchestrator and coordinator need from a device's state.
///
/// Every mutating call returns `false` (and logs) when its precondition does
/// not hold; nothing is mutated in that case.
pub trait StateService: Send + Sync {
    fn device_id(&self) -> &str;

    fn snapshot(&self) -> StateSnapshot;

    fn status_info(&self) -> StatusInfo;

    fn request_online(&self, remote: bool) -> bool;

    fn request_offline(&self) -> bool;

    fn switch_control_mode(&self, remote: bool) -> bool;

    /// Losing communication while not offline forces EquipmentOffline.
    fn set_communication_established(&self, established: bool);

    fn begin_online_attempt(&self) -> bool;

    fn complete_online_attempt(&self, accepted: bool, remote: bool) -> bool;

    fn initialize_process(&self) -> bool;

    fn start_process(&self) -> bool;

    fn pause_process(&self) -> bool;

    fn resume_process(&self) -> bool;

    fn stop_process(&self) -> bool;

    fn abort_process(&self) -> bool;

    fn reset_process(&self) -> bool;

    fn set_equipment_state(&self, target: EquipmentState, reason: &str) -> bool;
}
