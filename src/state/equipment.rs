use serde::{Deserialize, Serialize};
use std::fmt;

/// Equipment availability state (E10-style)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EquipmentState {
    Unknown,
    Standby,
    Productive,
    Engineering,
    ScheduledDown,
    UnscheduledDown,
}

impl EquipmentState {
    pub fn is_down(self) -> bool {
        matches!(
            self,
            EquipmentState::ScheduledDown | EquipmentState::UnscheduledDown
        )
    }

    /// Transition table. Failure is reachable from everywhere; every other
    /// move goes through Standby.
    pub fn can_transition_to(self, target: EquipmentState) -> bool {
        use EquipmentState::*;

        if target == UnscheduledDown {
            return self != UnscheduledDown;
        }
        matches!(
            (self, target),
            (Unknown, Standby)
                | (Standby, Productive)
                | (Productive, Standby)
                | (Standby, Engineering)
                | (Engineering, Standby)
                | (Standby, ScheduledDown)
                | (ScheduledDown, Standby)
                | (UnscheduledDown, Standby)
        )
    }
}

impl Default for EquipmentState {
    fn default() -> Self {
        EquipmentState::Unknown
    }
}

impl fmt::Display for EquipmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
