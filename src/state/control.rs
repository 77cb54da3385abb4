use serde::{Deserialize, Serialize};
use std::fmt;

/// Communication/control state of the equipment as seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlState {
    EquipmentOffline,
    /// Equipment asked the host to go online and awaits the answer
    AttemptOnline,
    /// Host has placed the equipment offline
    HostOffline,
    OnlineLocal,
    OnlineRemote,
}

/// Operator-facing control mode, derived from [`ControlState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlMode {
    Offline,
    Local,
    Remote,
}

impl ControlState {
    /// Online state matching the requested mode
    pub fn online(remote: bool) -> Self {
        if remote {
            ControlState::OnlineRemote
        } else {
            ControlState::OnlineLocal
        }
    }

    /// The mode is a pure function of the state, so the pairing can never drift.
    pub fn mode(self) -> ControlMode {
        match self {
            ControlState::OnlineLocal => ControlMode::Local,
            ControlState::OnlineRemote => ControlMode::Remote,
            _ => ControlMode::Offline,
        }
    }

    pub fn is_online(self) -> bool {
        matches!(self, ControlState::OnlineLocal | ControlState::OnlineRemote)
    }

    pub fn is_remote(self) -> bool {
        self == ControlState::OnlineRemote
    }
}

impl Default for ControlState {
    fn default() -> Self {
        ControlState::EquipmentOffline
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
