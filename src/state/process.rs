use serde::{Deserialize, Serialize};
use std::fmt;

/// Production lifecycle of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessState {
    Init,
    Idle,
    /// Recipe selected, ready to start
    Setup,
    Executing,
    /// Pause requested, controller still finishing the current step
    Pause,
    Paused,
    Stopping,
    Aborting,
    Completed,
    Aborted,
}

impl ProcessState {
    pub const ALL: [ProcessState; 10] = [
        ProcessState::Init,
        ProcessState::Idle,
        ProcessState::Setup,
        ProcessState::Executing,
        ProcessState::Pause,
        ProcessState::Paused,
        ProcessState::Stopping,
        ProcessState::Aborting,
        ProcessState::Completed,
        ProcessState::Aborted,
    ];

    /// Idle or set up: a new run may start
    pub fn can_start(self) -> bool {
        matches!(self, ProcessState::Idle | ProcessState::Setup)
    }

    pub fn is_processing(self) -> bool {
        matches!(
            self,
            ProcessState::Executing
                | ProcessState::Pause
                | ProcessState::Stopping
                | ProcessState::Aborting
        )
    }

    /// Reset discards a run, so only a finished one may be reset.
    pub fn can_reset(self) -> bool {
        self.is_finished()
    }

    pub fn is_finished(self) -> bool {
        matches!(self, ProcessState::Completed | ProcessState::Aborted)
    }

    pub fn can_pause(self) -> bool {
        self == ProcessState::Executing
    }

    pub fn can_resume(self) -> bool {
        matches!(self, ProcessState::Pause | ProcessState::Paused)
    }

    pub fn can_stop(self) -> bool {
        matches!(
            self,
            ProcessState::Executing | ProcessState::Pause | ProcessState::Paused
        )
    }

    pub fn can_abort(self) -> bool {
        matches!(
            self,
            ProcessState::Setup
                | ProcessState::Executing
                | ProcessState::Pause
                | ProcessState::Paused
                | ProcessState::Stopping
        )
    }

    /// Where a transitional state lands once the controller confirms it
    pub fn settled(self) -> Option<ProcessState> {
        match self {
            ProcessState::Pause => Some(ProcessState::Paused),
            ProcessState::Stopping => Some(ProcessState::Completed),
            ProcessState::Aborting => Some(ProcessState::Aborted),
            ProcessState::Executing => Some(ProcessState::Completed),
            _ => None,
        }
    }
}

impl Default for ProcessState {
    fn default() -> Self {
        ProcessState::Init
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
