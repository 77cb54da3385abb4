// src/connection.rs - Host connection manager interface
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::oneshot;

/// Connection-level transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    NotConnected,
    Connecting,
    /// TCP link up, session not yet selected
    Connected,
    /// Session selected, messages may flow
    Selected,
    Disconnecting,
    Error,
    NotEnabled,
    /// Waiting before the next connect attempt
    Retry,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Selected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Host-side protocol driver.
///
/// Message encoding and the socket state machine live behind this trait;
/// the orchestration core only needs the handful of calls below.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    /// Start the transport (listen or connect, per configuration)
    async fn start(&self) -> Result<()>;

    /// Stop the transport and drop the session
    async fn stop(&self) -> Result<()>;

    /// Whether a lower-layer connection exists
    fn is_connected(&self) -> bool;

    /// Run the establish-communications exchange; `true` when the host acknowledged
    async fn establish_communication(&self, device_id: &str) -> Result<bool>;

    /// Send an online request and return the host's ONLACK code
    async fn request_online(&self, device_id: &str) -> Result<u8>;

    fn connection_state(&self) -> ConnectionState;

    /// One-shot registration fired when the host completes the communication
    /// handshake. Dropping the receiver cancels the registration.
    fn communication_established(&self) -> oneshot::Receiver<()>;
}
