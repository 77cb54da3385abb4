// src/online.rs - Online-request retry protocol

use crate::config::OnlineRetryConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use serde::Serialize;
use std::fmt;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Pause between a fresh communication establishment and the first online request
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Host acknowledgement to an online request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OnlineAck {
    Accepted,
    Rejected,
    AlreadyOnline,
    Unknown(u8),
}

impl OnlineAck {
    pub fn is_success(self) -> bool {
        matches!(self, OnlineAck::Accepted | OnlineAck::AlreadyOnline)
    }
}

impl From<u8> for OnlineAck {
    fn from(code: u8) -> Self {
        match code {
            0 => OnlineAck::Accepted,
            1 => OnlineAck::Rejected,
            2 => OnlineAck::AlreadyOnline,
            other => OnlineAck::Unknown(other),
        }
    }
}

impl fmt::Display for OnlineAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnlineAck::Unknown(code) => write!(f, "Unknown({})", code),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OnlineRetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for OnlineRetryPolicy {
    fn default() -> Self {
        Self::from(&OnlineRetryConfig::default())
    }
}

impl From<&OnlineRetryConfig> for OnlineRetryPolicy {
    fn from(config: &OnlineRetryConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OnlineRequestResult {
    pub success: bool,
    /// Online requests sent
    pub attempts: u32,
    /// Delays waited between online requests
    pub retry_delays: Vec<Duration>,
    pub ack: Option<OnlineAck>,
    pub message: String,
}

impl OnlineRequestResult {
    fn failed(attempts: u32, retry_delays: Vec<Duration>, ack: Option<OnlineAck>, message: String) -> Self {
        Self {
            success: false,
            attempts,
            retry_delays,
            ack,
            message,
        }
    }
}

/// Drives establish-communication then online-request with fixed-delay retries
#[derive(Debug, Clone, Default)]
pub struct OnlineRequester {
    policy: OnlineRetryPolicy,
}

impl OnlineRequester {
    pub fn new(policy: OnlineRetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &OnlineRetryPolicy {
        &self.policy
    }

    /// Make sure the session is selected, establishing communication if needed
    async fn ensure_communication(&self, conn: &dyn ConnectionManager, device_id: &str) -> bool {
        if conn.connection_state() == ConnectionState::Selected {
            return true;
        }

        for attempt in 1..=self.policy.max_retries {
            match conn.establish_communication(device_id).await {
                Ok(true) => {
                    info!(device = device_id, attempt, "Communication established");
                    return true;
                }
                Ok(false) => {
                    warn!(device = device_id, attempt, "Establish communication refused");
                }
                Err(e) => {
                    warn!(device = device_id, attempt, "Establish communication failed: {}", e);
                }
            }
            if attempt < self.policy.max_retries {
                sleep(self.policy.retry_delay).await;
            }
        }
        false
    }

    pub async fn request(&self, conn: &dyn ConnectionManager, device_id: &str) -> OnlineRequestResult {
        if !self.ensure_communication(conn, device_id).await {
            return OnlineRequestResult::failed(
                0,
                Vec::new(),
                None,
                format!(
                    "communication not established after {} attempts",
                    self.policy.max_retries
                ),
            );
        }

        sleep(SETTLE_DELAY).await;

        let mut retry_delays = Vec::new();
        let mut last_ack = None;
        let mut last_error = String::new();

        for attempt in 1..=self.policy.max_retries {
            match conn.request_online(device_id).await {
                Ok(code) => {
                    let ack = OnlineAck::from(code);
                    last_ack = Some(ack);
                    if ack.is_success() {
                        info!(device = device_id, attempt, %ack, "Online request accepted");
                        return OnlineRequestResult {
                            success: true,
                            attempts: attempt,
                            retry_delays,
                            ack: Some(ack),
                            message: format!("online after {} attempt(s): {}", attempt, ack),
                        };
                    }
                    if let OnlineAck::Unknown(code) = ack {
                        warn!(device = device_id, attempt, code, "Unknown ONLACK code, treated as reject");
                    } else {
                        debug!(device = device_id, attempt, "Online request rejected");
                    }
                    last_error = format!("host answered {}", ack);
                }
                Err(e) => {
                    warn!(device = device_id, attempt, "Online request failed: {}", e);
                    last_error = e.to_string();
                }
            }

            if attempt < self.policy.max_retries {
                retry_delays.push(self.policy.retry_delay);
                sleep(self.policy.retry_delay).await;
            }
        }

        OnlineRequestResult::failed(
            self.policy.max_retries,
            retry_delays,
            last_ack,
            format!(
                "online request failed after {} attempts: {}",
                self.policy.max_retries, last_error
            ),
        )
    }
}
