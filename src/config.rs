// src/config.rs - Coordinator and device configuration

use crate::alarm::AnalogThresholds;
use crate::error::{GemError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// MAIN CONFIGURATION
// ============================================================================

/// Main GEMLINK configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Coordinator-wide settings
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Device instances supervised by the coordinator
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl Config {
    /// Load and validate a configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GemError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.coordinator.validate()?;

        let mut seen = HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.device_id.as_str()) {
                return Err(GemError::Config(format!(
                    "Duplicate device id '{}'",
                    device.device_id
                )));
            }
            device.validate()?;
        }
        Ok(())
    }
}

// ============================================================================
// COORDINATOR CONFIGURATION
// ============================================================================

/// Settings for the multi-instance coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Health check cadence in seconds
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,

    /// Concurrency bound for parallel batch operations
    #[serde(default = "default_max_parallel")]
    pub max_parallel_operations: usize,

    /// Wall-clock deadline for a whole batch, in seconds
    #[serde(default = "default_batch_deadline")]
    pub batch_deadline_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: default_health_check_interval(),
            max_parallel_operations: default_max_parallel(),
            batch_deadline_secs: default_batch_deadline(),
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_operations == 0 {
            return Err(GemError::Config(
                "max_parallel_operations must be at least 1".into(),
            ));
        }
        if self.health_check_interval_secs == 0 || self.batch_deadline_secs == 0 {
            return Err(GemError::Config(
                "coordinator intervals must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn batch_deadline(&self) -> Duration {
        Duration::from_secs(self.batch_deadline_secs)
    }
}

// ============================================================================
// DEVICE CONFIGURATION
// ============================================================================

/// One independently configured equipment instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier
    pub device_id: String,

    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    /// Host transport settings
    pub transport: TransportConfig,

    /// Programmable controller settings
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Online-request retry policy
    #[serde(default)]
    pub online: OnlineRetryConfig,

    /// Bring-up sequence settings
    #[serde(default)]
    pub initialization: InitializationConfig,

    /// Alarm polling settings
    #[serde(default)]
    pub alarms: AlarmConfig,

    /// Reconnect automatically when the health check finds the transport down
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
}

impl DeviceConfig {
    /// Minimal device configuration with defaults for every section
    pub fn new(device_id: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            device_id: device_id.into(),
            name: None,
            transport,
            controller: ControllerConfig::default(),
            online: OnlineRetryConfig::default(),
            initialization: InitializationConfig::default(),
            alarms: AlarmConfig::default(),
            auto_reconnect: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.device_id.trim().is_empty() {
            return Err(GemError::Config("device_id must not be empty".into()));
        }
        self.transport
            .validate()
            .map_err(|e| GemError::Config(format!("device '{}': {}", self.device_id, e)))?;
        if self.online.max_retries == 0 {
            return Err(GemError::Config(format!(
                "device '{}': online.max_retries must be at least 1",
                self.device_id
            )));
        }
        self.alarms
            .validate()
            .map_err(|e| GemError::Config(format!("device '{}': {}", self.device_id, e)))?;
        Ok(())
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.device_id)
    }
}

/// Connection establishment role of the equipment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Equipment dials out to the host
    Active,
    /// Equipment listens for the host
    Passive,
}

/// Host transport settings, validated in the first bring-up step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_mode")]
    pub mode: ConnectionMode,

    /// Session (device) id used in message headers
    #[serde(default)]
    pub session_id: u16,

    /// Reply timeout
    #[serde(default = "default_t3")]
    pub t3_ms: u64,

    /// Connect separation timeout
    #[serde(default = "default_t5")]
    pub t5_ms: u64,

    /// Control transaction timeout
    #[serde(default = "default_t6")]
    pub t6_ms: u64,

    /// Not-selected timeout
    #[serde(default = "default_t7")]
    pub t7_ms: u64,

    /// Network intercharacter timeout
    #[serde(default = "default_t8")]
    pub t8_ms: u64,
}

impl TransportConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            mode: default_mode(),
            session_id: 0,
            t3_ms: default_t3(),
            t5_ms: default_t5(),
            t6_ms: default_t6(),
            t7_ms: default_t7(),
            t8_ms: default_t8(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(GemError::Config("transport host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(GemError::Config("transport port must not be 0".into()));
        }
        let timers = [
            ("T3", self.t3_ms),
            ("T5", self.t5_ms),
            ("T6", self.t6_ms),
            ("T7", self.t7_ms),
            ("T8", self.t8_ms),
        ];
        for (name, value) in timers {
            if value == 0 {
                return Err(GemError::Config(format!("{} timeout must be greater than zero", name)));
            }
        }
        Ok(())
    }
}

/// Programmable controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_controller_address")]
    pub address: String,

    #[serde(default)]
    pub rack: u16,

    #[serde(default = "default_slot")]
    pub slot: u16,

    #[serde(default = "default_controller_timeout")]
    pub timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            address: default_controller_address(),
            rack: 0,
            slot: default_slot(),
            timeout_ms: default_controller_timeout(),
        }
    }
}

/// Online-request retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineRetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

impl Default for OnlineRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

/// Bring-up sequence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializationConfig {
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    #[serde(default = "default_online_request_timeout")]
    pub online_request_timeout_secs: u64,

    /// Ask the host to go online instead of waiting passively
    #[serde(default)]
    pub request_online_on_startup: bool,

    /// Control mode requested when going online on startup
    #[serde(default = "default_true")]
    pub remote_on_startup: bool,
}

impl Default for InitializationConfig {
    fn default() -> Self {
        Self {
            connection_timeout_secs: default_connection_timeout(),
            handshake_timeout_secs: default_handshake_timeout(),
            online_request_timeout_secs: default_online_request_timeout(),
            request_online_on_startup: false,
            remote_on_startup: true,
        }
    }
}

impl InitializationConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn online_request_timeout(&self) -> Duration {
        Duration::from_secs(self.online_request_timeout_secs)
    }
}

/// Alarm polling and retention settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmConfig {
    /// Digital source poll cadence
    #[serde(default = "default_alarm_poll")]
    pub digital_poll_ms: u64,

    /// Analog threshold poll cadence
    #[serde(default = "default_alarm_poll")]
    pub analog_poll_ms: u64,

    /// History pruning and staleness cadence
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,

    #[serde(default = "default_history_retention_days")]
    pub history_retention_days: i64,

    /// Low priority alarms active longer than this are cleared automatically
    #[serde(default = "default_low_priority_auto_clear")]
    pub low_priority_auto_clear_hours: i64,

    #[serde(default)]
    pub thresholds: AnalogThresholds,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            digital_poll_ms: default_alarm_poll(),
            analog_poll_ms: default_alarm_poll(),
            maintenance_interval_secs: default_maintenance_interval(),
            history_retention_days: default_history_retention_days(),
            low_priority_auto_clear_hours: default_low_priority_auto_clear(),
            thresholds: AnalogThresholds::default(),
        }
    }
}

/// Upper bound for retention windows; keeps chrono arithmetic in range
const MAX_RETENTION_DAYS: i64 = 3650;

impl AlarmConfig {
    pub fn validate(&self) -> Result<()> {
        if self.digital_poll_ms == 0 || self.analog_poll_ms == 0 || self.maintenance_interval_secs == 0 {
            return Err(GemError::Config(
                "alarm poll and maintenance intervals must be greater than zero".into(),
            ));
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.history_retention_days) {
            return Err(GemError::Config(format!(
                "alarms.history_retention_days must be between 1 and {}",
                MAX_RETENTION_DAYS
            )));
        }
        if !(1..=MAX_RETENTION_DAYS * 24).contains(&self.low_priority_auto_clear_hours) {
            return Err(GemError::Config(format!(
                "alarms.low_priority_auto_clear_hours must be between 1 and {}",
                MAX_RETENTION_DAYS * 24
            )));
        }
        Ok(())
    }

    pub fn digital_poll(&self) -> Duration {
        Duration::from_millis(self.digital_poll_ms)
    }

    pub fn analog_poll(&self) -> Duration {
        Duration::from_millis(self.analog_poll_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

// ============================================================================
// DEFAULT VALUE FUNCTIONS
// ============================================================================

fn default_true() -> bool {
    true
}

fn default_health_check_interval() -> u64 {
    30
}

fn default_max_parallel() -> usize {
    4
}

fn default_batch_deadline() -> u64 {
    300
}

fn default_port() -> u16 {
    5000
}

fn default_mode() -> ConnectionMode {
    ConnectionMode::Passive
}

fn default_t3() -> u64 {
    45_000
}

fn default_t5() -> u64 {
    10_000
}

fn default_t6() -> u64 {
    5_000
}

fn default_t7() -> u64 {
    10_000
}

fn default_t8() -> u64 {
    5_000
}

fn default_controller_address() -> String {
    "127.0.0.1".to_string()
}

fn default_slot() -> u16 {
    1
}

fn default_controller_timeout() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    2_000
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_handshake_timeout() -> u64 {
    60
}

fn default_online_request_timeout() -> u64 {
    30
}

fn default_alarm_poll() -> u64 {
    500
}

fn default_maintenance_interval() -> u64 {
    60
}

fn default_history_retention_days() -> i64 {
    7
}

fn default_low_priority_auto_clear() -> i64 {
    24
}
