//! GEMLINK - equipment-side host communication core
//!
//! Orchestrates manufacturing equipment against a factory host: connection
//! bring-up, online/offline negotiation, the control/process/equipment state
//! machines, alarm lifecycle, and supervision of many devices from one
//! process.
//!
//! Wire encoding of the host protocol and the programmable-controller
//! transports are not part of this crate. They plug in through the
//! [`ConnectionManager`] and [`ControllerDataProvider`] traits.
//!
//! # Feature Flags
//!
//! - **simulation** (default): simulated host link and controller used by the
//!   `gemlink` binary and demo configurations.
//!
//! # Examples
//!
//! ```rust,no_run
//! use gemlink::{Config, DeviceCoordinator};
//! use gemlink::sim::SimulatedDriverFactory;
//! use std::sync::Arc;
//!
//! # async fn run() -> gemlink::Result<()> {
//! gemlink::init();
//!
//! let config = Config::from_file("gemlink.yaml")?;
//! let coordinator = DeviceCoordinator::from_config(
//!     &config,
//!     Arc::new(SimulatedDriverFactory::new()),
//! )
//! .await?;
//! let started = coordinator.start_all().await;
//! println!("{} of {} devices started", started.succeeded, started.total);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// CORE MODULES
// ============================================================================

/// Error type and `(success, message)` results
pub mod error;

/// Controller values
pub mod value;

/// YAML configuration with validation
pub mod config;

/// Per-device event bus
pub mod events;

/// Status variable, collection event, alarm and constant catalogs
pub mod catalog;

/// Host connection manager interface
pub mod connection;

/// Programmable controller interface
pub mod controller;

pub mod state;

pub mod alarm;

/// Online-request retry protocol
pub mod online;

/// Device bring-up sequence
pub mod init;

pub mod coordinator;

// ============================================================================
// SIMULATION (feature-gated)
// ============================================================================

#[cfg(feature = "simulation")]
#[cfg_attr(docsrs, doc(cfg(feature = "simulation")))]
pub mod sim;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use alarm::{AlarmAction, AlarmHistoryRecord, AlarmManager, AlarmRecord, AnalogThresholds};
pub use catalog::{AlarmCategory, AlarmDefinition, AlarmPriority, DefinitionCatalog};
pub use config::{Config, CoordinatorConfig, DeviceConfig, TransportConfig};
pub use connection::{ConnectionManager, ConnectionState};
pub use controller::{ControllerDataProvider, MemoryController};
pub use coordinator::{
    BatchMode, BatchOperation, BatchResult, DeviceCoordinator, DeviceDriverFactory, DeviceDrivers,
    DeviceInstance, DeviceInstanceEvent, DeviceStatus,
};
pub use error::{GemError, OperationResult, Result};
pub use events::{EventBus, EventKind, GemEvent};
pub use init::{InitOutcome, InitializationState, Initializer};
pub use online::{OnlineAck, OnlineRequestResult, OnlineRequester, OnlineRetryPolicy};
pub use state::{
    ControlMode, ControlState, EquipmentState, ProcessState, StateService, StateSnapshot,
    StateTriad, StatusInfo, StubStateService,
};
pub use value::Value;

// ============================================================================
// VERSION INFORMATION
// ============================================================================

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build information
pub mod build_info {
    /// Git commit hash ("unknown" outside a repository)
    pub const GIT_HASH: &str = env!("GEMLINK_GIT_HASH");

    pub const BUILD_TIMESTAMP: &str = env!("GEMLINK_BUILD_TIMESTAMP");

    pub const RUSTC_VERSION: &str = env!("GEMLINK_RUSTC_VERSION");

    /// Target triple
    pub const TARGET: &str = env!("GEMLINK_TARGET");

    /// Build profile (debug/release)
    pub const PROFILE: &str = env!("GEMLINK_PROFILE");
}

// ============================================================================
// INITIALIZATION
// ============================================================================

/// Install the tracing subscriber.
///
/// Honors `RUST_LOG`, defaulting to `gemlink=info`. Calling it more than once,
/// or after another subscriber was installed, is harmless.
pub fn init() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gemlink=info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}
