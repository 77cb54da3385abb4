use serde::Serialize;
use thiserror::Error;

/// Application level error type used throughout the crate.
#[derive(Error, Debug)]
pub enum GemError {
    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Host connection failure reported by the connection manager
    #[error("Transport error: {0}")]
    Transport(String),

    /// Controller read/write/execute failure
    #[error("Controller error: {0}")]
    Controller(String),

    /// An operation was requested in a state that does not allow it
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Requested device, alarm or definition does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Device or definition is already registered
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A concurrent attempt holds the resource
    #[error("Busy: {0}")]
    Busy(String),

    /// A bounded wait expired
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The operation was cancelled cooperatively
    #[error("Operation cancelled")]
    Cancelled,

    /// Controller value type does not match the expected type
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: &'static str, actual: &'static str },
}

/// Convenient alias over [`Result`] using [`GemError`]
pub type Result<T> = std::result::Result<T, GemError>;

/// Structured `(success, message)` pair returned across public boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl<T> From<Result<T>> for OperationResult {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(_) => OperationResult::ok("ok"),
            Err(e) => OperationResult::fail(e.to_string()),
        }
    }
}
