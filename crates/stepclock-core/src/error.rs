//! Error types for stepclock

use std::time::Duration;

use thiserror::Error;

/// Core stepclock errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepClockError {
    // Time source errors
    #[error("Backed clock unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("Network time not obtained within {0:?}")]
    TimeFetchTimeout(Duration),

    #[error("Invalid time zone rule: {0}")]
    InvalidTimeZone(String),

    // Position errors
    #[error("Corrupt persisted position: {0:?}")]
    CorruptPersistedState(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid clock time: {0:?}")]
    InvalidClockTime(String),

    // Catch-up errors
    #[error("Catch-up of {deficit} minutes exceeds limit of {limit} minutes")]
    CatchUpBoundExceeded { deficit: u16, limit: u16 },

    // Actuator errors
    #[error("Pulse rejected: {elapsed:?} since last pulse, need {required:?}")]
    PulseGuardRejected { elapsed: Duration, required: Duration },

    #[error("Actuator error: {0}")]
    Actuator(String),

    // Host errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Control loop unavailable")]
    ControlUnavailable,
}

impl StepClockError {
    /// Whether this error needs operator action (config change or manual set).
    /// Everything else is absorbed locally with a fallback.
    pub fn requires_operator(&self) -> bool {
        matches!(self, StepClockError::CatchUpBoundExceeded { .. })
    }
}

/// Result type for stepclock operations
pub type StepClockResult<T> = Result<T, StepClockError>;
