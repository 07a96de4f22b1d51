//! Error types shared across the crate
//!
//! Input and state errors are rejected synchronously. Device communication
//! errors are absorbed by the profiler and the executor and only surface from
//! direct calls. Resource errors wrap the `anyhow` errors produced by file and
//! storage helpers.

use thiserror::Error;

/// Result alias used by the core modules
pub type Result<T> = std::result::Result<T, ShowError>;

/// Top-level error for analysis, profiling, rendering and playback
#[derive(Debug, Error)]
pub enum ShowError {
    /// Bad caller input (audio format, FFT size, settings out of range)
    #[error("invalid input: {0}")]
    Input(String),

    /// The requested device id is not known to the device API
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// The requested timeline id is not in the store
    #[error("unknown timeline: {0}")]
    UnknownTimeline(String),

    /// Communication with a device failed
    #[error("device communication failed: {0}")]
    Device(#[from] DeviceError),

    /// A control operation was called in the wrong lifecycle state
    #[error("invalid state: {0}")]
    State(String),

    /// A long-running operation was cancelled by its caller
    #[error("operation cancelled")]
    Cancelled,

    /// File or storage failure
    #[error(transparent)]
    Resource(#[from] anyhow::Error),
}

impl ShowError {
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Whether this error came from caller input and should not be retried
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::Input(_) | Self::UnknownDevice(_) | Self::UnknownTimeline(_)
        )
    }
}

/// Failure reported by the external device API
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    /// The API could not be reached at all
    #[error("device API unavailable: {0}")]
    Unavailable(String),

    /// The API answered but refused the call
    #[error("service {service} rejected: {reason}")]
    Rejected { service: String, reason: String },

    /// The device did not reach the expected state in time
    #[error("timed out waiting for device state")]
    Timeout,
}
