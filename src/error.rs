//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the entire application.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failures a measurement run can hit, from configuration issues
//! to a filter wheel whose tracked position no longer agrees with the hardware.
//!
//! ## Error Hierarchy
//!
//! - **`Config`** / **`Configuration`**: parse errors from `figment` and semantic validation
//!   errors. Both are raised before any instrument session is opened.
//! - **`DeviceInit`**: an instrument session failed to open. Fatal, aborts startup.
//! - **`InvalidSlot`**: a requested or reset wheel slot is outside `1..=slot_count`.
//! - **`UnreachableSlot`**: the tracked wheel position did not converge within one full
//!   rotation worth of pulses. Signals tracker/physical desynchronization.
//! - **`Acquisition`**: a spectrum capture failed or produced unusable data.
//! - **`Instrument`**: a power meter or wheel call failed.
//! - **`Storage`** / **`Io`**: persisting spectra failed.
//! - **`ShutdownFailed`**: one or more instruments failed to close cleanly.
//!
//! Capability traits in [`crate::hardware`] return `anyhow::Result`; the orchestration
//! layer converts those at the boundary with [`DaqError::acquisition`] and
//! [`DaqError::instrument`].

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Errors raised while configuring, running and shutting down an experiment.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration file could not be parsed or is missing a required key.
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Configuration parsed but holds an invalid value.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// An instrument session failed to open.
    #[error("Failed to open {device}: {reason}")]
    DeviceInit {
        /// Instrument role ("spectrometer", "power_meter", "flywheel")
        device: String,
        /// Driver-reported reason
        reason: String,
    },

    /// Requested or reset slot outside `1..=slot_count`.
    #[error("Invalid wheel slot {slot}: must be within 1..={slot_count}")]
    InvalidSlot {
        /// Offending slot number
        slot: u32,
        /// Number of slots on the wheel
        slot_count: u32,
    },

    /// Tracked position failed to converge after a full rotation of pulses.
    #[error(
        "Wheel did not reach slot {target} after {attempts} pulses (tracked slot {tracked}); \
         tracked position and physical wheel are out of sync"
    )]
    UnreachableSlot {
        /// Slot that was requested
        target: u32,
        /// Pulses issued before giving up
        attempts: u32,
        /// Tracked position when giving up
        tracked: u32,
    },

    /// Spectrum capture failed or returned unusable data.
    #[error("Acquisition error: {0}")]
    Acquisition(String),

    /// Power meter or wheel call failed.
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// Writing or reading persisted spectra failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// File system failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operator interrupted the run.
    #[error("Run interrupted: {0}")]
    Interrupted(String),

    /// Operation not allowed in the orchestrator's current state.
    #[error("Invalid orchestrator state: {0}")]
    InvalidState(String),

    /// Functionality compiled out via cargo features.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// One or more instruments failed to shut down.
    #[error("Shutdown failed: {}", join_errors(.0))]
    ShutdownFailed(Vec<DaqError>),
}

fn join_errors(errors: &[DaqError]) -> String {
    errors
        .iter()
        .map(|err| err.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl DaqError {
    /// Wrap a spectrometer failure.
    pub fn acquisition(err: anyhow::Error) -> Self {
        DaqError::Acquisition(format!("{err:#}"))
    }

    /// Wrap a power meter or wheel failure.
    pub fn instrument(err: anyhow::Error) -> Self {
        DaqError::Instrument(format!("{err:#}"))
    }

    /// Wrap a driver failure while opening a session.
    pub fn device_init(device: impl Into<String>, err: impl std::fmt::Display) -> Self {
        DaqError::DeviceInit {
            device: device.into(),
            reason: err.to_string(),
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            DaqError::Config(_) | DaqError::Configuration(_) => 2,
            DaqError::DeviceInit { .. } | DaqError::FeatureNotEnabled(_) => 3,
            DaqError::Interrupted(_) => 130,
            _ => 1,
        }
    }
}
