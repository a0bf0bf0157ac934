//! Atomic Hardware Capabilities
//!
//! This module defines fine-grained capability traits that the bench instruments
//! implement. Instead of one monolithic `Instrument` trait, each device implements
//! the capabilities it actually has:
//!
//! - The spectrometer implements: `ExposureControl + SpectrumProducer + Shutdown`
//! - The power meter implements: `Readable + Shutdown` (and optionally `WavelengthControl`)
//! - The filter wheel implements: `Pulsed + Shutdown`
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing
//!
//! Hardware sessions are single-session and non-reentrant. Callers must not
//! overlap calls on the same device; the orchestrator awaits every call before
//! issuing the next one.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn background_frame<S>(spectrometer: &S) -> Result<Spectrum>
//! where
//!     S: ExposureControl + SpectrumProducer,
//! {
//!     spectrometer.set_exposure(0.5).await?;
//!     spectrometer.acquire().await
//! }
//! ```

use crate::measurement::Spectrum;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Capability: Exposure Time Control
///
/// Devices with configurable integration time (spectrometers, cameras).
///
/// # Contract
/// - Exposure is in seconds (not milliseconds)
/// - Setting exposure does not start acquisition
/// - Exposure applies to the next acquisition
#[async_trait]
pub trait ExposureControl: Send + Sync {
    /// Set exposure/integration time
    ///
    /// # Returns
    /// - Ok(()) if exposure set successfully
    /// - Err if value is out of hardware range
    async fn set_exposure(&self, seconds: f64) -> Result<()>;

    /// Get current exposure setting in seconds
    async fn get_exposure(&self) -> Result<f64>;
}

/// Identity reported by a spectrometer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrometerInfo {
    /// Serial number
    pub serial: String,
    /// Model name
    pub model: String,
    /// Detector pixel count
    pub pixels: usize,
    /// Covered wavelength range, nm
    pub wavelength_range: (f64, f64),
}

/// Capability: Spectrum Acquisition
///
/// # Contract
/// - `acquire()` blocks (awaits) until one full scan has been read out
/// - The returned spectrum is raw: no averaging, masking or correction
#[async_trait]
pub trait SpectrumProducer: Send + Sync {
    /// Capture one raw spectrum
    async fn acquire(&self) -> Result<Spectrum>;

    /// Device identity
    fn info(&self) -> SpectrometerInfo;
}

/// Capability: Scalar Readout
///
/// Devices that produce single scalar values. For the power meter the value is
/// optical power in watts.
///
/// # Contract
/// - `read()` performs a measurement and returns immediately
#[async_trait]
pub trait Readable: Send + Sync {
    /// Read current value
    async fn read(&self) -> Result<f64>;
}

/// Capability: Calibration Wavelength
///
/// Power meters correct their responsivity for a configured wavelength.
#[async_trait]
pub trait WavelengthControl: Send + Sync {
    /// Set the correction wavelength in nm
    async fn set_wavelength(&self, nm: f64) -> Result<()>;
}

/// Capability: Relative Pulse Motion
///
/// Devices that can only advance by one position per actuation, with no
/// position feedback (pulse-driven filter wheels).
///
/// # Contract
/// - `pulse()` advances the physical device by exactly one position, cyclically
/// - `pulse()` returns only after the actuator's settle time has elapsed
/// - Position bookkeeping is the caller's job (see [`crate::wheel::WheelTracker`])
#[async_trait]
pub trait Pulsed: Send + Sync {
    /// Trigger one actuator cycle and wait for it to settle
    async fn pulse(&self) -> Result<()>;
}

/// Capability: Session Teardown
///
/// # Contract
/// - Releases the hardware session
/// - Must be safe to call more than once
#[async_trait]
pub trait Shutdown: Send + Sync {
    /// Close the device session
    async fn shutdown(&self) -> Result<()>;
}

// =============================================================================
// Combined Traits (for trait objects)
// =============================================================================

/// Combined trait for spectrometers.
///
/// Implement the individual traits and get this automatically via blanket impl.
pub trait Spectrometer: ExposureControl + SpectrumProducer + Shutdown {}

impl<T: ExposureControl + SpectrumProducer + Shutdown> Spectrometer for T {}

/// Combined trait for power meters.
pub trait PowerMeter: Readable + Shutdown {}

impl<T: Readable + Shutdown> PowerMeter for T {}

/// Combined trait for pulse-driven filter wheels.
pub trait FilterWheel: Pulsed + Shutdown {}

impl<T: Pulsed + Shutdown> FilterWheel for T {}
