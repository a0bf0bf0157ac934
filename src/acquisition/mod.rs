//! Spectrum acquisition pipeline.
//!
//! A capture is: `avg_count` raw scans → element-wise mean → wavelength mask →
//! optional background subtraction. Normalization by reference power is a separate
//! step used by degradation runs, applied before the background subtraction.

pub mod stream;

use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::SpectrumProducer;
use crate::measurement::Spectrum;

pub use stream::{SpectrumStream, StreamMessage};

/// Inclusive wavelength window. Applied only when both bounds are set.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MaskRange {
    /// Lower bound, nm
    pub min: Option<f64>,
    /// Upper bound, nm
    pub max: Option<f64>,
}

impl MaskRange {
    /// Window with the given bounds.
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    /// Restrict `spectrum` to `min <= wavelength <= max`.
    ///
    /// Passes the spectrum through when either bound is missing. A window that
    /// excludes every pixel is an acquisition error.
    pub fn apply(&self, spectrum: Spectrum) -> AppResult<Spectrum> {
        match (self.min, self.max) {
            (Some(min), Some(max)) => spectrum
                .select(|wl| wl >= min && wl <= max)
                .map_err(|_| {
                    DaqError::Acquisition(format!(
                        "mask [{min}, {max}] nm excludes every pixel"
                    ))
                }),
            _ => Ok(spectrum),
        }
    }
}

/// Element-wise mean of equally sized spectra.
///
/// A single spectrum is returned unchanged.
pub fn average(mut spectra: Vec<Spectrum>) -> AppResult<Spectrum> {
    if spectra.len() <= 1 {
        return spectra
            .pop()
            .ok_or_else(|| DaqError::Acquisition("nothing to average".into()));
    }
    let first = &spectra[0];
    let n = first.len();
    if let Some(bad) = spectra.iter().find(|s| s.len() != n) {
        return Err(DaqError::Acquisition(format!(
            "cannot average spectra of different lengths ({} vs {})",
            n,
            bad.len()
        )));
    }
    let mut sum = vec![0.0; n];
    for spectrum in &spectra {
        for (acc, value) in sum.iter_mut().zip(spectrum.intensity()) {
            *acc += value;
        }
    }
    let count = spectra.len() as f64;
    first.with_intensity(sum.into_iter().map(|v| v / count).collect())
}

/// `max(raw - background, 0)` element-wise.
pub fn subtract_background(raw: &Spectrum, background: &Spectrum) -> AppResult<Spectrum> {
    if raw.len() != background.len() {
        return Err(DaqError::Acquisition(format!(
            "background has {} pixels, spectrum has {}",
            background.len(),
            raw.len()
        )));
    }
    let corrected = raw
        .intensity()
        .iter()
        .zip(background.intensity())
        .map(|(r, b)| (r - b).max(0.0))
        .collect();
    raw.with_intensity(corrected)
}

/// Divide by the reference power when it is positive and finite.
pub fn normalize(spectrum: Spectrum, reference_power: f64) -> AppResult<Spectrum> {
    if !(reference_power.is_finite() && reference_power > 0.0) {
        return Ok(spectrum);
    }
    let scaled = spectrum
        .intensity()
        .iter()
        .map(|v| v / reference_power)
        .collect();
    spectrum.with_intensity(scaled)
}

/// Averaging and masking applied to every capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionPipeline {
    avg_count: u32,
    mask: MaskRange,
}

impl AcquisitionPipeline {
    /// Pipeline averaging `avg_count` scans (at least one) and masking to `mask`.
    pub fn new(avg_count: u32, mask: MaskRange) -> Self {
        Self {
            avg_count: avg_count.max(1),
            mask,
        }
    }

    /// Scans averaged per capture.
    pub fn avg_count(&self) -> u32 {
        self.avg_count
    }

    /// Wavelength window.
    pub fn mask(&self) -> MaskRange {
        self.mask
    }

    /// Averaged, masked capture without background correction.
    pub async fn capture_raw<S>(&self, spectrometer: &S) -> AppResult<Spectrum>
    where
        S: SpectrumProducer + ?Sized,
    {
        let mut scans = Vec::with_capacity(self.avg_count as usize);
        for _ in 0..self.avg_count {
            scans.push(spectrometer.acquire().await.map_err(DaqError::acquisition)?);
        }
        self.mask.apply(average(scans)?)
    }

    /// Background frame: same averaging and masking as a sample capture.
    pub async fn capture_background<S>(&self, spectrometer: &S) -> AppResult<Spectrum>
    where
        S: SpectrumProducer + ?Sized,
    {
        let background = self.capture_raw(spectrometer).await?;
        tracing::debug!(pixels = background.len(), "background captured");
        Ok(background)
    }

    /// Averaged, masked capture with the background subtracted when given.
    pub async fn capture<S>(
        &self,
        spectrometer: &S,
        background: Option<&Spectrum>,
    ) -> AppResult<Spectrum>
    where
        S: SpectrumProducer + ?Sized,
    {
        let raw = self.capture_raw(spectrometer).await?;
        match background {
            Some(bg) => subtract_background(&raw, bg),
            None => Ok(raw),
        }
    }
}
