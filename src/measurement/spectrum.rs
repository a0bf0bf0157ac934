//! Spectrum value type and derived peak data.

use crate::error::{AppResult, DaqError};
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// One captured spectrum: wavelength axis plus intensity samples.
///
/// Immutable once constructed. The constructor enforces
/// `len(wavelength) == len(intensity) > 0` and a strictly increasing wavelength
/// axis. The wavelength axis is reference counted so corrected copies of a
/// spectrum share it.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    wavelength: Arc<[f64]>,
    intensity: Vec<f64>,
}

/// Peak position of a spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    /// Wavelength of the first maximum, nm
    pub wavelength: f64,
    /// Intensity at that wavelength
    pub intensity: f64,
}

impl Spectrum {
    /// Build a spectrum, validating its invariants.
    pub fn new(wavelength: Vec<f64>, intensity: Vec<f64>) -> AppResult<Self> {
        Self::from_shared(Arc::from(wavelength), intensity)
    }

    fn from_shared(wavelength: Arc<[f64]>, intensity: Vec<f64>) -> AppResult<Self> {
        if wavelength.is_empty() {
            return Err(DaqError::Acquisition("spectrum has no pixels".into()));
        }
        if wavelength.len() != intensity.len() {
            return Err(DaqError::Acquisition(format!(
                "wavelength/intensity length mismatch ({} vs {})",
                wavelength.len(),
                intensity.len()
            )));
        }
        if let Some(idx) = wavelength.windows(2).position(|w| w[1] <= w[0]) {
            return Err(DaqError::Acquisition(format!(
                "wavelength axis not strictly increasing at pixel {}",
                idx + 1
            )));
        }
        Ok(Self {
            wavelength,
            intensity,
        })
    }

    /// Wavelength axis, nm.
    pub fn wavelength(&self) -> &[f64] {
        &self.wavelength
    }

    /// Intensity samples.
    pub fn intensity(&self) -> &[f64] {
        &self.intensity
    }

    /// Number of pixels.
    pub fn len(&self) -> usize {
        self.intensity.len()
    }

    /// Always false for a constructed spectrum.
    pub fn is_empty(&self) -> bool {
        self.intensity.is_empty()
    }

    /// Same wavelength axis with new intensity samples.
    pub fn with_intensity(&self, intensity: Vec<f64>) -> AppResult<Self> {
        if intensity.len() != self.wavelength.len() {
            return Err(DaqError::Acquisition(format!(
                "intensity length {} does not match wavelength axis {}",
                intensity.len(),
                self.wavelength.len()
            )));
        }
        Ok(Self {
            wavelength: Arc::clone(&self.wavelength),
            intensity,
        })
    }

    /// Keep only the pixels selected by `keep`.
    pub(crate) fn select(&self, keep: impl Fn(f64) -> bool) -> AppResult<Self> {
        let (wl, inten): (Vec<f64>, Vec<f64>) = self
            .wavelength
            .iter()
            .zip(self.intensity.iter())
            .filter(|(w, _)| keep(**w))
            .map(|(w, i)| (*w, *i))
            .unzip();
        Self::new(wl, inten)
    }

    /// Peak of the spectrum; ties resolve to the lowest wavelength.
    pub fn peak(&self) -> Peak {
        let mut best = 0;
        for (idx, value) in self.intensity.iter().enumerate().skip(1) {
            if *value > self.intensity[best] {
                best = idx;
            }
        }
        Peak {
            wavelength: self.wavelength[best],
            intensity: self.intensity[best],
        }
    }
}

/// A persisted, corrected capture.
#[derive(Debug, Clone)]
pub struct AcquisitionResult {
    /// Local wall-clock time of the capture
    pub timestamp: DateTime<Local>,
    /// Time since the experiment mode started
    pub elapsed: Duration,
    /// 1-based sample number (steady state only)
    pub sample_index: Option<u32>,
    /// Corrected spectrum
    pub spectrum: Spectrum,
    /// Peak of the corrected spectrum
    pub peak: Peak,
    /// Reference power the spectrum was normalized by, if any
    pub reference_power: Option<f64>,
    /// CSV file the spectrum was written to
    pub csv_path: PathBuf,
}
