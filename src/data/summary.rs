//! End-of-run summary for a degradation series.
//!
//! Every artifact is attempted independently. A failure never aborts the batch; it
//! becomes a [`PostProcessingWarning`] that the caller reports alongside the run.

use crate::data::plot::PlotSink;
use crate::data::storage::{load_series, StoredSpectrum};
use crate::error::{AppResult, DaqError};
use crate::measurement::{AcquisitionResult, Spectrum};
use std::fmt;
use std::path::Path;

/// Wavelength × time surface.
pub const INTENSITY_MAP: &str = "pl_intensity_map.png";
/// Peak intensity trace.
pub const PEAK_INTENSITY: &str = "peak_intensity_vs_time.png";
/// Peak wavelength trace.
pub const PEAK_WAVELENGTH: &str = "peak_wavelength_vs_time.png";
/// Filled contour of the surface.
pub const CONTOUR: &str = "pl_contour_plot.png";
/// Evenly sampled spectra on shared axes.
pub const OVERLAY: &str = "wavelength_vs_intensity_overlay.png";

const CONTOUR_LEVELS: usize = 20;
const SECONDS_PER_DAY: f64 = 86_400.0;

/// A summary artifact that could not be produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PostProcessingWarning {
    /// File name of the artifact
    pub artifact: String,
    /// Why it failed
    pub message: String,
}

impl fmt::Display for PostProcessingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.artifact, self.message)
    }
}

/// Spectra with their acquisition times in seconds from the first one.
#[derive(Debug, Clone, Default)]
pub struct TimeSeries {
    /// Seconds since the start of the series, non-decreasing
    pub times_s: Vec<f64>,
    /// Spectrum at each time
    pub spectra: Vec<Spectrum>,
}

impl TimeSeries {
    /// Series from in-memory results, timed by elapsed run time.
    pub fn from_results(results: &[AcquisitionResult]) -> Self {
        Self {
            times_s: results.iter().map(|r| r.elapsed.as_secs_f64()).collect(),
            spectra: results.iter().map(|r| r.spectrum.clone()).collect(),
        }
    }

    /// Series from stored files, timed by the clock time in their names.
    ///
    /// Passing midnight is handled by assuming time never runs backwards. Files
    /// without a parsable time fall back to their position in the series.
    pub fn from_stored(stored: Vec<StoredSpectrum>) -> Self {
        let all_timed = stored.iter().all(|s| s.time_of_day_s.is_some());
        let mut times_s = Vec::with_capacity(stored.len());
        let mut spectra = Vec::with_capacity(stored.len());
        let mut day_offset = 0.0;
        let mut previous: Option<f64> = None;
        let mut start = None;

        for (idx, entry) in stored.into_iter().enumerate() {
            let t = match entry.time_of_day_s.filter(|_| all_timed) {
                Some(raw) => {
                    if previous.is_some_and(|p| raw < p) {
                        day_offset += SECONDS_PER_DAY;
                    }
                    previous = Some(raw);
                    raw + day_offset
                }
                None => idx as f64,
            };
            let t0 = *start.get_or_insert(t);
            times_s.push(t - t0);
            spectra.push(entry.spectrum);
        }
        Self { times_s, spectra }
    }

    /// Number of spectra.
    pub fn len(&self) -> usize {
        self.spectra.len()
    }

    /// True when the series holds no spectra.
    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }
}

/// Indices `floor(i * (n - 1) / (m - 1))` for `i in 0..m`, `m = min(k, n)`.
pub fn evenly_spaced_indices(n: usize, k: usize) -> Vec<usize> {
    let m = k.min(n);
    match m {
        0 => Vec::new(),
        1 => vec![0],
        _ => (0..m).map(|i| i * (n - 1) / (m - 1)).collect(),
    }
}

/// Render every summary chart into `plot_dir`.
pub fn render_summary(
    plotter: &dyn PlotSink,
    plot_dir: &Path,
    series: &TimeSeries,
    overlay_count: usize,
) -> Vec<PostProcessingWarning> {
    let peaks: Vec<_> = series.spectra.iter().map(Spectrum::peak).collect();
    let peak_intensity: Vec<f64> = peaks.iter().map(|p| p.intensity).collect();
    let peak_wavelength: Vec<f64> = peaks.iter().map(|p| p.wavelength).collect();
    let overlay: Vec<&Spectrum> = evenly_spaced_indices(series.len(), overlay_count)
        .into_iter()
        .map(|i| &series.spectra[i])
        .collect();

    let attempts: [(&str, Box<dyn Fn(&Path) -> anyhow::Result<()> + '_>); 5] = [
        (
            INTENSITY_MAP,
            Box::new(|p: &Path| plotter.intensity_map(p, &series.times_s, &series.spectra, None)),
        ),
        (
            PEAK_INTENSITY,
            Box::new(|p: &Path| plotter.trace(p, &series.times_s, &peak_intensity)),
        ),
        (
            PEAK_WAVELENGTH,
            Box::new(|p: &Path| plotter.trace(p, &series.times_s, &peak_wavelength)),
        ),
        (
            CONTOUR,
            Box::new(|p: &Path| {
                plotter.intensity_map(p, &series.times_s, &series.spectra, Some(CONTOUR_LEVELS))
            }),
        ),
        (OVERLAY, Box::new(|p: &Path| plotter.overlay(p, &overlay))),
    ];

    let mut warnings = Vec::new();
    for (artifact, render) in attempts.iter() {
        if let Err(err) = render(&plot_dir.join(artifact)) {
            tracing::warn!(artifact, error = %err, "summary artifact skipped");
            warnings.push(PostProcessingWarning {
                artifact: artifact.to_string(),
                message: format!("{err:#}"),
            });
        }
    }
    if warnings.is_empty() {
        tracing::info!(dir = %plot_dir.display(), spectra = series.len(), "summary plots saved");
    }
    warnings
}

/// Outcome of an offline summary.
#[derive(Debug, Clone)]
pub struct SummaryReport {
    /// Spectra loaded
    pub spectra: usize,
    /// Artifacts that failed
    pub warnings: Vec<PostProcessingWarning>,
}

/// Rebuild the summary from spectrum files in `csv_dir`.
pub fn summarize_directory(
    csv_dir: &Path,
    prefix: &str,
    plot_dir: &Path,
    overlay_count: usize,
    plotter: &dyn PlotSink,
) -> AppResult<SummaryReport> {
    let stored = load_series(csv_dir, prefix)?;
    if stored.is_empty() {
        return Err(DaqError::Storage(format!(
            "no '{prefix}*.csv' spectra found in '{}'",
            csv_dir.display()
        )));
    }
    std::fs::create_dir_all(plot_dir)?;
    let series = TimeSeries::from_stored(stored);
    let warnings = render_summary(plotter, plot_dir, &series, overlay_count);
    Ok(SummaryReport {
        spectra: series.len(),
        warnings,
    })
}
