//! Stored degradation series → offline summary charts

#![cfg(feature = "storage_csv")]

use anyhow::{bail, Result};
use chrono::{Duration as ChronoDuration, Local};
use pl_daq::data::storage::{load_series, SPECTRUM_PREFIX};
use pl_daq::data::summary::{
    summarize_directory, CONTOUR, INTENSITY_MAP, OVERLAY, PEAK_INTENSITY, PEAK_WAVELENGTH,
};
use pl_daq::data::{PlotSink, PngPlotter, SpectrumStore};
use pl_daq::error::DaqError;
use pl_daq::measurement::Spectrum;
use std::path::Path;
use tempfile::tempdir;

/// Gaussian peak drifting to the red and fading with each cycle.
fn degraded(cycle: u32) -> Spectrum {
    let wavelength: Vec<f64> = (0..200).map(|i| 600.0 + 2.0 * i as f64).collect();
    let center = 780.0 + 2.0 * cycle as f64;
    let height = 100.0 / (1.0 + 0.2 * cycle as f64);
    let intensity = wavelength
        .iter()
        .map(|wl| height * (-(wl - center).powi(2) / 800.0).exp())
        .collect();
    Spectrum::new(wavelength, intensity).unwrap()
}

fn write_series(store: &SpectrumStore, cycles: u32) {
    let start = Local::now();
    for cycle in 1..=cycles {
        let timestamp = start + ChronoDuration::seconds(30 * i64::from(cycle));
        store.write_cycle(cycle, &timestamp, &degraded(cycle)).unwrap();
    }
}

#[test]
fn test_store_round_trip_keeps_order_and_values() {
    let dir = tempdir().unwrap();
    let store = SpectrumStore::create(dir.path()).unwrap();
    write_series(&store, 3);

    let stored = load_series(store.csv_dir(), SPECTRUM_PREFIX).unwrap();
    assert_eq!(stored.len(), 3);
    for (i, entry) in stored.iter().enumerate() {
        let expected = degraded(i as u32 + 1);
        assert_eq!(entry.spectrum.len(), expected.len());
        assert!((entry.spectrum.peak().wavelength - expected.peak().wavelength).abs() < 1e-9);
        assert!(entry.time_of_day_s.is_some());
    }
}

#[test]
fn test_offline_summary_writes_every_chart() {
    let dir = tempdir().unwrap();
    let store = SpectrumStore::create(dir.path()).unwrap();
    write_series(&store, 6);

    let report = summarize_directory(
        store.csv_dir(),
        SPECTRUM_PREFIX,
        store.plot_dir(),
        4,
        &PngPlotter,
    )
    .unwrap();

    assert_eq!(report.spectra, 6);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    for artifact in [INTENSITY_MAP, PEAK_INTENSITY, PEAK_WAVELENGTH, CONTOUR, OVERLAY] {
        let path = store.plot_path(artifact);
        assert!(path.is_file(), "{} missing", path.display());
        let png = image::open(&path).unwrap();
        assert!(png.width() > 0 && png.height() > 0);
    }
}

/// Plot sink whose line charts always fail.
struct NoTraces;

impl PlotSink for NoTraces {
    fn spectrum(&self, _path: &Path, _spectrum: &Spectrum) -> Result<()> {
        Ok(())
    }

    fn overlay(&self, _path: &Path, _spectra: &[&Spectrum]) -> Result<()> {
        Ok(())
    }

    fn trace(&self, _path: &Path, _x: &[f64], _y: &[f64]) -> Result<()> {
        bail!("line renderer unavailable")
    }

    fn intensity_map(
        &self,
        _path: &Path,
        _times: &[f64],
        _spectra: &[Spectrum],
        _levels: Option<usize>,
    ) -> Result<()> {
        Ok(())
    }
}

#[test]
fn test_failed_artifacts_become_warnings() {
    let dir = tempdir().unwrap();
    let store = SpectrumStore::create(dir.path()).unwrap();
    write_series(&store, 3);

    let report =
        summarize_directory(store.csv_dir(), SPECTRUM_PREFIX, store.plot_dir(), 10, &NoTraces)
            .unwrap();

    let failed: Vec<&str> = report.warnings.iter().map(|w| w.artifact.as_str()).collect();
    assert_eq!(failed, vec![PEAK_INTENSITY, PEAK_WAVELENGTH]);
    assert!(report.warnings[0].message.contains("line renderer"));
}

#[test]
fn test_summary_of_empty_directory_is_a_storage_error() {
    let dir = tempdir().unwrap();
    let store = SpectrumStore::create(dir.path()).unwrap();
    let err = summarize_directory(
        store.csv_dir(),
        SPECTRUM_PREFIX,
        store.plot_dir(),
        10,
        &PngPlotter,
    )
    .unwrap_err();
    assert!(matches!(err, DaqError::Storage(_)));
}
