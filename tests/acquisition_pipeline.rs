//! Integration tests for the acquisition pipeline against the simulated spectrometer

mod common;

use common::Rig;
use pl_daq::acquisition::{normalize, subtract_background, AcquisitionPipeline, MaskRange};
use pl_daq::error::DaqError;
use pl_daq::hardware::capabilities::SpectrumProducer;
use pl_daq::measurement::Spectrum;
use pl_daq::wheel::slots;

fn unmasked(avg_count: u32) -> AcquisitionPipeline {
    AcquisitionPipeline::new(avg_count, MaskRange::default())
}

#[tokio::test(start_paused = true)]
async fn test_single_capture_is_bit_identical_to_one_scan() {
    // Two rigs with the same seed produce the same noise sequence.
    let a = Rig::new();
    let b = Rig::new();

    let direct = a.spectrometer.acquire().await.unwrap();
    let captured = unmasked(1).capture_raw(b.spectrometer.as_ref()).await.unwrap();

    assert_eq!(direct, captured);
    assert_eq!(b.spectrometer.acquisition_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_averaging_takes_one_scan_per_count_and_reduces_noise() {
    let rig = Rig::new();
    let single = unmasked(1).capture_raw(rig.spectrometer.as_ref()).await.unwrap();
    let averaged = unmasked(16).capture_raw(rig.spectrometer.as_ref()).await.unwrap();
    assert_eq!(rig.spectrometer.acquisition_count(), 17);

    // The first 40 pixels (200-270 nm) only hold ambient light plus noise.
    let spread = |s: &Spectrum| {
        let tail = &s.intensity()[..40];
        let mean = tail.iter().sum::<f64>() / tail.len() as f64;
        tail.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / tail.len() as f64
    };
    assert!(spread(&averaged) < spread(&single));
}

#[tokio::test(start_paused = true)]
async fn test_mask_keeps_inclusive_window() {
    let rig = Rig::new();
    let pipeline = AcquisitionPipeline::new(1, MaskRange::new(Some(600.0), Some(1000.0)));
    let spectrum = pipeline.capture_raw(rig.spectrometer.as_ref()).await.unwrap();

    let wl = spectrum.wavelength();
    assert!(!wl.is_empty());
    assert!(wl.iter().all(|w| (600.0..=1000.0).contains(w)));
    assert!(spectrum.len() < 512);
}

#[tokio::test(start_paused = true)]
async fn test_mask_with_one_bound_passes_through() {
    let rig = Rig::new();
    let pipeline = AcquisitionPipeline::new(1, MaskRange::new(Some(600.0), None));
    let spectrum = pipeline.capture_raw(rig.spectrometer.as_ref()).await.unwrap();
    assert_eq!(spectrum.len(), 512);
}

#[tokio::test(start_paused = true)]
async fn test_mask_outside_detector_range_is_an_acquisition_error() {
    let rig = Rig::new();
    let pipeline = AcquisitionPipeline::new(1, MaskRange::new(Some(1500.0), Some(1600.0)));
    let err = pipeline
        .capture_raw(rig.spectrometer.as_ref())
        .await
        .unwrap_err();
    assert!(matches!(err, DaqError::Acquisition(_)));
}

#[tokio::test(start_paused = true)]
async fn test_mirror_background_leaves_emission_peak() {
    let rig = Rig::new();
    let mut tracker = rig.tracker();
    let map = rig.slots();
    let pipeline = unmasked(4);

    tracker.advance_to(map.require(slots::MIRROR).unwrap()).await.unwrap();
    let background = pipeline
        .capture_background(rig.spectrometer.as_ref())
        .await
        .unwrap();
    assert!(background.peak().intensity < 20.0);

    tracker.advance_to(map.require(slots::EMPTY).unwrap()).await.unwrap();
    let corrected = pipeline
        .capture(rig.spectrometer.as_ref(), Some(&background))
        .await
        .unwrap();

    assert!(corrected.intensity().iter().all(|v| *v >= 0.0));
    let peak = corrected.peak();
    assert!((peak.wavelength - 800.0).abs() < 10.0, "peak at {}", peak.wavelength);
    assert!(peak.intensity > 80.0);
}

#[test]
fn test_normalize_then_subtract_order() {
    let wl = vec![500.0, 510.0, 520.0];
    let raw = Spectrum::new(wl.clone(), vec![10.0, 20.0, 30.0]).unwrap();
    let background = Spectrum::new(wl, vec![4.0, 4.0, 4.0]).unwrap();

    let corrected = subtract_background(&normalize(raw, 2.0).unwrap(), &background).unwrap();
    assert_eq!(corrected.intensity(), &[1.0, 6.0, 11.0]);
}

#[test]
fn test_non_positive_reference_power_leaves_spectrum_unchanged() {
    let raw = Spectrum::new(vec![1.0, 2.0], vec![3.0, 4.0]).unwrap();
    assert_eq!(normalize(raw.clone(), 0.0).unwrap(), raw);
    assert_eq!(normalize(raw.clone(), -1.0).unwrap(), raw);
    assert_eq!(normalize(raw.clone(), f64::NAN).unwrap(), raw);
}
