//! Integration tests for mirror-slot calibration on the simulated bench

mod common;

use common::Rig;
use pl_daq::error::DaqError;
use pl_daq::procedures::calibrate_mirror_slot;
use pl_daq::wheel::slots;
use std::sync::Arc;

#[tokio::test(start_paused = true)]
async fn test_calibration_finds_mirror_at_slot_three() {
    let rig = Rig::with_layout(3, 4, 5);
    let mut tracker = rig.tracker();

    let calibration = calibrate_mirror_slot(&mut tracker, rig.power_meter.as_ref())
        .await
        .unwrap();

    assert_eq!(calibration.readings.len(), 6);
    assert_eq!(calibration.mirror_slot, 3);
    assert!(calibration.contrast().unwrap() > 1.5);

    // One sweep (6 pulses) plus 2 to come back to the mirror
    assert_eq!(rig.wheel.pulse_count(), 8);
    assert_eq!(rig.bench.physical_slot(), 3);
    assert_eq!(tracker.current_slot(), 1);
    assert_eq!(rig.power_meter.read_count(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_rebased_map_drives_the_wheel_to_the_right_optics() {
    let rig = Rig::with_layout(3, 4, 5);
    let mut tracker = rig.tracker();
    let calibration = calibrate_mirror_slot(&mut tracker, rig.power_meter.as_ref())
        .await
        .unwrap();
    let map = rig.slots().rebased(calibration.mirror_slot);
    let pulses_after_calibration = rig.wheel.pulse_count();

    // Already at the mirror: free
    tracker.advance_to(map.require(slots::MIRROR).unwrap()).await.unwrap();
    assert_eq!(rig.wheel.pulse_count(), pulses_after_calibration);

    tracker.advance_to(map.require(slots::EMPTY).unwrap()).await.unwrap();
    assert_eq!(rig.bench.physical_slot(), 4);

    tracker
        .advance_to(map.require(slots::BEAM_SPLITTER).unwrap())
        .await
        .unwrap();
    assert_eq!(rig.bench.physical_slot(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_conventional_layout_needs_no_rebase() {
    let rig = Rig::new();
    let mut tracker = rig.tracker();
    let calibration = calibrate_mirror_slot(&mut tracker, rig.power_meter.as_ref())
        .await
        .unwrap();

    assert_eq!(calibration.mirror_slot, 1);
    assert_eq!(rig.wheel.pulse_count(), 6);
    assert_eq!(rig.slots().rebased(1), rig.slots());
}

#[tokio::test(start_paused = true)]
async fn test_power_meter_failure_propagates() {
    let rig = Rig::new();
    let mut tracker = rig.tracker();
    let meter = Arc::new(common::FaultyPowerMeter::new(false));

    let err = calibrate_mirror_slot(&mut tracker, meter.as_ref())
        .await
        .unwrap_err();
    assert!(matches!(err, DaqError::Instrument(ref msg) if msg.contains("sensor head")));
    assert_eq!(rig.wheel.pulse_count(), 0);
}
