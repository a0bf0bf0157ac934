//! Integration tests for the open-loop wheel tracker and the slot map
//!
//! The simulated bench keeps the true physical position, so these tests can check
//! what the tracker believes against what the wheel actually did.

mod common;

use common::{layout, Rig};
use pl_daq::error::DaqError;
use pl_daq::wheel::{slots, SlotMap};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_advance_to_current_slot_is_free() {
    let rig = Rig::new();
    let mut tracker = rig.tracker();

    assert_eq!(tracker.advance_to(1).await.unwrap(), 1);
    assert_eq!(rig.wheel.pulse_count(), 0);
    assert_eq!(tracker.pulses_issued(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_advance_moves_forward_and_waits_for_each_pulse() {
    let rig = Rig::new();
    let mut tracker = rig.tracker();

    let start = Instant::now();
    assert_eq!(tracker.advance_to(4).await.unwrap(), 4);
    let elapsed = start.elapsed();

    assert_eq!(rig.wheel.pulse_count(), 3);
    assert_eq!(rig.bench.physical_slot(), 4);
    // 3 pulses at 1.2 s settle each
    assert!(
        elapsed >= Duration::from_millis(3600) && elapsed < Duration::from_millis(3700),
        "expected ~3.6 s, got {elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_wrap_around_after_trusted_reset() {
    let rig = Rig::new();
    let mut tracker = rig.tracker();

    // The tracker is told slot 5 while the wheel physically sits at 1.
    tracker.reset(5).unwrap();
    assert_eq!(rig.wheel.pulse_count(), 0);

    assert_eq!(tracker.advance_to(2).await.unwrap(), 2);
    assert_eq!(rig.wheel.pulse_count(), 3);
    assert_eq!(rig.bench.physical_slot(), 4);
    assert_eq!(tracker.current_slot(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_slots_issue_no_pulses() {
    let rig = Rig::new();
    let mut tracker = rig.tracker();

    for slot in [0, 7] {
        let err = tracker.advance_to(slot).await.unwrap_err();
        assert!(matches!(err, DaqError::InvalidSlot { slot: s, slot_count: 6 } if s == slot));
    }
    assert!(matches!(tracker.reset(9), Err(DaqError::InvalidSlot { .. })));
    assert_eq!(rig.wheel.pulse_count(), 0);
    assert_eq!(tracker.current_slot(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pulse_after_shutdown_is_an_instrument_error() {
    let rig = Rig::new();
    let mut tracker = rig.tracker();
    tracker.shutdown().await.unwrap();

    let err = tracker.advance_to(3).await.unwrap_err();
    assert!(matches!(err, DaqError::Instrument(_)));
    assert_eq!(tracker.current_slot(), 1);
}

#[test]
fn test_slot_map_rejects_positions_outside_the_wheel() {
    let err = SlotMap::new(layout(1, 2, 7), 6).unwrap_err();
    assert!(matches!(err, DaqError::InvalidSlot { slot: 7, slot_count: 6 }));
}

#[test]
fn test_rebase_keeps_offsets_from_the_mirror() {
    let map = SlotMap::new(layout(5, 1, 3), 6).unwrap();
    let rebased = map.rebased(5);

    assert_eq!(rebased.get(slots::MIRROR), Some(1));
    // empty sits two pulses after the mirror (5 -> 6 -> 1)
    assert_eq!(rebased.get(slots::EMPTY), Some(3));
    // beam splitter sits four pulses after it (5 -> 6 -> 1 -> 2 -> 3)
    assert_eq!(rebased.get(slots::BEAM_SPLITTER), Some(5));
}

#[test]
fn test_missing_slot_name_is_a_configuration_error() {
    let map = SlotMap::new(layout(1, 2, 3), 6).unwrap();
    assert!(matches!(
        map.require("polarizer"),
        Err(DaqError::Configuration(_))
    ));
}
