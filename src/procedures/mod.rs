//! Calibration procedures run while the orchestrator is configuring.

pub mod mirror_calibration;

pub use mirror_calibration::{calibrate_mirror_slot, MirrorCalibration, SlotReading};
