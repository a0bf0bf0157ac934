//! Mirror Slot Calibration Procedure
//!
//! Locates the reference mirror on a wheel with no position feedback:
//! 1. Read the power meter at every slot during one full rotation
//! 2. Pick the slot with the highest power (the mirror reflects the full beam)
//! 3. Move there and declare it slot 1 in the tracker
//!
//! After calibration the configured slot map must be rebased so that its
//! "mirror" entry also reads 1 (see [`crate::wheel::SlotMap::rebased`]).

use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::PowerMeter;
use crate::wheel::WheelTracker;
use serde::{Deserialize, Serialize};

/// One power reading taken during the calibration sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlotReading {
    /// Tracked slot when the reading was taken
    pub slot: u32,
    /// Measured power, W
    pub power_w: f64,
}

/// Results from the mirror calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorCalibration {
    /// Every reading, in sweep order
    pub readings: Vec<SlotReading>,

    /// Tracked slot that had the highest power before the reset
    pub mirror_slot: u32,

    /// Power measured at that slot, W
    pub mirror_power_w: f64,
}

impl MirrorCalibration {
    /// Ratio between the mirror reading and the next brightest slot.
    ///
    /// Values close to 1 mean the mirror could not be told apart.
    pub fn contrast(&self) -> Option<f64> {
        let runner_up = self
            .readings
            .iter()
            .filter(|r| r.slot != self.mirror_slot)
            .map(|r| r.power_w)
            .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.max(p))))?;
        (runner_up > 0.0).then(|| self.mirror_power_w / runner_up)
    }
}

/// Sweep the wheel once, move to the brightest slot and reset the tracker to 1.
///
/// Only wheel and power meter errors are propagated.
pub async fn calibrate_mirror_slot(
    wheel: &mut WheelTracker,
    power_meter: &dyn PowerMeter,
) -> AppResult<MirrorCalibration> {
    let slot_count = wheel.slot_count();
    tracing::info!(slot_count, "calibrating wheel: scanning power at each slot");

    let mut readings = Vec::with_capacity(slot_count as usize);
    for _ in 0..slot_count {
        let slot = wheel.current_slot();
        let power_w = power_meter.read().await.map_err(DaqError::instrument)?;
        tracing::debug!(slot, power_w, "calibration reading");
        readings.push(SlotReading { slot, power_w });
        wheel.pulse().await?;
    }

    // Ties go to the first slot scanned.
    let mut best = readings[0];
    for reading in &readings[1..] {
        if reading.power_w > best.power_w {
            best = *reading;
        }
    }

    wheel.advance_to(best.slot).await?;
    wheel.reset(1)?;

    let calibration = MirrorCalibration {
        readings,
        mirror_slot: best.slot,
        mirror_power_w: best.power_w,
    };
    tracing::info!(
        tracked_slot = best.slot,
        power_w = best.power_w,
        contrast = calibration.contrast().unwrap_or(f64::NAN),
        "mirror located; tracker reset to slot 1"
    );
    Ok(calibration)
}
