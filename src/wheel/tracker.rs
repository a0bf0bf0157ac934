//! Software position tracking for a pulse-driven filter wheel.
//!
//! The wheel has no position feedback: every pulse advances it by one slot and the
//! tracker mirrors that motion in software. If something else moves the wheel the
//! model drifts silently; re-running mirror calibration is the way to re-sync.

use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::FilterWheel;
use std::sync::Arc;

/// Tracked position of a pulse-driven wheel.
///
/// Owned by the orchestrator and mutated only through `&mut self`.
pub struct WheelTracker {
    wheel: Arc<dyn FilterWheel>,
    slot_count: u32,
    current: u32,
    pulses_issued: u32,
    #[cfg(test)]
    stalled: bool,
}

impl WheelTracker {
    /// Tracker assuming the wheel starts at slot 1.
    pub fn new(wheel: Arc<dyn FilterWheel>, slot_count: u32) -> AppResult<Self> {
        if slot_count == 0 {
            return Err(DaqError::Configuration(
                "wheel needs at least one slot".into(),
            ));
        }
        Ok(Self {
            wheel,
            slot_count,
            current: 1,
            pulses_issued: 0,
            #[cfg(test)]
            stalled: false,
        })
    }

    /// Tracked slot, 1-based.
    pub fn current_slot(&self) -> u32 {
        self.current
    }

    /// Number of wheel positions.
    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    /// Pulses requested through this tracker since it was created.
    pub fn pulses_issued(&self) -> u32 {
        self.pulses_issued
    }

    fn check_slot(&self, slot: u32) -> AppResult<()> {
        if slot == 0 || slot > self.slot_count {
            return Err(DaqError::InvalidSlot {
                slot,
                slot_count: self.slot_count,
            });
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn tracks_motion(&self) -> bool {
        true
    }

    #[cfg(test)]
    fn tracks_motion(&self) -> bool {
        !self.stalled
    }

    /// Advance the wheel by one slot and return the new tracked position.
    pub async fn pulse(&mut self) -> AppResult<u32> {
        self.wheel.pulse().await.map_err(DaqError::instrument)?;
        self.pulses_issued += 1;
        if !self.tracks_motion() {
            return Ok(self.current);
        }
        self.current = self.current % self.slot_count + 1;
        tracing::debug!(slot = self.current, "wheel pulsed");
        Ok(self.current)
    }

    /// Rotate forward until the tracked position equals `target`.
    ///
    /// Issues no pulse when already there and at most `slot_count` pulses otherwise.
    pub async fn advance_to(&mut self, target: u32) -> AppResult<u32> {
        self.check_slot(target)?;
        if target == self.current {
            return Ok(self.current);
        }
        let mut attempts = 0;
        while self.current != target && attempts < self.slot_count {
            self.pulse().await?;
            attempts += 1;
        }
        if self.current != target {
            return Err(DaqError::UnreachableSlot {
                target,
                attempts,
                tracked: self.current,
            });
        }
        tracing::debug!(slot = target, pulses = attempts, "wheel in position");
        Ok(self.current)
    }

    /// Overwrite the tracked position with a known physical slot. No motion.
    pub fn reset(&mut self, known_slot: u32) -> AppResult<()> {
        self.check_slot(known_slot)?;
        self.current = known_slot;
        Ok(())
    }

    /// Close the wheel session.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.wheel.shutdown().await.map_err(DaqError::instrument)
    }
}
