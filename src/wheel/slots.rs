//! Named wheel positions.

use crate::error::{AppResult, DaqError};
use std::collections::BTreeMap;

/// Slot holding the reference mirror (beam to the power meter, sample dark).
pub const MIRROR: &str = "mirror";
/// Open slot (beam to the sample).
pub const EMPTY: &str = "empty";
/// Slot splitting the beam between sample and power meter.
pub const BEAM_SPLITTER: &str = "beam_splitter";

/// Mapping from slot names to 1-based wheel positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMap {
    slots: BTreeMap<String, u32>,
    slot_count: u32,
}

impl SlotMap {
    /// Validate every mapped position against `slot_count`.
    pub fn new(slots: BTreeMap<String, u32>, slot_count: u32) -> AppResult<Self> {
        if let Some(slot) = slots.values().find(|s| **s == 0 || **s > slot_count) {
            return Err(DaqError::InvalidSlot {
                slot: *slot,
                slot_count,
            });
        }
        Ok(Self { slots, slot_count })
    }

    /// Position of `name`, if mapped.
    pub fn get(&self, name: &str) -> Option<u32> {
        self.slots.get(name).copied()
    }

    /// Position of `name`, or a configuration error naming the missing entry.
    pub fn require(&self, name: &str) -> AppResult<u32> {
        self.get(name).ok_or_else(|| {
            DaqError::Configuration(format!(
                "flywheel.slot_mapping has no '{name}' entry"
            ))
        })
    }

    /// Number of wheel positions.
    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    /// Renumber every slot relative to `origin`, which becomes slot 1.
    ///
    /// Offsets between names are preserved: `new = ((old - origin) mod N) + 1`.
    pub fn rebased(&self, origin: u32) -> Self {
        let n = self.slot_count;
        let slots = self
            .slots
            .iter()
            .map(|(name, old)| (name.clone(), (old + n - origin % n) % n + 1))
            .collect();
        Self {
            slots,
            slot_count: n,
        }
    }

    /// Iterate `(name, slot)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.slots.iter().map(|(name, slot)| (name.as_str(), *slot))
    }
}
