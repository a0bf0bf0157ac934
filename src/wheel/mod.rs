//! Filter wheel position model: named slots and the pulse tracker.

pub mod slots;
pub mod tracker;

pub use slots::SlotMap;
pub use tracker::WheelTracker;
