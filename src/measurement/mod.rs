//! Measurement value types shared by the pipeline, the orchestrator and the data sinks.

pub mod spectrum;

pub use spectrum::{AcquisitionResult, Peak, Spectrum};
