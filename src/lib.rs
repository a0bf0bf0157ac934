//! # PL DAQ
//!
//! Automated photoluminescence acquisition: a CCD spectrometer, a pulse-driven
//! filter wheel and an optical power meter, orchestrated through three experiment
//! modes.
//!
//! ## Crate Structure
//!
//! - **`config`**: experiment and instrument-setup configuration (figment: TOML/JSON + env).
//! - **`error`**: the `DaqError` enum and process exit codes.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`hardware`**: capability traits, simulated and VISA adapters, and `Instruments`,
//!   which opens and closes the whole bench.
//! - **`wheel`**: named slot mapping and the open-loop position tracker.
//! - **`procedures`**: mirror-slot calibration with the power meter.
//! - **`acquisition`**: averaging, masking, background subtraction, normalization and
//!   the live capture stream.
//! - **`measurement`**: `Spectrum` and `AcquisitionResult`.
//! - **`data`**: CSV persistence, PNG charts and end-of-run summaries.
//! - **`experiment`**: the run-state machine and the steady-state, degradation and
//!   pre-tuning modes.

pub mod acquisition;
pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod hardware;
pub mod logging;
pub mod measurement;
pub mod procedures;
pub mod wheel;
