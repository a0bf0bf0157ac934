//! Persistence and diagnostic output: spectrum CSV files, charts, and the
//! end-of-run summary.

pub mod plot;
pub mod storage;
pub mod summary;

pub use plot::{NullPlotter, PlotSink, PngPlotter};
pub use storage::SpectrumStore;
pub use summary::{PostProcessingWarning, TimeSeries};
