//! Experiment orchestration: the run-state machine and the three modes.
//!
//! - **Steady state**: operator inserts each sample; one corrected capture per sample.
//! - **Degradation**: periodic captures normalized by a reference power, followed by
//!   a best-effort summary of the whole series.
//! - **Pre-tuning**: live view while the operator adjusts the integration time.

pub mod console;
pub mod degradation;
pub mod orchestrator;
pub mod pre_tuning;
pub mod state;
pub mod steady_state;

pub use console::{OperatorConsole, StdinConsole, StopSignal};
pub use orchestrator::{Orchestrator, RunReport};
pub use state::RunState;
