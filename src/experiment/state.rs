//! Orchestrator run-state machine.

use crate::config::ExperimentType;
use serde::{Deserialize, Serialize};

/// Orchestrator lifecycle state.
///
/// Each state is entered at most once per run. Any failure jumps straight to
/// `ShuttingDown`, so instruments are always released.
///
/// ```text
/// Idle ──> Configuring ──> SteadyState ─┐
///              │       ──> Degradation ─┼──> ShuttingDown ──> Terminated
///              │       ──> PreTuning ───┘         ▲
///              └──────────(failure)───────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// Constructed, not yet run
    Idle,
    /// Checking slot names, applying integration time, calibrating the wheel
    Configuring,
    /// Human-gated multi-sample survey
    SteadyState,
    /// Periodic monitoring
    Degradation,
    /// Live view
    PreTuning,
    /// Releasing instruments
    ShuttingDown,
    /// Finished
    Terminated,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "Idle"),
            RunState::Configuring => write!(f, "Configuring"),
            RunState::SteadyState => write!(f, "SteadyState"),
            RunState::Degradation => write!(f, "Degradation"),
            RunState::PreTuning => write!(f, "PreTuning"),
            RunState::ShuttingDown => write!(f, "ShuttingDown"),
            RunState::Terminated => write!(f, "Terminated"),
        }
    }
}

impl RunState {
    /// Mode state for an experiment type.
    pub fn for_experiment(experiment: ExperimentType) -> Self {
        match experiment {
            ExperimentType::SteadyState => RunState::SteadyState,
            ExperimentType::Degradation => RunState::Degradation,
            ExperimentType::PreTuning => RunState::PreTuning,
        }
    }

    /// True for the three experiment modes.
    pub fn is_mode(&self) -> bool {
        matches!(
            self,
            RunState::SteadyState | RunState::Degradation | RunState::PreTuning
        )
    }

    /// Check if `next` may follow this state.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        match (self, next) {
            (RunState::Idle, RunState::Configuring) => true,
            (RunState::Configuring, next) if next.is_mode() => true,
            (RunState::Configuring, RunState::ShuttingDown) => true,
            (state, RunState::ShuttingDown) if state.is_mode() => true,
            (RunState::ShuttingDown, RunState::Terminated) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let path = [
            RunState::Idle,
            RunState::Configuring,
            RunState::Degradation,
            RunState::ShuttingDown,
            RunState::Terminated,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn failure_during_configuring_goes_to_shutdown() {
        assert!(RunState::Configuring.can_transition_to(RunState::ShuttingDown));
    }

    #[test]
    fn no_way_back() {
        assert!(!RunState::Terminated.can_transition_to(RunState::Configuring));
        assert!(!RunState::SteadyState.can_transition_to(RunState::Degradation));
        assert!(!RunState::Idle.can_transition_to(RunState::SteadyState));
        assert!(!RunState::ShuttingDown.can_transition_to(RunState::Idle));
    }
}
