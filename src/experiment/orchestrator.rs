//! Experiment orchestrator.
//!
//! Owns the instruments, the slot map and the output sinks for one run, drives the
//! run-state machine, and guarantees that every instrument is shut down no matter
//! where the run stopped.

use crate::acquisition::AcquisitionPipeline;
use crate::config::{ExperimentConfig, ExperimentType, FlywheelMode, Normalization};
use crate::data::{NullPlotter, PlotSink, PostProcessingWarning, SpectrumStore};
use crate::error::{AppResult, DaqError};
use crate::experiment::console::{OperatorConsole, StopSignal};
use crate::experiment::state::RunState;
use crate::hardware::Instruments;
use crate::measurement::{AcquisitionResult, Spectrum};
use crate::procedures::{calibrate_mirror_slot, MirrorCalibration};
use crate::wheel::{slots, SlotMap};
use std::path::Path;
use std::sync::Arc;

/// File the latest wheel calibration is recorded in, below the save directory.
pub const CALIBRATION_FILE: &str = "flywheel_calibration.json";

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Mode that ran
    pub experiment: ExperimentType,
    /// Persisted captures in acquisition order
    pub results: Vec<AcquisitionResult>,
    /// Background frames captured
    pub background_captures: u32,
    /// Live frames shown (pre-tuning)
    pub frames_displayed: u64,
    /// Summary artifacts that could not be produced
    pub warnings: Vec<PostProcessingWarning>,
    /// Wheel calibration performed while configuring
    pub calibration: Option<MirrorCalibration>,
}

impl RunReport {
    pub(super) fn new(experiment: ExperimentType) -> Self {
        Self {
            experiment,
            results: Vec::new(),
            background_captures: 0,
            frames_displayed: 0,
            warnings: Vec::new(),
            calibration: None,
        }
    }
}

/// Drives one experiment run from configuration to shutdown.
pub struct Orchestrator {
    pub(super) config: ExperimentConfig,
    pub(super) instruments: Instruments,
    pub(super) slots: SlotMap,
    pub(super) store: SpectrumStore,
    pub(super) plotter: Arc<dyn PlotSink>,
    pub(super) console: Arc<dyn OperatorConsole>,
    pub(super) stop: StopSignal,
    pub(super) background_captures: u32,
    state: RunState,
    history: Vec<RunState>,
    calibration: Option<MirrorCalibration>,
}

impl Orchestrator {
    /// Orchestrator in `Idle`, with output directories created.
    pub fn new(
        config: ExperimentConfig,
        instruments: Instruments,
        slots: SlotMap,
        console: Arc<dyn OperatorConsole>,
    ) -> AppResult<Self> {
        let store = SpectrumStore::create(&config.save_directory)?;
        Ok(Self {
            config,
            instruments,
            slots,
            store,
            plotter: Arc::new(NullPlotter),
            console,
            stop: StopSignal::new(),
            background_captures: 0,
            state: RunState::Idle,
            history: vec![RunState::Idle],
            calibration: None,
        })
    }

    /// Render charts with `plotter`.
    pub fn with_plotter(mut self, plotter: Arc<dyn PlotSink>) -> Self {
        self.plotter = plotter;
        self
    }

    /// Observe `stop` for interrupts.
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Current state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Every state entered so far, in order.
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    /// Current name→slot mapping (rebased after calibration).
    pub fn slots(&self) -> &SlotMap {
        &self.slots
    }

    /// Tracked wheel slot.
    pub fn wheel_slot(&self) -> u32 {
        self.instruments.wheel.current_slot()
    }

    /// Output directories.
    pub fn store(&self) -> &SpectrumStore {
        &self.store
    }

    fn transition(&mut self, next: RunState) -> AppResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(DaqError::InvalidState(format!(
                "cannot go from {} to {}",
                self.state, next
            )));
        }
        tracing::info!(from = %self.state, to = %next, "run state");
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Run the configured experiment, then shut every instrument down.
    ///
    /// A run error takes precedence over shutdown errors, which are then only
    /// logged. Only an orchestrator in `Idle` can run.
    pub async fn run(&mut self) -> AppResult<RunReport> {
        if self.state != RunState::Idle {
            return Err(DaqError::InvalidState(format!(
                "run() called in state {}; an orchestrator runs once",
                self.state
            )));
        }

        let outcome = self.execute().await;
        if let Err(err) = &outcome {
            tracing::error!(error = %err, state = %self.state, "run failed");
        }

        self.transition(RunState::ShuttingDown)?;
        let shutdown = self.instruments.shutdown().await;
        self.transition(RunState::Terminated)?;

        match (outcome, shutdown) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(shutdown_err)) => Err(shutdown_err),
            (Err(run_err), Ok(())) => Err(run_err),
            (Err(run_err), Err(shutdown_err)) => {
                tracing::error!(error = %shutdown_err, "shutdown after failed run also failed");
                Err(run_err)
            }
        }
    }

    async fn execute(&mut self) -> AppResult<RunReport> {
        self.transition(RunState::Configuring)?;
        self.configure().await?;

        let experiment = self.config.experiment_type;
        self.transition(RunState::for_experiment(experiment))?;
        let mut report = match experiment {
            ExperimentType::SteadyState => self.run_steady_state().await?,
            ExperimentType::Degradation => self.run_degradation().await?,
            ExperimentType::PreTuning => self.run_pre_tuning().await?,
        };
        report.background_captures = self.background_captures;
        report.calibration = self.calibration.clone();
        Ok(report)
    }

    /// Slot names the selected mode will move to.
    fn required_slots(&self) -> Vec<&'static str> {
        let background = self.config.background_enabled();
        match self.config.experiment_type {
            ExperimentType::SteadyState if background => vec![slots::MIRROR, slots::EMPTY],
            ExperimentType::SteadyState | ExperimentType::PreTuning => vec![slots::EMPTY],
            ExperimentType::Degradation => {
                if self.config.flywheel_mode() == FlywheelMode::Skip {
                    return Vec::new();
                }
                let mut names = match self.config.normalization() {
                    Normalization::Mirror => vec![slots::MIRROR, slots::EMPTY],
                    Normalization::BeamSplitter => vec![slots::BEAM_SPLITTER],
                    Normalization::None => vec![slots::EMPTY],
                };
                if background && !names.contains(&slots::MIRROR) {
                    names.push(slots::MIRROR);
                }
                names
            }
        }
    }

    fn wheel_in_use(&self) -> bool {
        !(self.config.experiment_type == ExperimentType::Degradation
            && self.config.flywheel_mode() == FlywheelMode::Skip)
    }

    async fn configure(&mut self) -> AppResult<()> {
        for name in self.required_slots() {
            self.slots.require(name)?;
        }

        let info = self.instruments.spectrometer.info();
        tracing::info!(
            model = %info.model,
            serial = %info.serial,
            pixels = info.pixels,
            range_nm = ?info.wavelength_range,
            "spectrometer ready"
        );

        let seconds = self.config.integration_time_s();
        self.instruments
            .spectrometer
            .set_exposure(seconds)
            .await
            .map_err(DaqError::acquisition)?;
        tracing::info!(integration_time_ms = self.config.integration_time_ms, "integration time set");

        if self.config.auto_configure_flywheel && self.wheel_in_use() {
            let calibration = self.recalibrate_wheel().await?;
            self.calibration = Some(calibration);
        }
        Ok(())
    }

    /// Locate the mirror with the power meter and re-sync the tracker and slot map.
    ///
    /// This is the recovery path when the wheel may have been moved by hand.
    pub async fn recalibrate_wheel(&mut self) -> AppResult<MirrorCalibration> {
        let calibration = calibrate_mirror_slot(
            &mut self.instruments.wheel,
            self.instruments.power_meter.as_ref(),
        )
        .await?;

        match self.slots.get(slots::MIRROR) {
            Some(mirror) => {
                self.slots = self.slots.rebased(mirror);
                tracing::info!(slots = ?self.slots.iter().collect::<Vec<_>>(), "slot map rebased on mirror");
            }
            None => tracing::warn!("slot map has no 'mirror' entry; names left as configured"),
        }

        self.record_calibration(&calibration);
        Ok(calibration)
    }

    fn record_calibration(&self, calibration: &MirrorCalibration) {
        let path = self.config.save_directory.join(CALIBRATION_FILE);
        let written = serde_json::to_string_pretty(calibration)
            .map_err(anyhow::Error::from)
            .and_then(|json| std::fs::write(&path, json).map_err(anyhow::Error::from));
        if let Err(err) = written {
            tracing::warn!(path = %path.display(), error = %err, "could not record wheel calibration");
        }
    }

    // -------------------------------------------------------------------------
    // Helpers shared by the mode loops
    // -------------------------------------------------------------------------

    pub(super) fn pipeline(&self) -> AcquisitionPipeline {
        AcquisitionPipeline::new(self.config.effective_average_count(), self.config.mask())
    }

    /// Move to a named slot. Returns whether the wheel moved.
    pub(super) async fn move_to(&mut self, name: &str) -> AppResult<bool> {
        let target = self.slots.require(name)?;
        let before = self.instruments.wheel.current_slot();
        self.instruments.wheel.advance_to(target).await?;
        if before != target {
            tracing::info!(slot = target, name, "wheel moved");
        }
        Ok(before != target)
    }

    /// Wait for the optics to settle after wheel motion.
    pub(super) async fn settle(&self) {
        tokio::time::sleep(self.config.optical_settle()).await;
    }

    /// Move to a named slot and settle if the wheel moved.
    pub(super) async fn move_and_settle(&mut self, name: &str) -> AppResult<()> {
        if self.move_to(name).await? {
            self.settle().await;
        }
        Ok(())
    }

    pub(super) async fn capture_background(&mut self) -> AppResult<Spectrum> {
        let background = self
            .pipeline()
            .capture_background(self.instruments.spectrometer.as_ref())
            .await?;
        self.background_captures += 1;
        tracing::info!(count = self.background_captures, "background frame captured");
        Ok(background)
    }

    pub(super) async fn read_power(&self) -> AppResult<f64> {
        let power = self
            .instruments
            .power_meter
            .read()
            .await
            .map_err(DaqError::instrument)?;
        tracing::info!(power_w = power, "reference power");
        Ok(power)
    }

    /// Draw a chart; failures are logged, never escalated.
    pub(super) fn chart_spectrum(&self, file_name: &str, spectrum: &Spectrum) {
        let path = self.store.plot_path(file_name);
        if let Err(err) = self.plotter.spectrum(&path, spectrum) {
            tracing::warn!(chart = file_name, error = %err, "chart not written");
        }
    }

    pub(super) fn plot_dir(&self) -> &Path {
        self.store.plot_dir()
    }

    pub(super) fn interrupted(&self, during: &str) -> DaqError {
        tracing::warn!(during, "stop requested");
        DaqError::Interrupted(format!("stop requested during {during}"))
    }
}
