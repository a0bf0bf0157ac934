//! Configuration System using Figment
//!
//! Two files are loaded at startup and are read-only afterwards:
//!
//! 1. The **experiment configuration** (`config_user.toml`): experiment type, averaging,
//!    background and normalization policy, timing, mask range and output directory.
//!    Environment variables prefixed with `PL_DAQ_` override individual keys
//!    (e.g. `PL_DAQ_SAMPLE_COUNT=5`).
//! 2. The **setup configuration** (`config_setup.toml`): connection parameters for each
//!    instrument, the wheel's slot count and name→slot mapping, and simulation flags.
//!    Overrides use `PL_DAQ_SETUP_<SECTION>__<KEY>` (e.g. `PL_DAQ_SETUP_FLYWHEEL__SIMULATE=true`).
//!
//! Files ending in `.json` are read as JSON, everything else as TOML.
//!
//! # Example
//! ```no_run
//! use pl_daq::config::{ExperimentConfig, SetupConfig};
//!
//! # fn main() -> Result<(), pl_daq::error::DaqError> {
//! let experiment = ExperimentConfig::load("config_user.toml")?;
//! let setup = SetupConfig::load("config_setup.toml")?;
//! println!("{} with {} wheel slots", experiment.experiment_type, setup.flywheel.slot_count);
//! # Ok(())
//! # }
//! ```

use crate::acquisition::MaskRange;
use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Experiment mode selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentType {
    /// Human-gated multi-sample survey
    SteadyState,
    /// Periodic monitoring for a fixed duration
    #[default]
    Degradation,
    /// Interactive live view for tuning integration time
    PreTuning,
}

impl fmt::Display for ExperimentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExperimentType::SteadyState => write!(f, "steady_state"),
            ExperimentType::Degradation => write!(f, "degradation"),
            ExperimentType::PreTuning => write!(f, "pre_tuning"),
        }
    }
}

/// How often the background frame is recaptured in steady-state mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundMode {
    /// One background for the whole run
    Once,
    /// A fresh background before every sample
    #[default]
    Each,
}

/// Reference used to normalize degradation spectra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Read power at the mirror slot, then expose the sample through the empty slot
    Mirror,
    /// Read power through the beam splitter and expose the sample there
    BeamSplitter,
    /// No normalization (constant reference power 1.0)
    None,
}

/// Whether the degradation loop drives the wheel at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlywheelMode {
    /// Move the wheel according to the normalization mode
    Active,
    /// Never move the wheel; reference power is 1.0
    Skip,
}

/// User-facing experiment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Experiment mode
    #[serde(default)]
    pub experiment_type: ExperimentType,
    /// Spectrometer integration time in milliseconds
    pub integration_time_ms: f64,
    /// Number of spectra averaged per capture when averaging is enabled
    #[serde(default = "default_average_count")]
    pub average_count: u32,
    /// Enables `average_count`
    #[serde(default)]
    pub enable_averaging: bool,
    /// Background subtraction; defaults to on for steady state, off otherwise
    #[serde(default)]
    pub background_correction: Option<bool>,
    /// Background cadence for steady-state runs
    #[serde(default)]
    pub background_mode: BackgroundMode,
    /// Refresh the background on every mirror visit (degradation)
    #[serde(default = "default_true")]
    pub repeated_bg: bool,
    /// Normalization reference (required for degradation)
    #[serde(default)]
    pub normalization: Option<Normalization>,
    /// Wheel usage (required for degradation)
    #[serde(default)]
    pub flywheel_mode: Option<FlywheelMode>,
    /// Number of samples (required for steady state)
    #[serde(default)]
    pub sample_count: Option<u32>,
    /// Total degradation run time in seconds
    #[serde(default)]
    pub degradation_duration_s: Option<f64>,
    /// Pause between degradation cycles in seconds
    #[serde(default)]
    pub sampling_interval_s: Option<f64>,
    /// Inclusive wavelength window `[min, max]` in nm
    #[serde(default)]
    pub mask_range_nm: Option<(f64, f64)>,
    /// Root output directory (`csv/` and `plots/` are created below it)
    #[serde(default = "default_save_directory")]
    pub save_directory: PathBuf,
    /// Locate the mirror slot with the power meter before the run
    #[serde(default = "default_true")]
    pub auto_configure_flywheel: bool,
    /// Wait after a wheel move before capturing, seconds
    #[serde(default = "default_optical_settle")]
    pub optical_settle_s: f64,
    /// Capture period of the pre-tuning live view, seconds
    #[serde(default = "default_stream_period")]
    pub stream_period_s: f64,
    /// Spectra drawn in the end-of-run overlay chart
    #[serde(default = "default_overlay_count")]
    pub overlay_count: usize,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Instrument setup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupConfig {
    /// CCS spectrometer session
    pub spectrometer: SpectrometerSetup,
    /// PM100D power meter session
    pub power_meter: PowerMeterSetup,
    /// Function-generator driven filter wheel
    pub flywheel: FlywheelSetup,
}

/// Spectrometer connection parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpectrometerSetup {
    /// Synthesize spectra instead of opening hardware
    #[serde(default)]
    pub simulate: bool,
    /// Driver resource identifier
    #[serde(default)]
    pub resource_string: Option<String>,
    /// Vendor driver library location
    #[serde(default)]
    pub dll_path: Option<PathBuf>,
    /// Parameters of the synthetic spectrum
    #[serde(default)]
    pub simulation: SimulatedSpectrumSetup,
}

/// Shape of the simulated photoluminescence spectrum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedSpectrumSetup {
    /// Detector pixels
    pub pixel_count: usize,
    /// First pixel wavelength, nm
    pub wavelength_min_nm: f64,
    /// Last pixel wavelength, nm
    pub wavelength_max_nm: f64,
    /// Emission peak center, nm
    pub peak_center_nm: f64,
    /// Emission peak standard deviation, nm
    pub peak_sigma_nm: f64,
    /// Peak height at 500 ms integration
    pub peak_amplitude: f64,
    /// Constant stray-light level present in every frame
    pub ambient_level: f64,
    /// Standard deviation of the detector noise
    pub noise_sigma: f64,
    /// Noise seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for SimulatedSpectrumSetup {
    fn default() -> Self {
        Self {
            pixel_count: 3648,
            wavelength_min_nm: 200.0,
            wavelength_max_nm: 1100.0,
            peak_center_nm: 800.0,
            peak_sigma_nm: 30.0,
            peak_amplitude: 100.0,
            ambient_level: 2.0,
            noise_sigma: 1.0,
            seed: None,
        }
    }
}

/// Power meter connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerMeterSetup {
    /// Synthesize readings instead of opening hardware
    #[serde(default)]
    pub simulate: bool,
    /// VISA resource identifier
    #[serde(default)]
    pub resource_string: Option<String>,
    /// Vendor driver library location
    #[serde(default)]
    pub dll_path: Option<PathBuf>,
    /// Responsivity correction wavelength, nm
    #[serde(default)]
    pub wavelength_nm: Option<f64>,
    /// Simulated power reflected by the mirror, W
    #[serde(default = "default_reference_power")]
    pub reference_power_w: f64,
    /// Noise seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for PowerMeterSetup {
    fn default() -> Self {
        Self {
            simulate: false,
            resource_string: None,
            dll_path: None,
            wavelength_nm: None,
            reference_power_w: default_reference_power(),
            seed: None,
        }
    }
}

/// Filter wheel connection and layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlywheelSetup {
    /// Simulate the wheel
    #[serde(default)]
    pub simulate: bool,
    /// VISA address of the function generator
    #[serde(default)]
    pub visa_address: Option<String>,
    /// Number of wheel positions
    #[serde(default = "default_slot_count")]
    pub slot_count: u32,
    /// Slot names ("mirror", "empty", "beam_splitter", ...) to slot numbers
    #[serde(default)]
    pub slot_mapping: BTreeMap<String, u32>,
    /// Actuator settle time after each pulse, seconds
    #[serde(default = "default_settle_time")]
    pub settle_time_s: f64,
    /// Physical position of a simulated wheel at startup
    #[serde(default = "default_initial_slot")]
    pub initial_physical_slot: u32,
}

impl FlywheelSetup {
    /// Actuator settle time as a `Duration`.
    pub fn settle_time(&self) -> Duration {
        seconds(self.settle_time_s)
    }
}

impl Default for FlywheelSetup {
    fn default() -> Self {
        Self {
            simulate: false,
            visa_address: None,
            slot_count: default_slot_count(),
            slot_mapping: BTreeMap::new(),
            settle_time_s: default_settle_time(),
            initial_physical_slot: default_initial_slot(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_average_count() -> u32 {
    1
}

fn default_save_directory() -> PathBuf {
    PathBuf::from("output")
}

fn default_optical_settle() -> f64 {
    0.5
}

fn default_stream_period() -> f64 {
    0.4
}

fn default_overlay_count() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_reference_power() -> f64 {
    1e-3
}

fn default_slot_count() -> u32 {
    6
}

fn default_settle_time() -> f64 {
    1.2
}

fn default_initial_slot() -> u32 {
    1
}

/// Base figment for a configuration file, picking the format from the extension.
fn file_figment(path: &Path) -> AppResult<Figment> {
    if !path.is_file() {
        return Err(DaqError::Configuration(format!(
            "configuration file '{}' not found",
            path.display()
        )));
    }
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    Ok(if is_json {
        Figment::new().merge(Json::file(path))
    } else {
        Figment::new().merge(Toml::file(path))
    })
}

fn require_positive(name: &str, value: f64) -> AppResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(DaqError::Configuration(format!(
            "{name} must be a positive number, got {value}"
        )))
    }
}

fn require_non_negative(name: &str, value: f64) -> AppResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(DaqError::Configuration(format!(
            "{name} must be zero or positive, got {value}"
        )))
    }
}

/// Range check for a seconds field, including what `Duration` can represent.
fn require_seconds(name: &str, value: f64, allow_zero: bool) -> AppResult<Duration> {
    if allow_zero {
        require_non_negative(name, value)?;
    } else {
        require_positive(name, value)?;
    }
    Duration::try_from_secs_f64(value).map_err(|_| {
        DaqError::Configuration(format!("{name} = {value} s is too large"))
    })
}

/// Seconds as a `Duration`; out-of-range values (rejected by validation) read as zero.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

impl ExperimentConfig {
    /// Load from a file plus `PL_DAQ_` environment overrides, then validate.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Self::from_figment(Self::figment(path)?)
    }

    /// File and environment sources, unextracted, so callers can layer more on top.
    pub fn figment<P: AsRef<Path>>(path: P) -> AppResult<Figment> {
        Ok(file_figment(path.as_ref())?.merge(Env::prefixed("PL_DAQ_")))
    }

    /// Extract and validate from an arbitrary figment.
    pub fn from_figment(figment: Figment) -> AppResult<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check values and the keys each experiment type requires.
    pub fn validate(&self) -> AppResult<()> {
        require_positive("integration_time_ms", self.integration_time_ms)?;
        if self.average_count == 0 {
            return Err(DaqError::Configuration(
                "average_count must be at least 1".into(),
            ));
        }
        if let Some((min, max)) = self.mask_range_nm {
            if !(min.is_finite() && max.is_finite() && min < max) {
                return Err(DaqError::Configuration(format!(
                    "mask_range_nm must be [min, max] with min < max, got [{min}, {max}]"
                )));
            }
        }
        require_seconds("optical_settle_s", self.optical_settle_s, true)?;
        require_seconds("stream_period_s", self.stream_period_s, false)?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        match self.experiment_type {
            ExperimentType::SteadyState => match self.sample_count {
                Some(n) if n >= 1 => {}
                Some(_) => {
                    return Err(DaqError::Configuration(
                        "sample_count must be at least 1".into(),
                    ))
                }
                None => return Err(missing_key("sample_count", self.experiment_type)),
            },
            ExperimentType::Degradation => {
                let duration = self
                    .degradation_duration_s
                    .ok_or_else(|| missing_key("degradation_duration_s", self.experiment_type))?;
                require_seconds("degradation_duration_s", duration, false)?;
                let interval = self
                    .sampling_interval_s
                    .ok_or_else(|| missing_key("sampling_interval_s", self.experiment_type))?;
                require_seconds("sampling_interval_s", interval, true)?;
                if self.normalization.is_none() {
                    return Err(missing_key("normalization", self.experiment_type));
                }
                if self.flywheel_mode.is_none() {
                    return Err(missing_key("flywheel_mode", self.experiment_type));
                }
            }
            ExperimentType::PreTuning => {}
        }
        Ok(())
    }

    /// Spectra per capture after applying `enable_averaging`.
    pub fn effective_average_count(&self) -> u32 {
        if self.enable_averaging {
            self.average_count
        } else {
            1
        }
    }

    /// Whether background subtraction is active for this experiment type.
    pub fn background_enabled(&self) -> bool {
        self.background_correction
            .unwrap_or(self.experiment_type == ExperimentType::SteadyState)
    }

    /// Wavelength window applied to every capture.
    pub fn mask(&self) -> MaskRange {
        match self.mask_range_nm {
            Some((min, max)) => MaskRange::new(Some(min), Some(max)),
            None => MaskRange::default(),
        }
    }

    /// Integration time in seconds.
    pub fn integration_time_s(&self) -> f64 {
        self.integration_time_ms / 1000.0
    }

    /// Normalization reference, `None` when not configured.
    pub fn normalization(&self) -> Normalization {
        self.normalization.unwrap_or(Normalization::None)
    }

    /// Wheel usage, `Active` when not configured.
    pub fn flywheel_mode(&self) -> FlywheelMode {
        self.flywheel_mode.unwrap_or(FlywheelMode::Active)
    }

    /// Degradation run length.
    pub fn degradation_duration(&self) -> Duration {
        seconds(self.degradation_duration_s.unwrap_or(0.0))
    }

    /// Pause between degradation cycles.
    pub fn sampling_interval(&self) -> Duration {
        seconds(self.sampling_interval_s.unwrap_or(0.0))
    }

    /// Settle wait after wheel motion.
    pub fn optical_settle(&self) -> Duration {
        seconds(self.optical_settle_s)
    }

    /// Pre-tuning capture period.
    pub fn stream_period(&self) -> Duration {
        seconds(self.stream_period_s)
    }

    /// Starting point written by `pl_daq init-config`.
    pub fn template() -> Self {
        Self {
            experiment_type: ExperimentType::Degradation,
            integration_time_ms: 500.0,
            average_count: 5,
            enable_averaging: false,
            background_correction: Some(true),
            background_mode: BackgroundMode::Each,
            repeated_bg: true,
            normalization: Some(Normalization::Mirror),
            flywheel_mode: Some(FlywheelMode::Active),
            sample_count: Some(3),
            degradation_duration_s: Some(600.0),
            sampling_interval_s: Some(10.0),
            mask_range_nm: Some((600.0, 1000.0)),
            save_directory: default_save_directory(),
            auto_configure_flywheel: true,
            optical_settle_s: default_optical_settle(),
            stream_period_s: default_stream_period(),
            overlay_count: default_overlay_count(),
            log_level: default_log_level(),
        }
    }
}

fn missing_key(key: &str, experiment: ExperimentType) -> DaqError {
    DaqError::Configuration(format!("'{key}' is required for {experiment} experiments"))
}

impl SetupConfig {
    /// Load from a file plus `PL_DAQ_SETUP_` environment overrides, then validate.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let figment =
            file_figment(path.as_ref())?.merge(Env::prefixed("PL_DAQ_SETUP_").split("__"));
        Self::from_figment(figment)
    }

    /// Extract and validate from an arbitrary figment.
    pub fn from_figment(figment: Figment) -> AppResult<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Fully simulated bench with the conventional slot layout.
    pub fn simulated() -> Self {
        let slot_mapping = [("mirror", 1), ("empty", 2), ("beam_splitter", 3)]
            .into_iter()
            .map(|(name, slot)| (name.to_string(), slot))
            .collect();
        Self {
            spectrometer: SpectrometerSetup {
                simulate: true,
                ..SpectrometerSetup::default()
            },
            power_meter: PowerMeterSetup {
                simulate: true,
                ..PowerMeterSetup::default()
            },
            flywheel: FlywheelSetup {
                simulate: true,
                slot_mapping,
                ..FlywheelSetup::default()
            },
        }
    }

    /// Switch every instrument to simulation.
    pub fn force_simulation(&mut self) {
        self.spectrometer.simulate = true;
        self.power_meter.simulate = true;
        self.flywheel.simulate = true;
    }

    /// Check slot layout, connection parameters and simulation settings.
    pub fn validate(&self) -> AppResult<()> {
        let wheel = &self.flywheel;
        if wheel.slot_count == 0 {
            return Err(DaqError::Configuration(
                "flywheel.slot_count must be at least 1".into(),
            ));
        }
        for (name, slot) in &wheel.slot_mapping {
            if *slot == 0 || *slot > wheel.slot_count {
                return Err(DaqError::Configuration(format!(
                    "flywheel.slot_mapping.{name} = {slot} is outside 1..={}",
                    wheel.slot_count
                )));
            }
        }
        require_seconds("flywheel.settle_time_s", wheel.settle_time_s, true)?;
        if wheel.initial_physical_slot == 0 || wheel.initial_physical_slot > wheel.slot_count {
            return Err(DaqError::Configuration(format!(
                "flywheel.initial_physical_slot must be within 1..={}",
                wheel.slot_count
            )));
        }
        if !wheel.simulate && wheel.visa_address.is_none() {
            return Err(DaqError::Configuration(
                "flywheel.visa_address is required unless simulate = true".into(),
            ));
        }

        if !self.spectrometer.simulate && self.spectrometer.resource_string.is_none() {
            return Err(DaqError::Configuration(
                "spectrometer.resource_string is required unless simulate = true".into(),
            ));
        }
        let sim = &self.spectrometer.simulation;
        if sim.pixel_count < 2 {
            return Err(DaqError::Configuration(
                "spectrometer.simulation.pixel_count must be at least 2".into(),
            ));
        }
        if !(sim.wavelength_min_nm < sim.wavelength_max_nm) {
            return Err(DaqError::Configuration(
                "spectrometer.simulation wavelength range must be increasing".into(),
            ));
        }
        require_positive("spectrometer.simulation.peak_sigma_nm", sim.peak_sigma_nm)?;
        require_non_negative("spectrometer.simulation.noise_sigma", sim.noise_sigma)?;

        if !self.power_meter.simulate && self.power_meter.resource_string.is_none() {
            return Err(DaqError::Configuration(
                "power_meter.resource_string is required unless simulate = true".into(),
            ));
        }
        if let Some(nm) = self.power_meter.wavelength_nm {
            require_positive("power_meter.wavelength_nm", nm)?;
        }
        Ok(())
    }
}
