//! Shared fixtures for the integration tests: a simulated bench with handles on
//! every device, a scripted operator console and a power meter that fails on
//! demand.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use figment::providers::{Format, Toml};
use figment::Figment;
use pl_daq::config::{ExperimentConfig, SetupConfig};
use pl_daq::error::AppResult;
use pl_daq::experiment::OperatorConsole;
use pl_daq::hardware::capabilities::{PowerMeter, Readable, Shutdown};
use pl_daq::hardware::simulated::{
    SimulatedBench, SimulatedFilterWheel, SimulatedPowerMeter, SimulatedSpectrometer,
};
use pl_daq::hardware::Instruments;
use pl_daq::wheel::{SlotMap, WheelTracker};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Simulated bench with typed handles kept for assertions.
pub struct Rig {
    pub setup: SetupConfig,
    pub bench: SimulatedBench,
    pub spectrometer: Arc<SimulatedSpectrometer>,
    pub power_meter: Arc<SimulatedPowerMeter>,
    pub wheel: Arc<SimulatedFilterWheel>,
}

impl Rig {
    /// Conventional layout (mirror 1, empty 2, beam splitter 3), seeded noise.
    pub fn new() -> Self {
        Self::with_setup(seeded_setup())
    }

    /// Rig whose optics sit at `mirror`, `empty` and `beam_splitter`.
    pub fn with_layout(mirror: u32, empty: u32, beam_splitter: u32) -> Self {
        let mut setup = seeded_setup();
        setup.flywheel.slot_mapping = layout(mirror, empty, beam_splitter);
        Self::with_setup(setup)
    }

    pub fn with_setup(setup: SetupConfig) -> Self {
        let bench = SimulatedBench::new(&setup.flywheel);
        let settle = setup.flywheel.settle_time();
        let spectrometer = Arc::new(
            SimulatedSpectrometer::new(bench.clone(), &setup.spectrometer.simulation).unwrap(),
        );
        let power_meter = Arc::new(SimulatedPowerMeter::new(bench.clone(), &setup.power_meter));
        let wheel = Arc::new(SimulatedFilterWheel::new(bench.clone(), settle));
        Self {
            setup,
            bench,
            spectrometer,
            power_meter,
            wheel,
        }
    }

    pub fn tracker(&self) -> WheelTracker {
        WheelTracker::new(self.wheel.clone(), self.setup.flywheel.slot_count).unwrap()
    }

    pub fn slots(&self) -> SlotMap {
        SlotMap::new(
            self.setup.flywheel.slot_mapping.clone(),
            self.setup.flywheel.slot_count,
        )
        .unwrap()
    }

    pub fn instruments(&self) -> Instruments {
        Instruments::new(self.spectrometer.clone(), self.power_meter.clone(), self.tracker())
    }

    /// Instruments whose power meter is replaced by `power_meter`.
    pub fn instruments_with_power_meter(&self, power_meter: Arc<dyn PowerMeter>) -> Instruments {
        Instruments::new(self.spectrometer.clone(), power_meter, self.tracker())
    }

    pub fn all_shut_down(&self) -> bool {
        self.spectrometer.is_shut_down()
            && self.power_meter.is_shut_down()
            && self.wheel.is_shut_down()
    }
}

pub fn layout(mirror: u32, empty: u32, beam_splitter: u32) -> BTreeMap<String, u32> {
    [
        ("mirror", mirror),
        ("empty", empty),
        ("beam_splitter", beam_splitter),
    ]
    .into_iter()
    .map(|(name, slot)| (name.to_string(), slot))
    .collect()
}

fn seeded_setup() -> SetupConfig {
    let mut setup = SetupConfig::simulated();
    setup.spectrometer.simulation.seed = Some(7);
    setup.spectrometer.simulation.pixel_count = 512;
    setup.power_meter.seed = Some(11);
    setup
}

/// Experiment config parsed from TOML, saving below `save_dir`.
pub fn experiment(toml: &str, save_dir: &Path) -> ExperimentConfig {
    let text = format!("save_directory = {:?}\n{toml}", save_dir.display().to_string());
    ExperimentConfig::from_figment(Figment::new().merge(Toml::string(&text))).unwrap()
}

/// Console that replays a fixed script of lines.
pub struct ScriptedConsole {
    lines: Mutex<VecDeque<String>>,
    delay: Duration,
    hang_when_empty: bool,
    prompts: Mutex<Vec<String>>,
    notices: Mutex<Vec<String>>,
}

impl ScriptedConsole {
    /// Answers each prompt with the next line, then reports end of input.
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: Mutex::new(lines.into_iter().map(Into::into).collect()),
            delay: Duration::ZERO,
            hang_when_empty: false,
            prompts: Mutex::new(Vec::new()),
            notices: Mutex::new(Vec::new()),
        }
    }

    /// Operator who never answers.
    pub fn silent() -> Self {
        let mut console = Self::new(Vec::<String>::new());
        console.hang_when_empty = true;
        console
    }

    /// Wait `delay` before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl OperatorConsole for ScriptedConsole {
    async fn read_line(&self, prompt: &str) -> AppResult<Option<String>> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        tokio::time::sleep(self.delay).await;
        let next = self.lines.lock().unwrap().pop_front();
        if next.is_none() && self.hang_when_empty {
            std::future::pending::<()>().await;
        }
        Ok(next)
    }

    fn notify(&self, message: &str) {
        self.notices.lock().unwrap().push(message.to_string());
    }
}

/// Power meter that fails every reading, and optionally its shutdown too.
pub struct FaultyPowerMeter {
    pub fail_shutdown: bool,
    shut_down: AtomicBool,
}

impl FaultyPowerMeter {
    pub fn new(fail_shutdown: bool) -> Self {
        Self {
            fail_shutdown,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn shutdown_attempted(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Readable for FaultyPowerMeter {
    async fn read(&self) -> Result<f64> {
        bail!("sensor head disconnected")
    }
}

#[async_trait]
impl Shutdown for FaultyPowerMeter {
    async fn shutdown(&self) -> Result<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        if self.fail_shutdown {
            bail!("USB session lost");
        }
        Ok(())
    }
}
