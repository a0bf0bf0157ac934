//! Simulated Bench Instruments
//!
//! Stand-ins for the spectrometer, power meter and filter wheel that share one
//! simulated optical path. All simulated devices use async-safe operations
//! (tokio::time::sleep, not std::thread::sleep), so tests with a paused clock run
//! instantly.
//!
//! # Optical model
//!
//! - The wheel has `slot_count` physical positions; each pulse advances it by one.
//! - The power meter sees the reference power scaled by the optic in the beam:
//!   mirror 1.0, beam splitter 0.5, anything else 0.02, with 1% noise.
//! - The spectrometer sees a Gaussian emission peak scaled by exposure, plus ambient
//!   light and detector noise. The emission is blocked while the mirror is in the beam,
//!   so frames taken there are backgrounds.
//!
//! Each device counts its calls and remembers whether it was shut down, which tests
//! use to assert how often the hardware was touched.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, Duration};

use crate::config::{FlywheelSetup, PowerMeterSetup, SimulatedSpectrumSetup};
use crate::error::AppResult;
use crate::hardware::capabilities::{
    ExposureControl, Pulsed, Readable, Shutdown, SpectrometerInfo, SpectrumProducer,
    WavelengthControl,
};
use crate::measurement::Spectrum;
use crate::wheel::slots;

const MAX_EXPOSURE_S: f64 = 60.0;
const REFERENCE_EXPOSURE_S: f64 = 0.5;

/// What the simulated beam currently passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Optic {
    Mirror,
    BeamSplitter,
    Open,
}

/// Shared physical state of the simulated optical path.
///
/// Cloning yields another handle onto the same wheel position.
#[derive(Debug, Clone)]
pub struct SimulatedBench {
    physical_slot: Arc<AtomicU32>,
    slot_count: u32,
    mirror_slot: Option<u32>,
    beam_splitter_slot: Option<u32>,
}

impl SimulatedBench {
    /// Bench whose optics sit where the setup's slot mapping says they are.
    pub fn new(flywheel: &FlywheelSetup) -> Self {
        Self {
            physical_slot: Arc::new(AtomicU32::new(flywheel.initial_physical_slot)),
            slot_count: flywheel.slot_count,
            mirror_slot: flywheel.slot_mapping.get(slots::MIRROR).copied(),
            beam_splitter_slot: flywheel.slot_mapping.get(slots::BEAM_SPLITTER).copied(),
        }
    }

    /// Physical wheel position, 1-based.
    pub fn physical_slot(&self) -> u32 {
        self.physical_slot.load(Ordering::SeqCst)
    }

    fn advance(&self) -> u32 {
        let count = self.slot_count.max(1);
        let previous = self
            .physical_slot
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |slot| {
                Some(slot % count + 1)
            })
            .unwrap_or_else(|slot| slot);
        previous % count + 1
    }

    fn optic(&self) -> Optic {
        let slot = Some(self.physical_slot());
        if slot == self.mirror_slot {
            Optic::Mirror
        } else if slot == self.beam_splitter_slot {
            Optic::BeamSplitter
        } else {
            Optic::Open
        }
    }
}

/// Standard normal sample (Box-Muller).
fn gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn ensure_open(shut_down: &AtomicBool, device: &str) -> Result<()> {
    if shut_down.load(Ordering::SeqCst) {
        bail!("{device} session already closed");
    }
    Ok(())
}

// =============================================================================
// SimulatedFilterWheel
// =============================================================================

/// Pulse-driven wheel that waits out the actuator settle time on every pulse.
pub struct SimulatedFilterWheel {
    bench: SimulatedBench,
    settle: Duration,
    pulses: AtomicU32,
    shut_down: AtomicBool,
}

impl SimulatedFilterWheel {
    /// Wheel on `bench` with the given per-pulse settle time.
    pub fn new(bench: SimulatedBench, settle: Duration) -> Self {
        Self {
            bench,
            settle,
            pulses: AtomicU32::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Pulses issued so far.
    pub fn pulse_count(&self) -> u32 {
        self.pulses.load(Ordering::SeqCst)
    }

    /// Whether `shutdown` has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Pulsed for SimulatedFilterWheel {
    async fn pulse(&self) -> Result<()> {
        ensure_open(&self.shut_down, "filter wheel")?;
        sleep(self.settle).await;
        let slot = self.bench.advance();
        self.pulses.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(physical_slot = slot, "simulated wheel pulse");
        Ok(())
    }
}

#[async_trait]
impl Shutdown for SimulatedFilterWheel {
    async fn shutdown(&self) -> Result<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        tracing::debug!("simulated filter wheel closed");
        Ok(())
    }
}

// =============================================================================
// SimulatedPowerMeter
// =============================================================================

/// Power meter reading the optic currently in the simulated beam.
pub struct SimulatedPowerMeter {
    bench: SimulatedBench,
    reference_power: f64,
    rng: Mutex<StdRng>,
    wavelength_nm: RwLock<Option<f64>>,
    reads: AtomicU32,
    shut_down: AtomicBool,
}

impl SimulatedPowerMeter {
    /// Power meter on `bench` configured from the setup section.
    pub fn new(bench: SimulatedBench, setup: &PowerMeterSetup) -> Self {
        Self {
            bench,
            reference_power: setup.reference_power_w,
            rng: Mutex::new(seeded_rng(setup.seed)),
            wavelength_nm: RwLock::new(setup.wavelength_nm),
            reads: AtomicU32::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Readings taken so far.
    pub fn read_count(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Correction wavelength last set, nm.
    pub async fn wavelength(&self) -> Option<f64> {
        *self.wavelength_nm.read().await
    }

    /// Whether `shutdown` has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Readable for SimulatedPowerMeter {
    async fn read(&self) -> Result<f64> {
        ensure_open(&self.shut_down, "power meter")?;
        let factor = match self.bench.optic() {
            Optic::Mirror => 1.0,
            Optic::BeamSplitter => 0.5,
            Optic::Open => 0.02,
        };
        let noise = gaussian(&mut *self.rng.lock().await);
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok((self.reference_power * factor * (1.0 + 0.01 * noise)).max(0.0))
    }
}

#[async_trait]
impl WavelengthControl for SimulatedPowerMeter {
    async fn set_wavelength(&self, nm: f64) -> Result<()> {
        ensure_open(&self.shut_down, "power meter")?;
        if !(nm.is_finite() && nm > 0.0) {
            bail!("correction wavelength must be positive, got {nm}");
        }
        *self.wavelength_nm.write().await = Some(nm);
        Ok(())
    }
}

#[async_trait]
impl Shutdown for SimulatedPowerMeter {
    async fn shutdown(&self) -> Result<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        tracing::debug!("simulated power meter closed");
        Ok(())
    }
}

// =============================================================================
// SimulatedSpectrometer
// =============================================================================

/// CCD spectrometer producing a Gaussian photoluminescence peak.
pub struct SimulatedSpectrometer {
    bench: SimulatedBench,
    params: SimulatedSpectrumSetup,
    axis: Spectrum,
    exposure_s: RwLock<f64>,
    rng: Mutex<StdRng>,
    acquisitions: AtomicU32,
    shut_down: AtomicBool,
}

impl SimulatedSpectrometer {
    /// Spectrometer on `bench` with a linear wavelength axis.
    pub fn new(bench: SimulatedBench, params: &SimulatedSpectrumSetup) -> AppResult<Self> {
        let n = params.pixel_count;
        let step = (params.wavelength_max_nm - params.wavelength_min_nm) / (n.max(2) - 1) as f64;
        let wavelength: Vec<f64> = (0..n)
            .map(|i| params.wavelength_min_nm + step * i as f64)
            .collect();
        let axis = Spectrum::new(wavelength, vec![0.0; n])?;
        Ok(Self {
            bench,
            params: params.clone(),
            axis,
            exposure_s: RwLock::new(REFERENCE_EXPOSURE_S),
            rng: Mutex::new(seeded_rng(params.seed)),
            acquisitions: AtomicU32::new(0),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Raw scans taken so far.
    pub fn acquisition_count(&self) -> u32 {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Whether `shutdown` has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExposureControl for SimulatedSpectrometer {
    async fn set_exposure(&self, seconds: f64) -> Result<()> {
        ensure_open(&self.shut_down, "spectrometer")?;
        if !(seconds.is_finite() && seconds > 0.0 && seconds <= MAX_EXPOSURE_S) {
            bail!("integration time {seconds} s outside (0, {MAX_EXPOSURE_S}] s");
        }
        *self.exposure_s.write().await = seconds;
        tracing::debug!(seconds, "simulated spectrometer exposure set");
        Ok(())
    }

    async fn get_exposure(&self) -> Result<f64> {
        Ok(*self.exposure_s.read().await)
    }
}

#[async_trait]
impl SpectrumProducer for SimulatedSpectrometer {
    async fn acquire(&self) -> Result<Spectrum> {
        ensure_open(&self.shut_down, "spectrometer")?;
        let exposure = *self.exposure_s.read().await;
        // The CCD integrates for the full exposure before the frame is read out.
        sleep(Duration::try_from_secs_f64(exposure).unwrap_or_default()).await;
        let scale = exposure / REFERENCE_EXPOSURE_S;
        let emission = self.bench.optic() != Optic::Mirror;
        let p = &self.params;
        let two_sigma_sq = 2.0 * p.peak_sigma_nm * p.peak_sigma_nm;

        let mut rng = self.rng.lock().await;
        let intensity: Vec<f64> = self
            .axis
            .wavelength()
            .iter()
            .map(|&wl| {
                let mut value = p.ambient_level * scale;
                if emission {
                    let d = wl - p.peak_center_nm;
                    value += p.peak_amplitude * scale * (-d * d / two_sigma_sq).exp();
                }
                value + p.noise_sigma * gaussian(&mut rng)
            })
            .collect();
        drop(rng);

        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        self.axis
            .with_intensity(intensity)
            .map_err(|e| anyhow!("simulated scan: {e}"))
    }

    fn info(&self) -> SpectrometerInfo {
        let wl = self.axis.wavelength();
        SpectrometerInfo {
            serial: "SIM-0001".to_string(),
            model: "Simulated CCS".to_string(),
            pixels: wl.len(),
            wavelength_range: (wl[0], wl[wl.len() - 1]),
        }
    }
}

#[async_trait]
impl Shutdown for SimulatedSpectrometer {
    async fn shutdown(&self) -> Result<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        tracing::debug!("simulated spectrometer closed");
        Ok(())
    }
}
