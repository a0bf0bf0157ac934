//! Bench Hardware
//!
//! Capability traits, the simulated bench, optional VISA drivers, and the
//! [`Instruments`] bundle that the orchestrator owns for the length of a run.
//!
//! | Role | Simulated | Hardware |
//! |------|-----------|----------|
//! | Spectrometer | `SimulatedSpectrometer` | none (no vendor binding) |
//! | Power meter | `SimulatedPowerMeter` | `visa::Pm100dPowerMeter` (`instrument_visa`) |
//! | Filter wheel | `SimulatedFilterWheel` | `visa::FunctionGeneratorWheel` (`instrument_visa`) |

pub mod capabilities;
#[cfg_attr(not(feature = "instrument_visa"), allow(dead_code))]
mod session;
pub mod simulated;
#[cfg(feature = "instrument_visa")]
pub mod visa;

use crate::config::{FlywheelSetup, PowerMeterSetup, SetupConfig, SpectrometerSetup};
use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::{FilterWheel, PowerMeter, Shutdown, Spectrometer};
#[cfg(feature = "instrument_visa")]
use crate::hardware::capabilities::WavelengthControl;
use crate::hardware::simulated::{
    SimulatedBench, SimulatedFilterWheel, SimulatedPowerMeter, SimulatedSpectrometer,
};
use crate::wheel::WheelTracker;
use std::sync::Arc;
use std::time::Duration;

/// Open sessions for every instrument on the bench.
pub struct Instruments {
    /// CCD spectrometer
    pub spectrometer: Arc<dyn Spectrometer>,
    /// Optical power meter
    pub power_meter: Arc<dyn PowerMeter>,
    /// Filter wheel with its tracked position
    pub wheel: WheelTracker,
}

impl Instruments {
    /// Bundle already-open adapters.
    pub fn new(
        spectrometer: Arc<dyn Spectrometer>,
        power_meter: Arc<dyn PowerMeter>,
        wheel: WheelTracker,
    ) -> Self {
        Self {
            spectrometer,
            power_meter,
            wheel,
        }
    }

    /// Open every instrument described by `setup`.
    ///
    /// Instruments are opened in the order spectrometer, power meter, wheel. If one
    /// fails, those already open are closed before the error is returned.
    pub async fn open(setup: &SetupConfig) -> AppResult<Self> {
        let bench = SimulatedBench::new(&setup.flywheel);

        let spectrometer = open_spectrometer(&setup.spectrometer, &bench)?;
        let power_meter = match open_power_meter(&setup.power_meter, &bench).await {
            Ok(power_meter) => power_meter,
            Err(err) => {
                close_quietly("spectrometer", spectrometer.as_ref()).await;
                return Err(err);
            }
        };
        let wheel = match open_wheel(&setup.flywheel, &bench).await {
            Ok(wheel) => wheel,
            Err(err) => {
                close_quietly("spectrometer", spectrometer.as_ref()).await;
                close_quietly("power_meter", power_meter.as_ref()).await;
                return Err(err);
            }
        };

        Ok(Self::new(spectrometer, power_meter, wheel))
    }

    /// Close all three sessions, attempting each regardless of earlier failures.
    pub async fn shutdown(&self) -> AppResult<()> {
        let mut failures = Vec::new();

        if let Err(err) = self.spectrometer.shutdown().await {
            tracing::error!(error = %err, "spectrometer shutdown failed");
            failures.push(DaqError::instrument(err.context("spectrometer shutdown")));
        }
        if let Err(err) = self.power_meter.shutdown().await {
            tracing::error!(error = %err, "power meter shutdown failed");
            failures.push(DaqError::instrument(err.context("power_meter shutdown")));
        }
        if let Err(err) = self.wheel.shutdown().await {
            tracing::error!(error = %err, "flywheel shutdown failed");
            failures.push(err);
        }

        if failures.is_empty() {
            tracing::info!("all instruments shut down");
            Ok(())
        } else {
            Err(DaqError::ShutdownFailed(failures))
        }
    }
}

async fn close_quietly<T: Shutdown + ?Sized>(device: &str, session: &T) {
    if let Err(err) = session.shutdown().await {
        tracing::warn!(device, error = %err, "failed to close after startup error");
    }
}

fn open_spectrometer(
    setup: &SpectrometerSetup,
    bench: &SimulatedBench,
) -> AppResult<Arc<dyn Spectrometer>> {
    if setup.simulate {
        let spectrometer = SimulatedSpectrometer::new(bench.clone(), &setup.simulation)?;
        tracing::info!("spectrometer: simulated");
        return Ok(Arc::new(spectrometer));
    }
    Err(DaqError::device_init(
        "spectrometer",
        format!(
            "no driver binding for resource '{}'; set spectrometer.simulate = true",
            setup.resource_string.as_deref().unwrap_or_default()
        ),
    ))
}

async fn open_power_meter(
    setup: &PowerMeterSetup,
    bench: &SimulatedBench,
) -> AppResult<Arc<dyn PowerMeter>> {
    if setup.simulate {
        tracing::info!("power meter: simulated");
        return Ok(Arc::new(SimulatedPowerMeter::new(bench.clone(), setup)));
    }

    #[cfg(feature = "instrument_visa")]
    {
        let resource = setup.resource_string.as_deref().unwrap_or_default();
        let meter = visa::Pm100dPowerMeter::open(resource)
            .await
            .map_err(|e| DaqError::device_init("power_meter", format!("{e:#}")))?;
        if let Some(nm) = setup.wavelength_nm {
            meter
                .set_wavelength(nm)
                .await
                .map_err(|e| DaqError::device_init("power_meter", format!("{e:#}")))?;
        }
        Ok(Arc::new(meter))
    }

    #[cfg(not(feature = "instrument_visa"))]
    Err(DaqError::device_init(
        "power_meter",
        DaqError::FeatureNotEnabled("instrument_visa".to_string()),
    ))
}

async fn open_wheel(setup: &FlywheelSetup, bench: &SimulatedBench) -> AppResult<WheelTracker> {
    let settle = setup.settle_time();
    let wheel: Arc<dyn FilterWheel> = if setup.simulate {
        tracing::info!(
            initial_physical_slot = setup.initial_physical_slot,
            "flywheel: simulated"
        );
        Arc::new(SimulatedFilterWheel::new(bench.clone(), settle))
    } else {
        open_hardware_wheel(setup, settle).await?
    };
    match WheelTracker::new(Arc::clone(&wheel), setup.slot_count) {
        Ok(tracker) => Ok(tracker),
        Err(err) => {
            close_quietly("flywheel", wheel.as_ref()).await;
            Err(err)
        }
    }
}

#[cfg(feature = "instrument_visa")]
async fn open_hardware_wheel(setup: &FlywheelSetup, settle: Duration) -> AppResult<Arc<dyn FilterWheel>> {
    let address = setup.visa_address.as_deref().unwrap_or_default();
    let wheel = visa::FunctionGeneratorWheel::open(address, settle)
        .await
        .map_err(|e| DaqError::device_init("flywheel", format!("{e:#}")))?;
    Ok(Arc::new(wheel))
}

#[cfg(not(feature = "instrument_visa"))]
async fn open_hardware_wheel(
    _setup: &FlywheelSetup,
    _settle: Duration,
) -> AppResult<Arc<dyn FilterWheel>> {
    Err(DaqError::device_init(
        "flywheel",
        DaqError::FeatureNotEnabled("instrument_visa".to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_fully_simulated_bench() {
        let instruments = Instruments::open(&SetupConfig::simulated()).await.unwrap();
        assert_eq!(instruments.wheel.current_slot(), 1);
        assert_eq!(instruments.spectrometer.info().pixels, 3648);
        instruments.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn hardware_spectrometer_is_a_device_init_error() {
        let mut setup = SetupConfig::simulated();
        setup.spectrometer.simulate = false;
        setup.spectrometer.resource_string = Some("USB0::0x1313::0x8089::M00000000::RAW".into());
        let err = Instruments::open(&setup).await.err().unwrap();
        assert!(matches!(err, DaqError::DeviceInit { ref device, .. } if device == "spectrometer"));
        assert_eq!(err.exit_code(), 3);
    }

    #[cfg(not(feature = "instrument_visa"))]
    #[tokio::test]
    async fn hardware_wheel_names_the_missing_feature() {
        let mut setup = SetupConfig::simulated();
        setup.flywheel.simulate = false;
        setup.flywheel.visa_address = Some("USB0::0x0957::0x2807::MY00000000::INSTR".into());
        let err = Instruments::open(&setup).await.err().unwrap();
        assert!(err.to_string().contains("instrument_visa"));
    }
}
