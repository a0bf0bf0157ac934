//! VISA Instrument Drivers
//!
//! - `FunctionGeneratorWheel`: an Agilent 33500 series generator whose single-cycle
//!   burst drives the filter wheel actuator one position per trigger.
//! - `Pm100dPowerMeter`: Thorlabs PM100D over SCPI.
//!
//! VISA calls block, so every exchange runs on the blocking thread pool while the
//! session mutex is held. `shutdown` releases the session; later calls fail.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::ffi::CString;
use std::io::{BufRead, BufReader, Write};
use std::time::Duration;
use visa_rs::prelude::*;

use crate::hardware::capabilities::{Pulsed, Readable, Shutdown, WavelengthControl};
use crate::hardware::session::BlockingSession;

const OPEN_TIMEOUT: Duration = Duration::from_secs(1);

/// One open VISA session plus the resource manager that owns it.
struct VisaSession {
    _rm: DefaultRM,
    instr: Instrument,
    resource: String,
}

impl VisaSession {
    fn open(resource: &str) -> Result<Self> {
        let rm = DefaultRM::new().map_err(|e| anyhow!("VISA resource manager: {e}"))?;
        let name = CString::new(resource).context("resource string contains a NUL byte")?;
        let instr = rm
            .open(&name.into(), AccessMode::NO_LOCK, OPEN_TIMEOUT)
            .map_err(|e| anyhow!("open {resource}: {e}"))?;
        Ok(Self {
            _rm: rm,
            instr,
            resource: resource.to_string(),
        })
    }

    fn write(&mut self, command: &str) -> Result<()> {
        self.instr
            .write_all(format!("{command}\n").as_bytes())
            .with_context(|| format!("{}: write '{command}'", self.resource))
    }

    fn query(&mut self, command: &str) -> Result<String> {
        self.write(command)?;
        let mut response = String::new();
        BufReader::new(&self.instr)
            .read_line(&mut response)
            .with_context(|| format!("{}: read reply to '{command}'", self.resource))?;
        Ok(response.trim().to_string())
    }
}

async fn open_session(resource: &str) -> Result<BlockingSession<VisaSession>> {
    let name = resource.to_string();
    let session = tokio::task::spawn_blocking(move || VisaSession::open(&name))
        .await
        .context("VISA open task failed")??;
    Ok(BlockingSession::new(resource, session))
}

fn parse_power(reply: &str) -> Result<f64> {
    let value: f64 = reply
        .trim()
        .parse()
        .with_context(|| format!("unparseable power reply '{reply}'"))?;
    if !value.is_finite() {
        return Err(anyhow!("power reply out of range: {reply}"));
    }
    Ok(value)
}

// =============================================================================
// FunctionGeneratorWheel
// =============================================================================

/// Filter wheel pulsed by a bus-triggered square-wave burst.
pub struct FunctionGeneratorWheel {
    session: BlockingSession<VisaSession>,
    settle: Duration,
}

impl FunctionGeneratorWheel {
    /// Open the generator and configure a single-cycle 1 Hz burst with output off.
    pub async fn open(visa_address: &str, settle: Duration) -> Result<Self> {
        let session = open_session(visa_address).await?;
        session
            .run(|s| {
                for command in [
                    "FUNC SQU",
                    "FREQ 1",
                    "VOLT 2.5",
                    "VOLT:OFFS 1.25",
                    "BURS:MODE TRIG",
                    "BURS:NCYC 1",
                    "BURS:STAT ON",
                    "TRIG:SOUR BUS",
                    "OUTP OFF",
                ] {
                    s.write(command)?;
                }
                Ok(())
            })
            .await?;
        tracing::info!(visa_address, "function generator configured for wheel pulses");
        Ok(Self { session, settle })
    }
}

#[async_trait]
impl Pulsed for FunctionGeneratorWheel {
    async fn pulse(&self) -> Result<()> {
        self.session
            .run(|s| {
                s.write("OUTP ON")?;
                s.write("*TRG")
            })
            .await?;
        tokio::time::sleep(self.settle).await;
        self.session.run(|s| s.write("OUTP OFF")).await
    }
}

#[async_trait]
impl Shutdown for FunctionGeneratorWheel {
    async fn shutdown(&self) -> Result<()> {
        self.session.close(|s| s.write("OUTP OFF")).await
    }
}

// =============================================================================
// Pm100dPowerMeter
// =============================================================================

/// Thorlabs PM100D optical power meter.
pub struct Pm100dPowerMeter {
    session: BlockingSession<VisaSession>,
}

impl Pm100dPowerMeter {
    /// Open the meter and log its identity.
    pub async fn open(resource: &str) -> Result<Self> {
        let session = open_session(resource).await?;
        let idn = session.run(|s| s.query("*IDN?")).await?;
        tracing::info!(resource, idn = %idn, "power meter connected");
        Ok(Self { session })
    }
}

#[async_trait]
impl Readable for Pm100dPowerMeter {
    async fn read(&self) -> Result<f64> {
        let reply = self.session.run(|s| s.query("MEAS:POW?")).await?;
        parse_power(&reply)
    }
}

#[async_trait]
impl WavelengthControl for Pm100dPowerMeter {
    async fn set_wavelength(&self, nm: f64) -> Result<()> {
        self.session
            .run(move |s| s.write(&format!("SENS:CORR:WAV {nm}")))
            .await
    }
}

#[async_trait]
impl Shutdown for Pm100dPowerMeter {
    async fn shutdown(&self) -> Result<()> {
        // Clear the error queue, then drop the session (viClose).
        self.session.close(|s| s.write("*CLS")).await
    }
}
