//! Degradation monitoring: periodic normalized captures for a fixed duration.
//!
//! Per cycle the optical path is chosen by `flywheel_mode` and `normalization`,
//! the sample is captured, normalized by the reference power, and only then has
//! the background subtracted. The background stays in raw units.

use crate::acquisition::{normalize, subtract_background};
use crate::config::{ExperimentType, FlywheelMode, Normalization};
use crate::data::summary::{render_summary, TimeSeries};
use crate::error::AppResult;
use crate::experiment::orchestrator::{Orchestrator, RunReport};
use crate::measurement::{AcquisitionResult, Spectrum};
use crate::wheel::slots;
use chrono::Local;
use tokio::time::Instant;

/// Chart redrawn after every cycle.
pub const LIVE_CHART: &str = "live.png";

impl Orchestrator {
    pub(super) async fn run_degradation(&mut self) -> AppResult<RunReport> {
        let skip = self.config.flywheel_mode() == FlywheelMode::Skip;
        let normalization = self.config.normalization();
        let background_enabled = self.config.background_enabled();
        let refresh_background = background_enabled
            && !skip
            && normalization == Normalization::Mirror
            && self.config.repeated_bg;
        let duration = self.config.degradation_duration();
        let interval = self.config.sampling_interval();
        let pipeline = self.pipeline();
        let mut report = RunReport::new(ExperimentType::Degradation);

        let mut background: Option<Spectrum> = None;
        if background_enabled && !refresh_background {
            if !skip {
                self.move_and_settle(slots::MIRROR).await?;
            }
            background = Some(self.capture_background().await?);
        }

        tracing::info!(
            duration_s = duration.as_secs_f64(),
            interval_s = interval.as_secs_f64(),
            ?normalization,
            skip_wheel = skip,
            "degradation run started"
        );

        let started = Instant::now();
        let mut index: u32 = 0;
        while started.elapsed() < duration {
            index += 1;

            let (reference_power, moved) = if skip {
                (1.0, false)
            } else {
                match normalization {
                    Normalization::Mirror => {
                        self.move_and_settle(slots::MIRROR).await?;
                        let power = self.read_power().await?;
                        if refresh_background {
                            background = Some(self.capture_background().await?);
                        }
                        (power, self.move_to(slots::EMPTY).await?)
                    }
                    Normalization::BeamSplitter => {
                        let moved = self.move_to(slots::BEAM_SPLITTER).await?;
                        (self.read_power().await?, moved)
                    }
                    Normalization::None => (1.0, self.move_to(slots::EMPTY).await?),
                }
            };
            if moved {
                self.settle().await;
            }

            let raw = pipeline
                .capture_raw(self.instruments.spectrometer.as_ref())
                .await?;
            let normalized = if !skip && normalization != Normalization::None {
                normalize(raw, reference_power)?
            } else {
                raw
            };
            let spectrum = match &background {
                Some(bg) => subtract_background(&normalized, bg)?,
                None => normalized,
            };

            let timestamp = Local::now();
            let elapsed = started.elapsed();
            let csv_path = self.store.write_cycle(index, &timestamp, &spectrum)?;
            self.chart_spectrum(&format!("degradation_{index:04}.png"), &spectrum);
            self.chart_spectrum(LIVE_CHART, &spectrum);

            let peak = spectrum.peak();
            tracing::info!(
                cycle = index,
                elapsed_s = elapsed.as_secs_f64(),
                peak_nm = peak.wavelength,
                peak_intensity = peak.intensity,
                reference_power,
                "degradation spectrum captured"
            );
            report.results.push(AcquisitionResult {
                timestamp,
                elapsed,
                sample_index: None,
                spectrum,
                peak,
                reference_power: Some(reference_power),
                csv_path,
            });

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.stop.triggered() => return Err(self.interrupted("degradation interval")),
            }
        }

        tracing::info!(cycles = index, "degradation run complete; building summary");
        let series = TimeSeries::from_results(&report.results);
        report.warnings = render_summary(
            self.plotter.as_ref(),
            self.plot_dir(),
            &series,
            self.config.overlay_count,
        );
        Ok(report)
    }
}
