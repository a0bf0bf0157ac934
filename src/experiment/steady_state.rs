//! Steady-state survey: one operator-confirmed capture per sample.

use crate::config::{BackgroundMode, ExperimentType};
use crate::data::summary::PostProcessingWarning;
use crate::error::AppResult;
use crate::experiment::orchestrator::{Orchestrator, RunReport};
use crate::measurement::{AcquisitionResult, Spectrum};
use crate::wheel::slots;
use chrono::Local;
use tokio::time::Instant;

/// Cross-sample overlay chart.
pub const OVERLAY_CHART: &str = "steady_state_overlay.png";

impl Orchestrator {
    pub(super) async fn run_steady_state(&mut self) -> AppResult<RunReport> {
        let samples = self.config.sample_count.unwrap_or(1);
        let background_enabled = self.config.background_enabled();
        let per_sample_background =
            background_enabled && self.config.background_mode == BackgroundMode::Each;
        let pipeline = self.pipeline();
        let mut report = RunReport::new(ExperimentType::SteadyState);

        let mut background: Option<Spectrum> = None;
        if background_enabled && !per_sample_background {
            self.move_and_settle(slots::MIRROR).await?;
            background = Some(self.capture_background().await?);
        }

        let started = Instant::now();
        for sample in 1..=samples {
            let prompt = format!("Insert Sample #{sample} and press Enter");
            tokio::select! {
                confirmed = self.console.confirm(&prompt) => confirmed?,
                _ = self.stop.triggered() => return Err(self.interrupted("steady-state prompt")),
            }

            if per_sample_background {
                self.move_and_settle(slots::MIRROR).await?;
                background = Some(self.capture_background().await?);
            }
            self.move_and_settle(slots::EMPTY).await?;

            let spectrum = pipeline
                .capture(self.instruments.spectrometer.as_ref(), background.as_ref())
                .await?;
            let timestamp = Local::now();
            let csv_path = self.store.write_sample(sample, &timestamp, &spectrum)?;
            self.chart_spectrum(&format!("sample{sample}_spectrum.png"), &spectrum);

            let peak = spectrum.peak();
            tracing::info!(
                sample,
                peak_nm = peak.wavelength,
                peak_intensity = peak.intensity,
                file = %csv_path.display(),
                "sample captured"
            );
            report.results.push(AcquisitionResult {
                timestamp,
                elapsed: started.elapsed(),
                sample_index: Some(sample),
                spectrum,
                peak,
                reference_power: None,
                csv_path,
            });
        }

        let spectra: Vec<&Spectrum> = report.results.iter().map(|r| &r.spectrum).collect();
        let overlay_path = self.store.plot_path(OVERLAY_CHART);
        if let Err(err) = self.plotter.overlay(&overlay_path, &spectra) {
            tracing::warn!(error = %err, "steady-state overlay not written");
            report.warnings.push(PostProcessingWarning {
                artifact: OVERLAY_CHART.to_string(),
                message: format!("{err:#}"),
            });
        }
        Ok(report)
    }
}
