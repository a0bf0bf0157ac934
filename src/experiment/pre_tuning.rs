//! Pre-tuning live view.
//!
//! Two tasks run while the operator tunes the integration time: the capture task
//! ([`SpectrumStream`]) and a line reader. Both feed the display loop through one
//! bounded channel; the reader also forwards new integration times to the capture
//! task over a `watch` channel.

use crate::acquisition::{SpectrumStream, StreamMessage};
use crate::config::ExperimentType;
use crate::error::{AppResult, DaqError};
use crate::experiment::console::OperatorConsole;
use crate::experiment::degradation::LIVE_CHART;
use crate::experiment::orchestrator::{Orchestrator, RunReport};
use crate::wheel::slots;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

const STREAM_CAPACITY: usize = 8;
const TUNING_PROMPT: &str = "[Tuning] Enter integration time in ms (or 'exit'):";

/// Parse an integration time in milliseconds. Only positive, finite values count.
pub fn parse_integration_ms(input: &str) -> Option<f64> {
    let ms: f64 = input.trim().parse().ok()?;
    (ms.is_finite() && ms > 0.0).then_some(ms)
}

async fn read_tuning_input(
    console: Arc<dyn OperatorConsole>,
    exposure_tx: watch::Sender<f64>,
    tx: mpsc::Sender<StreamMessage>,
) {
    loop {
        let line = match console.read_line(TUNING_PROMPT).await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "operator input failed; leaving live view");
                break;
            }
        };
        let command = line.trim();
        if command.eq_ignore_ascii_case("exit") {
            break;
        }
        match parse_integration_ms(command) {
            Some(ms) => {
                exposure_tx.send_replace(ms / 1000.0);
                tracing::info!(integration_time_ms = ms, "integration time requested");
            }
            None => console.notify("[Tuning] Invalid input"),
        }
    }
    let _ = tx.send(StreamMessage::Exit).await;
}

impl Orchestrator {
    pub(super) async fn run_pre_tuning(&mut self) -> AppResult<RunReport> {
        self.move_and_settle(slots::EMPTY).await?;

        let (tx, mut rx) = mpsc::channel(STREAM_CAPACITY);
        let (exposure_tx, exposure_rx) = watch::channel(self.config.integration_time_s());
        let stream = SpectrumStream::start(
            Arc::clone(&self.instruments.spectrometer),
            self.pipeline(),
            self.config.stream_period(),
            tx.clone(),
            exposure_rx,
        );
        let input = tokio::spawn(read_tuning_input(Arc::clone(&self.console), exposure_tx, tx));
        tracing::info!("live view running; type an integration time in ms or 'exit'");

        let mut report = RunReport::new(ExperimentType::PreTuning);
        let mut halted = false;
        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(StreamMessage::Frame(spectrum)) => {
                        report.frames_displayed += 1;
                        let peak = spectrum.peak();
                        tracing::info!(
                            frame = report.frames_displayed,
                            peak_nm = peak.wavelength,
                            peak_intensity = peak.intensity,
                            "live spectrum"
                        );
                        self.chart_spectrum(LIVE_CHART, &spectrum);
                    }
                    Some(StreamMessage::Halted) => {
                        halted = true;
                        break;
                    }
                    Some(StreamMessage::Exit) | None => break,
                },
                _ = self.stop.triggered() => {
                    tracing::info!("stop requested; leaving live view");
                    break;
                }
            }
        }

        let stream_result = stream.stop().await;
        input.abort();
        let _ = input.await;

        let frames = stream_result?;
        if halted {
            return Err(DaqError::Acquisition(
                "capture task halted without reporting an error".into(),
            ));
        }
        tracing::info!(captured = frames, displayed = report.frames_displayed, "live view closed");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integration_time_input() {
        assert_eq!(parse_integration_ms("250"), Some(250.0));
        assert_eq!(parse_integration_ms(" 12.5 "), Some(12.5));
        assert_eq!(parse_integration_ms("0"), None);
        assert_eq!(parse_integration_ms("-3"), None);
        assert_eq!(parse_integration_ms("fast"), None);
        assert_eq!(parse_integration_ms("inf"), None);
    }
}
