//! Periodic capture task used by the live view.
//!
//! The task owns all spectrometer traffic while it runs: integration-time changes
//! arrive on a `watch` channel and are applied between captures, so two hardware
//! calls never overlap. Frames go out on a bounded `mpsc` channel; when the
//! consumer is slow the task waits for room instead of dropping frames.

use crate::acquisition::AcquisitionPipeline;
use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::Spectrometer;
use crate::measurement::Spectrum;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Messages delivered to the live-view display loop.
#[derive(Debug, Clone)]
pub enum StreamMessage {
    /// A masked, averaged capture
    Frame(Spectrum),
    /// The operator asked to leave the live view
    Exit,
    /// The capture task stopped after an acquisition failure
    Halted,
}

/// Handle to a running capture task.
pub struct SpectrumStream {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<AppResult<u64>>,
}

impl SpectrumStream {
    /// Spawn the capture task.
    ///
    /// `exposure_rx` carries integration times in seconds. The current value is not
    /// applied at start, only changes made after the task was spawned.
    pub fn start(
        spectrometer: Arc<dyn Spectrometer>,
        pipeline: AcquisitionPipeline,
        period: Duration,
        tx: mpsc::Sender<StreamMessage>,
        mut exposure_rx: watch::Receiver<f64>,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut frames = 0u64;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {}
                }

                if exposure_rx.has_changed().unwrap_or(false) {
                    let seconds = *exposure_rx.borrow_and_update();
                    match spectrometer.set_exposure(seconds).await {
                        Ok(()) => tracing::info!(seconds, "integration time updated"),
                        Err(err) => tracing::warn!(seconds, error = %err, "integration time rejected"),
                    }
                }

                let frame = match pipeline.capture_raw(spectrometer.as_ref()).await {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::error!(error = %err, "live capture failed; stopping stream");
                        let _ = tx.send(StreamMessage::Halted).await;
                        return Err(err);
                    }
                };
                frames += 1;

                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    sent = tx.send(StreamMessage::Frame(frame)) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }

            tracing::debug!(frames, "capture task finished");
            Ok(frames)
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            handle,
        }
    }

    /// Signal the task to stop and wait for it. Returns the number of frames captured.
    pub async fn stop(mut self) -> AppResult<u64> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        self.handle
            .await
            .map_err(|e| DaqError::Acquisition(format!("capture task failed: {e}")))?
    }
}
