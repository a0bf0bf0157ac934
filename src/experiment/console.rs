//! Operator interaction and the run-wide stop signal.

use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{watch, Mutex};

/// Source of operator input.
#[async_trait]
pub trait OperatorConsole: Send + Sync {
    /// Show `prompt` and wait for one line. `None` means input is closed.
    async fn read_line(&self, prompt: &str) -> AppResult<Option<String>>;

    /// Show a message to the operator.
    fn notify(&self, message: &str) {
        println!("{message}");
    }

    /// Show `prompt` and wait for Enter.
    async fn confirm(&self, prompt: &str) -> AppResult<()> {
        match self.read_line(prompt).await? {
            Some(_) => Ok(()),
            None => Err(DaqError::Interrupted(
                "operator input closed while waiting for confirmation".into(),
            )),
        }
    }
}

/// Console backed by the process's standard input.
pub struct StdinConsole {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl StdinConsole {
    /// Wrap tokio's stdin.
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for StdinConsole {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OperatorConsole for StdinConsole {
    async fn read_line(&self, prompt: &str) -> AppResult<Option<String>> {
        println!("{prompt}");
        let mut lines = self.lines.lock().await;
        Ok(lines.next_line().await?)
    }
}

/// Cooperative stop request shared by the CLI's Ctrl-C handler and the run loops.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// Untriggered signal.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Request a stop. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether a stop was requested.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once a stop has been requested.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn triggered_resolves_after_trigger() {
        let stop = StopSignal::new();
        let waiter = {
            let stop = stop.clone();
            tokio::spawn(async move { stop.triggered().await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!waiter.is_finished());
        stop.trigger();
        waiter.await.unwrap();
        assert!(stop.is_triggered());
    }

    #[tokio::test]
    async fn already_triggered_returns_immediately() {
        let stop = StopSignal::new();
        stop.trigger();
        stop.triggered().await;
    }
}
