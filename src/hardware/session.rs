//! Closable handle around a blocking instrument session.
//!
//! The session lives in `Option` behind a mutex: every exchange runs on the
//! blocking thread pool with the lock held, and `close` takes the session out so
//! that later calls fail instead of reaching the instrument.

use anyhow::{anyhow, Context, Result};
use std::sync::{Arc, Mutex};

pub(crate) struct BlockingSession<S> {
    inner: Arc<Mutex<Option<S>>>,
    resource: String,
}

impl<S: Send + 'static> BlockingSession<S> {
    pub(crate) fn new(resource: &str, session: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(session))),
            resource: resource.to_string(),
        }
    }

    /// Run `f` against the open session on the blocking pool.
    pub(crate) async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut S) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let resource = self.resource.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = inner
                .lock()
                .map_err(|_| anyhow!("{resource}: session lock poisoned"))?;
            match guard.as_mut() {
                Some(session) => f(session),
                None => Err(anyhow!("{resource}: session is closed")),
            }
        })
        .await
        .context("instrument worker task failed")?
    }

    /// Run `last` on the session, then release it. Closing twice is a no-op.
    ///
    /// The session is released even when `last` fails.
    pub(crate) async fn close<F>(&self, last: F) -> Result<()>
    where
        F: FnOnce(&mut S) -> Result<()> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let resource = self.resource.clone();
        tokio::task::spawn_blocking(move || {
            let taken = inner
                .lock()
                .map_err(|_| anyhow!("{resource}: session lock poisoned"))?
                .take();
            match taken {
                Some(mut session) => {
                    let outcome = last(&mut session);
                    drop(session);
                    tracing::debug!(resource, "session released");
                    outcome
                }
                None => Ok(()),
            }
        })
        .await
        .context("instrument worker task failed")?
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        self.inner.lock().map(|guard| guard.is_none()).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSession {
        sent: Arc<Mutex<Vec<String>>>,
        released: Arc<AtomicUsize>,
    }

    impl FakeSession {
        fn send(&mut self, command: &str) -> Result<()> {
            self.sent.lock().unwrap().push(command.to_string());
            Ok(())
        }
    }

    impl Drop for FakeSession {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn session() -> (BlockingSession<FakeSession>, Arc<Mutex<Vec<String>>>, Arc<AtomicUsize>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let released = Arc::new(AtomicUsize::new(0));
        let fake = FakeSession {
            sent: Arc::clone(&sent),
            released: Arc::clone(&released),
        };
        (BlockingSession::new("USB0::FAKE::INSTR", fake), sent, released)
    }

    #[tokio::test]
    async fn close_sends_last_command_and_releases() {
        let (session, sent, released) = session();
        session.run(|s| s.send("MEAS:POW?")).await.unwrap();
        session.close(|s| s.send("OUTP OFF")).await.unwrap();

        assert!(session.is_closed());
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(*sent.lock().unwrap(), vec!["MEAS:POW?", "OUTP OFF"]);
    }

    #[tokio::test]
    async fn calls_after_close_fail_without_reaching_the_session() {
        let (session, sent, released) = session();
        session.close(|_| Ok(())).await.unwrap();

        let err = session.run(|s| s.send("MEAS:POW?")).await.unwrap_err();
        assert!(err.to_string().contains("closed"));
        assert!(sent.lock().unwrap().is_empty());

        // Second close is a no-op
        session.close(|s| s.send("OUTP OFF")).await.unwrap();
        assert!(sent.lock().unwrap().is_empty());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_last_command_still_releases() {
        let (session, _sent, released) = session();
        let err = session
            .close(|_| Err(anyhow!("bus timeout")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bus timeout"));
        assert!(session.is_closed());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
