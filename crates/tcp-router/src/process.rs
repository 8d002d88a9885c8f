//! Supervised long-running tasks.
//!
//! A [`Runner`] is started with [`Process::invoke`], which returns once the
//! runner reports ready. The returned [`Process`] is stopped with
//! [`Process::signal`] and joined with [`Process::wait`].

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Handed to a runner so it can report that it has started.
#[derive(Debug)]
pub struct ReadySignal(Option<oneshot::Sender<()>>);

impl ReadySignal {
    /// Create a signal and the receiver that observes it.
    #[must_use]
    pub fn channel() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self(Some(tx)), rx)
    }

    /// Report ready. Later calls do nothing.
    pub fn ready(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

/// A task that runs until its shutdown token is cancelled.
#[async_trait]
pub trait Runner: Send + 'static {
    type Error: Send + 'static;

    /// Run to completion.
    ///
    /// Implementations call [`ReadySignal::ready`] once started and return
    /// after `shutdown` is cancelled.
    async fn run(self, shutdown: CancellationToken, ready: ReadySignal) -> Result<(), Self::Error>;
}

#[derive(Debug, Error)]
pub enum ProcessError<E> {
    #[error("process failed: {0}")]
    Failed(E),

    #[error("process exited before it was ready")]
    ExitedBeforeReady,

    #[error("process task did not complete: {0}")]
    Join(String),
}

/// Handle to a running [`Runner`].
#[derive(Debug)]
pub struct Process<E> {
    shutdown: CancellationToken,
    handle: JoinHandle<Result<(), E>>,
}

impl<E: Send + 'static> Process<E> {
    /// Start `runner` and wait until it is ready.
    ///
    /// # Errors
    ///
    /// Returns the runner's result if it exits before reporting ready.
    pub async fn invoke<R>(runner: R) -> Result<Self, ProcessError<E>>
    where
        R: Runner<Error = E>,
    {
        let shutdown = CancellationToken::new();
        let (ready, ready_rx) = ReadySignal::channel();

        let handle = tokio::spawn(
            runner
                .run(shutdown.clone(), ready)
                .in_current_span(),
        );

        if ready_rx.await.is_ok() {
            return Ok(Self { shutdown, handle });
        }

        // Ready sender dropped unused: the runner has finished.
        match handle.await {
            Ok(Ok(())) => Err(ProcessError::ExitedBeforeReady),
            Ok(Err(e)) => Err(ProcessError::Failed(e)),
            Err(e) => Err(ProcessError::Join(e.to_string())),
        }
    }

    /// Ask the runner to stop.
    pub fn signal(&self) {
        self.shutdown.cancel();
    }

    /// Whether the runner has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the runner to finish and return its result.
    ///
    /// # Errors
    ///
    /// Returns the runner's error, or `Join` if the task panicked.
    pub async fn wait(self) -> Result<(), ProcessError<E>> {
        match self.handle.await {
            Ok(result) => result.map_err(ProcessError::Failed),
            Err(e) => Err(ProcessError::Join(e.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Sleeper;

    #[async_trait]
    impl Runner for Sleeper {
        type Error = String;

        async fn run(self, shutdown: CancellationToken, mut ready: ReadySignal) -> Result<(), String> {
            ready.ready();
            shutdown.cancelled().await;
            Ok(())
        }
    }

    struct FailsEarly;

    #[async_trait]
    impl Runner for FailsEarly {
        type Error = String;

        async fn run(self, _shutdown: CancellationToken, _ready: ReadySignal) -> Result<(), String> {
            Err("boom".to_string())
        }
    }

    struct FailsAfterReady;

    #[async_trait]
    impl Runner for FailsAfterReady {
        type Error = String;

        async fn run(self, shutdown: CancellationToken, mut ready: ReadySignal) -> Result<(), String> {
            ready.ready();
            shutdown.cancelled().await;
            Err("stop failed".to_string())
        }
    }

    #[tokio::test]
    async fn test_invoke_signal_wait() {
        let process = Process::invoke(Sleeper).await.unwrap();
        assert!(!process.is_finished());

        process.signal();
        tokio::time::timeout(Duration::from_secs(1), process.wait())
            .await
            .expect("runner should stop after signal")
            .unwrap();
    }

    #[tokio::test]
    async fn test_exit_before_ready_reports_error() {
        let result = Process::invoke(FailsEarly).await;
        assert!(matches!(result, Err(ProcessError::Failed(e)) if e == "boom"));
    }

    #[tokio::test]
    async fn test_wait_returns_runner_error() {
        let process = Process::invoke(FailsAfterReady).await.unwrap();
        process.signal();

        let err = process.wait().await.unwrap_err();
        assert_eq!(err.to_string(), "process failed: stop failed");
    }

    #[test]
    fn test_ready_twice_is_harmless() {
        let (mut ready, mut rx) = ReadySignal::channel();
        ready.ready();
        ready.ready();
        assert!(rx.try_recv().is_ok());
    }
}
