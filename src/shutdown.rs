//! Cancellation signal shared by the workers of a pool.
//!
//! A [`ShutdownController`] owns the sending side; every worker (and every
//! running job, through its [`JobContext`](crate::job::JobContext)) holds a
//! cloned [`ShutdownSignal`]. Dropping the controller counts as a trigger.

use tokio::sync::watch;

/// Owning side of a shutdown signal.
#[derive(Debug)]
pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

impl ShutdownController {
    /// Create a controller that has not been triggered yet.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Get a signal bound to this controller.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: Some(self.tx.subscribe()),
        }
    }

    /// Fire the signal. Calling it again is a no-op.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the signal has been fired.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Fire the signal when the process receives Ctrl+C.
    pub fn trigger_on_ctrl_c(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Received Ctrl+C, signalling shutdown"),
                Err(e) => tracing::error!("Failed to listen for Ctrl+C: {}", e),
            }
            self.trigger();
        })
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl ShutdownSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Whether the signal has already fired.
    pub fn is_triggered(&self) -> bool {
        match &self.rx {
            Some(rx) => *rx.borrow() || rx.has_changed().is_err(),
            None => false,
        }
    }

    /// Wait until the signal fires.
    pub async fn triggered(&mut self) {
        let Some(rx) = self.rx.as_mut() else {
            return futures::future::pending().await;
        };

        // A dropped controller also resolves the wait.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_trigger_wakes_waiters() {
        let controller = ShutdownController::new();
        let mut signal = controller.signal();
        assert!(!signal.is_triggered());

        let waiter = tokio::spawn(async move { signal.triggered().await });
        controller.trigger();

        assert!(timeout(Duration::from_secs(1), waiter).await.is_ok());
        assert!(controller.is_triggered());
    }

    #[tokio::test]
    async fn test_dropped_controller_counts_as_trigger() {
        let controller = ShutdownController::new();
        let mut signal = controller.signal();
        drop(controller);

        assert!(signal.is_triggered());
        assert!(
            timeout(Duration::from_secs(1), signal.triggered())
                .await
                .is_ok()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_signal_stays_pending() {
        let mut signal = ShutdownSignal::never();
        assert!(!signal.is_triggered());
        assert!(
            timeout(Duration::from_secs(60), signal.triggered())
                .await
                .is_err()
        );
    }
}
