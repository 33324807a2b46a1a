//! Cooperative stop signal
//!
//! Every steady-state loop consults a [`Shutdown`] handle at its head and
//! selects on [`Shutdown::stopped`] around blocking reads, so each task
//! returns after at most one more iteration once stop is signalled.

use std::sync::Arc;
use tokio::sync::watch;

/// Shared stop flag built on a `watch` channel
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signal stop to every holder of this handle
    pub fn signal(&self) {
        self.tx.send_replace(true);
    }

    /// Non-blocking check, for loop heads
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Completes once stop has been signalled
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // Only fails if the sender is gone, which this handle keeps alive.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn signal_is_observed() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_stopped());

        let waiter = shutdown.clone();
        let handle = tokio::spawn(async move {
            waiter.stopped().await;
        });

        shutdown.signal();
        assert!(shutdown.is_stopped());
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("stopped() should resolve after signal")
            .unwrap();
    }

    #[tokio::test]
    async fn stopped_resolves_when_already_signalled() {
        let shutdown = Shutdown::new();
        shutdown.signal();
        tokio::time::timeout(Duration::from_millis(100), shutdown.stopped())
            .await
            .expect("already-signalled handle must not block");
    }
}
