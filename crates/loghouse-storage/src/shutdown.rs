//! Graceful Shutdown Coordination
//!
//! A small watch-channel based handle shared between the aggregator and its
//! background tasks (flush ticker, index workers, maintenance loop). The
//! aggregator signals once on `close()`; every task observes the signal at
//! its next suspension point and exits.

use tokio::sync::watch;

/// Handle for triggering and observing shutdown.
#[derive(Clone)]
pub struct ShutdownHandle {
    sender: watch::Sender<bool>,
    receiver: watch::Receiver<bool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self { sender, receiver }
    }

    /// Signal shutdown to all holders of this handle.
    pub fn shutdown(&self) {
        let _ = self.sender.send(true);
    }

    /// Check whether shutdown has been signaled.
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait until shutdown is signaled.
    pub async fn wait(&mut self) {
        loop {
            if *self.receiver.borrow() {
                return;
            }
            if self.receiver.changed().await.is_err() {
                // all senders dropped: treat as shutdown
                return;
            }
        }
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_shutdown_initially() {
        let handle = ShutdownHandle::new();
        assert!(!handle.is_shutdown());
    }

    #[test]
    fn test_shutdown_is_observed_by_clones() {
        let handle = ShutdownHandle::new();
        let clone = handle.clone();
        handle.shutdown();
        assert!(clone.is_shutdown());
    }

    #[tokio::test]
    async fn test_wait_returns_after_signal() {
        let handle = ShutdownHandle::new();
        let mut waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.wait().await });
        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_if_already_shutdown() {
        let handle = ShutdownHandle::new();
        handle.shutdown();
        let mut waiter = handle.clone();
        waiter.wait().await;
    }
}
