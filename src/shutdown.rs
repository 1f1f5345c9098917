//! Process-wide shutdown signal
//!
//! The control-plane counterpart of [`Payload::Stop`](crate::Payload::Stop).
//! A stop marker ends one topic's stream; the shutdown signal ends every
//! long-running loop. Loops check it on every iteration and race it against
//! every timed wait.

use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable cancellation handle
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Create a new, untriggered signal
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Trigger shutdown; every clone observes it
    pub fn trigger(&self) {
        if !self.tx.send_replace(true) {
            tracing::debug!("Shutdown signal triggered");
        }
    }

    /// Check if shutdown was triggered
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is triggered
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any clone of self, so this cannot fail
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_trigger_visible_to_clones() {
        let signal = ShutdownSignal::new();
        let clone = signal.clone();

        assert!(!clone.is_triggered());
        signal.trigger();
        assert!(clone.is_triggered());

        // Triggering twice is harmless
        clone.trigger();
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_cancelled_resolves() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();

        let task = tokio::spawn(async move { waiter.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!task.is_finished());

        signal.trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_cancelled_pending_until_triggered() {
        let signal = ShutdownSignal::new();
        let mut fut = tokio_test::task::spawn(signal.cancelled());

        tokio_test::assert_pending!(fut.poll());
        signal.trigger();
        assert!(fut.is_woken());
        tokio_test::assert_ready!(fut.poll());
    }
}
