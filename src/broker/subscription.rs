//! Subscriptions: bounded, consumer-owned envelope buffers
//!
//! The consumer owns the [`Subscription`] handle. The registry keeps only a
//! weak reference to the shared state, so dropping the handle is enough to
//! stop fan-out to it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::config::{OverflowPolicy, SubscriptionConfig};
use super::registry::BrokerRegistry;
use crate::envelope::Envelope;
use crate::shutdown::ShutdownSignal;
use crate::stats::SubscriptionStats;

/// Unique identifier of a subscription within a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Result of offering one envelope to one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Appended without loss
    Delivered,
    /// Appended after evicting the oldest buffered envelope
    Evicted,
    /// The offered envelope was discarded
    Dropped,
    /// The subscription is gone
    Closed,
}

impl Delivery {
    /// Number of envelopes lost by this delivery
    pub fn lost(&self) -> u64 {
        match self {
            Delivery::Evicted | Delivery::Dropped => 1,
            Delivery::Delivered | Delivery::Closed => 0,
        }
    }

    /// Whether the offered envelope ended up in the buffer
    pub fn accepted(&self) -> bool {
        matches!(self, Delivery::Delivered | Delivery::Evicted)
    }
}

/// State shared between the consumer handle and the broker
#[derive(Debug)]
pub(crate) struct SubscriptionShared {
    pub(crate) id: SubscriptionId,
    pub(crate) config: SubscriptionConfig,
    buffer: Mutex<VecDeque<Envelope>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
    closed: AtomicBool,
    not_empty: Notify,
    not_full: Notify,
}

impl SubscriptionShared {
    pub(crate) fn new(id: SubscriptionId, mut config: SubscriptionConfig) -> Self {
        // The fields are public, so the builder's clamp can be bypassed
        config.high_water_mark = config.high_water_mark.max(1);
        Self {
            id,
            buffer: Mutex::new(VecDeque::with_capacity(config.high_water_mark.min(1024))),
            config,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.not_full.notify_one();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Offer an envelope, applying the overflow policy if the buffer is full
    ///
    /// Only the fan-out task calls this, so there is a single producer per
    /// subscription and per-topic FIFO order is preserved. A blocking wait
    /// gives up as soon as `shutdown` fires.
    pub(crate) async fn offer(
        &self,
        envelope: Envelope,
        shutdown: Option<&ShutdownSignal>,
    ) -> Delivery {
        if self.is_closed() {
            return Delivery::Closed;
        }

        let hwm = self.config.high_water_mark;
        let delivery = match self.config.overflow_policy {
            OverflowPolicy::DropOldest => self.push_evicting(envelope),
            OverflowPolicy::DropNewest => {
                let mut buffer = self.buffer.lock();
                if buffer.len() < hwm {
                    buffer.push_back(envelope);
                    Delivery::Delivered
                } else if envelope.is_stop() {
                    // End-of-stream must reach the consumer
                    drop(buffer);
                    self.push_evicting(envelope)
                } else {
                    Delivery::Dropped
                }
            }
            OverflowPolicy::Block => self.push_blocking(envelope, shutdown).await,
        };

        self.record(delivery);
        delivery
    }

    fn push_evicting(&self, envelope: Envelope) -> Delivery {
        let mut buffer = self.buffer.lock();
        let mut delivery = Delivery::Delivered;
        while buffer.len() >= self.config.high_water_mark && buffer.pop_front().is_some() {
            delivery = Delivery::Evicted;
        }
        buffer.push_back(envelope);
        delivery
    }

    async fn push_blocking(&self, envelope: Envelope, shutdown: Option<&ShutdownSignal>) -> Delivery {
        let deadline = Instant::now() + self.config.block_timeout;
        let cancelled = async {
            match shutdown {
                Some(shutdown) => shutdown.cancelled().await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(cancelled);

        loop {
            {
                let mut buffer = self.buffer.lock();
                if buffer.len() < self.config.high_water_mark {
                    buffer.push_back(envelope);
                    return Delivery::Delivered;
                }
            }

            if self.is_closed() {
                return Delivery::Closed;
            }

            tokio::select! {
                biased;
                _ = &mut cancelled => {
                    tracing::debug!(
                        subscription = %self.id,
                        stop = envelope.is_stop(),
                        "Blocking delivery interrupted by shutdown"
                    );
                    return if envelope.is_stop() {
                        self.push_evicting(envelope)
                    } else {
                        Delivery::Dropped
                    };
                }
                waited = tokio::time::timeout_at(deadline, self.not_full.notified()) => {
                    if waited.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::warn!(
            subscription = %self.id,
            timeout_ms = self.config.block_timeout.as_millis() as u64,
            stop = envelope.is_stop(),
            "Blocking delivery timed out"
        );

        if envelope.is_stop() {
            self.push_evicting(envelope)
        } else {
            Delivery::Dropped
        }
    }

    fn record(&self, delivery: Delivery) {
        if delivery.accepted() {
            self.delivered.fetch_add(1, Ordering::Relaxed);
            self.not_empty.notify_one();
        }
        let lost = delivery.lost();
        if lost > 0 {
            self.dropped.fetch_add(lost, Ordering::Relaxed);
        }
    }

    fn try_pop(&self) -> Option<Envelope> {
        let envelope = self.buffer.lock().pop_front();
        if envelope.is_some() {
            self.not_full.notify_one();
        }
        envelope
    }

    fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            id: self.id,
            buffered: self.len(),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Consumer-side handle to a subscription
///
/// Dropping the handle unregisters the subscription.
pub struct Subscription {
    shared: Arc<SubscriptionShared>,
    registry: Arc<BrokerRegistry>,
}

impl Subscription {
    pub(crate) fn new(shared: Arc<SubscriptionShared>, registry: Arc<BrokerRegistry>) -> Self {
        Self { shared, registry }
    }

    /// Subscription ID
    pub fn id(&self) -> SubscriptionId {
        self.shared.id
    }

    /// Configuration this subscription was created with
    pub fn config(&self) -> &SubscriptionConfig {
        &self.shared.config
    }

    /// Number of buffered envelopes
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Envelopes lost to overflow so far
    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Envelopes accepted into the buffer so far
    pub fn delivered_count(&self) -> u64 {
        self.shared.delivered.load(Ordering::Relaxed)
    }

    /// Statistics snapshot
    pub fn stats(&self) -> SubscriptionStats {
        self.shared.stats()
    }

    /// Copy of the buffered envelopes, oldest first, without consuming them
    pub fn pending(&self) -> Vec<Envelope> {
        self.shared.buffer.lock().iter().cloned().collect()
    }

    /// Take the next envelope if one is buffered
    pub fn try_recv(&self) -> Option<Envelope> {
        self.shared.try_pop()
    }

    /// Wait up to `timeout` for the next envelope
    ///
    /// Returns `None` on timeout.
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<Envelope> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(envelope) = self.shared.try_pop() {
                return Some(envelope);
            }

            // A notify_one that raced with try_pop leaves a permit behind,
            // so this wakes immediately in that case.
            if tokio::time::timeout_at(deadline, self.shared.not_empty.notified())
                .await
                .is_err()
            {
                return self.shared.try_pop();
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.shared.id)
            .field("filters", &self.shared.config.topic_filters)
            .field("buffered", &self.len())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unregister(self.shared.id);
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::envelope::ProducerId;

    fn data(seq: u64) -> Envelope {
        Envelope::data("frame", ProducerId(1), seq, Bytes::from(seq.to_be_bytes().to_vec()))
    }

    fn shared(config: SubscriptionConfig) -> SubscriptionShared {
        SubscriptionShared::new(SubscriptionId(1), config)
    }

    #[tokio::test]
    async fn test_drop_oldest_keeps_last() {
        let sub = shared(
            SubscriptionConfig::topic("frame")
                .high_water_mark(3)
                .overflow_policy(OverflowPolicy::DropOldest),
        );

        for seq in 0..5 {
            sub.offer(data(seq), None).await;
        }

        let seqs: Vec<u64> = sub.buffer.lock().iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
        assert_eq!(sub.stats().dropped, 2);
        assert_eq!(sub.stats().delivered, 5);
    }

    #[tokio::test]
    async fn test_drop_newest_keeps_first() {
        let sub = shared(
            SubscriptionConfig::topic("frame")
                .high_water_mark(3)
                .overflow_policy(OverflowPolicy::DropNewest),
        );

        let mut results = Vec::new();
        for seq in 0..5 {
            results.push(sub.offer(data(seq), None).await);
        }

        assert_eq!(results[3], Delivery::Dropped);
        let seqs: Vec<u64> = sub.buffer.lock().iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(sub.stats().dropped, 2);
    }

    #[tokio::test]
    async fn test_drop_newest_never_drops_stop() {
        let sub = shared(
            SubscriptionConfig::topic("frame")
                .high_water_mark(2)
                .overflow_policy(OverflowPolicy::DropNewest),
        );

        sub.offer(data(0), None).await;
        sub.offer(data(1), None).await;
        let delivery = sub.offer(Envelope::stop("frame", ProducerId(1), 2), None).await;

        assert_eq!(delivery, Delivery::Evicted);
        let buffer = sub.buffer.lock();
        assert_eq!(buffer.len(), 2);
        assert!(buffer.back().unwrap().is_stop());
    }

    #[tokio::test]
    async fn test_block_times_out_and_counts() {
        let sub = shared(
            SubscriptionConfig::topic("frame")
                .high_water_mark(1)
                .block_timeout(Duration::from_millis(20)),
        );

        assert_eq!(sub.offer(data(0), None).await, Delivery::Delivered);
        assert_eq!(sub.offer(data(1), None).await, Delivery::Dropped);
        assert_eq!(sub.stats().dropped, 1);
        assert_eq!(sub.len(), 1);
    }

    #[tokio::test]
    async fn test_block_resumes_when_consumer_pops() {
        let sub = Arc::new(shared(
            SubscriptionConfig::topic("frame")
                .high_water_mark(1)
                .block_timeout(Duration::from_secs(5)),
        ));
        sub.offer(data(0), None).await;

        let producer = {
            let sub = Arc::clone(&sub);
            tokio::spawn(async move { sub.offer(data(1), None).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(sub.try_pop().unwrap().sequence, 0);
        assert_eq!(producer.await.unwrap(), Delivery::Delivered);
        assert_eq!(sub.try_pop().unwrap().sequence, 1);
        assert_eq!(sub.stats().dropped, 0);
    }

    #[tokio::test]
    async fn test_closed_rejects() {
        let sub = shared(SubscriptionConfig::topic("frame"));
        sub.close();

        assert_eq!(sub.offer(data(0), None).await, Delivery::Closed);
        assert_eq!(sub.len(), 0);
    }

    #[tokio::test]
    async fn test_recv_timeout_wakes_on_delivery() {
        let registry = Arc::new(BrokerRegistry::new());
        let subscription = registry.register(SubscriptionConfig::topic("frame"));

        let mut recv = tokio_test::task::spawn(subscription.recv_timeout(Duration::from_secs(5)));
        tokio_test::assert_pending!(recv.poll());

        registry.fan_out(&data(9)).await;
        assert!(recv.is_woken());

        let envelope = tokio_test::assert_ready!(recv.poll());
        assert_eq!(envelope.unwrap().sequence, 9);
    }

    #[tokio::test]
    async fn test_recv_timeout_expires() {
        let registry = Arc::new(BrokerRegistry::new());
        let subscription = registry.register(SubscriptionConfig::topic("frame"));

        let received = subscription.recv_timeout(Duration::from_millis(10)).await;
        assert!(received.is_none());
    }
}
