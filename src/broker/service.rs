//! Broker task and publisher handles
//!
//! Publishers push envelopes into a bounded queue; a single fan-out task
//! drains the queue and hands each envelope to the registry. Because one task
//! performs every delivery, envelopes reach each subscription in publish
//! order.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::config::{BrokerConfig, SubscriptionConfig};
use super::registry::BrokerRegistry;
use super::subscription::Subscription;
use crate::envelope::{Envelope, Frame, ProducerId};
use crate::error::{Error, Result};
use crate::shutdown::ShutdownSignal;
use crate::stats::{BrokerCounters, BrokerStats};

/// Messages on the publish queue
enum BrokerCommand {
    /// Fan out an envelope
    Publish(Envelope),
    /// Reply once every earlier command has been handled
    Sync(oneshot::Sender<()>),
}

/// Topic broker
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use bytes::Bytes;
/// use framecast::{Broker, BrokerConfig, BrokerRegistry, ShutdownSignal, SubscriptionConfig};
///
/// # async fn example() -> framecast::Result<()> {
/// let shutdown = ShutdownSignal::new();
/// let broker = Broker::start(
///     BrokerConfig::default(),
///     Arc::new(BrokerRegistry::new()),
///     shutdown.clone(),
/// );
///
/// let subscription = broker.subscribe(SubscriptionConfig::topic("frame"));
/// let mut publisher = broker.publisher();
/// publisher.publish("frame", Bytes::from_static(b"data")).await?;
/// publisher.stop("frame").await?;
///
/// shutdown.trigger();
/// broker.join().await?;
/// # Ok(())
/// # }
/// ```
pub struct Broker {
    tx: mpsc::Sender<BrokerCommand>,
    registry: Arc<BrokerRegistry>,
    counters: Arc<BrokerCounters>,
    next_producer: AtomicU64,
    handle: JoinHandle<()>,
}

impl Broker {
    /// Start the fan-out task
    ///
    /// Must be called from within a tokio runtime. The task runs until
    /// `shutdown` is triggered or every publisher and the broker are dropped.
    pub fn start(
        config: BrokerConfig,
        registry: Arc<BrokerRegistry>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let counters = Arc::new(BrokerCounters::new());

        let handle = tokio::spawn(fan_out_loop(
            rx,
            Arc::clone(&registry),
            Arc::clone(&counters),
            shutdown,
        ));

        tracing::info!(queue_capacity = config.queue_capacity, "Broker started");

        Self {
            tx,
            registry,
            counters,
            next_producer: AtomicU64::new(1),
            handle,
        }
    }

    /// Create a publisher with its own producer ID and sequence counter
    pub fn publisher(&self) -> Publisher {
        let id = ProducerId(self.next_producer.fetch_add(1, Ordering::Relaxed));
        Publisher {
            id,
            tx: self.tx.clone(),
            counters: Arc::clone(&self.counters),
            next_sequence: 0,
            stopped: HashSet::new(),
        }
    }

    /// Register a subscription
    pub fn subscribe(&self, config: SubscriptionConfig) -> Subscription {
        self.registry.register(config)
    }

    /// Remove a subscription
    pub fn unsubscribe(&self, subscription: Subscription) {
        let stats = subscription.stats();
        tracing::info!(
            subscription = %stats.id,
            delivered = stats.delivered,
            dropped = stats.dropped,
            discarded = stats.buffered,
            "Unsubscribing"
        );
        // Dropping the handle unregisters it
        drop(subscription);
    }

    /// Wait until everything enqueued before this call has been fanned out
    pub async fn sync(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(BrokerCommand::Sync(tx))
            .await
            .map_err(|_| Error::BrokerClosed)?;
        rx.await.map_err(|_| Error::BrokerClosed)
    }

    /// The registry this broker fans out through
    pub fn registry(&self) -> &Arc<BrokerRegistry> {
        &self.registry
    }

    /// Statistics snapshot
    pub fn stats(&self) -> BrokerStats {
        self.counters.snapshot(self.registry.subscription_count())
    }

    /// Check if the fan-out task has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the fan-out task to exit
    ///
    /// Trigger the shutdown signal (or drop every publisher) first, or this
    /// waits forever.
    pub async fn join(self) -> Result<BrokerStats> {
        let Self {
            tx,
            registry,
            counters,
            handle,
            ..
        } = self;
        drop(tx);

        handle.await.map_err(|e| Error::TaskJoin {
            name: "broker".into(),
            reason: e.to_string(),
        })?;

        let stats = counters.snapshot(registry.subscription_count());
        tracing::info!(
            published = stats.published,
            delivered = stats.delivered,
            dropped = stats.dropped,
            "Broker stopped"
        );
        Ok(stats)
    }
}

async fn fan_out_loop(
    mut rx: mpsc::Receiver<BrokerCommand>,
    registry: Arc<BrokerRegistry>,
    counters: Arc<BrokerCounters>,
    shutdown: ShutdownSignal,
) {
    loop {
        let command = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            command = rx.recv() => command,
        };

        match command {
            Some(BrokerCommand::Publish(envelope)) => {
                let result = registry.fan_out_until(&envelope, &shutdown).await;
                if result.matched == 0 {
                    counters.on_unrouted();
                }
                counters.on_delivered(result.delivered as u64);
                counters.on_dropped(result.dropped);
            }
            Some(BrokerCommand::Sync(reply)) => {
                let _ = reply.send(());
            }
            None => {
                tracing::debug!("All publishers gone, broker exiting");
                return;
            }
        }
    }

    // Shutdown: stop taking input, but account for anything still queued
    rx.close();
    let mut discarded = 0u64;
    while let Ok(command) = rx.try_recv() {
        match command {
            BrokerCommand::Publish(_) => discarded += 1,
            BrokerCommand::Sync(reply) => {
                let _ = reply.send(());
            }
        }
    }
    if discarded > 0 {
        counters.on_dropped(discarded);
        tracing::warn!(discarded, "Broker discarded queued envelopes at shutdown");
    }
}

/// Producer handle
///
/// Stamps each envelope with this producer's ID and the next sequence number.
/// After [`Publisher::stop`] on a topic, further publishes on it fail with
/// [`Error::TopicStopped`].
pub struct Publisher {
    id: ProducerId,
    tx: mpsc::Sender<BrokerCommand>,
    counters: Arc<BrokerCounters>,
    next_sequence: u64,
    stopped: HashSet<String>,
}

impl Publisher {
    /// Producer ID
    pub fn id(&self) -> ProducerId {
        self.id
    }

    /// Sequence number the next envelope will carry
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Check if a stop marker was published on `topic`
    pub fn is_stopped(&self, topic: &str) -> bool {
        self.stopped.contains(topic)
    }

    /// Publish opaque data; returns the envelope's sequence number
    ///
    /// Waits if the broker queue is full.
    pub async fn publish(&mut self, topic: &str, data: Bytes) -> Result<u64> {
        self.check_open(topic)?;
        let envelope = Envelope::data(topic, self.id, self.next_sequence, data);
        self.send(envelope).await
    }

    /// Publish an encoded frame
    pub async fn publish_frame(&mut self, topic: &str, frame: &Frame) -> Result<u64> {
        self.publish(topic, frame.encode()).await
    }

    /// Publish a stop marker, ending `topic` for this producer
    pub async fn stop(&mut self, topic: &str) -> Result<u64> {
        self.check_open(topic)?;
        let envelope = Envelope::stop(topic, self.id, self.next_sequence);
        let sequence = self.send(envelope).await?;
        self.stopped.insert(topic.to_string());

        tracing::debug!(producer = %self.id, topic, sequence, "Stop marker published");
        Ok(sequence)
    }

    fn check_open(&self, topic: &str) -> Result<()> {
        if self.stopped.contains(topic) {
            return Err(Error::TopicStopped(topic.to_string()));
        }
        Ok(())
    }

    async fn send(&mut self, envelope: Envelope) -> Result<u64> {
        let sequence = envelope.sequence;
        let is_stop = envelope.is_stop();

        self.tx
            .send(BrokerCommand::Publish(envelope))
            .await
            .map_err(|_| Error::BrokerClosed)?;

        self.counters.on_published(is_stop);
        self.next_sequence += 1;
        Ok(sequence)
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("id", &self.id)
            .field("next_sequence", &self.next_sequence)
            .field("stopped", &self.stopped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::broker::OverflowPolicy;
    use crate::envelope::Payload;

    fn start() -> (Broker, ShutdownSignal) {
        let shutdown = ShutdownSignal::new();
        let broker = Broker::start(
            BrokerConfig::default(),
            Arc::new(BrokerRegistry::new()),
            shutdown.clone(),
        );
        (broker, shutdown)
    }

    #[tokio::test]
    async fn test_publish_subscribe_fifo() {
        let (broker, shutdown) = start();
        let sub = broker.subscribe(SubscriptionConfig::topic("frame"));
        let mut publisher = broker.publisher();

        for i in 0u32..20 {
            publisher
                .publish("frame", Bytes::from(i.to_be_bytes().to_vec()))
                .await
                .unwrap();
        }
        broker.sync().await.unwrap();

        let received: Vec<Envelope> = std::iter::from_fn(|| sub.try_recv()).collect();
        assert_eq!(received.len(), 20);
        for (i, envelope) in received.iter().enumerate() {
            assert_eq!(envelope.sequence, i as u64);
            assert_eq!(envelope.producer, publisher.id());
            assert_eq!(
                envelope.payload,
                Payload::Data(Bytes::from((i as u32).to_be_bytes().to_vec()))
            );
        }

        shutdown.trigger();
        broker.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_oldest_through_broker() {
        let (broker, shutdown) = start();
        let sub = broker.subscribe(
            SubscriptionConfig::topic("frame")
                .high_water_mark(5)
                .overflow_policy(OverflowPolicy::DropOldest),
        );
        let mut publisher = broker.publisher();

        for _ in 0..12 {
            publisher.publish("frame", Bytes::from_static(b"f")).await.unwrap();
        }
        broker.sync().await.unwrap();

        let seqs: Vec<u64> = sub.pending().iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![7, 8, 9, 10, 11]);
        assert_eq!(sub.dropped_count(), 7);
        assert_eq!(broker.stats().dropped, 7);

        shutdown.trigger();
        broker.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_after_stop_rejected() {
        let (broker, shutdown) = start();
        let mut publisher = broker.publisher();

        publisher.publish("frame", Bytes::new()).await.unwrap();
        publisher.stop("frame").await.unwrap();
        assert!(publisher.is_stopped("frame"));

        let result = publisher.publish("frame", Bytes::new()).await;
        assert!(matches!(result, Err(Error::TopicStopped(t)) if t == "frame"));
        assert!(matches!(
            publisher.stop("frame").await,
            Err(Error::TopicStopped(_))
        ));

        // Other topics are unaffected
        publisher.publish("meta", Bytes::new()).await.unwrap();

        shutdown.trigger();
        broker.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_sequences_per_producer() {
        let (broker, shutdown) = start();
        let sub = broker.subscribe(SubscriptionConfig::all_topics());
        let mut a = broker.publisher();
        let mut b = broker.publisher();
        assert_ne!(a.id(), b.id());

        a.publish("x", Bytes::new()).await.unwrap();
        b.publish("y", Bytes::new()).await.unwrap();
        a.publish("y", Bytes::new()).await.unwrap();
        broker.sync().await.unwrap();

        let received: Vec<(ProducerId, u64)> = std::iter::from_fn(|| sub.try_recv())
            .map(|e| (e.producer, e.sequence))
            .collect();
        assert_eq!(received, vec![(a.id(), 0), (b.id(), 0), (a.id(), 1)]);

        shutdown.trigger();
        broker.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_unrouted_counted() {
        let (broker, shutdown) = start();
        let mut publisher = broker.publisher();

        publisher.publish("nobody", Bytes::new()).await.unwrap();
        broker.sync().await.unwrap();

        let stats = broker.stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.unrouted, 1);
        assert_eq!(stats.delivered, 0);

        shutdown.trigger();
        broker.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let (broker, shutdown) = start();
        let sub = broker.subscribe(SubscriptionConfig::topic("frame"));
        assert_eq!(broker.stats().subscriptions, 1);

        broker.unsubscribe(sub);
        assert_eq!(broker.stats().subscriptions, 0);

        shutdown.trigger();
        broker.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_fails_after_shutdown() {
        let (broker, shutdown) = start();
        let mut publisher = broker.publisher();

        shutdown.trigger();
        let stats = tokio::time::timeout(Duration::from_secs(1), broker.join())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.published, 0);

        let result = publisher.publish("frame", Bytes::new()).await;
        assert!(matches!(result, Err(Error::BrokerClosed)));
    }

    #[tokio::test]
    async fn test_join_not_held_by_blocked_delivery() {
        let (broker, shutdown) = start();
        let sub = broker.subscribe(
            SubscriptionConfig::topic("frame")
                .high_water_mark(1)
                .block_timeout(Duration::from_secs(30)),
        );
        let mut publisher = broker.publisher();

        publisher.publish("frame", Bytes::from_static(b"a")).await.unwrap();
        publisher.publish("frame", Bytes::from_static(b"b")).await.unwrap();
        // Let the fan-out task reach the full subscription
        tokio::time::sleep(Duration::from_millis(20)).await;

        shutdown.trigger();
        let stats = tokio::time::timeout(Duration::from_secs(1), broker.join())
            .await
            .expect("join held up by blocked delivery")
            .unwrap();

        assert_eq!(stats.published, 2);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(sub.len(), 1);
    }
}
