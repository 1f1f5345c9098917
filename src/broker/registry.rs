//! Subscription registry
//!
//! The registry maps subscription IDs to weak registrations. It is the only
//! structure mutated concurrently (subscribe/unsubscribe vs. fan-out), so it
//! sits behind a `RwLock`. A fan-out pass takes a snapshot of the matching
//! subscriptions under the read lock and delivers after releasing it, so a
//! blocked delivery never holds up registration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::config::SubscriptionConfig;
use super::subscription::{Delivery, Subscription, SubscriptionId, SubscriptionShared};
use crate::envelope::Envelope;
use crate::shutdown::ShutdownSignal;

/// Registry entry; filters live in the shared state's config
struct Registration {
    shared: Weak<SubscriptionShared>,
}

/// Outcome of fanning out one envelope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Subscriptions whose filters matched
    pub matched: usize,
    /// Subscriptions that accepted the envelope
    pub delivered: usize,
    /// Envelopes lost to overflow during this pass
    pub dropped: u64,
}

/// Registry of live subscriptions
///
/// Owned by whoever wires the system together and shared by `Arc`; there is
/// no global instance.
pub struct BrokerRegistry {
    subscriptions: RwLock<HashMap<SubscriptionId, Registration>>,
    next_id: AtomicU64,
}

impl BrokerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new subscription
    ///
    /// The returned handle receives every matching envelope fanned out after
    /// this call returns.
    pub fn register(self: &Arc<Self>, config: SubscriptionConfig) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let filters = config.topic_filters.clone();
        let shared = Arc::new(SubscriptionShared::new(id, config));

        self.subscriptions.write().insert(
            id,
            Registration {
                shared: Arc::downgrade(&shared),
            },
        );

        tracing::info!(
            subscription = %id,
            filters = ?filters,
            hwm = shared.config.high_water_mark,
            policy = ?shared.config.overflow_policy,
            "Subscription registered"
        );

        Subscription::new(shared, Arc::clone(self))
    }

    /// Remove a subscription
    ///
    /// Returns false if it was not registered.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let removed = self.subscriptions.write().remove(&id);

        match removed {
            Some(registration) => {
                if let Some(shared) = registration.shared.upgrade() {
                    shared.close();
                }
                tracing::debug!(subscription = %id, "Subscription unregistered");
                true
            }
            None => false,
        }
    }

    /// Check if a subscription is registered
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.subscriptions.read().contains_key(&id)
    }

    /// Number of registered subscriptions
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Live subscriptions whose filters match `topic`
    fn snapshot(&self, topic: &str) -> Vec<Arc<SubscriptionShared>> {
        let mut matched = Vec::new();
        let mut dead = Vec::new();

        {
            let subscriptions = self.subscriptions.read();
            for (id, registration) in subscriptions.iter() {
                match registration.shared.upgrade() {
                    Some(shared) if shared.config.matches(topic) => matched.push(shared),
                    Some(_) => {}
                    None => dead.push(*id),
                }
            }
        }

        if !dead.is_empty() {
            let mut subscriptions = self.subscriptions.write();
            for id in dead {
                subscriptions.remove(&id);
                tracing::debug!(subscription = %id, "Pruned dead subscription");
            }
        }

        // Deterministic delivery order across passes
        matched.sort_by_key(|shared| shared.id);
        matched
    }

    /// Deliver an envelope to every matching subscription
    ///
    /// Each subscription applies its own overflow policy; a slow subscription
    /// under a lossy policy never affects the others.
    pub async fn fan_out(&self, envelope: &Envelope) -> FanOut {
        self.deliver(envelope, None).await
    }

    /// Like [`BrokerRegistry::fan_out`], but a delivery blocked on a full
    /// subscription is abandoned (and counted as dropped) once `shutdown`
    /// fires.
    pub async fn fan_out_until(&self, envelope: &Envelope, shutdown: &ShutdownSignal) -> FanOut {
        self.deliver(envelope, Some(shutdown)).await
    }

    async fn deliver(&self, envelope: &Envelope, shutdown: Option<&ShutdownSignal>) -> FanOut {
        let targets = self.snapshot(&envelope.topic);
        let mut result = FanOut {
            matched: targets.len(),
            ..Default::default()
        };

        for shared in targets {
            let delivery = shared.offer(envelope.clone(), shutdown).await;
            if delivery.accepted() {
                result.delivered += 1;
            }
            if delivery == Delivery::Dropped || delivery == Delivery::Evicted {
                tracing::debug!(
                    subscription = %shared.id,
                    topic = %envelope.topic,
                    sequence = envelope.sequence,
                    delivery = ?delivery,
                    "Subscription overflow"
                );
            }
            result.dropped += delivery.lost();
        }

        result
    }
}

impl Default for BrokerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BrokerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerRegistry")
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}
