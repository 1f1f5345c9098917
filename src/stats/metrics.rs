//! Delivery statistics for the broker and its subscriptions

use std::sync::atomic::{AtomicU64, Ordering};

use crate::broker::SubscriptionId;

/// Live broker counters, updated by publishers and the fan-out task
#[derive(Debug, Default)]
pub struct BrokerCounters {
    published: AtomicU64,
    stop_markers: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    unrouted: AtomicU64,
}

impl BrokerCounters {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_published(&self, is_stop: bool) {
        self.published.fetch_add(1, Ordering::Relaxed);
        if is_stop {
            self.stop_markers.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn on_delivered(&self, n: u64) {
        self.delivered.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn on_dropped(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn on_unrouted(&self) {
        self.unrouted.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot
    pub fn snapshot(&self, subscriptions: usize) -> BrokerStats {
        BrokerStats {
            published: self.published.load(Ordering::Relaxed),
            stop_markers: self.stop_markers.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            unrouted: self.unrouted.load(Ordering::Relaxed),
            subscriptions,
        }
    }
}

/// Broker-wide statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Envelopes accepted by publishers (including stop markers)
    pub published: u64,
    /// Stop markers among `published`
    pub stop_markers: u64,
    /// Envelope copies placed in subscription buffers
    pub delivered: u64,
    /// Envelope copies lost to overflow or discarded at shutdown
    pub dropped: u64,
    /// Envelopes that matched no subscription
    pub unrouted: u64,
    /// Live subscriptions at snapshot time
    pub subscriptions: usize,
}

/// Per-subscription statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Subscription
    pub id: SubscriptionId,
    /// Envelopes currently buffered
    pub buffered: usize,
    /// Envelopes accepted into the buffer
    pub delivered: u64,
    /// Envelopes lost to overflow
    pub dropped: u64,
}

impl SubscriptionStats {
    /// Fraction of offered envelopes that were lost
    pub fn drop_ratio(&self) -> f64 {
        let offered = self.delivered + self.dropped;
        if offered > 0 {
            self.dropped as f64 / offered as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let counters = BrokerCounters::new();
        counters.on_published(false);
        counters.on_published(true);
        counters.on_delivered(3);
        counters.on_dropped(2);
        counters.on_unrouted();

        let stats = counters.snapshot(4);
        assert_eq!(stats.published, 2);
        assert_eq!(stats.stop_markers, 1);
        assert_eq!(stats.delivered, 3);
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.unrouted, 1);
        assert_eq!(stats.subscriptions, 4);
    }

    #[test]
    fn test_drop_ratio() {
        let stats = SubscriptionStats {
            id: SubscriptionId(1),
            buffered: 0,
            delivered: 3,
            dropped: 1,
        };
        assert!((stats.drop_ratio() - 0.25).abs() < f64::EPSILON);

        let empty = SubscriptionStats {
            id: SubscriptionId(2),
            buffered: 0,
            delivered: 0,
            dropped: 0,
        };
        assert_eq!(empty.drop_ratio(), 0.0);
    }
}
