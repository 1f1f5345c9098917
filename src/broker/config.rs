//! Broker and subscription configuration

use std::time::Duration;

/// Default subscription high-water mark
pub const DEFAULT_HIGH_WATER_MARK: usize = 1000;

/// Default time a blocking fan-out waits for room
pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_millis(100);

/// What the broker does when a subscription buffer is at its high-water mark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Wait for the consumer to make room, up to the block timeout.
    /// Envelopes still undeliverable after the timeout are dropped and counted.
    #[default]
    Block,
    /// Evict the oldest buffered envelope to make room
    DropOldest,
    /// Discard the incoming envelope
    DropNewest,
}

impl OverflowPolicy {
    /// Check if the policy may drop envelopes without waiting
    pub fn is_lossy(&self) -> bool {
        !matches!(self, OverflowPolicy::Block)
    }
}

/// Options passed when creating a subscription
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Topic filters; the empty string matches every topic
    pub topic_filters: Vec<String>,

    /// Maximum buffered envelopes
    pub high_water_mark: usize,

    /// Behavior when the buffer is full
    pub overflow_policy: OverflowPolicy,

    /// How long a blocking fan-out waits for room
    pub block_timeout: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            topic_filters: Vec::new(),
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            overflow_policy: OverflowPolicy::default(),
            block_timeout: DEFAULT_BLOCK_TIMEOUT,
        }
    }
}

impl SubscriptionConfig {
    /// Subscribe to a single topic
    pub fn topic(filter: impl Into<String>) -> Self {
        Self {
            topic_filters: vec![filter.into()],
            ..Default::default()
        }
    }

    /// Subscribe to every topic
    pub fn all_topics() -> Self {
        Self::topic("")
    }

    /// Add another topic filter
    pub fn also(mut self, filter: impl Into<String>) -> Self {
        self.topic_filters.push(filter.into());
        self
    }

    /// Set the high-water mark (at least 1)
    pub fn high_water_mark(mut self, hwm: usize) -> Self {
        self.high_water_mark = hwm.max(1);
        self
    }

    /// Set the overflow policy
    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// Set the block timeout
    pub fn block_timeout(mut self, timeout: Duration) -> Self {
        self.block_timeout = timeout;
        self
    }

    /// Check if any filter matches `topic`
    pub fn matches(&self, topic: &str) -> bool {
        self.topic_filters
            .iter()
            .any(|filter| filter.is_empty() || filter == topic)
    }
}

/// Broker options
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Capacity of the publish queue feeding the fan-out task
    pub queue_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

impl BrokerConfig {
    /// Set the publish queue capacity (at least 1)
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}
