//! Throttled consumer role
//!
//! Sleeps before counting each frame. Paired with a small high-water mark and
//! a lossy policy it shows overflow drops accumulating while faster roles on
//! the same topic lose nothing.

use std::time::Duration;

use async_trait::async_trait;

use super::{RoleReport, SubscriberRole};
use crate::broker::{OverflowPolicy, SubscriptionConfig};
use crate::envelope::{Envelope, Frame};
use crate::error::Result;

/// Throttled consumer configuration
#[derive(Debug, Clone)]
pub struct ThrottledConfig {
    /// Delay per frame
    pub delay: Duration,
    /// Suggested high-water mark
    pub high_water_mark: usize,
    /// Suggested overflow policy
    pub overflow_policy: OverflowPolicy,
}

impl Default for ThrottledConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(50),
            high_water_mark: 5,
            overflow_policy: OverflowPolicy::DropNewest,
        }
    }
}

impl ThrottledConfig {
    /// Set the per-frame delay
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the high-water mark
    pub fn high_water_mark(mut self, hwm: usize) -> Self {
        self.high_water_mark = hwm.max(1);
        self
    }

    /// Set the overflow policy
    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// Subscription settings for `topic`
    pub fn subscription(&self, topic: impl Into<String>) -> SubscriptionConfig {
        SubscriptionConfig::topic(topic)
            .high_water_mark(self.high_water_mark)
            .overflow_policy(self.overflow_policy)
    }
}

/// Deliberately slow consumer
pub struct ThrottledConsumer {
    delay: Duration,
    consumed: u64,
}

impl ThrottledConsumer {
    /// Create a new consumer
    pub fn new(config: &ThrottledConfig) -> Self {
        Self {
            delay: config.delay,
            consumed: 0,
        }
    }

    /// Frames consumed so far
    pub fn consumed(&self) -> u64 {
        self.consumed
    }
}

#[async_trait]
impl SubscriberRole for ThrottledConsumer {
    fn name(&self) -> &str {
        "throttled"
    }

    async fn process(&mut self, _envelope: &Envelope, _frame: Frame) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.consumed += 1;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<RoleReport> {
        Ok(RoleReport {
            role: "throttled".into(),
            frames: self.consumed,
            dropped: 0,
            detail: format!("{} frames consumed", self.consumed),
        })
    }
}
