//! Coordinator configuration

use std::time::Duration;

use crate::broker::BrokerConfig;

/// Coordinator configuration options
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Topic frames are published on
    pub topic: String,

    /// Broker settings
    pub broker: BrokerConfig,

    /// How long a role waits for an envelope before rechecking shutdown
    pub poll_interval: Duration,

    /// How long each role gets to finish after the stop marker
    pub role_grace_period: Duration,

    /// Stop producing after this long (None = until the source ends)
    pub run_for: Option<Duration>,

    /// Stop producing after this many frames (None = unlimited)
    pub max_frames: Option<u64>,

    /// Pause between frames (None = as fast as the source allows)
    pub frame_interval: Option<Duration>,

    /// Frames buffered between the source thread and the publisher
    pub source_buffer: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            topic: "frame".into(),
            broker: BrokerConfig::default(),
            poll_interval: Duration::from_millis(100),
            role_grace_period: Duration::from_secs(5),
            run_for: None,
            max_frames: None,
            frame_interval: None,
            source_buffer: 4,
        }
    }
}

impl CoordinatorConfig {
    /// Set the publish topic
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Set broker settings
    pub fn broker(mut self, broker: BrokerConfig) -> Self {
        self.broker = broker;
        self
    }

    /// Set the role poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the per-role grace period
    pub fn role_grace_period(mut self, grace: Duration) -> Self {
        self.role_grace_period = grace;
        self
    }

    /// Stop after a fixed duration
    pub fn run_for(mut self, duration: Duration) -> Self {
        self.run_for = Some(duration);
        self
    }

    /// Stop after a fixed number of frames
    pub fn max_frames(mut self, frames: u64) -> Self {
        self.max_frames = Some(frames);
        self
    }

    /// Pace the producer
    pub fn frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    /// Set the source-to-publisher buffer size
    pub fn source_buffer(mut self, frames: usize) -> Self {
        self.source_buffer = frames.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.topic, "frame");
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.role_grace_period, Duration::from_secs(5));
        assert!(config.run_for.is_none());
        assert!(config.max_frames.is_none());
    }

    #[test]
    fn test_builder_pattern() {
        let config = CoordinatorConfig::default()
            .topic("camera")
            .max_frames(50)
            .run_for(Duration::from_secs(2))
            .frame_interval(Duration::from_millis(5))
            .source_buffer(0);

        assert_eq!(config.topic, "camera");
        assert_eq!(config.max_frames, Some(50));
        assert_eq!(config.run_for, Some(Duration::from_secs(2)));
        assert_eq!(config.frame_interval, Some(Duration::from_millis(5)));
        assert_eq!(config.source_buffer, 1);
    }
}
