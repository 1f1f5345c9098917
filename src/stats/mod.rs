//! Statistics surfaced at termination

pub mod metrics;

pub use metrics::{BrokerCounters, BrokerStats, SubscriptionStats};
