//! Topic broker for frame fan-out
//!
//! Publishers enqueue envelopes; one fan-out task matches each envelope
//! against the registry and appends it to every matching subscription's
//! bounded buffer. Each subscription carries its own high-water mark and
//! overflow policy, which is where backpressure is applied.
//!
//! # Architecture
//!
//! ```text
//!   [Publisher] ──┐
//!   [Publisher] ──┼──► mpsc queue ──► fan-out task ──► registry.fan_out()
//!                 │                                        │
//!                 │                    ┌───────────────────┼──────────────┐
//!                 │                    ▼                   ▼              ▼
//!                 │             [Subscription]      [Subscription]   [Subscription]
//!                 │             hwm=1000, Block     hwm=5, DropNewest  filter=""
//!                 │                    │                   │              │
//!                 │                 Persister       ThrottledConsumer  Analyzer
//! ```
//!
//! The registry holds only weak references. A subscription is removed when
//! its handle is dropped or passed to [`Broker::unsubscribe`].

pub mod config;
pub mod registry;
pub mod service;
pub mod subscription;

pub use config::{BrokerConfig, OverflowPolicy, SubscriptionConfig};
pub use registry::{BrokerRegistry, FanOut};
pub use service::{Broker, Publisher};
pub use subscription::{Delivery, Subscription, SubscriptionId};
