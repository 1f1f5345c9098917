//! framecast: topic-based frame distribution with backpressure-aware subscribers
//!
//! A producer publishes image frames on a topic; a broker fans every envelope
//! out to the subscriptions whose filters match; each subscriber role drains
//! its own bounded buffer at its own pace. A separate ventilator/worker/sink
//! pipeline distributes 2D FFTs across a worker pool.
//!
//! # Architecture
//!
//! ```text
//!   FrameSource ──► Coordinator ──► Publisher ──► Broker ──┬──► Subscription ──► Persister
//!                                                          ├──► Subscription ──► Analyzer
//!                                                          └──► Subscription ──► ThrottledConsumer
//! ```
//!
//! Two cancellation primitives:
//!
//! - [`Payload::Stop`]: in-band end of stream for one topic
//! - [`ShutdownSignal`]: process-wide, checked by every long-running loop
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use framecast::{Broker, BrokerConfig, BrokerRegistry, ShutdownSignal, SubscriptionConfig};
//! use framecast::{Frame, FrameShape};
//!
//! #[tokio::main]
//! async fn main() -> framecast::Result<()> {
//!     let shutdown = ShutdownSignal::new();
//!     let broker = Broker::start(
//!         BrokerConfig::default(),
//!         Arc::new(BrokerRegistry::new()),
//!         shutdown.clone(),
//!     );
//!
//!     let subscription = broker.subscribe(SubscriptionConfig::topic("frame"));
//!     let mut publisher = broker.publisher();
//!
//!     let frame = Frame::from_elements(FrameShape::new(2, 2, 1), &[1u8, 2, 3, 4])?;
//!     publisher.publish_frame("frame", &frame).await?;
//!     publisher.stop("frame").await?;
//!     broker.sync().await?;
//!
//!     assert_eq!(subscription.len(), 2);
//!     shutdown.trigger();
//!     broker.join().await?;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod coordinator;
pub mod envelope;
pub mod error;
pub mod roles;
pub mod shutdown;
pub mod source;
pub mod stats;
pub mod storage;
pub mod ventilator;

pub use broker::{
    Broker, BrokerConfig, BrokerRegistry, OverflowPolicy, Publisher, Subscription,
    SubscriptionConfig, SubscriptionId,
};
pub use coordinator::{Coordinator, CoordinatorConfig, RunReport, StopReason};
pub use envelope::{DType, Envelope, Frame, FrameShape, Payload, ProducerId};
pub use error::{Error, Result};
pub use roles::{RoleEnd, RoleOutcome, RoleReport, RoleState, SubscriberRole};
pub use shutdown::ShutdownSignal;
pub use source::{FrameSource, SyntheticSource};
pub use stats::{BrokerStats, SubscriptionStats};
