//! Dispatch coordinator
//!
//! Wires a frame source, a broker and a set of subscriber roles together and
//! runs them with a fixed lifecycle:
//!
//! ```text
//! start:  broker ──► roles (each subscribed) ──► producer thread
//! stop:   producer ──► stop marker ──► join roles (grace) ──► shutdown ──► join broker
//! ```
//!
//! Roles subscribe before the first frame is published, so none of them miss
//! the start of the stream. The stop marker travels through the broker behind
//! every frame already published, so roles finish what was sent before they
//! finalize.

pub mod config;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::broker::{Broker, BrokerRegistry, SubscriptionConfig};
use crate::envelope::Frame;
use crate::error::Result;
use crate::roles::{spawn_role, RoleEnd, RoleOutcome, SubscriberRole};
use crate::shutdown::ShutdownSignal;
use crate::source::FrameSource;
use crate::stats::BrokerStats;

pub use config::CoordinatorConfig;

/// Why the producer stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// `run_for` elapsed
    Duration,
    /// `max_frames` reached
    MaxFrames,
    /// The source reported exhaustion
    SourceExhausted,
    /// The source failed
    SourceFailed(String),
    /// The broker stopped accepting envelopes
    BrokerClosed,
    /// The shutdown signal was triggered from outside
    External,
}

/// Outcome of a coordinator run
#[derive(Debug)]
pub struct RunReport {
    /// Frames handed to the broker
    pub frames_published: u64,
    /// Why production ended
    pub stop_reason: StopReason,
    /// Per-role outcomes, in registration order
    pub roles: Vec<RoleOutcome>,
    /// Final broker counters
    pub broker: BrokerStats,
}

impl RunReport {
    /// Outcome of the role named `name`
    pub fn role(&self, name: &str) -> Option<&RoleOutcome> {
        self.roles.iter().find(|r| r.role == name)
    }

    /// Envelopes dropped across all subscriptions
    pub fn total_dropped(&self) -> u64 {
        self.broker.dropped
    }

    /// Check if every role ended without error
    pub fn all_roles_ok(&self) -> bool {
        self.roles.iter().all(RoleOutcome::is_ok)
    }
}

struct PendingRole {
    role: Box<dyn SubscriberRole>,
    subscription: SubscriptionConfig,
}

/// Runs a frame source through a broker into subscriber roles
///
/// # Example
///
/// ```no_run
/// use framecast::coordinator::{Coordinator, CoordinatorConfig};
/// use framecast::roles::{Analyzer, AnalyzerConfig};
/// use framecast::source::SyntheticSource;
/// use framecast::{FrameShape, SubscriptionConfig};
///
/// # async fn example() -> framecast::Result<()> {
/// let mut coordinator = Coordinator::new(CoordinatorConfig::default().max_frames(100));
/// coordinator.add_role(
///     Analyzer::new(AnalyzerConfig::new("summary.frsm")),
///     SubscriptionConfig::topic("frame"),
/// );
///
/// let report = coordinator
///     .run(SyntheticSource::new(FrameShape::new(4, 4, 3)))
///     .await?;
/// println!("{} frames published", report.frames_published);
/// # Ok(())
/// # }
/// ```
pub struct Coordinator {
    config: CoordinatorConfig,
    registry: Arc<BrokerRegistry>,
    shutdown: ShutdownSignal,
    roles: Vec<PendingRole>,
}

impl Coordinator {
    /// Create a coordinator with a fresh registry
    pub fn new(config: CoordinatorConfig) -> Self {
        Self::with_registry(config, Arc::new(BrokerRegistry::new()))
    }

    /// Create a coordinator fanning out through an existing registry
    pub fn with_registry(config: CoordinatorConfig, registry: Arc<BrokerRegistry>) -> Self {
        Self {
            config,
            registry,
            shutdown: ShutdownSignal::new(),
            roles: Vec::new(),
        }
    }

    /// Add a role; it subscribes with `subscription` when the run starts
    pub fn add_role<R>(&mut self, role: R, subscription: SubscriptionConfig) -> &mut Self
    where
        R: SubscriberRole + 'static,
    {
        self.roles.push(PendingRole {
            role: Box::new(role),
            subscription,
        });
        self
    }

    /// Handle for stopping the run from outside
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// The registry roles subscribe through
    pub fn registry(&self) -> &Arc<BrokerRegistry> {
        &self.registry
    }

    /// Run until the source ends, a limit is hit or shutdown is triggered
    ///
    /// Returns an error only if the broker task itself fails; role failures
    /// and timeouts are reported in [`RunReport::roles`].
    pub async fn run<S>(self, source: S) -> Result<RunReport>
    where
        S: FrameSource + 'static,
    {
        let Self {
            config,
            registry,
            shutdown,
            roles,
        } = self;

        // 1. Broker
        let broker = Broker::start(config.broker.clone(), registry, shutdown.clone());

        // 2. Roles, each subscribed before any frame is published
        let handles: Vec<_> = roles
            .into_iter()
            .map(|pending| {
                let subscription = broker.subscribe(pending.subscription);
                spawn_role(
                    pending.role,
                    subscription,
                    shutdown.clone(),
                    config.poll_interval,
                )
            })
            .collect();

        tracing::info!(
            topic = %config.topic,
            roles = handles.len(),
            max_frames = ?config.max_frames,
            run_for_ms = ?config.run_for.map(|d| d.as_millis() as u64),
            "Coordinator started"
        );

        // 3. Producer
        let producer = SourceThread::spawn(source, config.source_buffer);
        let mut frames = producer.frames;
        let mut publisher = broker.publisher();
        let deadline = config.run_for.map(|d| Instant::now() + d);
        let mut published = 0u64;

        let stop_reason = loop {
            if config.max_frames.is_some_and(|max| published >= max) {
                break StopReason::MaxFrames;
            }

            let item = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break StopReason::External,
                _ = sleep_until(deadline) => break StopReason::Duration,
                item = frames.recv() => item,
            };

            let frame = match item {
                Some(Ok(frame)) => frame,
                Some(Err(e)) if e.is_exhaustion() => break StopReason::SourceExhausted,
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Frame source failed");
                    break StopReason::SourceFailed(e.to_string());
                }
                None => break StopReason::SourceExhausted,
            };

            if let Err(e) = publisher.publish_frame(&config.topic, &frame).await {
                tracing::error!(error = %e, "Publish failed");
                break StopReason::BrokerClosed;
            }
            published += 1;

            if let Some(interval) = config.frame_interval {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        };

        tracing::info!(
            reason = ?stop_reason,
            published,
            "Producer stopping"
        );

        // Stop sequence
        producer.running.store(false, Ordering::Release);
        drop(frames);
        if tokio::time::timeout(config.role_grace_period, producer.handle)
            .await
            .is_err()
        {
            tracing::warn!("Frame source still blocked, detaching producer thread");
        }

        if let Err(e) = publisher.stop(&config.topic).await {
            tracing::warn!(topic = %config.topic, error = %e, "Could not publish stop marker");
        }

        // One grace period for all roles, not one each
        let deadline = Instant::now() + config.role_grace_period;
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(handle.join_until(deadline).await);
        }

        shutdown.trigger();
        drop(publisher);
        let broker_stats = broker.join().await?;

        for outcome in &outcomes {
            match (&outcome.end, &outcome.report) {
                (RoleEnd::Failed(e), _) => {
                    tracing::warn!(role = %outcome.role, error = %e, "Role failed")
                }
                (RoleEnd::TimedOut, _) => {
                    tracing::warn!(role = %outcome.role, "Role timed out")
                }
                (_, Some(report)) => tracing::info!(
                    role = %outcome.role,
                    frames = report.frames,
                    dropped = report.dropped,
                    "{}",
                    report.detail
                ),
                (_, None) => {}
            }
        }

        tracing::info!(
            published,
            delivered = broker_stats.delivered,
            dropped = broker_stats.dropped,
            "Coordinator finished"
        );

        Ok(RunReport {
            frames_published: published,
            stop_reason,
            roles: outcomes,
            broker: broker_stats,
        })
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("roles", &self.roles.len())
            .finish()
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Blocking thread pulling frames from a source
struct SourceThread {
    frames: mpsc::Receiver<Result<Frame>>,
    running: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<()>,
}

impl SourceThread {
    fn spawn<S: FrameSource + 'static>(mut source: S, buffer: usize) -> Self {
        let (tx, frames) = mpsc::channel(buffer.max(1));
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let running = Arc::clone(&running);
            tokio::task::spawn_blocking(move || {
                while running.load(Ordering::Acquire) {
                    let item = source.get_frame();
                    let last = item.is_err();
                    if tx.blocking_send(item).is_err() || last {
                        break;
                    }
                }
                tracing::debug!("Frame source thread exiting");
            })
        };

        Self {
            frames,
            running,
            handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::envelope::{Envelope, FrameShape};
    use crate::error::Error;
    use crate::roles::RoleReport;
    use crate::source::SyntheticSource;

    struct Counter(u64);

    #[async_trait]
    impl SubscriberRole for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        async fn process(&mut self, _envelope: &Envelope, _frame: Frame) -> Result<()> {
            self.0 += 1;
            Ok(())
        }

        async fn finalize(&mut self) -> Result<RoleReport> {
            Ok(RoleReport {
                role: "counter".into(),
                frames: self.0,
                dropped: 0,
                detail: format!("{} counted", self.0),
            })
        }
    }

    fn shape() -> FrameShape {
        FrameShape::new(2, 2, 1)
    }

    #[tokio::test]
    async fn test_max_frames() {
        let mut coordinator = Coordinator::new(CoordinatorConfig::default().max_frames(10));
        coordinator.add_role(Counter(0), SubscriptionConfig::topic("frame"));

        let report = coordinator.run(SyntheticSource::new(shape())).await.unwrap();

        assert_eq!(report.stop_reason, StopReason::MaxFrames);
        assert_eq!(report.frames_published, 10);
        let counter = report.role("counter").unwrap();
        assert!(matches!(counter.end, RoleEnd::Stopped));
        assert_eq!(counter.report.as_ref().unwrap().frames, 10);
        assert!(report.all_roles_ok());
    }

    #[tokio::test]
    async fn test_source_exhaustion_shuts_down() {
        let mut coordinator = Coordinator::new(CoordinatorConfig::default());
        coordinator.add_role(Counter(0), SubscriptionConfig::topic("frame"));

        let report = coordinator
            .run(SyntheticSource::new(shape()).limit(7))
            .await
            .unwrap();

        assert_eq!(report.stop_reason, StopReason::SourceExhausted);
        assert_eq!(report.frames_published, 7);
        assert_eq!(report.roles[0].report.as_ref().unwrap().frames, 7);
        // Stop marker counted by the broker
        assert_eq!(report.broker.stop_markers, 1);
    }

    #[tokio::test]
    async fn test_source_failure() {
        let coordinator = Coordinator::new(CoordinatorConfig::default());
        let report = coordinator
            .run(|| -> Result<Frame> { Err(Error::Source("no camera".into())) })
            .await
            .unwrap();

        assert!(matches!(report.stop_reason, StopReason::SourceFailed(ref msg) if msg.contains("no camera")));
        assert_eq!(report.frames_published, 0);
    }

    #[tokio::test]
    async fn test_run_for_duration() {
        let config = CoordinatorConfig::default()
            .run_for(Duration::from_millis(50))
            .frame_interval(Duration::from_millis(5));
        let mut coordinator = Coordinator::new(config);
        coordinator.add_role(Counter(0), SubscriptionConfig::topic("frame"));

        let report = coordinator.run(SyntheticSource::new(shape())).await.unwrap();

        assert_eq!(report.stop_reason, StopReason::Duration);
        assert!(report.frames_published > 0);
        assert_eq!(
            report.roles[0].report.as_ref().unwrap().frames,
            report.frames_published
        );
    }

    #[tokio::test]
    async fn test_external_shutdown() {
        let config = CoordinatorConfig::default()
            .frame_interval(Duration::from_millis(5))
            .poll_interval(Duration::from_millis(10));
        let mut coordinator = Coordinator::new(config);
        coordinator.add_role(Counter(0), SubscriptionConfig::topic("frame"));
        let shutdown = coordinator.shutdown_signal();

        let run = tokio::spawn(coordinator.run(SyntheticSource::new(shape())));
        tokio::time::sleep(Duration::from_millis(40)).await;
        shutdown.trigger();

        let report = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(report.stop_reason, StopReason::External);
        assert!(matches!(report.roles[0].end, RoleEnd::Shutdown));
        assert!(report.roles[0].report.is_some());
    }

    #[tokio::test]
    async fn test_roles_unregistered_after_run() {
        let registry = Arc::new(BrokerRegistry::new());
        let mut coordinator = Coordinator::with_registry(
            CoordinatorConfig::default().max_frames(3),
            Arc::clone(&registry),
        );
        coordinator
            .add_role(Counter(0), SubscriptionConfig::topic("frame"))
            .add_role(Counter(0), SubscriptionConfig::all_topics());

        let report = coordinator.run(SyntheticSource::new(shape())).await.unwrap();

        assert_eq!(report.roles.len(), 2);
        assert_eq!(registry.subscription_count(), 0);
    }

    struct Hung(&'static str);

    #[async_trait]
    impl SubscriberRole for Hung {
        fn name(&self) -> &str {
            self.0
        }

        async fn process(&mut self, _envelope: &Envelope, _frame: Frame) -> Result<()> {
            std::future::pending().await
        }

        async fn finalize(&mut self) -> Result<RoleReport> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stuck_roles_share_grace_period() {
        let grace = Duration::from_millis(200);
        let config = CoordinatorConfig::default()
            .max_frames(2)
            .poll_interval(Duration::from_millis(10))
            .role_grace_period(grace);
        let mut coordinator = Coordinator::new(config);
        coordinator
            .add_role(Hung("hung-a"), SubscriptionConfig::topic("frame"))
            .add_role(Hung("hung-b"), SubscriptionConfig::topic("frame"))
            .add_role(Hung("hung-c"), SubscriptionConfig::topic("frame"));

        let started = Instant::now();
        let report = coordinator.run(SyntheticSource::new(shape())).await.unwrap();

        assert!(started.elapsed() < grace * 2);
        assert_eq!(report.roles.len(), 3);
        assert!(report
            .roles
            .iter()
            .all(|outcome| matches!(outcome.end, RoleEnd::TimedOut)));
        assert!(!report.all_roles_ok());
    }
}
