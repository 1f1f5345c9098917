//! Subscriber roles
//!
//! A role owns one [`Subscription`] and drains it at its own pace. Every role
//! runs the same consume loop ([`run_role`]); only `process` and `finalize`
//! differ:
//!
//! - [`Persister`]: appends frames to an on-disk dataset
//! - [`Analyzer`]: records per-frame min/max/mean, writes a summary at the end
//! - [`ThrottledConsumer`]: deliberately slow, used to exercise backpressure
//!
//! # Lifecycle
//!
//! ```text
//! Created ──► Running ──► Draining ──► Terminated
//!                │  stop marker, shutdown
//!                │  or processing error
//! ```
//!
//! `finalize` runs on every path out of `Running`, so file handles are closed
//! even when processing fails.

pub mod analyzer;
pub mod persister;
pub mod throttled;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::broker::Subscription;
use crate::envelope::{Envelope, Frame, Payload};
use crate::error::{Error, Result};
use crate::shutdown::ShutdownSignal;

pub use analyzer::{Analyzer, AnalyzerConfig};
pub use persister::{Persister, PersisterConfig};
pub use throttled::{ThrottledConfig, ThrottledConsumer};

/// Role lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RoleState {
    /// Subscribed, nothing consumed yet
    Created = 0,
    /// Pulling and processing envelopes
    Running = 1,
    /// Stream ended; finalizing
    Draining = 2,
    /// Finalized and unsubscribed
    Terminated = 3,
}

impl RoleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RoleState::Created,
            1 => RoleState::Running,
            2 => RoleState::Draining,
            _ => RoleState::Terminated,
        }
    }
}

/// Role state shared between the role task and its handle
///
/// Transitions only move forward.
#[derive(Debug)]
pub struct RoleStateCell(AtomicU8);

impl RoleStateCell {
    /// Create a cell in [`RoleState::Created`]
    pub fn new() -> Self {
        Self(AtomicU8::new(RoleState::Created as u8))
    }

    /// Current state
    pub fn get(&self) -> RoleState {
        RoleState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `to` if it is later than the current state
    ///
    /// Returns false if the cell was already at or past `to`.
    pub fn advance(&self, to: RoleState) -> bool {
        let previous = self.0.fetch_max(to as u8, Ordering::AcqRel);
        previous < to as u8
    }
}

impl Default for RoleStateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary a role produces when it finalizes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleReport {
    /// Role name
    pub role: String,
    /// Frames processed
    pub frames: u64,
    /// Envelopes this role's subscription lost to overflow
    pub dropped: u64,
    /// Human-readable summary, e.g. "50 frames written"
    pub detail: String,
}

impl std::fmt::Display for RoleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({} dropped)", self.role, self.detail, self.dropped)
    }
}

/// How a role's consume loop ended
#[derive(Debug)]
pub enum RoleEnd {
    /// A stop marker arrived
    Stopped,
    /// The shutdown signal fired
    Shutdown,
    /// Processing or finalizing failed
    Failed(Error),
    /// The role missed its grace period and was aborted
    TimedOut,
}

/// Final outcome of one role
#[derive(Debug)]
pub struct RoleOutcome {
    /// Role name
    pub role: String,
    /// How the loop ended
    pub end: RoleEnd,
    /// Report from `finalize`, if it ran and succeeded
    pub report: Option<RoleReport>,
}

impl RoleOutcome {
    /// Check if the role ended without error
    pub fn is_ok(&self) -> bool {
        matches!(self.end, RoleEnd::Stopped | RoleEnd::Shutdown)
    }
}

/// Role-specific behavior plugged into the shared consume loop
#[async_trait]
pub trait SubscriberRole: Send {
    /// Name used in logs and reports
    fn name(&self) -> &str;

    /// Handle one data envelope whose payload decoded as `frame`
    ///
    /// An error is fatal for the role.
    async fn process(&mut self, envelope: &Envelope, frame: Frame) -> Result<()>;

    /// Flush and close; must be idempotent
    async fn finalize(&mut self) -> Result<RoleReport>;
}

#[async_trait]
impl<R: SubscriberRole + ?Sized> SubscriberRole for Box<R> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn process(&mut self, envelope: &Envelope, frame: Frame) -> Result<()> {
        (**self).process(envelope, frame).await
    }

    async fn finalize(&mut self) -> Result<RoleReport> {
        (**self).finalize().await
    }
}

/// Drive a role until its stream ends
///
/// Pulls with `poll_interval` timeouts so the shutdown signal is noticed
/// promptly. The loop ends at the first stop marker, on shutdown, or on the
/// first processing error. The subscription is dropped (and so unregistered)
/// before this returns.
pub async fn run_role<R: SubscriberRole + ?Sized>(
    role: &mut R,
    subscription: Subscription,
    shutdown: ShutdownSignal,
    poll_interval: Duration,
    state: &RoleStateCell,
) -> RoleOutcome {
    let name = role.name().to_string();
    state.advance(RoleState::Running);
    tracing::info!(role = %name, subscription = %subscription.id(), "Role running");

    let mut processed = 0u64;
    let mut end = loop {
        if shutdown.is_triggered() {
            break RoleEnd::Shutdown;
        }

        let received = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break RoleEnd::Shutdown,
            received = subscription.recv_timeout(poll_interval) => received,
        };
        let Some(envelope) = received else {
            continue;
        };

        let data = match &envelope.payload {
            Payload::Stop => {
                tracing::debug!(role = %name, topic = %envelope.topic, "Stop marker received");
                break RoleEnd::Stopped;
            }
            Payload::Data(data) => data,
        };

        let result = match Frame::decode(data) {
            Ok(frame) => role.process(&envelope, frame).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::error!(
                role = %name,
                sequence = envelope.sequence,
                error = %e,
                "Processing failed, role terminating"
            );
            break RoleEnd::Failed(e);
        }
        processed += 1;
    };

    state.advance(RoleState::Draining);
    let report = match role.finalize().await {
        Ok(mut report) => {
            report.dropped = subscription.dropped_count();
            Some(report)
        }
        Err(e) => {
            tracing::error!(role = %name, error = %e, "Finalize failed");
            if matches!(end, RoleEnd::Stopped | RoleEnd::Shutdown) {
                end = RoleEnd::Failed(e);
            }
            None
        }
    };

    let dropped = subscription.dropped_count();
    let discarded = subscription.len();
    drop(subscription);
    state.advance(RoleState::Terminated);

    match &report {
        Some(report) => tracing::info!(
            role = %name,
            processed,
            dropped,
            discarded,
            end = ?end,
            "{}",
            report
        ),
        None => tracing::warn!(role = %name, processed, dropped, end = ?end, "Role terminated without report"),
    }

    RoleOutcome {
        role: name,
        end,
        report,
    }
}

/// Handle to a role running on its own task
#[derive(Debug)]
pub struct RoleHandle {
    name: String,
    state: Arc<RoleStateCell>,
    handle: JoinHandle<RoleOutcome>,
}

impl RoleHandle {
    /// Role name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> RoleState {
        self.state.get()
    }

    /// Check if the role task has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait up to `grace` for the role to finish
    ///
    /// A role that misses the grace period is aborted and reported as
    /// [`RoleEnd::TimedOut`].
    pub async fn join(self, grace: Duration) -> RoleOutcome {
        self.join_until(Instant::now() + grace).await
    }

    /// Wait until `deadline` for the role to finish
    ///
    /// Lets several roles share one shutdown deadline.
    pub async fn join_until(mut self, deadline: Instant) -> RoleOutcome {
        match tokio::time::timeout_at(deadline, &mut self.handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::error!(role = %self.name, error = %e, "Role task failed");
                RoleOutcome {
                    end: RoleEnd::Failed(Error::TaskJoin {
                        name: self.name.clone(),
                        reason: e.to_string(),
                    }),
                    role: self.name,
                    report: None,
                }
            }
            Err(_) => {
                self.handle.abort();
                tracing::warn!(
                    role = %self.name,
                    state = ?self.state.get(),
                    "Role missed shutdown deadline, aborted"
                );
                RoleOutcome {
                    role: self.name,
                    end: RoleEnd::TimedOut,
                    report: None,
                }
            }
        }
    }
}

/// Spawn a role on its own task
pub fn spawn_role<R: SubscriberRole + 'static>(
    mut role: R,
    subscription: Subscription,
    shutdown: ShutdownSignal,
    poll_interval: Duration,
) -> RoleHandle {
    let name = role.name().to_string();
    let state = Arc::new(RoleStateCell::new());

    let handle = {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            run_role(&mut role, subscription, shutdown, poll_interval, &state).await
        })
    };

    RoleHandle {
        name,
        state,
        handle,
    }
}
