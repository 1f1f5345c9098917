//! Ventilator, workers and sink
//!
//! ```text
//!                          ┌──► Worker 0 ──┐
//!   Ventilator ──► queue ──┼──► Worker 1 ──┼──► Sink (collects N)
//!        │                 └──► Worker n ──┘      ▲
//!        └────────────── ready handshake ─────────┘
//! ```
//!
//! Workers share one queue, so each item is processed exactly once by
//! whichever worker takes it first. The sink collects results in the order
//! workers finish them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

use super::fft::{Fft2d, FftResult};
use super::handshake::{self, HandshakeEndpoint, HandshakeListener};
use crate::envelope::Frame;
use crate::error::{Error, Result};
use crate::shutdown::ShutdownSignal;

/// Default time the ventilator and sink wait for each other
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// One unit of work
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Position in the ventilator's output
    pub index: u64,
    /// Frame to transform
    pub frame: Frame,
}

/// Work queue shared by all workers
pub type WorkQueue = Arc<Mutex<mpsc::Receiver<WorkItem>>>;

/// Create a work queue holding up to `capacity` pending items
pub fn work_queue(capacity: usize) -> (mpsc::Sender<WorkItem>, WorkQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, Arc::new(Mutex::new(rx)))
}

/// What the sink collected
#[derive(Debug)]
pub struct SinkReport {
    /// Results the sink was waiting for
    pub expected: usize,
    /// Results in arrival order
    pub results: Vec<FftResult>,
    /// Results per worker ID
    pub per_worker: BTreeMap<usize, u64>,
    /// When the sink acknowledged the handshake
    pub ready_at: Instant,
    /// When the first result arrived
    pub first_result_at: Option<Instant>,
}

impl SinkReport {
    /// Number of results collected
    pub fn collected(&self) -> usize {
        self.results.len()
    }

    /// Check if every expected result arrived
    pub fn is_complete(&self) -> bool {
        self.results.len() == self.expected
    }
}

/// Channels the rest of the pipeline uses to reach a sink
#[derive(Debug)]
pub struct SinkHandles {
    /// For the ventilator's ready handshake
    pub handshake: HandshakeEndpoint,
    /// For workers to push results
    pub results: mpsc::Sender<FftResult>,
}

/// Collects exactly `expected` results
#[derive(Debug)]
pub struct Sink {
    expected: usize,
    listener: HandshakeListener,
    results: mpsc::Receiver<FftResult>,
}

impl Sink {
    /// Create a sink and the handles to reach it
    pub fn bind(expected: usize) -> (Self, SinkHandles) {
        let (handshake, listener) = handshake::channel();
        let (results_tx, results) = mpsc::channel(expected.clamp(1, 1024));

        (
            Self {
                expected,
                listener,
                results,
            },
            SinkHandles {
                handshake,
                results: results_tx,
            },
        )
    }

    /// Acknowledge the ventilator, then collect results
    ///
    /// Ends after `expected` results, when every result sender is gone, or
    /// on shutdown. A short count is reported, not treated as an error.
    pub async fn run(
        mut self,
        shutdown: ShutdownSignal,
        handshake_timeout: Duration,
    ) -> Result<SinkReport> {
        self.listener.accept(handshake_timeout).await?;
        let ready_at = Instant::now();
        tracing::info!(expected = self.expected, "Sink ready");

        let mut report = SinkReport {
            expected: self.expected,
            results: Vec::with_capacity(self.expected),
            per_worker: BTreeMap::new(),
            ready_at,
            first_result_at: None,
        };

        while report.results.len() < self.expected {
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = self.results.recv() => received,
            };
            let Some(result) = received else {
                break;
            };

            report.first_result_at.get_or_insert_with(Instant::now);
            *report.per_worker.entry(result.worker).or_default() += 1;
            tracing::debug!(index = result.index, worker = result.worker, "Result collected");
            report.results.push(result);
        }

        if report.is_complete() {
            tracing::info!(
                collected = report.collected(),
                workers = report.per_worker.len(),
                "Sink complete"
            );
        } else {
            tracing::warn!(
                collected = report.collected(),
                expected = self.expected,
                "Sink ended early"
            );
        }
        Ok(report)
    }
}

/// Source of work items, available only after the sink acknowledged
#[derive(Debug)]
pub struct Ventilator {
    work: mpsc::Sender<WorkItem>,
    sent: u64,
    handshake_rtt: Duration,
}

impl Ventilator {
    /// Complete the ready handshake with the sink
    pub async fn connect(
        sink: &HandshakeEndpoint,
        work: mpsc::Sender<WorkItem>,
        timeout: Duration,
    ) -> Result<Self> {
        let handshake_rtt = sink.request(timeout).await?;
        tracing::info!(
            rtt_us = handshake_rtt.as_micros() as u64,
            "Ventilator connected"
        );

        Ok(Self {
            work,
            sent: 0,
            handshake_rtt,
        })
    }

    /// Round-trip time of the handshake
    pub fn handshake_rtt(&self) -> Duration {
        self.handshake_rtt
    }

    /// Items sent so far
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Queue a frame; returns its item index
    ///
    /// Waits while the queue is full.
    pub async fn send(&mut self, frame: Frame) -> Result<u64> {
        let index = self.sent;
        self.work
            .send(WorkItem { index, frame })
            .await
            .map_err(|_| Error::ChannelClosed("work queue".into()))?;
        self.sent += 1;
        Ok(index)
    }

    /// Close the queue so idle workers exit; returns the number of items sent
    pub fn finish(self) -> u64 {
        tracing::debug!(sent = self.sent, "Ventilator finished");
        self.sent
    }
}

/// Computes FFTs for items from the shared queue
pub struct Worker {
    id: usize,
    queue: WorkQueue,
    results: mpsc::Sender<FftResult>,
    plan: Option<Arc<Fft2d>>,
}

impl Worker {
    /// Create a worker
    pub fn new(id: usize, queue: WorkQueue, results: mpsc::Sender<FftResult>) -> Self {
        Self {
            id,
            queue,
            results,
            plan: None,
        }
    }

    /// Worker ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Process items until the queue closes or shutdown; returns items processed
    pub async fn run(mut self, shutdown: ShutdownSignal) -> Result<u64> {
        let mut processed = 0u64;

        loop {
            let item = {
                let mut queue = self.queue.lock().await;
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => None,
                    item = queue.recv() => item,
                }
            };
            let Some(item) = item else {
                break;
            };

            let plan = self.plan_for(&item.frame);
            let worker = self.id;
            let result = tokio::task::spawn_blocking(move || FftResult {
                index: item.index,
                worker,
                shape: item.frame.shape,
                spectra: plan.transform(&item.frame),
            })
            .await
            .map_err(|e| Error::TaskJoin {
                name: format!("worker-{}", self.id),
                reason: e.to_string(),
            })?;

            if self.results.send(result).await.is_err() {
                tracing::warn!(worker = self.id, "Sink gone, worker exiting");
                break;
            }
            processed += 1;
        }

        tracing::debug!(worker = self.id, processed, "Worker exiting");
        Ok(processed)
    }

    fn plan_for(&mut self, frame: &Frame) -> Arc<Fft2d> {
        match &self.plan {
            Some(plan) if plan.shape() == frame.shape => Arc::clone(plan),
            _ => {
                let plan = Arc::new(Fft2d::new(frame.shape));
                self.plan = Some(Arc::clone(&plan));
                plan
            }
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker").field("id", &self.id).finish()
    }
}
