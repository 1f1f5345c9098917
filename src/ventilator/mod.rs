//! Ventilator/worker/sink FFT pipeline
//!
//! A work-distribution pipeline alongside the pub/sub broker: the ventilator
//! hands frames to a pool of workers, each worker computes a per-channel 2D
//! FFT, and the sink collects a known number of results. Production starts
//! only after the sink has acknowledged a ready handshake.

pub mod fft;
pub mod handshake;
pub mod pipeline;

use tokio::task::JoinHandle;

use crate::envelope::Frame;
use crate::error::{Error, Result};
use crate::shutdown::ShutdownSignal;

pub use fft::{fft2, Fft2d, FftResult};
pub use handshake::{HandshakeEndpoint, HandshakeListener, HandshakeState};
pub use pipeline::{
    work_queue, Sink, SinkHandles, SinkReport, Ventilator, WorkItem, WorkQueue, Worker,
    DEFAULT_HANDSHAKE_TIMEOUT,
};

/// Transform `frames` on `workers` workers and collect every result
///
/// Results arrive in completion order, not input order; use
/// [`FftResult::index`] to match them up.
pub async fn run_fft_pipeline(
    frames: Vec<Frame>,
    workers: usize,
    shutdown: ShutdownSignal,
) -> Result<SinkReport> {
    let workers = workers.max(1);
    let (sink, handles) = Sink::bind(frames.len());
    let sink_task = tokio::spawn(sink.run(shutdown.clone(), DEFAULT_HANDSHAKE_TIMEOUT));

    let (work, queue) = work_queue(workers * 2);
    let worker_tasks: Vec<JoinHandle<Result<u64>>> = (0..workers)
        .map(|id| {
            let worker = Worker::new(id, queue.clone(), handles.results.clone());
            tokio::spawn(worker.run(shutdown.clone()))
        })
        .collect();
    drop(queue);
    let SinkHandles { handshake, results } = handles;
    drop(results);

    tracing::info!(items = frames.len(), workers, "FFT pipeline starting");

    let mut ventilator = Ventilator::connect(&handshake, work, DEFAULT_HANDSHAKE_TIMEOUT).await?;
    for frame in frames {
        ventilator.send(frame).await?;
    }
    ventilator.finish();

    let report = join("sink", sink_task).await??;
    for (id, task) in worker_tasks.into_iter().enumerate() {
        let processed = join(&format!("worker-{}", id), task).await??;
        tracing::debug!(worker = id, processed, "Worker joined");
    }

    Ok(report)
}

async fn join<T>(name: &str, task: JoinHandle<T>) -> Result<T> {
    task.await.map_err(|e| Error::TaskJoin {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::FrameShape;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_four_items_two_workers() {
        let frames: Vec<Frame> = (0..4u8)
            .map(|n| Frame::from_elements(FrameShape::new(4, 4, 3), &[n; 48]).unwrap())
            .collect();

        let report = run_fft_pipeline(frames, 2, ShutdownSignal::new())
            .await
            .unwrap();

        assert_eq!(report.collected(), 4);
        assert!(report.is_complete());
        assert_eq!(report.per_worker.values().sum::<u64>(), 4);
        assert!(report.per_worker.keys().all(|&w| w < 2));
        assert!(report.first_result_at.unwrap() >= report.ready_at);

        let mut indices: Vec<u64> = report.results.iter().map(|r| r.index).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let report = run_fft_pipeline(Vec::new(), 3, ShutdownSignal::new())
            .await
            .unwrap();
        assert_eq!(report.collected(), 0);
        assert!(report.is_complete());
    }
}
