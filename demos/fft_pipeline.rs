//! FFT pipeline demo: ventilator, worker pool and sink
//!
//! Run with: cargo run --example fft_pipeline [ITEMS] [WORKERS]
//!
//! Examples:
//!   cargo run --example fft_pipeline          # 16 frames on 4 workers
//!   cargo run --example fft_pipeline 100 8    # 100 frames on 8 workers
//!
//! The ventilator waits for the sink's handshake before sending anything,
//! then every worker pulls frames from the shared queue. The sink prints how
//! the work was spread across workers.

use framecast::source::SyntheticSource;
use framecast::ventilator::run_fft_pipeline;
use framecast::{FrameShape, FrameSource, ShutdownSignal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let items: usize = match args.get(1) {
        Some(n) => n.parse()?,
        None => 16,
    };
    let workers: usize = match args.get(2) {
        Some(n) => n.parse()?,
        None => 4,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("framecast=info".parse()?),
        )
        .init();

    let mut source = SyntheticSource::new(FrameShape::new(64, 64, 3));
    let frames = (0..items)
        .map(|_| source.get_frame())
        .collect::<framecast::Result<Vec<_>>>()?;

    let started = std::time::Instant::now();
    let report = run_fft_pipeline(frames, workers, ShutdownSignal::new()).await?;

    println!(
        "Collected {}/{} spectra in {:?}",
        report.collected(),
        report.expected,
        started.elapsed()
    );
    for (worker, count) in &report.per_worker {
        println!("  worker {}: {} items", worker, count);
    }
    if let Some(first) = report.results.first() {
        println!(
            "  first result: item {} from worker {}, DC per channel {:?}",
            first.index,
            first.worker,
            first.dc()
        );
    }

    Ok(())
}
