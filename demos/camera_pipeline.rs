//! Camera pipeline demo: one synthetic camera, three subscriber roles
//!
//! Run with: cargo run --example camera_pipeline [FRAMES] [OUTPUT_DIR]
//!
//! Examples:
//!   cargo run --example camera_pipeline                 # 200 frames into a temp dir
//!   cargo run --example camera_pipeline 1000 /tmp/out   # 1000 frames into /tmp/out
//!
//! ## What happens
//!
//! - A synthetic 48x64x3 camera produces frames every 2 ms
//! - The Persister writes every frame to `frames.frds`
//! - The Analyzer writes per-frame min/max/mean to `summary.frsm`
//! - The throttled consumer sleeps 20 ms per frame with a high-water mark of
//!   5, so it drops most frames while the other two lose none
//!
//! Set `RUST_LOG=framecast=debug` for per-frame logging.

use std::path::PathBuf;
use std::time::Duration;

use framecast::coordinator::{Coordinator, CoordinatorConfig};
use framecast::roles::{
    Analyzer, AnalyzerConfig, Persister, PersisterConfig, ThrottledConfig, ThrottledConsumer,
};
use framecast::storage::{DatasetReader, SummaryStream};
use framecast::{FrameShape, RoleEnd, SubscriptionConfig, SyntheticSource};

fn print_usage() {
    println!("Usage: camera_pipeline [FRAMES] [OUTPUT_DIR]");
    println!();
    println!("  FRAMES      number of frames to publish (default 200)");
    println!("  OUTPUT_DIR  where to write frames.frds and summary.frsm");
    println!("              (default: a directory under the system temp dir)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let frames: u64 = match args.get(1) {
        Some(n) => n.parse()?,
        None => 200,
    };
    let output_dir = args
        .get(2)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("framecast-demo"));
    std::fs::create_dir_all(&output_dir)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("framecast=info".parse()?)
                .add_directive("camera_pipeline=info".parse()?),
        )
        .init();

    let dataset_path = output_dir.join("frames.frds");
    let summary_path = output_dir.join("summary.frsm");
    let shape = FrameShape::new(48, 64, 3);

    let config = CoordinatorConfig::default()
        .max_frames(frames)
        .frame_interval(Duration::from_millis(2));
    let mut coordinator = Coordinator::new(config);

    let throttled = ThrottledConfig::default().delay(Duration::from_millis(20));
    coordinator
        .add_role(
            Persister::create(PersisterConfig::new(&dataset_path))?,
            SubscriptionConfig::topic("frame"),
        )
        .add_role(
            Analyzer::new(AnalyzerConfig::new(&summary_path)),
            SubscriptionConfig::topic("frame"),
        )
        .add_role(
            ThrottledConsumer::new(&throttled),
            throttled.subscription("frame"),
        );

    // Ctrl-C stops the run early but still finalizes every role
    let shutdown = coordinator.shutdown_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.trigger();
        }
    });

    let report = coordinator.run(SyntheticSource::new(shape)).await?;

    println!();
    println!(
        "Published {} frames ({:?})",
        report.frames_published, report.stop_reason
    );
    for outcome in &report.roles {
        match (&outcome.end, &outcome.report) {
            (RoleEnd::Failed(e), _) => println!("  {}: failed: {}", outcome.role, e),
            (RoleEnd::TimedOut, _) => println!("  {}: timed out", outcome.role),
            (_, Some(r)) => println!("  {}", r),
            (_, None) => println!("  {}: no report", outcome.role),
        }
    }
    println!(
        "Broker: delivered={} dropped={}",
        report.broker.delivered, report.broker.dropped
    );

    let dataset = DatasetReader::open(&dataset_path)?;
    if let Some((h, w, c, n)) = dataset.shape() {
        println!("Dataset {}: shape ({}, {}, {}, {})", dataset_path.display(), h, w, c, n);
    }
    let summary = SummaryStream::read_from(&summary_path)?;
    if let (Some(first), Some(last)) = (summary.mean.first(), summary.mean.last()) {
        println!(
            "Summary {}: {} frames, mean {:.1} .. {:.1}",
            summary_path.display(),
            summary.len(),
            first,
            last
        );
    }

    Ok(())
}
