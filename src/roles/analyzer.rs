//! Analyzer role: per-frame statistics
//!
//! Statistics are kept in memory and written once at finalize; a crash before
//! that loses them.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{RoleReport, SubscriberRole};
use crate::envelope::{Envelope, Frame};
use crate::error::Result;
use crate::storage::SummaryStream;

/// Analyzer configuration
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Summary file path
    pub path: PathBuf,
}

impl AnalyzerConfig {
    /// Configuration writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Records min/max/mean of each frame's channel sum
pub struct Analyzer {
    config: AnalyzerConfig,
    summary: SummaryStream,
    report: Option<RoleReport>,
}

impl Analyzer {
    /// Create a new analyzer
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            summary: SummaryStream::new(),
            report: None,
        }
    }

    /// Statistics collected so far
    pub fn summary(&self) -> &SummaryStream {
        &self.summary
    }
}

#[async_trait]
impl SubscriberRole for Analyzer {
    fn name(&self) -> &str {
        "analyzer"
    }

    async fn process(&mut self, envelope: &Envelope, frame: Frame) -> Result<()> {
        self.summary.push(&frame);
        tracing::trace!(sequence = envelope.sequence, "Frame analyzed");
        Ok(())
    }

    async fn finalize(&mut self) -> Result<RoleReport> {
        if let Some(report) = &self.report {
            return Ok(report.clone());
        }

        self.summary.write_to(&self.config.path)?;
        let frames = self.summary.len() as u64;
        tracing::info!(
            path = %self.config.path.display(),
            frames,
            "Summary written"
        );

        let report = RoleReport {
            role: "analyzer".into(),
            frames,
            dropped: 0,
            detail: format!("{} frames summarized", frames),
        };
        self.report = Some(report.clone());
        Ok(report)
    }
}
