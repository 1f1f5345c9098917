//! Persister role: appends every frame to a dataset file

use std::path::PathBuf;

use async_trait::async_trait;

use super::{RoleReport, SubscriberRole};
use crate::envelope::{Envelope, Frame};
use crate::error::Result;
use crate::storage::{DatasetWriter, DEFAULT_CHUNK_FRAMES};

/// Persister configuration
#[derive(Debug, Clone)]
pub struct PersisterConfig {
    /// Dataset file path
    pub path: PathBuf,
    /// Frames preallocated per growth step
    pub chunk_frames: u64,
}

impl PersisterConfig {
    /// Configuration writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            chunk_frames: DEFAULT_CHUNK_FRAMES,
        }
    }

    /// Set the growth step
    pub fn chunk_frames(mut self, frames: u64) -> Self {
        self.chunk_frames = frames.max(1);
        self
    }
}

/// Writes frames into a growable dataset
///
/// The first frame fixes the dataset's shape and dtype; a later frame that
/// does not match is fatal for the role.
pub struct Persister {
    name: String,
    writer: DatasetWriter,
    report: Option<RoleReport>,
}

impl Persister {
    /// Create the dataset file and the role
    pub fn create(config: PersisterConfig) -> Result<Self> {
        let writer = DatasetWriter::create(&config.path, config.chunk_frames)?;
        tracing::info!(
            path = %config.path.display(),
            chunk_frames = config.chunk_frames,
            "Persister opened dataset"
        );

        Ok(Self {
            name: "persister".into(),
            writer,
            report: None,
        })
    }

    /// Override the role name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Frames written so far
    pub fn frames_written(&self) -> u64 {
        self.writer.frame_count()
    }
}

#[async_trait]
impl SubscriberRole for Persister {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&mut self, envelope: &Envelope, frame: Frame) -> Result<()> {
        let index = self.writer.append(&frame)?;
        tracing::debug!(
            role = %self.name,
            sequence = envelope.sequence,
            index,
            "Frame persisted"
        );
        Ok(())
    }

    async fn finalize(&mut self) -> Result<RoleReport> {
        if let Some(report) = &self.report {
            return Ok(report.clone());
        }

        self.writer.close()?;
        let frames = self.writer.frame_count();
        let report = RoleReport {
            role: self.name.clone(),
            frames,
            dropped: 0,
            detail: format!("{} frames written", frames),
        };
        self.report = Some(report.clone());
        Ok(report)
    }
}
