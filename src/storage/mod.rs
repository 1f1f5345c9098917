//! On-disk outputs
//!
//! [`dataset`] is the growable frame store written by the persister;
//! [`summary`] holds the per-frame statistics written by the analyzer.

pub mod dataset;
pub mod summary;

pub use dataset::{DatasetLayout, DatasetReader, DatasetWriter, DEFAULT_CHUNK_FRAMES};
pub use summary::SummaryStream;
