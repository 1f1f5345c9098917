//! Error types
//!
//! Transport overflow is not an error: it is handled by the subscription's
//! overflow policy and surfaced through dropped counters. Everything that can
//! actually fail goes through [`Error`].

use crate::envelope::{DType, FrameShape};

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for framecast operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame does not match the layout fixed by the dataset
    #[error("shape mismatch: expected {expected_shape} {expected_dtype}, got {actual_shape} {actual_dtype}")]
    ShapeMismatch {
        /// Shape fixed at dataset creation
        expected_shape: FrameShape,
        /// Element type fixed at dataset creation
        expected_dtype: DType,
        /// Shape of the offending frame
        actual_shape: FrameShape,
        /// Element type of the offending frame
        actual_dtype: DType,
    },

    /// Frame data length disagrees with its shape and element type
    #[error("frame size mismatch: {shape} {dtype} needs {expected} bytes, got {actual}")]
    FrameSize {
        /// Declared shape
        shape: FrameShape,
        /// Declared element type
        dtype: DType,
        /// Bytes implied by shape and dtype
        expected: usize,
        /// Bytes actually supplied
        actual: usize,
    },

    /// Malformed wire message or frame encoding
    #[error("wire format error: {0}")]
    Wire(String),

    /// Persisted dataset or summary file is malformed
    #[error("invalid dataset: {0}")]
    InvalidDataset(String),

    /// Frame source has nothing more to produce
    #[error("frame source exhausted")]
    SourceExhausted,

    /// Frame source failed
    #[error("frame source error: {0}")]
    Source(String),

    /// A stop marker was already published on this topic by this producer
    #[error("topic already stopped: {0}")]
    TopicStopped(String),

    /// The broker is no longer accepting envelopes
    #[error("broker closed")]
    BrokerClosed,

    /// The sink did not acknowledge the ventilator handshake in time
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The other end of a pipeline channel is gone
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// A spawned role or worker task panicked or was cancelled
    #[error("task '{name}' failed: {reason}")]
    TaskJoin {
        /// Name of the task
        name: String,
        /// Why joining failed
        reason: String,
    },
}

impl Error {
    /// Creates a wire format error
    pub fn wire(msg: impl Into<String>) -> Self {
        Self::Wire(msg.into())
    }

    /// Creates an invalid dataset error
    pub fn invalid_dataset(msg: impl Into<String>) -> Self {
        Self::InvalidDataset(msg.into())
    }

    /// Returns true if this error ends a stream without being a failure
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, Self::SourceExhausted)
    }
}
