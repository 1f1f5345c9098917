//! Frame sources
//!
//! A source is pulled by the coordinator's producer loop, one frame per
//! call. Returning [`Error::SourceExhausted`] ends the stream normally; any
//! other error ends it as a failure. Either way the coordinator runs the
//! regular shutdown sequence.

use crate::envelope::{DType, Frame, FrameShape};
use crate::error::{Error, Result};

/// Pull-based producer of frames
///
/// Called from a blocking thread, so implementations may block (e.g. waiting
/// on a device).
pub trait FrameSource: Send {
    /// Produce the next frame
    fn get_frame(&mut self) -> Result<Frame>;
}

impl<F> FrameSource for F
where
    F: FnMut() -> Result<Frame> + Send,
{
    fn get_frame(&mut self) -> Result<Frame> {
        self()
    }
}

/// Deterministic test pattern source
///
/// Frame `n` has element `k` set to `(n + k) % 256`, as `u8`.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    shape: FrameShape,
    produced: u64,
    limit: Option<u64>,
}

impl SyntheticSource {
    /// Create an unlimited source
    pub fn new(shape: FrameShape) -> Self {
        Self {
            shape,
            produced: 0,
            limit: None,
        }
    }

    /// Stop after `limit` frames
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Frames produced so far
    pub fn produced(&self) -> u64 {
        self.produced
    }

    /// The frame this source produces at position `n`
    pub fn pattern(shape: FrameShape, n: u64) -> Frame {
        let values: Vec<u8> = (0..shape.element_count() as u64)
            .map(|k| ((n + k) % 256) as u8)
            .collect();
        // Length always matches the shape
        Frame {
            shape,
            dtype: DType::U8,
            data: values.into(),
        }
    }
}

impl FrameSource for SyntheticSource {
    fn get_frame(&mut self) -> Result<Frame> {
        if self.limit.is_some_and(|limit| self.produced >= limit) {
            return Err(Error::SourceExhausted);
        }

        let frame = Self::pattern(self.shape, self.produced);
        self.produced += 1;
        Ok(frame)
    }
}
