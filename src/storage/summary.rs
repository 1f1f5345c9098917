//! Per-frame summary statistics
//!
//! For each frame the channel axis is summed, then the minimum, maximum and
//! mean over all pixels of that sum are recorded. Persisted as:
//!
//! ```text
//! magic "FRSM" (4) | N (u64 LE) | min[N] | max[N] | mean[N]   (f64 LE)
//! ```

use std::path::Path;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::envelope::Frame;
use crate::error::{Error, Result};

const SUMMARY_MAGIC: &[u8; 4] = b"FRSM";

/// Running min/max/mean sequences, one entry per frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryStream {
    /// Minimum of the channel sum per frame
    pub min: Vec<f64>,
    /// Maximum of the channel sum per frame
    pub max: Vec<f64>,
    /// Mean of the channel sum per frame
    pub mean: Vec<f64>,
}

impl SummaryStream {
    /// Create an empty summary
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one frame
    pub fn push(&mut self, frame: &Frame) {
        let sums = frame.channel_sum();
        if sums.is_empty() {
            self.min.push(0.0);
            self.max.push(0.0);
            self.mean.push(0.0);
            return;
        }

        let min = sums.iter().copied().fold(f64::INFINITY, f64::min);
        let max = sums.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = sums.iter().sum::<f64>() / sums.len() as f64;

        self.min.push(min);
        self.max.push(max);
        self.mean.push(mean);
    }

    /// Number of frames recorded
    pub fn len(&self) -> usize {
        self.mean.len()
    }

    /// Check if no frames were recorded
    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    /// Encode the three sequences
    pub fn encode(&self) -> Bytes {
        let n = self.len();
        let mut buf = BytesMut::with_capacity(4 + 8 + n * 3 * 8);
        buf.put_slice(SUMMARY_MAGIC);
        buf.put_u64_le(n as u64);
        for series in [&self.min, &self.max, &self.mean] {
            for &v in series.iter() {
                buf.put_f64_le(v);
            }
        }
        buf.freeze()
    }

    /// Decode bytes produced by [`SummaryStream::encode`]
    pub fn decode(mut raw: &[u8]) -> Result<Self> {
        if raw.len() < 12 || &raw[..4] != SUMMARY_MAGIC {
            return Err(Error::invalid_dataset("bad summary header"));
        }
        raw.advance(4);

        let n = raw.get_u64_le() as usize;
        let needed = n
            .checked_mul(3 * 8)
            .ok_or_else(|| Error::invalid_dataset("summary length overflow"))?;
        if raw.remaining() != needed {
            return Err(Error::invalid_dataset(format!(
                "summary body holds {} bytes, expected {}",
                raw.remaining(),
                needed
            )));
        }

        let min = read_series(&mut raw, n);
        let max = read_series(&mut raw, n);
        let mean = read_series(&mut raw, n);

        Ok(Self { min, max, mean })
    }

    /// Write to `path`, replacing any existing file
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.encode())?;
        Ok(())
    }

    /// Read a summary file
    pub fn read_from(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read(path.as_ref())?;
        Self::decode(&raw)
    }
}

fn read_series(raw: &mut &[u8], n: usize) -> Vec<f64> {
    (0..n).map(|_| raw.get_f64_le()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::FrameShape;

    #[test]
    fn test_push_statistics() {
        // 2x2 pixels, 3 channels; channel sums are 3, 6, 9, 30
        let frame = Frame::from_elements(
            FrameShape::new(2, 2, 3),
            &[1u8, 1, 1, 2, 2, 2, 3, 3, 3, 10, 10, 10],
        )
        .unwrap();

        let mut summary = SummaryStream::new();
        summary.push(&frame);

        assert_eq!(summary.len(), 1);
        assert_eq!(summary.min, vec![3.0]);
        assert_eq!(summary.max, vec![30.0]);
        assert_eq!(summary.mean, vec![12.0]);
    }

    #[test]
    fn test_one_entry_per_frame() {
        let mut summary = SummaryStream::new();
        for n in 0..5u8 {
            let frame = Frame::from_elements(FrameShape::new(1, 2, 1), &[n, n + 1]).unwrap();
            summary.push(&frame);
        }

        assert_eq!(summary.len(), 5);
        assert_eq!(summary.min, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(summary.max, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.frsm");

        let summary = SummaryStream {
            min: vec![1.0, 2.0],
            max: vec![5.0, 6.0],
            mean: vec![3.0, 4.5],
        };
        summary.write_to(&path).unwrap();

        assert_eq!(SummaryStream::read_from(&path).unwrap(), summary);
    }

    #[test]
    fn test_decode_rejects_truncated() {
        let encoded = SummaryStream {
            min: vec![1.0],
            max: vec![1.0],
            mean: vec![1.0],
        }
        .encode();

        assert!(SummaryStream::decode(&encoded[..encoded.len() - 1]).is_err());
        assert!(SummaryStream::decode(b"nope").is_err());
    }
}
