//! 2D FFT of image frames
//!
//! Each channel is transformed independently: a forward FFT along every row,
//! then along every column. Spectra are stored row-major, one `H x W` plane
//! per channel.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use crate::envelope::{Frame, FrameShape};

/// Spectrum of one frame
#[derive(Debug, Clone)]
pub struct FftResult {
    /// Index of the work item this came from
    pub index: u64,
    /// Worker that computed it
    pub worker: usize,
    /// Shape of the source frame
    pub shape: FrameShape,
    /// One `H x W` complex plane per channel, row-major
    pub spectra: Vec<Vec<Complex<f64>>>,
}

impl FftResult {
    /// DC term of each channel (sum of that channel's samples)
    pub fn dc(&self) -> Vec<f64> {
        self.spectra
            .iter()
            .map(|plane| plane.first().map(|c| c.re).unwrap_or(0.0))
            .collect()
    }

    /// Magnitude of the spectrum for `channel`
    pub fn magnitudes(&self, channel: usize) -> Option<Vec<f64>> {
        self.spectra
            .get(channel)
            .map(|plane| plane.iter().map(|c| c.norm()).collect())
    }
}

/// Reusable row/column plans for one frame shape
pub struct Fft2d {
    shape: FrameShape,
    rows: Arc<dyn Fft<f64>>,
    columns: Arc<dyn Fft<f64>>,
}

impl Fft2d {
    /// Plan transforms for frames of `shape`
    pub fn new(shape: FrameShape) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        Self {
            shape,
            rows: planner.plan_fft_forward(shape.width as usize),
            columns: planner.plan_fft_forward(shape.height as usize),
        }
    }

    /// Shape these plans were made for
    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    /// Transform every channel of `frame`
    ///
    /// `frame` must have the planned shape.
    pub fn transform(&self, frame: &Frame) -> Vec<Vec<Complex<f64>>> {
        let height = self.shape.height as usize;
        let width = self.shape.width as usize;
        let channels = self.shape.channels as usize;
        if height == 0 || width == 0 {
            return vec![Vec::new(); channels];
        }

        let values = frame.to_f64_vec();
        (0..channels)
            .map(|c| {
                let mut plane: Vec<Complex<f64>> = (0..height * width)
                    .map(|p| Complex::new(values[p * channels + c], 0.0))
                    .collect();

                // Buffer length is a multiple of the row length: one pass per row
                self.rows.process(&mut plane);

                let mut transposed = transpose(&plane, height, width);
                self.columns.process(&mut transposed);
                transpose(&transposed, width, height)
            })
            .collect()
    }
}

/// Transpose a row-major `rows x cols` matrix
fn transpose(data: &[Complex<f64>], rows: usize, cols: usize) -> Vec<Complex<f64>> {
    let mut out = vec![Complex::new(0.0, 0.0); data.len()];
    for r in 0..rows {
        for c in 0..cols {
            out[c * rows + r] = data[r * cols + c];
        }
    }
    out
}

/// One-shot 2D FFT of `frame`
pub fn fft2(frame: &Frame) -> Vec<Vec<Complex<f64>>> {
    Fft2d::new(frame.shape).transform(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Complex<f64>, b: Complex<f64>) -> bool {
        (a - b).norm() < 1e-9
    }

    #[test]
    fn test_dc_is_sum() {
        let values: Vec<f64> = (0..12).map(|v| v as f64).collect();
        let frame = Frame::from_elements(FrameShape::new(3, 4, 1), &values).unwrap();

        let spectra = fft2(&frame);
        assert_eq!(spectra.len(), 1);
        assert_eq!(spectra[0].len(), 12);
        assert!(close(spectra[0][0], Complex::new(66.0, 0.0)));
    }

    #[test]
    fn test_impulse_is_flat() {
        let mut values = vec![0.0f64; 16];
        values[0] = 1.0;
        let frame = Frame::from_elements(FrameShape::new(4, 4, 1), &values).unwrap();

        for bin in &fft2(&frame)[0] {
            assert!(close(*bin, Complex::new(1.0, 0.0)));
        }
    }

    #[test]
    fn test_channels_independent() {
        // 2x2 pixels, 2 channels: channel 0 constant 1, channel 1 constant 2
        let frame = Frame::from_elements(FrameShape::new(2, 2, 2), &[1u8, 2, 1, 2, 1, 2, 1, 2]).unwrap();

        let spectra = fft2(&frame);
        assert_eq!(spectra.len(), 2);
        assert!(close(spectra[0][0], Complex::new(4.0, 0.0)));
        assert!(close(spectra[1][0], Complex::new(8.0, 0.0)));
        for plane in &spectra {
            for bin in &plane[1..] {
                assert!(close(*bin, Complex::new(0.0, 0.0)));
            }
        }
    }

    #[test]
    fn test_column_frequency() {
        // Rows alternate 1, -1: energy only at (ky = H/2, kx = 0)
        let values: Vec<f64> = (0..4)
            .flat_map(|y| std::iter::repeat(if y % 2 == 0 { 1.0 } else { -1.0 }).take(2))
            .collect();
        let frame = Frame::from_elements(FrameShape::new(4, 2, 1), &values).unwrap();

        let plane = &fft2(&frame)[0];
        // Index of (ky = 2, kx = 0) in a 4x2 row-major plane
        assert!(close(plane[2 * 2], Complex::new(8.0, 0.0)));
        let energy: f64 = plane.iter().map(|c| c.norm_sqr()).sum();
        assert!((energy - 64.0).abs() < 1e-9);
    }

    #[test]
    fn test_transpose() {
        let data: Vec<Complex<f64>> = (0..6).map(|v| Complex::new(v as f64, 0.0)).collect();
        let t = transpose(&data, 2, 3);
        let re: Vec<f64> = t.iter().map(|c| c.re).collect();
        assert_eq!(re, vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }
}
