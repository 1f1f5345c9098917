//! Frame types carried inside envelope payloads
//!
//! A [`Frame`] is an `H x W x C` image with a fixed element type. Element data
//! is stored little-endian in a `Bytes` buffer, so cloning a frame (or the
//! envelope that carries it) never copies pixel data.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Magic prefix of an encoded frame
const FRAME_MAGIC: &[u8; 4] = b"FRM1";

/// Encoded header: magic + dtype + three u32 dimensions
pub const FRAME_HEADER_SIZE: usize = 4 + 1 + 4 * 3;

/// Element type of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// Unsigned 8-bit
    U8,
    /// Unsigned 16-bit
    U16,
    /// Signed 32-bit
    I32,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
}

impl DType {
    /// Size of one element in bytes
    pub fn size(&self) -> usize {
        match self {
            DType::U8 => 1,
            DType::U16 => 2,
            DType::I32 | DType::F32 => 4,
            DType::F64 => 8,
        }
    }

    /// Code used by the frame and dataset encodings
    pub fn code(&self) -> u8 {
        match self {
            DType::U8 => 0,
            DType::U16 => 1,
            DType::I32 => 2,
            DType::F32 => 3,
            DType::F64 => 4,
        }
    }

    /// Parse an encoded dtype code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(DType::U8),
            1 => Some(DType::U16),
            2 => Some(DType::I32),
            3 => Some(DType::F32),
            4 => Some(DType::F64),
            _ => None,
        }
    }

    /// Decode one little-endian element as f64
    fn read_f64(&self, bytes: &[u8]) -> f64 {
        match self {
            DType::U8 => bytes[0] as f64,
            DType::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            DType::I32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            DType::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            DType::F64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes[..8]);
                f64::from_le_bytes(raw)
            }
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DType::U8 => "u8",
            DType::U16 => "u16",
            DType::I32 => "i32",
            DType::F32 => "f32",
            DType::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// Per-frame shape (height, width, channels)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameShape {
    /// Rows
    pub height: u32,
    /// Columns
    pub width: u32,
    /// Channels per pixel
    pub channels: u32,
}

impl FrameShape {
    /// Create a new shape
    pub fn new(height: u32, width: u32, channels: u32) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Number of elements in a frame of this shape
    ///
    /// Saturates at `usize::MAX`; use [`FrameShape::byte_len`] where the
    /// shape comes from untrusted input.
    pub fn element_count(&self) -> usize {
        self.checked_element_count().unwrap_or(usize::MAX)
    }

    /// Number of elements, or `None` if it does not fit in `usize`
    pub fn checked_element_count(&self) -> Option<usize> {
        (self.height as usize)
            .checked_mul(self.width as usize)?
            .checked_mul(self.channels as usize)
    }

    /// Bytes of element data for `dtype`, or `None` on overflow
    pub fn byte_len(&self, dtype: DType) -> Option<usize> {
        self.checked_element_count()?.checked_mul(dtype.size())
    }

    /// Number of pixels (height * width)
    pub fn pixel_count(&self) -> usize {
        (self.height as usize).saturating_mul(self.width as usize)
    }
}

impl std::fmt::Display for FrameShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.channels)
    }
}

/// Scalar types that can be packed into a [`Frame`]
pub trait Element: Copy {
    /// Matching frame element type
    const DTYPE: DType;

    /// Append the little-endian encoding of `self`
    fn put_le(self, buf: &mut BytesMut);
}

impl Element for u8 {
    const DTYPE: DType = DType::U8;

    fn put_le(self, buf: &mut BytesMut) {
        buf.put_u8(self);
    }
}

impl Element for u16 {
    const DTYPE: DType = DType::U16;

    fn put_le(self, buf: &mut BytesMut) {
        buf.put_u16_le(self);
    }
}

impl Element for i32 {
    const DTYPE: DType = DType::I32;

    fn put_le(self, buf: &mut BytesMut) {
        buf.put_i32_le(self);
    }
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    fn put_le(self, buf: &mut BytesMut) {
        buf.put_f32_le(self);
    }
}

impl Element for f64 {
    const DTYPE: DType = DType::F64;

    fn put_le(self, buf: &mut BytesMut) {
        buf.put_f64_le(self);
    }
}

/// An image frame
///
/// Elements are laid out row-major with channels innermost, i.e. element
/// `(y, x, c)` lives at index `(y * width + x) * channels + c`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Frame shape
    pub shape: FrameShape,
    /// Element type
    pub dtype: DType,
    /// Raw element data (little-endian)
    pub data: Bytes,
}

impl Frame {
    /// Create a frame from raw little-endian element bytes
    pub fn new(shape: FrameShape, dtype: DType, data: Bytes) -> Result<Self> {
        let expected = shape
            .byte_len(dtype)
            .ok_or_else(|| Error::wire(format!("frame shape {} too large", shape)))?;
        if data.len() != expected {
            return Err(Error::FrameSize {
                shape,
                dtype,
                expected,
                actual: data.len(),
            });
        }

        Ok(Self { shape, dtype, data })
    }

    /// Create a frame from typed elements
    pub fn from_elements<T: Element>(shape: FrameShape, elements: &[T]) -> Result<Self> {
        let mut buf = BytesMut::with_capacity(elements.len() * T::DTYPE.size());
        for &e in elements {
            e.put_le(&mut buf);
        }
        Self::new(shape, T::DTYPE, buf.freeze())
    }

    /// Size of the element data in bytes
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// All elements converted to f64, in storage order
    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.data
            .chunks_exact(self.dtype.size())
            .map(|e| self.dtype.read_f64(e))
            .collect()
    }

    /// Sum across the channel axis, giving one value per pixel
    pub fn channel_sum(&self) -> Vec<f64> {
        let channels = self.shape.channels.max(1) as usize;
        let values = self.to_f64_vec();
        values
            .chunks_exact(channels)
            .map(|pixel| pixel.iter().sum())
            .collect()
    }

    /// Encode as a self-describing payload
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.data.len());
        buf.put_slice(FRAME_MAGIC);
        buf.put_u8(self.dtype.code());
        buf.put_u32(self.shape.height);
        buf.put_u32(self.shape.width);
        buf.put_u32(self.shape.channels);
        buf.put_slice(&self.data);
        buf.freeze()
    }

    /// Decode a payload produced by [`Frame::encode`]
    ///
    /// The element data is sliced out of `payload` without copying.
    pub fn decode(payload: &Bytes) -> Result<Self> {
        if payload.len() < FRAME_HEADER_SIZE {
            return Err(Error::wire(format!(
                "frame payload too short: {} bytes",
                payload.len()
            )));
        }

        let mut header = &payload[..FRAME_HEADER_SIZE];
        if &header[..4] != FRAME_MAGIC {
            return Err(Error::wire("bad frame magic"));
        }
        header.advance(4);

        let code = header.get_u8();
        let dtype = DType::from_code(code)
            .ok_or_else(|| Error::wire(format!("unknown dtype code {}", code)))?;
        let shape = FrameShape::new(header.get_u32(), header.get_u32(), header.get_u32());

        Self::new(shape, dtype, payload.slice(FRAME_HEADER_SIZE..))
    }
}
