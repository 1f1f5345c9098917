//! Append-only frame dataset on disk
//!
//! # File Layout
//!
//! ```text
//! +=====================+==========+==========+=====+=====================+
//! | Header (64 bytes)   | Frame 0  | Frame 1  | ... | preallocated space  |
//! +=====================+==========+==========+=====+=====================+
//! ```
//!
//! Header fields (big-endian):
//!
//! ```text
//! magic "FRDS" (4) | version (1) | dtype (1) | height (4) | width (4) |
//! channels (4) | frame_count (8) | capacity (8) | zero padding
//! ```
//!
//! The logical shape is `(H, W, C, N)`: frame `i` is the slice
//! `[:, :, :, i]`. Frames are stored contiguously one after another so
//! appending never moves existing data. Capacity grows a whole chunk of
//! frames at a time, so the file is resized once per chunk rather than once
//! per frame. A dtype code of `0xFF` marks a dataset closed before its first
//! frame.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::envelope::{DType, Frame, FrameShape};
use crate::error::{Error, Result};

const DATASET_MAGIC: &[u8; 4] = b"FRDS";
const DATASET_VERSION: u8 = 1;

/// Size of the fixed header in bytes
pub const HEADER_SIZE: u64 = 64;

/// Frames added per growth step by default
pub const DEFAULT_CHUNK_FRAMES: u64 = 64;

/// dtype code for a dataset without frames
const DTYPE_UNSET: u8 = 0xFF;

/// Per-frame layout fixed by the first frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetLayout {
    /// Shape of every frame
    pub shape: FrameShape,
    /// Element type of every frame
    pub dtype: DType,
}

impl DatasetLayout {
    /// Layout of an existing frame
    pub fn of(frame: &Frame) -> Self {
        Self {
            shape: frame.shape,
            dtype: frame.dtype,
        }
    }

    /// Bytes per frame, saturating at `u64::MAX`
    pub fn frame_bytes(&self) -> u64 {
        self.shape
            .byte_len(self.dtype)
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or(u64::MAX)
    }

    fn check(&self, frame: &Frame) -> Result<()> {
        if frame.shape != self.shape || frame.dtype != self.dtype {
            return Err(Error::ShapeMismatch {
                expected_shape: self.shape,
                expected_dtype: self.dtype,
                actual_shape: frame.shape,
                actual_dtype: frame.dtype,
            });
        }
        Ok(())
    }
}

struct Header {
    layout: Option<DatasetLayout>,
    frame_count: u64,
    capacity: u64,
}

impl Header {
    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE as usize);
        buf.put_slice(DATASET_MAGIC);
        buf.put_u8(DATASET_VERSION);
        match self.layout {
            Some(layout) => {
                buf.put_u8(layout.dtype.code());
                buf.put_u32(layout.shape.height);
                buf.put_u32(layout.shape.width);
                buf.put_u32(layout.shape.channels);
            }
            None => {
                buf.put_u8(DTYPE_UNSET);
                buf.put_bytes(0, 12);
            }
        }
        buf.put_u64(self.frame_count);
        buf.put_u64(self.capacity);
        buf.resize(HEADER_SIZE as usize, 0);
        buf.freeze()
    }

    fn decode(mut raw: &[u8]) -> Result<Self> {
        if raw.len() < HEADER_SIZE as usize {
            return Err(Error::invalid_dataset("header truncated"));
        }
        if &raw[..4] != DATASET_MAGIC {
            return Err(Error::invalid_dataset("bad magic"));
        }
        raw.advance(4);

        let version = raw.get_u8();
        if version != DATASET_VERSION {
            return Err(Error::invalid_dataset(format!(
                "unsupported version {}",
                version
            )));
        }

        let code = raw.get_u8();
        let shape = FrameShape::new(raw.get_u32(), raw.get_u32(), raw.get_u32());
        let layout = if code == DTYPE_UNSET {
            None
        } else {
            let dtype = DType::from_code(code)
                .ok_or_else(|| Error::invalid_dataset(format!("unknown dtype code {}", code)))?;
            if shape.byte_len(dtype).is_none() {
                return Err(Error::invalid_dataset(format!(
                    "frame shape {} too large",
                    shape
                )));
            }
            Some(DatasetLayout { shape, dtype })
        };

        Ok(Self {
            layout,
            frame_count: raw.get_u64(),
            capacity: raw.get_u64(),
        })
    }
}

/// Writer for a frame dataset
///
/// The file is created (truncated) immediately; the layout is fixed by the
/// first appended frame. Call [`DatasetWriter::close`] to write the final
/// header and release preallocated space. Dropping an unclosed writer makes a
/// best-effort attempt to do the same.
pub struct DatasetWriter {
    path: PathBuf,
    file: Option<File>,
    layout: Option<DatasetLayout>,
    frame_count: u64,
    capacity: u64,
    chunk_frames: u64,
    grow_count: u64,
}

impl DatasetWriter {
    /// Create a dataset file, truncating any existing one
    pub fn create(path: impl AsRef<Path>, chunk_frames: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mut writer = Self {
            path,
            file: Some(file),
            layout: None,
            frame_count: 0,
            capacity: 0,
            chunk_frames: chunk_frames.max(1),
            grow_count: 0,
        };
        writer.write_header()?;

        tracing::debug!(path = %writer.path.display(), "Dataset created");
        Ok(writer)
    }

    /// Path of the dataset file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Layout, once the first frame has been written
    pub fn layout(&self) -> Option<DatasetLayout> {
        self.layout
    }

    /// Frames written so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Frames that fit without growing the file
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of times the file was grown
    pub fn grow_count(&self) -> u64 {
        self.grow_count
    }

    /// Logical `(H, W, C, N)` shape
    pub fn shape(&self) -> Option<(u32, u32, u32, u64)> {
        self.layout.map(|l| {
            (
                l.shape.height,
                l.shape.width,
                l.shape.channels,
                self.frame_count,
            )
        })
    }

    /// Append a frame; returns its index
    ///
    /// The first frame fixes the layout; later frames must match it.
    pub fn append(&mut self, frame: &Frame) -> Result<u64> {
        let layout = match self.layout {
            Some(layout) => {
                layout.check(frame)?;
                layout
            }
            None => {
                let layout = DatasetLayout::of(frame);
                self.layout = Some(layout);
                tracing::info!(
                    path = %self.path.display(),
                    shape = %layout.shape,
                    dtype = %layout.dtype,
                    "Dataset layout fixed"
                );
                layout
            }
        };

        if self.frame_count == self.capacity {
            self.grow(layout)?;
        }

        let index = self.frame_count;
        let offset = HEADER_SIZE + index * layout.frame_bytes();
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&frame.data)?;

        self.frame_count += 1;
        Ok(index)
    }

    fn grow(&mut self, layout: DatasetLayout) -> Result<()> {
        let capacity = self.capacity + self.chunk_frames;
        let len = HEADER_SIZE + capacity * layout.frame_bytes();
        self.file_mut()?.set_len(len)?;
        self.capacity = capacity;
        self.grow_count += 1;

        tracing::debug!(
            path = %self.path.display(),
            capacity,
            "Dataset grown"
        );
        Ok(())
    }

    /// Write the header and flush data to storage
    pub fn flush(&mut self) -> Result<()> {
        self.write_header()?;
        let file = self.file_mut()?;
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    /// Trim preallocated space, write the final header and close the file
    ///
    /// Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.file.is_none() {
            return Ok(());
        }

        let used = HEADER_SIZE + self.frame_count * self.layout.map_or(0, |l| l.frame_bytes());
        self.file_mut()?.set_len(used)?;
        self.capacity = self.frame_count;
        self.flush()?;
        self.file = None;

        tracing::debug!(
            path = %self.path.display(),
            frames = self.frame_count,
            "Dataset closed"
        );
        Ok(())
    }

    /// Check if the file is still open
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn write_header(&mut self) -> Result<()> {
        let header = Header {
            layout: self.layout,
            frame_count: self.frame_count,
            capacity: self.capacity,
        }
        .encode();

        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header)?;
        Ok(())
    }

    fn file_mut(&mut self) -> Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| Error::invalid_dataset("dataset already closed"))
    }
}

impl Drop for DatasetWriter {
    fn drop(&mut self) {
        if self.file.is_some() {
            if let Err(e) = self.close() {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to close dataset");
            }
        }
    }
}

/// Reader for a dataset written by [`DatasetWriter`]
pub struct DatasetReader {
    file: File,
    layout: Option<DatasetLayout>,
    frame_count: u64,
}

impl DatasetReader {
    /// Open and validate a dataset file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = File::open(path.as_ref())?;

        let mut raw = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut raw)
            .map_err(|_| Error::invalid_dataset("header truncated"))?;
        let header = Header::decode(&raw)?;

        let needed = header
            .frame_count
            .checked_mul(header.layout.map_or(0, |l| l.frame_bytes()))
            .and_then(|data| data.checked_add(HEADER_SIZE))
            .ok_or_else(|| Error::invalid_dataset("header frame count overflows"))?;
        let actual = file.metadata()?.len();
        if actual < needed {
            return Err(Error::invalid_dataset(format!(
                "file holds {} bytes, header needs {}",
                actual, needed
            )));
        }

        Ok(Self {
            file,
            layout: header.layout,
            frame_count: header.frame_count,
        })
    }

    /// Layout, or `None` for a dataset without frames
    pub fn layout(&self) -> Option<DatasetLayout> {
        self.layout
    }

    /// Number of stored frames
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Logical `(H, W, C, N)` shape
    pub fn shape(&self) -> Option<(u32, u32, u32, u64)> {
        self.layout.map(|l| {
            (
                l.shape.height,
                l.shape.width,
                l.shape.channels,
                self.frame_count,
            )
        })
    }

    /// Read frame `index`, i.e. the slice `[:, :, :, index]`
    pub fn read_frame(&mut self, index: u64) -> Result<Frame> {
        let layout = self
            .layout
            .ok_or_else(|| Error::invalid_dataset("dataset has no frames"))?;
        if index >= self.frame_count {
            return Err(Error::invalid_dataset(format!(
                "frame {} out of range (0..{})",
                index, self.frame_count
            )));
        }

        let frame_bytes = layout.frame_bytes();
        let mut data = vec![0u8; frame_bytes as usize];
        self.file
            .seek(SeekFrom::Start(HEADER_SIZE + index * frame_bytes))?;
        self.file.read_exact(&mut data)?;

        Frame::new(layout.shape, layout.dtype, Bytes::from(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: i32) -> Frame {
        let values: Vec<i32> = (0..48).map(|k| n * 48 + k).collect();
        Frame::from_elements(FrameShape::new(4, 4, 3), &values).unwrap()
    }

    #[test]
    fn test_write_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movie.frds");

        let mut writer = DatasetWriter::create(&path, 8).unwrap();
        for n in 0..20 {
            assert_eq!(writer.append(&frame(n)).unwrap(), n as u64);
        }
        assert_eq!(writer.shape(), Some((4, 4, 3, 20)));
        writer.close().unwrap();

        let mut reader = DatasetReader::open(&path).unwrap();
        assert_eq!(reader.shape(), Some((4, 4, 3, 20)));
        for n in 0..20 {
            assert_eq!(reader.read_frame(n as u64).unwrap(), frame(n));
        }
        assert!(reader.read_frame(20).is_err());
    }

    #[test]
    fn test_grows_by_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = DatasetWriter::create(dir.path().join("d.frds"), 8).unwrap();

        writer.append(&frame(0)).unwrap();
        assert_eq!(writer.capacity(), 8);
        for n in 1..17 {
            writer.append(&frame(n)).unwrap();
        }

        assert_eq!(writer.frame_count(), 17);
        assert_eq!(writer.capacity(), 24);
        assert_eq!(writer.grow_count(), 3);
    }

    #[test]
    fn test_close_trims_preallocation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.frds");
        let mut writer = DatasetWriter::create(&path, 64).unwrap();
        writer.append(&frame(0)).unwrap();
        writer.append(&frame(1)).unwrap();
        writer.close().unwrap();
        writer.close().unwrap();

        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, HEADER_SIZE + 2 * 48 * 4);
    }

    #[test]
    fn test_shape_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = DatasetWriter::create(dir.path().join("d.frds"), 4).unwrap();
        writer.append(&frame(0)).unwrap();

        let wrong = Frame::from_elements(FrameShape::new(2, 2, 3), &[0i32; 12]).unwrap();
        let err = writer.append(&wrong).unwrap_err();
        assert!(matches!(
            err,
            Error::ShapeMismatch {
                expected_shape,
                actual_shape,
                ..
            } if expected_shape == FrameShape::new(4, 4, 3) && actual_shape == FrameShape::new(2, 2, 3)
        ));

        let wrong_dtype = Frame::from_elements(FrameShape::new(4, 4, 3), &[0u8; 48]).unwrap();
        assert!(matches!(
            writer.append(&wrong_dtype),
            Err(Error::ShapeMismatch { .. })
        ));
        assert_eq!(writer.frame_count(), 1);
    }

    #[test]
    fn test_flush_makes_frames_visible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.frds");
        let mut writer = DatasetWriter::create(&path, 4).unwrap();
        writer.append(&frame(0)).unwrap();
        writer.append(&frame(1)).unwrap();
        writer.flush().unwrap();

        let mut reader = DatasetReader::open(&path).unwrap();
        assert_eq!(reader.frame_count(), 2);
        assert_eq!(reader.read_frame(1).unwrap(), frame(1));
    }

    #[test]
    fn test_empty_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.frds");
        DatasetWriter::create(&path, 4).unwrap().close().unwrap();

        let mut reader = DatasetReader::open(&path).unwrap();
        assert_eq!(reader.frame_count(), 0);
        assert!(reader.layout().is_none());
        assert!(reader.read_frame(0).is_err());
    }

    #[test]
    fn test_drop_closes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.frds");
        {
            let mut writer = DatasetWriter::create(&path, 4).unwrap();
            writer.append(&frame(3)).unwrap();
        }

        let mut reader = DatasetReader::open(&path).unwrap();
        assert_eq!(reader.frame_count(), 1);
        assert_eq!(reader.read_frame(0).unwrap(), frame(3));
    }

    #[test]
    fn test_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.frds");
        std::fs::write(&path, vec![0u8; 100]).unwrap();

        assert!(matches!(
            DatasetReader::open(&path),
            Err(Error::InvalidDataset(_))
        ));
    }

    #[test]
    fn test_rejects_oversized_header() {
        let dir = tempfile::tempdir().unwrap();

        let huge_shape = dir.path().join("shape.frds");
        let header = Header {
            layout: Some(DatasetLayout {
                shape: FrameShape::new(u32::MAX, u32::MAX, u32::MAX),
                dtype: DType::F64,
            }),
            frame_count: 1,
            capacity: 1,
        };
        std::fs::write(&huge_shape, header.encode()).unwrap();
        assert!(matches!(
            DatasetReader::open(&huge_shape),
            Err(Error::InvalidDataset(_))
        ));

        let huge_count = dir.path().join("count.frds");
        let header = Header {
            layout: Some(DatasetLayout::of(&frame(0))),
            frame_count: u64::MAX,
            capacity: u64::MAX,
        };
        std::fs::write(&huge_count, header.encode()).unwrap();
        assert!(matches!(
            DatasetReader::open(&huge_count),
            Err(Error::InvalidDataset(_))
        ));
    }
}
