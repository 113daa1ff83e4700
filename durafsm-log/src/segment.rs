//! Segment files.
//!
//! The log is a directory of `NNNNNNNNNNNNNNNN.log` files (16 hex digits),
//! written strictly in id order. Only the newest segment is ever appended to.

use crate::error::LogError;
use crate::frame::{Decoded, Frame, FRAME_MAGIC};
use bytes::BytesMut;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Segment identifier (monotonically increasing, starting at 1).
pub type SegmentId = u64;

pub fn segment_filename(id: SegmentId) -> String {
    format!("{:016x}.log", id)
}

pub fn parse_segment_filename(name: &str) -> Option<SegmentId> {
    let stem = name.strip_suffix(".log")?;
    if stem.len() != 16 {
        return None;
    }
    u64::from_str_radix(stem, 16).ok()
}

/// Lists segment ids in `dir`, ascending.
pub fn list_segments(dir: &Path) -> Result<Vec<SegmentId>, LogError> {
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(id) = parse_segment_filename(&entry.file_name().to_string_lossy()) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Result of reading a segment front to back.
#[derive(Debug, Default)]
pub struct SegmentScan {
    pub frames: Vec<Frame>,
    /// Byte length covered by complete, verified frames.
    pub valid_len: u64,
    /// Bytes after `valid_len` that did not form a complete frame.
    pub trailing_bytes: u64,
    /// The trailing bytes start with a frame whose header or checksum is
    /// damaged, rather than one that is merely short.
    pub damaged_tail: bool,
}

/// One open segment file.
pub struct Segment {
    id: SegmentId,
    path: PathBuf,
    file: File,
    len: u64,
    dirty: bool,
}

impl Segment {
    pub fn create(dir: &Path, id: SegmentId) -> Result<Self, LogError> {
        let path = dir.join(segment_filename(id));
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;
        Ok(Self {
            id,
            path,
            file,
            len: 0,
            dirty: false,
        })
    }

    pub fn open(dir: &Path, id: SegmentId) -> Result<Self, LogError> {
        let path = dir.join(segment_filename(id));
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            id,
            path,
            file,
            len,
            dirty: false,
        })
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Writes a frame at the end of the segment. Returns its offset.
    pub fn append(&mut self, frame: &Frame) -> Result<u64, LogError> {
        let encoded = frame.encode()?;
        let offset = self.len;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&encoded)?;
        self.len += encoded.len() as u64;
        self.dirty = true;
        Ok(offset)
    }

    /// Flushes written frames to stable storage. Returns whether anything was flushed.
    pub fn sync(&mut self) -> Result<bool, LogError> {
        if !self.dirty {
            return Ok(false);
        }
        self.file.sync_data()?;
        self.dirty = false;
        Ok(true)
    }

    /// Reads every frame. Stops at the first incomplete frame or zero padding
    /// and reports how many bytes were left over.
    ///
    /// A damaged frame with no valid frame after it is reported the same way,
    /// since a crash can persist a header before its payload. Damage followed
    /// by a valid frame is returned as an error.
    pub fn scan(&mut self) -> Result<SegmentScan, LogError> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut raw = Vec::with_capacity(self.len as usize);
        self.file.read_to_end(&mut raw)?;

        let name = self.path.display().to_string();
        let total = raw.len() as u64;
        let mut buf = BytesMut::from(&raw[..]);
        let mut scan = SegmentScan::default();

        while !buf.is_empty() {
            match Frame::decode(&mut buf, &name, scan.valid_len) {
                Ok(Decoded::Frame(frame)) => {
                    scan.valid_len += frame.encoded_len() as u64;
                    scan.frames.push(frame);
                }
                Ok(Decoded::Incomplete | Decoded::Padding) => break,
                Err(e) if e.is_frame_damage() => {
                    if has_frame_after(&raw, scan.valid_len as usize + 1) {
                        return Err(e);
                    }
                    tracing::debug!("Damaged final frame in {}: {}", name, e);
                    scan.damaged_tail = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        scan.trailing_bytes = total - scan.valid_len;
        Ok(scan)
    }

    /// Cuts the file back to `len` bytes.
    pub fn truncate(&mut self, len: u64) -> Result<(), LogError> {
        self.file.set_len(len)?;
        self.file.sync_data()?;
        self.len = len;
        self.dirty = false;
        Ok(())
    }
}

/// Whether a verified frame starts anywhere at or after `from`.
fn has_frame_after(raw: &[u8], from: usize) -> bool {
    (from..raw.len())
        .filter(|&start| raw[start..].starts_with(&FRAME_MAGIC))
        .any(|start| {
            let mut buf = BytesMut::from(&raw[start..]);
            matches!(
                Frame::decode(&mut buf, "", start as u64),
                Ok(Decoded::Frame(_))
            )
        })
}
