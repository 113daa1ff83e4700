//! On-disk frame codec.
//!
//! ```text
//! +----------+----------+----------+----------+----------+----------+
//! | magic    | version  | kind     | reserved | length   | crc32c   |
//! | 4 bytes  | 1 byte   | 1 byte   | 2 bytes  | 4 bytes  | 4 bytes  |
//! +----------+----------+----------+----------+----------+----------+
//! | sequence            | payload (JSON)                            |
//! | 8 bytes             | length bytes                              |
//! +---------------------+-------------------------------------------+
//! ```
//!
//! All integers are big-endian. The checksum covers the payload only.

use crate::error::LogError;
use crate::FRAME_HEADER_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Magic bytes opening every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"DFSM";

/// Current frame format version.
pub const FRAME_VERSION: u8 = 1;

/// Maximum payload size (4 MiB). Instance records are tiny; anything
/// larger is a bug upstream.
pub const MAX_PAYLOAD_SIZE: usize = 4 * 1024 * 1024;

/// What a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// An instance record.
    Record = 1,
}

impl TryFrom<u8> for FrameKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(FrameKind::Record),
            other => Err(other),
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub sequence: u64,
    pub checksum: u32,
    pub payload: Bytes,
}

/// Outcome of decoding at the head of a buffer.
#[derive(Debug)]
pub enum Decoded {
    /// A complete, verified frame.
    Frame(Frame),
    /// Not enough bytes yet; could be a torn write at the tail.
    Incomplete,
    /// Zero-filled space after the last frame.
    Padding,
}

impl Frame {
    pub fn new(kind: FrameKind, sequence: u64, payload: Bytes) -> Self {
        Self {
            kind,
            sequence,
            checksum: crc32c::crc32c(&payload),
            payload,
        }
    }

    /// Size of this frame on disk.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }

    pub fn encode(&self) -> Result<BytesMut, LogError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(LogError::FrameTooLarge {
                size: self.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(&FRAME_MAGIC);
        buf.put_u8(FRAME_VERSION);
        buf.put_u8(self.kind as u8);
        buf.put_u16(0);
        buf.put_u32(self.payload.len() as u32);
        buf.put_u32(self.checksum);
        buf.put_u64(self.sequence);
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Decodes one frame from the front of `buf`, consuming it on success.
    ///
    /// `offset` is the position of `buf[0]` inside the segment and is only
    /// used for error reporting.
    pub fn decode(buf: &mut BytesMut, segment: &str, offset: u64) -> Result<Decoded, LogError> {
        if buf.len() < FRAME_HEADER_SIZE {
            if buf.iter().all(|b| *b == 0) && !buf.is_empty() {
                return Ok(Decoded::Padding);
            }
            return Ok(Decoded::Incomplete);
        }

        let mut header = &buf[..FRAME_HEADER_SIZE];
        let mut magic = [0u8; 4];
        header.copy_to_slice(&mut magic);
        if magic != FRAME_MAGIC {
            if magic == [0; 4] {
                return Ok(Decoded::Padding);
            }
            return Err(LogError::MalformedFrame {
                offset,
                reason: format!("bad magic {:02x?}", magic),
            });
        }

        let version = header.get_u8();
        if version != FRAME_VERSION {
            return Err(LogError::MalformedFrame {
                offset,
                reason: format!("unsupported frame version {}", version),
            });
        }
        let kind = FrameKind::try_from(header.get_u8()).map_err(|k| LogError::MalformedFrame {
            offset,
            reason: format!("unknown frame kind {}", k),
        })?;
        let _reserved = header.get_u16();
        let len = header.get_u32() as usize;
        let checksum = header.get_u32();
        let sequence = header.get_u64();

        if len > MAX_PAYLOAD_SIZE {
            return Err(LogError::FrameTooLarge {
                size: len,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        if buf.len() < FRAME_HEADER_SIZE + len {
            return Ok(Decoded::Incomplete);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(len).freeze();
        let actual = crc32c::crc32c(&payload);
        if actual != checksum {
            return Err(LogError::ChecksumMismatch {
                segment: segment.to_string(),
                offset,
                expected: checksum,
                actual,
            });
        }

        Ok(Decoded::Frame(Frame {
            kind,
            sequence,
            checksum,
            payload,
        }))
    }
}
