//! Frame encoding and decoding.
//!
//! # Frame layout
//!
//! ```text
//! [0]          name_len   u8      filename length N in bytes (0-255)
//! [1..1+N]     filename   [u8]    UTF-8
//! [1+N]        kind       u8      0x01 image, 0x02 binary, 0x03 metadata
//! [2+N..6+N]   data_len   u32 BE  length of THIS chunk's data
//! [6+N..10+N]  sequence   u32 BE  0-based chunk index within the payload
//! [10+N]       is_last    u8      0x00 / 0x01
//! [11+N..]     data       [u8]    data_len bytes
//! ```
//!
//! There is no padding, magic number or checksum; the stream is a plain
//! concatenation of frames.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::chunker::Chunk;
use crate::errors::WireError;
use crate::types::ContentKind;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Longest filename (in UTF-8 bytes) the length byte can describe.
pub const MAX_FILENAME_LEN: usize = u8::MAX as usize;

/// Header bytes excluding the filename itself.
pub const HEADER_OVERHEAD: usize = 11;

/// Default upper bound the decoder accepts for a single chunk (16 MiB).
pub const DEFAULT_MAX_CHUNK_LEN: u32 = 16 * 1024 * 1024;

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Encoded bytes of one chunk, ready for a single socket write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Bytes,
    /// The filename could not be represented and was sent with length 0.
    pub filename_dropped: bool,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Encode one chunk. Never fails: a filename longer than
/// [`MAX_FILENAME_LEN`] bytes is replaced by an empty one and flagged on the
/// returned [`Frame`] so the caller can log it.
pub fn encode(chunk: &Chunk<'_>) -> Frame {
    let name = chunk.filename.as_bytes();
    let (name, filename_dropped) = if name.len() > MAX_FILENAME_LEN {
        (&[][..], true)
    } else {
        (name, false)
    };

    let mut buf = BytesMut::with_capacity(HEADER_OVERHEAD + name.len() + chunk.data.len());
    buf.put_u8(name.len() as u8);
    buf.put_slice(name);
    buf.put_u8(chunk.kind.tag());
    buf.put_u32(chunk.data.len() as u32);
    buf.put_u32(chunk.sequence);
    buf.put_u8(u8::from(chunk.is_last));
    buf.put_slice(&chunk.data);

    Frame {
        data: buf.freeze(),
        filename_dropped,
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// One frame as seen by a collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub filename: String,
    /// Raw tag; unknown tags are kept so the collector can skip them.
    pub kind_tag: u8,
    pub sequence: u32,
    pub is_last: bool,
    pub data: Bytes,
}

impl DecodedFrame {
    pub fn kind(&self) -> Result<ContentKind, WireError> {
        ContentKind::try_from(self.kind_tag)
    }
}

/// Incremental decoder over a growing stream buffer.
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    max_chunk_len: u32,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNK_LEN)
    }
}

impl FrameDecoder {
    pub fn new(max_chunk_len: u32) -> Self {
        Self { max_chunk_len }
    }

    /// Pull the next complete frame off the front of `buf`.
    ///
    /// Returns `Ok(None)` while the frame is still incomplete; nothing is
    /// consumed in that case. A recoverable error (see
    /// [`WireError::is_recoverable`]) consumes the bad frame so decoding can
    /// continue; [`WireError::ChunkTooLarge`] leaves the buffer untouched and
    /// the stream should be dropped.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<DecodedFrame>, WireError> {
        let Some(&name_len) = buf.first() else {
            return Ok(None);
        };
        let name_len = name_len as usize;
        let header_len = HEADER_OVERHEAD + name_len;
        if buf.len() < header_len {
            return Ok(None);
        }

        let len_at = 2 + name_len;
        let data_len = u32::from_be_bytes([
            buf[len_at],
            buf[len_at + 1],
            buf[len_at + 2],
            buf[len_at + 3],
        ]);
        if data_len > self.max_chunk_len {
            return Err(WireError::ChunkTooLarge {
                len: data_len,
                max: self.max_chunk_len,
            });
        }
        if buf.len() < header_len + data_len as usize {
            return Ok(None);
        }

        let mut header = buf.split_to(header_len);
        let data = buf.split_to(data_len as usize).freeze();

        header.advance(1);
        let name = header.split_to(name_len);
        let kind_tag = header.get_u8();
        let _ = header.get_u32();
        let sequence = header.get_u32();
        let last = header.get_u8();

        let filename = String::from_utf8(name.to_vec()).map_err(|_| WireError::InvalidFilename)?;
        let is_last = match last {
            0 => false,
            1 => true,
            other => return Err(WireError::InvalidLastFlag(other)),
        };

        Ok(Some(DecodedFrame {
            filename,
            kind_tag,
            sequence,
            is_last,
            data,
        }))
    }
}
