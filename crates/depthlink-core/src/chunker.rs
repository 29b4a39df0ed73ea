//! Splits a logical payload into bounded, ordered chunks.
//!
//! ```text
//! payload (2500 bytes), chunk size 1024
//!   seq 0  [0..1024)     is_last = false
//!   seq 1  [1024..2048)  is_last = false
//!   seq 2  [2048..2500)  is_last = true
//! ```
//!
//! An empty payload still yields one empty chunk marked last, so the
//! collector always observes the end of every stream.

use std::iter::FusedIterator;
use std::num::NonZeroUsize;

use bytes::Bytes;

use crate::types::ContentKind;

/// Chunk size used when none is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

// MARK: - Payload

/// One logical file handed over by a producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub kind: ContentKind,
    pub filename: String,
    pub data: Bytes,
}

impl Payload {
    pub fn new(kind: ContentKind, filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            kind,
            filename: filename.into(),
            data: data.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// MARK: - Chunk

/// A bounded slice of a [`Payload`]. `data` shares the payload's buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub kind: ContentKind,
    pub filename: &'a str,
    pub data: Bytes,
    pub sequence: u32,
    pub is_last: bool,
}

// MARK: - Chunker

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: NonZeroUsize,
}

impl Chunker {
    /// Sizes above `u32::MAX` are clamped: the frame length field is 32 bits.
    pub fn new(chunk_size: NonZeroUsize) -> Self {
        let max = NonZeroUsize::new(u32::MAX as usize).unwrap_or(NonZeroUsize::MIN);
        Self { chunk_size: chunk_size.min(max) }
    }

    pub fn chunk_size(&self) -> NonZeroUsize {
        self.chunk_size
    }

    /// Lazily split `payload` into chunks in transmission order.
    pub fn split<'a>(&self, payload: &'a Payload) -> Chunks<'a> {
        Chunks {
            payload,
            chunk_size: self.chunk_size.get(),
            offset: 0,
            sequence: 0,
            done: false,
        }
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroUsize::MIN))
    }
}

/// Number of chunks a payload of `len` bytes produces (never zero).
pub fn chunk_count(len: usize, chunk_size: NonZeroUsize) -> usize {
    len.div_ceil(chunk_size.get()).max(1)
}

// MARK: - Chunks iterator

pub struct Chunks<'a> {
    payload: &'a Payload,
    chunk_size: usize,
    offset: usize,
    sequence: u32,
    done: bool,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let total = self.payload.data.len();
        let take = self.chunk_size.min(total - self.offset);
        let end = self.offset + take;
        let is_last = end >= total;

        let chunk = Chunk {
            kind: self.payload.kind,
            filename: &self.payload.filename,
            data: self.payload.data.slice(self.offset..end),
            sequence: self.sequence,
            is_last,
        };

        self.offset = end;
        self.sequence = self.sequence.wrapping_add(1);
        self.done = is_last;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.done {
            0
        } else {
            (self.payload.data.len() - self.offset)
                .div_ceil(self.chunk_size)
                .max(1)
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks<'_> {}

impl FusedIterator for Chunks<'_> {}
