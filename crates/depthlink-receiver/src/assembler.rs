//! Per-connection reassembly of chunked payloads.

use std::collections::{BTreeMap, HashMap};

use bytes::{Bytes, BytesMut};
use depthlink_core::{ContentKind, DecodedFrame};
use tracing::{debug, warn};

/// One fully reassembled payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub filename: String,
    pub kind: ContentKind,
    pub data: Bytes,
}

#[derive(Debug)]
struct PartialFile {
    kind: ContentKind,
    chunks: BTreeMap<u32, Bytes>,
    last_seen: bool,
}

impl PartialFile {
    /// Last chunk arrived and every sequence up to the highest one is present.
    fn is_complete(&self) -> bool {
        if !self.last_seen {
            return false;
        }
        match self.chunks.last_key_value() {
            Some((&max, _)) => self.chunks.len() as u64 == u64::from(max) + 1,
            None => false,
        }
    }

    fn join(self) -> Bytes {
        if self.chunks.len() == 1 {
            return self.chunks.into_values().next().unwrap_or_default();
        }
        let len = self.chunks.values().map(Bytes::len).sum();
        let mut out = BytesMut::with_capacity(len);
        for chunk in self.chunks.into_values() {
            out.extend_from_slice(&chunk);
        }
        out.freeze()
    }
}

/// Collects frames keyed by filename until each file is complete.
#[derive(Debug, Default)]
pub struct FileAssembler {
    files: HashMap<String, PartialFile>,
}

impl FileAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame; returns the file it completes, if any.
    pub fn push(&mut self, frame: DecodedFrame) -> Option<ReceivedFile> {
        let DecodedFrame {
            filename,
            kind_tag,
            sequence,
            is_last,
            data,
        } = frame;

        if !self.files.contains_key(&filename) {
            let kind = match ContentKind::try_from(kind_tag) {
                Ok(kind) => kind,
                Err(e) => {
                    warn!("Skipping chunk {} of {:?}: {}", sequence, filename, e);
                    return None;
                }
            };
            self.files.insert(
                filename.clone(),
                PartialFile {
                    kind,
                    chunks: BTreeMap::new(),
                    last_seen: false,
                },
            );
        }
        let entry = self.files.get_mut(&filename)?;

        if entry.chunks.contains_key(&sequence) {
            debug!("Duplicate chunk {} for {:?}; ignoring", sequence, filename);
            return None;
        }
        entry.chunks.insert(sequence, data);
        entry.last_seen |= is_last;

        if !entry.is_complete() {
            return None;
        }
        let partial = self.files.remove(&filename)?;
        Some(ReceivedFile {
            kind: partial.kind,
            data: partial.join(),
            filename,
        })
    }

    /// Files with at least one chunk that are not complete yet.
    pub fn pending(&self) -> usize {
        self.files.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(name: &str, tag: u8, sequence: u32, is_last: bool, data: &'static [u8]) -> DecodedFrame {
        DecodedFrame {
            filename: name.to_owned(),
            kind_tag: tag,
            sequence,
            is_last,
            data: Bytes::from_static(data),
        }
    }

    #[test]
    fn reassembles_in_order() {
        let mut asm = FileAssembler::new();
        assert_eq!(asm.push(frame("a.jpg", 1, 0, false, b"ab")), None);
        assert_eq!(asm.push(frame("a.jpg", 1, 1, false, b"cd")), None);
        let file = asm.push(frame("a.jpg", 1, 2, true, b"e")).unwrap();
        assert_eq!(file.filename, "a.jpg");
        assert_eq!(file.kind, ContentKind::Image);
        assert_eq!(file.data.as_ref(), b"abcde");
        assert_eq!(asm.pending(), 0);
    }

    #[test]
    fn waits_for_gaps_and_orders_by_sequence() {
        let mut asm = FileAssembler::new();
        assert_eq!(asm.push(frame("d.bin", 2, 2, true, b"3")), None);
        assert_eq!(asm.push(frame("d.bin", 2, 0, false, b"1")), None);
        let file = asm.push(frame("d.bin", 2, 1, false, b"2")).unwrap();
        assert_eq!(file.data.as_ref(), b"123");
    }

    #[test]
    fn duplicate_sequence_is_ignored() {
        let mut asm = FileAssembler::new();
        asm.push(frame("m.csv", 3, 0, false, b"x"));
        assert_eq!(asm.push(frame("m.csv", 3, 0, false, b"y")), None);
        let file = asm.push(frame("m.csv", 3, 1, true, b"z")).unwrap();
        assert_eq!(file.data.as_ref(), b"xz");
    }

    #[test]
    fn empty_payload_completes_on_single_frame() {
        let mut asm = FileAssembler::new();
        let file = asm.push(frame("empty.csv", 3, 0, true, b"")).unwrap();
        assert!(file.data.is_empty());
    }

    #[test]
    fn unknown_kind_on_first_chunk_is_skipped() {
        let mut asm = FileAssembler::new();
        assert_eq!(asm.push(frame("x.dat", 0x09, 0, true, b"?")), None);
        assert_eq!(asm.pending(), 0);
    }

    #[test]
    fn interleaved_files_are_kept_apart() {
        let mut asm = FileAssembler::new();
        asm.push(frame("a.jpg", 1, 0, false, b"a0"));
        asm.push(frame("b.jpg", 1, 0, false, b"b0"));
        assert_eq!(asm.pending(), 2);
        let b = asm.push(frame("b.jpg", 1, 1, true, b"b1")).unwrap();
        assert_eq!(b.data.as_ref(), b"b0b1");
        assert_eq!(asm.pending(), 1);
    }
}
