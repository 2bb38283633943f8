//! Splitting of command payloads into frame-sized chunks.
//!
//! A payload is described as an ordered list of fields. Chunks are packed greedily with whole
//! fields, so a length prefix always travels together with whatever precedes it in the same
//! field. A single field longer than a whole chunk is the only thing that is ever cut.

use alloc::vec::Vec;

/// One frame worth of payload, with its position in the command it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub total: usize,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn is_last(&self) -> bool {
        self.index + 1 == self.total
    }
}

/// Packs `fields` into payloads of at most `max_len` bytes.
///
/// Empty fields are skipped; if every field is empty, no chunk is produced.
pub fn chunk_fields(fields: &[&[u8]], max_len: usize) -> Vec<Vec<u8>> {
    assert!(max_len > 0, "chunks must be able to hold at least one byte");

    let mut chunks: Vec<Vec<u8>> = Vec::new();
    let mut current: Vec<u8> = Vec::with_capacity(max_len);

    for field in fields.iter().filter(|f| !f.is_empty()) {
        if current.len() + field.len() <= max_len {
            current.extend_from_slice(field);
            continue;
        }
        if !current.is_empty() {
            chunks.push(core::mem::replace(&mut current, Vec::with_capacity(max_len)));
        }
        if field.len() <= max_len {
            current.extend_from_slice(field);
            continue;
        }
        for piece in field.chunks(max_len) {
            if piece.len() == max_len {
                chunks.push(piece.to_vec());
            } else {
                current.extend_from_slice(piece);
            }
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
